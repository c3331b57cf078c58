//! Stage side effects.
//!
//! Each stage applies its external changes, verifies them, and records the
//! outcome in the status store before returning. Failures are recorded with
//! the partial progress so a re-run knows what is left to converge.

use super::{Pipeline, StagePlan, ensure_stage_allowed, ensure_train_ready};
use crate::error::{Error, Result};
use crate::forge::Forge;
use crate::types::{BranchRelease, Stage, StageRecord};
use serde_json::Value;
use tracing::{info, warn};

/// Path of the package-version pin list inside fc-nixos
const PACKAGE_VERSIONS_PATH: &str = "release/package-versions.json";

/// Path of the dependency pin file inside fc-nixos
const VERSIONS_PATH: &str = "release/versions.json";

/// Relative path of the collected changelog
const CHANGELOG_PATH: &str = "changelog.d/CHANGELOG.md";

/// Annotated tag name for one released branch
pub(crate) fn tag_name(release_id: &str, version: &str) -> String {
    format!("release/{release_id}/{version}")
}

/// Per-package version changes between two pin lists, in the order of the
/// old list. Unchanged packages are omitted.
pub(crate) fn package_diff_lines(old: &Value, new: &Value) -> Vec<String> {
    let (Some(old), Some(new)) = (old.as_object(), new.as_object()) else {
        return Vec::new();
    };
    let mut lines = Vec::new();
    for (pkg, old_entry) in old {
        let old_version = old_entry.get("version").and_then(Value::as_str);
        let new_version = new
            .get(pkg)
            .and_then(|e| e.get("version"))
            .and_then(Value::as_str);
        match (old_version, new_version) {
            (None, Some(_)) => lines.push(format!("{pkg}: (old version missing)")),
            (Some(_), None) => lines.push(format!("{pkg}: (new version missing)")),
            (Some(o), Some(n)) if o != n => lines.push(format!("{pkg}: {o} -> {n}")),
            _ => {}
        }
    }
    lines
}

/// Changelog input for one released branch
pub(crate) struct BranchChangelog {
    pub version: String,
    pub old_rev: String,
    pub new_rev: String,
    pub package_lines: Vec<String>,
    pub nixpkgs_revs: Option<(String, String)>,
}

/// Render the changelog fragment for one release cycle
pub(crate) fn render_fragment(
    release_id: &str,
    release_date: &str,
    fc_repo: &str,
    nixpkgs_repo: &str,
    entries: &[BranchChangelog],
) -> String {
    let mut out = format!("# Release {release_id} ({release_date})\n");

    for entry in entries {
        if entry.package_lines.is_empty() {
            continue;
        }
        out.push_str(&format!("\n## NixOS {} platform\n\n", entry.version));
        out.push_str("- Pull upstream NixOS changes, security fixes, and package updates:\n");
        for line in &entry.package_lines {
            out.push_str(&format!("    - {line}\n"));
        }
    }

    out.push_str("\n## Detailed Changes\n\n");
    for entry in entries {
        // a fast-forwarded release has no range to compare
        if entry.old_rev != entry.new_rev {
            out.push_str(&format!(
                "- NixOS {}: [platform code](https://github.com/{fc_repo}/compare/{}...{})\n",
                entry.version, entry.old_rev, entry.new_rev
            ));
        }
        if let Some((old, new)) = &entry.nixpkgs_revs {
            out.push_str(&format!(
                "- NixOS {}: [nixpkgs/upstream changes](https://github.com/{nixpkgs_repo}/compare/{old}...{new})\n",
                entry.version
            ));
        }
    }
    out
}

fn nixpkgs_rev(versions: &Value) -> Option<String> {
    versions
        .get("nixpkgs")
        .and_then(|n| n.get("rev"))
        .and_then(Value::as_str)
        .map(String::from)
}

impl Pipeline {
    fn tracked_branch(&self, version: &str) -> Result<BranchRelease> {
        self.train.branch(version).cloned().ok_or_else(|| {
            Error::Pipeline(format!(
                "branch '{version}' is not tracked; run `fc-release add-branch {version}` first"
            ))
        })
    }

    /// Record a failure without masking the error that caused it
    fn note_branch_failure(&mut self, version: &str, stage: Stage, detail: &str) {
        let record = StageRecord::failure(stage, detail);
        if let Err(save_err) =
            self.store
                .record_branch_outcome(&mut self.train, version, record)
        {
            warn!(%save_err, version, %stage, "failed to record stage failure");
        }
    }

    fn note_train_failure(&mut self, stage: Stage, detail: &str) {
        let record = StageRecord::failure(stage, detail);
        if let Err(save_err) = self.store.record_train_outcome(&mut self.train, record) {
            warn!(%save_err, %stage, "failed to record stage failure");
        }
    }

    /// `add-branch`: register a platform version and verify its remote
    /// branches. Records the staging head the release starts from.
    pub fn add_branch(&mut self, version: &str) -> Result<()> {
        self.release_id()?;
        if self.train.branch(version).is_none() {
            self.train.branches.push(BranchRelease::new(version));
        }
        let branch = self.tracked_branch(version)?;

        match ensure_stage_allowed(&branch, Stage::Init)? {
            StagePlan::VerifyOnly => {
                self.verify_remote_branches(&branch)?;
                info!(version, "branch already initialized");
                Ok(())
            }
            StagePlan::Run => match self.apply_init(&branch) {
                Ok(staging_commit) => {
                    if let Some(b) = self.train.branch_mut(version) {
                        b.orig_staging_commit = staging_commit.clone();
                    }
                    self.store.record_branch_outcome(
                        &mut self.train,
                        version,
                        StageRecord::success(
                            Stage::Init,
                            Some(format!("staging at {staging_commit}")),
                        ),
                    )?;
                    info!(version, staging_commit, "branch registered");
                    Ok(())
                }
                Err(err) => {
                    self.note_branch_failure(version, Stage::Init, &err.to_string());
                    Err(err)
                }
            },
        }
    }

    fn verify_remote_branches(&self, branch: &BranchRelease) -> Result<()> {
        for name in [
            branch.branch_dev(),
            branch.branch_stag(),
            branch.branch_prod(),
        ] {
            if self.repo.rev_parse_opt(&format!("origin/{name}"))?.is_none() {
                return Err(Error::Pipeline(format!(
                    "branch '{name}' does not exist on origin"
                )));
            }
        }
        Ok(())
    }

    fn apply_init(&self, branch: &BranchRelease) -> Result<String> {
        self.repo.ensure_repo()?;
        self.verify_remote_branches(branch)?;
        self.repo.checkout(&branch.branch_dev(), true, true)?;
        self.repo.checkout(&branch.branch_stag(), true, true)?;
        self.repo.checkout(&branch.branch_prod(), true, true)?;
        self.repo.rev_parse(&branch.branch_stag())
    }

    /// `test-branch`: the staging head must have green CI before it may be
    /// merged to production.
    pub async fn test_branch(&mut self, forge: &dyn Forge, version: &str) -> Result<()> {
        let branch = self.tracked_branch(version)?;
        match ensure_stage_allowed(&branch, Stage::TestBranch)? {
            StagePlan::VerifyOnly => {
                info!(version, "staging already verified");
                Ok(())
            }
            StagePlan::Run => {
                let result = self.apply_test_branch(forge, &branch).await;
                match result {
                    Ok(commit) => {
                        self.store.record_branch_outcome(
                            &mut self.train,
                            version,
                            StageRecord::success(
                                Stage::TestBranch,
                                Some(format!("checks green at {commit}")),
                            ),
                        )?;
                        info!(version, commit, "staging checks green");
                        Ok(())
                    }
                    Err(err) => {
                        self.note_branch_failure(version, Stage::TestBranch, &err.to_string());
                        Err(err)
                    }
                }
            }
        }
    }

    async fn apply_test_branch(
        &self,
        forge: &dyn Forge,
        branch: &BranchRelease,
    ) -> Result<String> {
        self.repo.ensure_repo()?;
        let commit = self
            .repo
            .rev_parse(&format!("origin/{}", branch.branch_stag()))?;
        let failing = forge.failing_checks(&commit).await?;
        if !failing.is_empty() {
            return Err(Error::Pipeline(format!(
                "CI not green for {} ({commit}): failing checks: {}",
                branch.branch_stag(),
                failing.join(", ")
            )));
        }
        Ok(commit)
    }

    /// `merge-production`: merge staging into production, backmerge
    /// production into dev, push all three branches. A re-run after a
    /// partial failure converges on the remote state instead of repeating
    /// completed merges.
    pub fn merge_production(&mut self, version: &str) -> Result<()> {
        let release_id = self.release_id()?;
        let branch = self.tracked_branch(version)?;

        match ensure_stage_allowed(&branch, Stage::MergeProduction)? {
            StagePlan::VerifyOnly => {
                if branch.new_production_commit.is_empty() {
                    return Err(Error::Pipeline(format!(
                        "merge recorded for {version} without a production commit; \
                         state file needs repair"
                    )));
                }
                self.repo.ensure_repo()?;
                let production = format!("origin/{}", branch.branch_prod());
                if !self
                    .repo
                    .is_ancestor(&branch.new_production_commit, &production)?
                {
                    return Err(Error::Pipeline(format!(
                        "recorded production commit {} is not on {production}",
                        branch.new_production_commit
                    )));
                }
                info!(version, "production merge already applied");
                Ok(())
            }
            StagePlan::Run => {
                let mut progress: Vec<&str> = Vec::new();
                match self.apply_merge(&release_id, &branch, &mut progress) {
                    Ok(new_commit) => {
                        if let Some(b) = self.train.branch_mut(version) {
                            b.new_production_commit = new_commit.clone();
                        }
                        self.store.record_branch_outcome(
                            &mut self.train,
                            version,
                            StageRecord::success(
                                Stage::MergeProduction,
                                Some(format!("production at {new_commit}")),
                            ),
                        )?;
                        info!(version, new_commit, "staging merged to production");
                        Ok(())
                    }
                    Err(err) => {
                        let detail = if progress.is_empty() {
                            format!("{err}; nothing applied")
                        } else {
                            format!("{err}; completed: {}", progress.join(", "))
                        };
                        self.note_branch_failure(version, Stage::MergeProduction, &detail);
                        Err(Error::PartialStage {
                            branch: version.to_string(),
                            stage: Stage::MergeProduction,
                            detail,
                        })
                    }
                }
            }
        }
    }

    fn apply_merge(
        &self,
        release_id: &str,
        branch: &BranchRelease,
        progress: &mut Vec<&'static str>,
    ) -> Result<String> {
        let dev = branch.branch_dev();
        let staging = branch.branch_stag();
        let production = branch.branch_prod();

        self.repo.ensure_repo()?;
        self.repo.checkout(&dev, true, true)?;
        self.repo.checkout(&staging, true, true)?;
        self.repo.checkout(&production, true, true)?;
        progress.push("fetched");

        // a previous partial run may already have merged
        if self.repo.is_ancestor(&staging, &production)? {
            info!(version = branch.version, "staging already merged");
        } else {
            let message =
                format!("Merge branch '{staging}' into '{production}' for release {release_id}");
            self.repo.merge(&staging, &message)?;
        }
        progress.push("merged");
        let new_commit = self.repo.rev_parse(&production)?;

        self.repo.checkout(&dev, false, false)?;
        if !self.repo.is_ancestor(&production, &dev)? {
            let message =
                format!("Backmerge branch '{production}' into '{dev}' for release {release_id}");
            self.repo.merge(&production, &message)?;
        }
        progress.push("backmerged");

        self.repo.push(&[&dev, &staging, &production])?;
        progress.push("pushed");
        Ok(new_commit)
    }

    /// `release-production`: the merged production commit must have green CI
    /// before the branch counts as released.
    pub async fn release_production(&mut self, forge: &dyn Forge, version: &str) -> Result<()> {
        let branch = self.tracked_branch(version)?;
        match ensure_stage_allowed(&branch, Stage::ReleaseProduction)? {
            StagePlan::VerifyOnly => {
                info!(version, "production already verified");
                Ok(())
            }
            StagePlan::Run => {
                let result = self.apply_release_production(forge, &branch).await;
                match result {
                    Ok(commit) => {
                        self.store.record_branch_outcome(
                            &mut self.train,
                            version,
                            StageRecord::success(
                                Stage::ReleaseProduction,
                                Some(format!("released {commit}")),
                            ),
                        )?;
                        info!(version, commit, "production released");
                        Ok(())
                    }
                    Err(err) => {
                        self.note_branch_failure(
                            version,
                            Stage::ReleaseProduction,
                            &err.to_string(),
                        );
                        Err(err)
                    }
                }
            }
        }
    }

    async fn apply_release_production(
        &self,
        forge: &dyn Forge,
        branch: &BranchRelease,
    ) -> Result<String> {
        if branch.new_production_commit.is_empty() {
            return Err(Error::Pipeline(format!(
                "no production commit recorded for {}; re-run `fc-release merge-production {}`",
                branch.version, branch.version
            )));
        }
        self.repo.ensure_repo()?;
        let production = branch.branch_prod();
        let head = self.repo.rev_parse(&format!("origin/{production}"))?;
        if head != branch.new_production_commit {
            return Err(Error::Pipeline(format!(
                "{production} advanced to {head}, expected {}; production must \
                 progress only through this release",
                branch.new_production_commit
            )));
        }
        let failing = forge.failing_checks(&head).await?;
        if !failing.is_empty() {
            return Err(Error::Pipeline(format!(
                "CI not green for {production} ({head}): failing checks: {}",
                failing.join(", ")
            )));
        }
        Ok(head)
    }

    /// `doc`: collect the changelog for the whole train and commit it to
    /// the dev branch of the newest released version.
    pub fn doc(&mut self, fc_repo: &str, nixpkgs_repo: &str) -> Result<()> {
        ensure_train_ready(&self.train, Stage::Doc)?;
        if self.train.is_done(Stage::Doc) {
            info!("changelog already collected");
            return Ok(());
        }

        match self.apply_doc(fc_repo, nixpkgs_repo) {
            Ok(detail) => {
                self.store.record_train_outcome(
                    &mut self.train,
                    StageRecord::success(Stage::Doc, Some(detail)),
                )?;
                Ok(())
            }
            Err(err) => {
                self.note_train_failure(Stage::Doc, &err.to_string());
                Err(err)
            }
        }
    }

    fn apply_doc(&self, fc_repo: &str, nixpkgs_repo: &str) -> Result<String> {
        let release_id = self.release_id()?;
        let release_date = self
            .train
            .release_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unscheduled".to_string());

        self.repo.ensure_repo()?;

        let mut entries = Vec::new();
        for branch in &self.train.branches {
            entries.push(self.branch_changelog(branch)?);
        }

        let fragment =
            render_fragment(&release_id, &release_date, fc_repo, nixpkgs_repo, &entries);

        // the newest version's dev branch carries the collected changelog
        let target = self
            .train
            .branches
            .iter()
            .map(|b| b.version.clone())
            .max()
            .ok_or_else(|| Error::Pipeline("no branches registered".to_string()))?;
        let dev = format!("fc-{target}-dev");
        self.repo.checkout(&dev, true, true)?;

        let changelog = self.repo.file_path(CHANGELOG_PATH);
        let Some(parent) = changelog.parent() else {
            return Err(Error::Pipeline(format!("invalid path {CHANGELOG_PATH}")));
        };
        if !parent.exists() {
            warn!(path = %parent.display(), "changelog directory missing, skipping");
            return Ok(format!("skipped: {} not present", parent.display()));
        }

        let existing = if changelog.exists() {
            std::fs::read_to_string(&changelog)?
        } else {
            String::new()
        };
        std::fs::write(&changelog, format!("{fragment}\n{existing}"))?;
        self.repo.add(&[CHANGELOG_PATH])?;
        self.repo
            .commit(&format!("Collect changelog fragments for release {release_id}"))?;
        self.repo.push(&[&dev])?;

        info!(branch = dev, "changelog committed");
        Ok(format!("changelog committed to {dev}"))
    }

    fn branch_changelog(&self, branch: &BranchRelease) -> Result<BranchChangelog> {
        let new_rev = branch.new_production_commit.clone();
        if new_rev.is_empty() {
            return Err(Error::Pipeline(format!(
                "no production commit recorded for {}",
                branch.version
            )));
        }
        // the first parent of the merge commit is the pre-release production
        // head; a fast-forwarded release has no separate old state
        let old_rev = if self.repo.rev_parse_opt(&format!("{new_rev}^2"))?.is_some() {
            self.repo.rev_parse(&format!("{new_rev}^1"))?
        } else {
            new_rev.clone()
        };

        let package_lines = if old_rev == new_rev {
            Vec::new()
        } else {
            match (
                self.show_json(&old_rev, PACKAGE_VERSIONS_PATH),
                self.show_json(&new_rev, PACKAGE_VERSIONS_PATH),
            ) {
                (Some(old), Some(new)) => package_diff_lines(&old, &new),
                _ => {
                    warn!(
                        version = branch.version,
                        "no {PACKAGE_VERSIONS_PATH}, skipping package diff"
                    );
                    Vec::new()
                }
            }
        };

        let nixpkgs_revs = match (
            self.show_json(&old_rev, VERSIONS_PATH),
            self.show_json(&new_rev, VERSIONS_PATH),
        ) {
            (Some(old), Some(new)) => match (nixpkgs_rev(&old), nixpkgs_rev(&new)) {
                (Some(o), Some(n)) if o != n => Some((o, n)),
                _ => None,
            },
            _ => None,
        };

        Ok(BranchChangelog {
            version: branch.version.clone(),
            old_rev,
            new_rev,
            package_lines,
            nixpkgs_revs,
        })
    }

    fn show_json(&self, rev: &str, path: &str) -> Option<Value> {
        let content = self.repo.show(rev, path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// `tag`: annotated `release/{id}/{version}` tags at the recorded
    /// production commits, pushed to origin. Existing correct tags are
    /// verified; a tag pointing elsewhere is an error, never moved.
    pub fn tag(&mut self) -> Result<()> {
        ensure_train_ready(&self.train, Stage::Tag)?;
        let release_id = self.release_id()?;

        self.repo.ensure_repo()?;
        let versions: Vec<String> = self
            .train
            .branches
            .iter()
            .map(|b| b.version.clone())
            .collect();

        for version in versions {
            let branch = self.tracked_branch(&version)?;
            let name = tag_name(&release_id, &version);
            let target = branch.new_production_commit.clone();
            if target.is_empty() {
                return Err(Error::Pipeline(format!(
                    "no production commit recorded for {version}"
                )));
            }

            match self.repo.tag_target(&name)? {
                Some(existing) if existing == target => {
                    info!(tag = name, "tag already in place");
                }
                Some(existing) => {
                    return Err(Error::Pipeline(format!(
                        "tag {name} already exists at {existing}, expected {target}; \
                         refusing to move it"
                    )));
                }
                None => {
                    let result = self
                        .repo
                        .tag(&name, &target, &format!("Release {release_id}"))
                        .and_then(|()| self.repo.push(&[&format!("refs/tags/{name}")]));
                    if let Err(err) = result {
                        self.note_branch_failure(&version, Stage::Tag, &err.to_string());
                        return Err(err);
                    }
                    info!(tag = name, commit = target, "tagged");
                }
            }
            self.store.record_branch_outcome(
                &mut self.train,
                &version,
                StageRecord::success(Stage::Tag, Some(name)),
            )?;
        }

        info!(release_id, "release cycle complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tag_name_includes_release_and_version() {
        assert_eq!(tag_name("2026_034", "24.05"), "release/2026_034/24.05");
    }

    #[test]
    fn package_diff_reports_changes_and_removals() {
        let old = json!({
            "nginx": {"version": "1.24.0"},
            "postgresql": {"version": "15.4"},
            "dropped": {"version": "1.0"},
        });
        let new = json!({
            "nginx": {"version": "1.26.0"},
            "postgresql": {"version": "15.4"},
        });

        let lines = package_diff_lines(&old, &new);
        assert!(lines.contains(&"nginx: 1.24.0 -> 1.26.0".to_string()));
        assert!(lines.contains(&"dropped: (new version missing)".to_string()));
        assert!(!lines.iter().any(|l| l.starts_with("postgresql")));
    }

    #[test]
    fn fragment_contains_compare_links() {
        let entries = vec![BranchChangelog {
            version: "24.05".to_string(),
            old_rev: "aaa111".to_string(),
            new_rev: "bbb222".to_string(),
            package_lines: vec!["nginx: 1.24.0 -> 1.26.0".to_string()],
            nixpkgs_revs: Some(("ccc333".to_string(), "ddd444".to_string())),
        }];
        let fragment = render_fragment(
            "2026_034",
            "2026-08-24",
            "flyingcircusio/fc-nixos",
            "flyingcircusio/nixpkgs",
            &entries,
        );

        assert!(fragment.starts_with("# Release 2026_034 (2026-08-24)"));
        assert!(fragment.contains("## NixOS 24.05 platform"));
        assert!(fragment.contains("    - nginx: 1.24.0 -> 1.26.0"));
        assert!(fragment.contains("fc-nixos/compare/aaa111...bbb222"));
        assert!(fragment.contains("nixpkgs/compare/ccc333...ddd444"));
    }

    #[test]
    fn fragment_without_package_changes_skips_platform_section() {
        let entries = vec![BranchChangelog {
            version: "24.05".to_string(),
            old_rev: "aaa".to_string(),
            new_rev: "aaa".to_string(),
            package_lines: Vec::new(),
            nixpkgs_revs: None,
        }];
        let fragment = render_fragment(
            "2026_034",
            "2026-08-24",
            "flyingcircusio/fc-nixos",
            "flyingcircusio/nixpkgs",
            &entries,
        );
        assert!(!fragment.contains("platform"));
        // a fast-forwarded release gets no aaa...aaa compare link
        assert!(!fragment.contains("compare"));
        assert!(fragment.contains("## Detailed Changes"));
    }
}
