//! Dependency-update bot for the nixpkgs pin.
//!
//! Compares the revision pinned in `release/versions.json` against the
//! upstream branch head and, when they differ (or `force` is set), stages
//! an update: the target revision is mirrored to the nixpkgs fork under a
//! branch named after the revision itself, the pin is advanced on a
//! matching fc-nixos branch, and a PR is opened if none exists. Naming the
//! branch after the target revision makes concurrent scheduled and manual
//! runs collide on the same branch instead of duplicating it.

use crate::error::{Error, Result};
use crate::forge::Forge;
use crate::git::GitRepo;
use crate::notify::Notifier;
use crate::types::UpdateOutcome;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, info};

/// Path of the dependency pin file inside fc-nixos
const VERSIONS_PATH: &str = "release/versions.json";

/// Namespace of the deterministic update branches
const UPDATE_BRANCH_PREFIX: &str = "nixpkgs-update/";

/// Update branch for a target revision, shared between the nixpkgs fork
/// and fc-nixos
pub fn integration_branch(rev: &str) -> String {
    format!("{UPDATE_BRANCH_PREFIX}{}", rev.get(..12).unwrap_or(rev))
}

/// Update branches that are candidates for deletion: everything under the
/// update namespace except the branch for the currently pinned revision.
/// Whether a candidate still has an open PR is checked separately.
pub(crate) fn stale_update_branches(branches: &[String], keep: &str) -> Vec<String> {
    branches
        .iter()
        .filter(|b| b.starts_with(UPDATE_BRANCH_PREFIX) && b.as_str() != keep)
        .cloned()
        .collect()
}

/// What a run should do, derived from the pin, the upstream head and the
/// state of the update branch on the fork
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateDecision {
    /// Pin already matches upstream, nothing to do
    NoOp,
    /// Stage the update; `reuse_branch` means the deterministic branch
    /// already exists on the fork (success-so-far, not a conflict)
    Stage {
        /// An earlier run already pushed the update branch
        reuse_branch: bool,
    },
}

impl UpdateDecision {
    /// Decide based on the pinned and latest revisions, the force flag and
    /// the revision the update branch currently points at on the fork (if
    /// it exists).
    pub fn decide(pinned: &str, latest: &str, force: bool, branch_head: Option<&str>) -> Self {
        if pinned == latest && !force {
            return Self::NoOp;
        }
        Self::Stage {
            reuse_branch: branch_head.is_some(),
        }
    }
}

/// Checkout locations and remote URLs for one update run
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Managed fc-nixos checkout
    pub fc_nixos_dir: PathBuf,
    /// Local nixpkgs mirror checkout
    pub nixpkgs_dir: PathBuf,
    /// Upstream nixpkgs URL the pin tracks
    pub upstream_url: String,
    /// URL of the nixpkgs fork update branches are pushed to
    pub origin_url: String,
    /// URL of the fc-nixos origin
    pub fc_nixos_origin_url: String,
    /// Stage even when the pin already matches upstream
    pub force: bool,
}

/// The update bot for one platform version
pub struct UpdateBot<'a> {
    forge: &'a dyn Forge,
    notifier: &'a Notifier,
    /// Platform version whose dev branch receives the update
    platform_version: &'a str,
    /// Upstream branch the pin tracks, e.g. `nixos-25.05`
    upstream_branch: &'a str,
    /// Fork repository in owner/repo form, for the PR body link
    nixpkgs_repo_name: &'a str,
    opts: &'a UpdateOptions,
}

impl<'a> UpdateBot<'a> {
    /// Bot updating `platform_version` from `upstream_branch`
    pub fn new(
        forge: &'a dyn Forge,
        notifier: &'a Notifier,
        platform_version: &'a str,
        upstream_branch: &'a str,
        nixpkgs_repo_name: &'a str,
        opts: &'a UpdateOptions,
    ) -> Self {
        Self {
            forge,
            notifier,
            platform_version,
            upstream_branch,
            nixpkgs_repo_name,
            opts,
        }
    }

    fn dev_branch(&self) -> String {
        format!("fc-{}-dev", self.platform_version)
    }

    /// Compare pin and upstream, stage an update if needed
    pub async fn run(&self) -> Result<UpdateOutcome> {
        let fc_nixos = GitRepo::new(&self.opts.fc_nixos_dir, self.opts.fc_nixos_origin_url.clone());
        let nixpkgs = GitRepo::new(&self.opts.nixpkgs_dir, self.opts.origin_url.clone());

        fc_nixos.ensure_repo()?;
        let pinned = self.pinned_revision(&fc_nixos)?;
        let latest = fc_nixos
            .ls_remote(
                &self.opts.upstream_url,
                &format!("refs/heads/{}", self.upstream_branch),
            )?
            .ok_or_else(|| {
                Error::Pipeline(format!(
                    "upstream branch '{}' not found at {}",
                    self.upstream_branch, self.opts.upstream_url
                ))
            })?;

        let branch = integration_branch(&latest);
        let branch_head =
            fc_nixos.ls_remote(&self.opts.origin_url, &format!("refs/heads/{branch}"))?;

        match UpdateDecision::decide(&pinned, &latest, self.opts.force, branch_head.as_deref()) {
            UpdateDecision::NoOp => {
                info!(pinned, "nixpkgs pin is current");
                Ok(UpdateOutcome::NoOp { pinned })
            }
            UpdateDecision::Stage { reuse_branch } => {
                let result = self
                    .stage(&fc_nixos, &nixpkgs, &pinned, &latest, &branch, reuse_branch)
                    .await;
                if let Err(err) = &result {
                    self.notifier
                        .try_send(&format!(
                            "update-nixpkgs: ERROR staging update for `{}` failed: {err}",
                            self.dev_branch()
                        ))
                        .await;
                }
                result
            }
        }
    }

    /// After an update PR merges: promote the pinned revision to the fork's
    /// tracking branch and drop update branches whose PR is no longer open.
    /// Returns the deleted branch names.
    pub async fn cleanup(&self) -> Result<Vec<String>> {
        let result = self.apply_cleanup().await;
        if let Err(err) = &result {
            self.notifier
                .try_send(&format!(
                    "update-nixpkgs: ERROR cleanup for `{}` failed: {err}",
                    self.dev_branch()
                ))
                .await;
        }
        result
    }

    async fn apply_cleanup(&self) -> Result<Vec<String>> {
        let fc_nixos = GitRepo::new(&self.opts.fc_nixos_dir, self.opts.fc_nixos_origin_url.clone());
        let nixpkgs = GitRepo::new(&self.opts.nixpkgs_dir, self.opts.origin_url.clone());

        fc_nixos.ensure_repo()?;
        let pinned = self.pinned_revision(&fc_nixos)?;
        let keep = integration_branch(&pinned);

        nixpkgs.ensure_repo()?;
        if nixpkgs.rev_parse_opt(&pinned)?.is_none() {
            nixpkgs.fetch(&self.opts.upstream_url, &[self.upstream_branch])?;
        }
        if nixpkgs.rev_parse_opt(&pinned)?.is_none() {
            return Err(Error::Pipeline(format!(
                "pinned revision {pinned} is not reachable from {} or {}",
                self.opts.origin_url, self.opts.upstream_url
            )));
        }
        // the fork's tracking branch follows what the dev branch pins
        nixpkgs.push_refspec(
            &self.opts.origin_url,
            &format!("{pinned}:refs/heads/{}", self.upstream_branch),
            true,
        )?;
        info!(
            rev = pinned,
            branch = self.upstream_branch,
            "fork tracking branch promoted"
        );

        let advertised = nixpkgs.ls_remote_heads(
            &self.opts.origin_url,
            &format!("refs/heads/{UPDATE_BRANCH_PREFIX}*"),
        )?;

        let mut deleted = Vec::new();
        for branch in stale_update_branches(&advertised, &keep) {
            if self.forge.find_existing_pr(&branch).await?.is_some() {
                debug!(branch, "update PR still open, keeping branch");
                continue;
            }
            nixpkgs.push_refspec(&self.opts.origin_url, &format!(":refs/heads/{branch}"), false)?;
            // the same-named pin branch on fc-nixos goes with it
            if let Err(err) = self.forge.delete_branch(&branch).await {
                debug!(branch, %err, "pin branch cleanup failed");
            }
            info!(branch, "stale update branch deleted");
            deleted.push(branch);
        }
        Ok(deleted)
    }

    fn pinned_revision(&self, fc_nixos: &GitRepo) -> Result<String> {
        let content = fc_nixos.show(&format!("origin/{}", self.dev_branch()), VERSIONS_PATH)?;
        let versions: Value = serde_json::from_str(&content)
            .map_err(|e| Error::Pipeline(format!("unparseable {VERSIONS_PATH}: {e}")))?;
        versions
            .get("nixpkgs")
            .and_then(|n| n.get("rev"))
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| {
                Error::Pipeline(format!("{VERSIONS_PATH} carries no nixpkgs.rev pin"))
            })
    }

    async fn stage(
        &self,
        fc_nixos: &GitRepo,
        nixpkgs: &GitRepo,
        pinned: &str,
        latest: &str,
        branch: &str,
        reuse_branch: bool,
    ) -> Result<UpdateOutcome> {
        // mirror the target revision to the fork under the update branch
        nixpkgs.ensure_repo()?;
        nixpkgs.fetch(&self.opts.upstream_url, &[self.upstream_branch])?;
        if nixpkgs.rev_parse_opt(latest)?.is_none() {
            return Err(Error::Pipeline(format!(
                "revision {latest} not reachable after fetching {}",
                self.opts.upstream_url
            )));
        }
        nixpkgs.push_refspec(
            &self.opts.origin_url,
            &format!("{latest}:refs/heads/{branch}"),
            true,
        )?;
        debug!(branch, "update branch pushed to fork");

        // advance the pin on a matching fc-nixos branch
        let dev = self.dev_branch();
        fc_nixos.checkout_new(branch, &format!("origin/{dev}"))?;
        self.rewrite_pin(fc_nixos, latest)?;
        if fc_nixos.is_dirty()? {
            fc_nixos.add(&[VERSIONS_PATH])?;
            fc_nixos.commit(&format!("Auto update nixpkgs to {latest}"))?;
        }
        fc_nixos.push_refspec("origin", &format!("{branch}:refs/heads/{branch}"), true)?;

        let pr_number = match self.forge.find_existing_pr(branch).await? {
            Some(number) => {
                if self.opts.force {
                    self.forge
                        .create_pr_comment(
                            number,
                            &format!("Re-staged by a forced run; pin now at {latest}."),
                        )
                        .await?;
                }
                Some(number)
            }
            None => {
                let number = self
                    .forge
                    .create_pr(branch, &dev, &self.pr_title(latest), &self.pr_body(branch))
                    .await?;
                Some(number)
            }
        };

        info!(
            previous = pinned,
            target = latest,
            branch,
            "nixpkgs update staged"
        );
        Ok(UpdateOutcome::Staged {
            previous: pinned.to_string(),
            target: latest.to_string(),
            branch: branch.to_string(),
            pr_number,
            reused_branch: reuse_branch,
        })
    }

    fn rewrite_pin(&self, fc_nixos: &GitRepo, latest: &str) -> Result<()> {
        let path = fc_nixos.file_path(VERSIONS_PATH);
        let content = std::fs::read_to_string(&path)?;
        let mut versions: Value = serde_json::from_str(&content)
            .map_err(|e| Error::Pipeline(format!("unparseable {VERSIONS_PATH}: {e}")))?;
        let Some(rev) = versions
            .get_mut("nixpkgs")
            .and_then(|n| n.get_mut("rev"))
        else {
            return Err(Error::Pipeline(format!(
                "{VERSIONS_PATH} carries no nixpkgs.rev pin"
            )));
        };
        *rev = Value::String(latest.to_string());
        let mut serialized = serde_json::to_string_pretty(&versions)
            .map_err(|e| Error::Pipeline(format!("failed to serialize {VERSIONS_PATH}: {e}")))?;
        serialized.push('\n');
        std::fs::write(&path, serialized)?;
        Ok(())
    }

    fn pr_title(&self, latest: &str) -> String {
        format!(
            "[{}] Automated nixpkgs update {}",
            self.platform_version,
            latest.get(..12).unwrap_or(latest)
        )
    }

    fn pr_body(&self, branch: &str) -> String {
        format!(
            "@flyingcircusio/release-managers\n\n\
             View nixpkgs update branch: \
             [{branch}](https://github.com/{}/tree/{branch})\n\n\
             Review Checklist:\n\n\
             - [ ] CI is green\n\
             - [ ] Package update versions look reasonable\n",
            self.nixpkgs_repo_name
        )
    }
}
