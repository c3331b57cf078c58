//! Release pipeline for the fc-nixos branch train.
//!
//! Every platform version moves through the same stage sequence
//! (`add-branch` → `test-branch` → `merge-production` → `release-production`
//! → `tag`), with `doc` as a train-wide stage. Stage execution is gated on
//! the persisted record: predecessors must have succeeded, completed stages
//! verify instead of re-applying, and every outcome is recorded before the
//! command exits. Re-running a failed stage converges on the remote state.

pub mod stages;

use crate::error::{Error, Result};
use crate::git::GitRepo;
use crate::state::StatusStore;
use crate::types::{BRANCH_STAGES, BranchRelease, ReleaseTrain, Stage};
use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;
use std::fmt::Write as _;
use std::path::Path;
use tracing::{info, warn};

/// Pattern a release ID must match (YYYY_NNN)
const RELEASE_ID_PATTERN: &str = r"^[0-9]{4}_[0-9]{3}$";

/// Remote production branches the train can manage
const PRODUCTION_BRANCH_PATTERN: &str = r"^origin/fc-([0-9]{2}\.[0-9]{2})-production$";

/// What executing a stage should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePlan {
    /// Predecessors are done and the stage itself is not: apply it
    Run,
    /// The stage already succeeded: verify external state, change nothing
    VerifyOnly,
}

/// Gate for a per-branch stage. Out-of-order requests fail regardless of
/// what the external systems look like.
pub fn ensure_stage_allowed(branch: &BranchRelease, stage: Stage) -> Result<StagePlan> {
    let position = BRANCH_STAGES
        .iter()
        .position(|s| *s == stage)
        .ok_or_else(|| Error::Pipeline(format!("'{stage}' is not a per-branch stage")))?;

    if let Some(missing) = BRANCH_STAGES[..position]
        .iter()
        .copied()
        .find(|s| !branch.is_done(*s))
    {
        return Err(Error::OutOfOrderStage {
            branch: branch.version.clone(),
            stage,
            missing,
        });
    }

    if branch.is_done(stage) {
        Ok(StagePlan::VerifyOnly)
    } else {
        Ok(StagePlan::Run)
    }
}

/// Gate for a train-wide stage (`doc`, `tag`): every tracked branch must
/// have completed `release-production` first, and tagging additionally
/// waits for the collected changelog.
pub fn ensure_train_ready(train: &ReleaseTrain, stage: Stage) -> Result<()> {
    if train.release_id.is_none() {
        return Err(Error::Pipeline(
            "no active release train; run `fc-release start` first".to_string(),
        ));
    }
    if train.branches.is_empty() {
        return Err(Error::Pipeline(
            "no branches registered; run `fc-release add-branch <version>` first".to_string(),
        ));
    }
    let lagging = train.lagging(Stage::ReleaseProduction);
    if !lagging.is_empty() {
        return Err(Error::TrainNotReady { stage, lagging });
    }
    if stage == Stage::Tag && !train.is_done(Stage::Doc) {
        return Err(Error::Pipeline(
            "changelog not collected; run `fc-release doc` first".to_string(),
        ));
    }
    Ok(())
}

/// Release-ID default when none is given: ISO week year plus ISO week of
/// the release date, zero-padded to the YYYY_NNN scheme.
pub fn default_release_id(date: NaiveDate) -> String {
    let week = date.iso_week();
    format!("{}_{:03}", week.year(), week.week())
}

/// Release-date default: the next Monday after `today`
pub fn default_release_date(today: NaiveDate) -> NaiveDate {
    let days_ahead = 8 - i64::from(today.weekday().number_from_monday());
    today + chrono::Duration::days(days_ahead)
}

/// One production branch found while scanning the remote at `start`
#[derive(Debug, Clone)]
pub struct PendingBranch {
    /// Platform version, e.g. "24.05"
    pub version: String,
    /// Whether staging carries commits production does not have yet
    pub pending: bool,
}

/// The release pipeline bound to one fc-nixos checkout
pub struct Pipeline {
    repo: GitRepo,
    store: StatusStore,
    train: ReleaseTrain,
}

impl Pipeline {
    /// Open the pipeline for the checkout at `dir` tracking `origin`,
    /// loading the persisted train record.
    pub fn open(dir: &Path, origin: impl Into<String>) -> Result<Self> {
        let repo = GitRepo::new(dir, origin);
        let store = StatusStore::new(dir);
        let train = store.load()?;
        Ok(Self { repo, store, train })
    }

    /// The current train record
    pub fn train(&self) -> &ReleaseTrain {
        &self.train
    }

    fn release_id(&self) -> Result<String> {
        self.train
            .release_id
            .clone()
            .ok_or_else(|| {
                Error::Pipeline("no active release train; run `fc-release start` first".to_string())
            })
    }

    /// Start a new release cycle: reset the train record, then scan the
    /// remote production branches and report which versions have staged
    /// changes waiting. Branches are not registered automatically; that is
    /// what `add-branch` is for.
    pub fn start(
        &mut self,
        release_id: Option<String>,
        release_date: Option<NaiveDate>,
    ) -> Result<Vec<PendingBranch>> {
        let date = release_date.unwrap_or_else(|| default_release_date(Utc::now().date_naive()));
        let id = release_id.unwrap_or_else(|| default_release_id(date));

        let id_format = Regex::new(RELEASE_ID_PATTERN)
            .map_err(|e| Error::Pipeline(format!("invalid release-id pattern: {e}")))?;
        if !id_format.is_match(&id) {
            return Err(Error::Pipeline(format!(
                "release ID '{id}' must be formatted as YYYY_NNN"
            )));
        }

        if self.train.release_id.is_some() && !self.train.branches.is_empty() {
            let unfinished: Vec<_> = self
                .train
                .branches
                .iter()
                .filter(|b| b.current_phase().is_some())
                .map(|b| b.version.clone())
                .collect();
            if !unfinished.is_empty() {
                warn!(
                    branches = unfinished.join(", "),
                    "discarding unfinished release train"
                );
            }
        }

        self.repo.ensure_repo()?;

        self.train = ReleaseTrain {
            release_id: Some(id.clone()),
            release_date: Some(date),
            ..ReleaseTrain::default()
        };
        self.store.save(&self.train)?;
        info!(release_id = id, release_date = %date, "started release cycle");

        let pattern = Regex::new(PRODUCTION_BRANCH_PATTERN)
            .map_err(|e| Error::Pipeline(format!("invalid branch pattern: {e}")))?;
        let mut versions = self.repo.match_branches(&pattern)?;
        versions.sort();
        versions.dedup();

        let mut found = Vec::new();
        for version in versions {
            let staging = format!("origin/fc-{version}-staging");
            let production = format!("origin/fc-{version}-production");
            let pending = match self.repo.rev_parse_opt(&staging)? {
                Some(_) => !self.repo.is_ancestor(&staging, &production)?,
                None => false,
            };
            found.push(PendingBranch { version, pending });
        }
        Ok(found)
    }

    /// Human-readable train status with the concrete next command per
    /// branch. Pure read; performs no git or forge calls.
    pub fn status(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Release status");
        let _ = writeln!(
            out,
            "  release ID:   {}",
            self.train.release_id.as_deref().unwrap_or("n/a")
        );
        let _ = writeln!(
            out,
            "  release date: {}",
            self.train
                .release_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "n/a".to_string())
        );

        if self.train.branches.is_empty() {
            let _ = writeln!(out, "\nNo branches registered.");
            if self.train.release_id.is_some() {
                let _ = writeln!(out, "Next: `fc-release add-branch <version>`");
            } else {
                let _ = writeln!(out, "Next: `fc-release start`");
            }
            return out;
        }

        let _ = writeln!(out, "\nBranches:");
        for branch in &self.train.branches {
            match branch.current_phase() {
                Some(stage) => {
                    let _ = write!(
                        out,
                        "  {}: next `fc-release {} {}`",
                        branch.version,
                        stage.as_str(),
                        branch.version
                    );
                    if let Some(failure) = branch.last_failure(stage) {
                        let _ = write!(out, " (last attempt failed: {failure})");
                    }
                    let _ = writeln!(out);
                }
                None => {
                    let _ = writeln!(
                        out,
                        "  {}: complete (production at {})",
                        branch.version, branch.new_production_commit
                    );
                }
            }
        }

        let all_released = self.train.lagging(Stage::ReleaseProduction).is_empty();
        if all_released {
            if !self.train.is_done(Stage::Doc) {
                let _ = writeln!(out, "\nNext train stage: `fc-release doc`");
            } else if self.train.branches.iter().any(|b| !b.is_done(Stage::Tag)) {
                let _ = writeln!(out, "\nNext train stage: `fc-release tag`");
            } else {
                let _ = writeln!(out, "\nRelease complete. `fc-release start` begins a new cycle.");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StageRecord;

    fn branch_with(stages: &[Stage]) -> BranchRelease {
        let mut branch = BranchRelease::new("24.05");
        for stage in stages {
            branch.history.push(StageRecord::success(*stage, None));
        }
        branch
    }

    #[test]
    fn first_stage_is_allowed_on_fresh_branch() {
        let branch = branch_with(&[]);
        assert_eq!(
            ensure_stage_allowed(&branch, Stage::Init).unwrap(),
            StagePlan::Run
        );
    }

    #[test]
    fn next_stage_allowed_once_predecessor_done() {
        let branch = branch_with(&[Stage::Init]);
        assert_eq!(
            ensure_stage_allowed(&branch, Stage::TestBranch).unwrap(),
            StagePlan::Run
        );
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        let branch = branch_with(&[Stage::Init]);
        match ensure_stage_allowed(&branch, Stage::MergeProduction) {
            Err(Error::OutOfOrderStage {
                branch,
                stage,
                missing,
            }) => {
                assert_eq!(branch, "24.05");
                assert_eq!(stage, Stage::MergeProduction);
                assert_eq!(missing, Stage::TestBranch);
            }
            other => panic!("expected OutOfOrderStage, got {other:?}"),
        }
    }

    #[test]
    fn out_of_order_message_names_the_remedial_command() {
        let branch = branch_with(&[]);
        let err = ensure_stage_allowed(&branch, Stage::TestBranch).unwrap_err();
        assert!(err.to_string().contains("fc-release add-branch 24.05"));
    }

    #[test]
    fn completed_stage_plans_verification_only() {
        let branch = branch_with(&[Stage::Init, Stage::TestBranch]);
        assert_eq!(
            ensure_stage_allowed(&branch, Stage::TestBranch).unwrap(),
            StagePlan::VerifyOnly
        );
    }

    #[test]
    fn train_gate_names_lagging_branches() {
        let mut train = ReleaseTrain {
            release_id: Some("2026_034".to_string()),
            ..ReleaseTrain::default()
        };
        let mut done = BranchRelease::new("23.11");
        for stage in [
            Stage::Init,
            Stage::TestBranch,
            Stage::MergeProduction,
            Stage::ReleaseProduction,
        ] {
            done.history.push(StageRecord::success(stage, None));
        }
        train.branches.push(done);
        train.branches.push(BranchRelease::new("24.05"));

        match ensure_train_ready(&train, Stage::Tag) {
            Err(Error::TrainNotReady { stage, lagging }) => {
                assert_eq!(stage, Stage::Tag);
                assert_eq!(lagging, vec!["24.05"]);
            }
            other => panic!("expected TrainNotReady, got {other:?}"),
        }
    }

    #[test]
    fn tag_waits_for_the_collected_changelog() {
        let mut train = ReleaseTrain {
            release_id: Some("2026_034".to_string()),
            ..ReleaseTrain::default()
        };
        let mut released = BranchRelease::new("24.05");
        for stage in [
            Stage::Init,
            Stage::TestBranch,
            Stage::MergeProduction,
            Stage::ReleaseProduction,
        ] {
            released.history.push(StageRecord::success(stage, None));
        }
        train.branches.push(released);

        let err = ensure_train_ready(&train, Stage::Tag).unwrap_err();
        assert!(err.to_string().contains("run `fc-release doc` first"));

        train.history.push(StageRecord::success(Stage::Doc, None));
        assert!(ensure_train_ready(&train, Stage::Tag).is_ok());
        // doc itself is not gated on doc
        assert!(ensure_train_ready(&train, Stage::Doc).is_ok());
    }

    #[test]
    fn train_gate_requires_an_active_train() {
        let train = ReleaseTrain::default();
        let err = ensure_train_ready(&train, Stage::Doc).unwrap_err();
        assert!(err.to_string().contains("fc-release start"));
    }

    #[test]
    fn release_id_defaults_to_year_and_week() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 24).unwrap();
        assert_eq!(default_release_id(date), "2026_035");
    }

    #[test]
    fn release_id_uses_the_iso_week_year_at_year_boundaries() {
        // 2025-12-29 falls into ISO week 1 of 2026
        let date = NaiveDate::from_ymd_opt(2025, 12, 29).unwrap();
        assert_eq!(default_release_id(date), "2026_001");
    }

    #[test]
    fn release_date_defaults_to_next_monday() {
        // a Sunday
        let today = NaiveDate::from_ymd_opt(2026, 8, 23).unwrap();
        let next = default_release_date(today);
        assert_eq!(next, NaiveDate::from_ymd_opt(2026, 8, 24).unwrap());
        // a Monday rolls over to the following week
        let monday = NaiveDate::from_ymd_opt(2026, 8, 24).unwrap();
        assert_eq!(
            default_release_date(monday),
            NaiveDate::from_ymd_opt(2026, 8, 31).unwrap()
        );
    }
}
