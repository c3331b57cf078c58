//! Core types for fc-release-tools

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One named unit of pipeline work tied to a specific external side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Branch registered for the release train, local/remote branches verified
    Init,
    /// Staging head has green CI
    TestBranch,
    /// Staging merged into production (plus backmerge to dev) and pushed
    MergeProduction,
    /// Production head verified green and recorded as released
    ReleaseProduction,
    /// Changelog generated and committed (train-wide)
    Doc,
    /// Production commits tagged and tags pushed
    Tag,
}

impl Stage {
    /// CLI subcommand name for this stage
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "add-branch",
            Self::TestBranch => "test-branch",
            Self::MergeProduction => "merge-production",
            Self::ReleaseProduction => "release-production",
            Self::Doc => "doc",
            Self::Tag => "tag",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical per-branch stage order. Stages complete in this order; `doc` is
/// train-wide and tracked on the train itself.
pub const BRANCH_STAGES: [Stage; 5] = [
    Stage::Init,
    Stage::TestBranch,
    Stage::MergeProduction,
    Stage::ReleaseProduction,
    Stage::Tag,
];

/// Outcome of one stage attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageStatus {
    /// Side effect confirmed against the external system
    Success,
    /// Attempt failed; `detail` holds the partial-progress information
    Failure,
}

/// One entry in a stage history. Append-only: failures are kept as an audit
/// trail, success is recorded at most once per stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    /// The stage this record belongs to
    pub stage: Stage,
    /// Success or failure
    pub status: StageStatus,
    /// When the attempt finished
    pub at: DateTime<Utc>,
    /// Free-form detail (failure reason, commit ids, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StageRecord {
    /// A success record stamped now
    pub fn success(stage: Stage, detail: Option<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Success,
            at: Utc::now(),
            detail,
        }
    }

    /// A failure record stamped now
    pub fn failure(stage: Stage, detail: impl Into<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Failure,
            at: Utc::now(),
            detail: Some(detail.into()),
        }
    }
}

/// Release progress of a single platform version branch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRelease {
    /// Platform version, e.g. "24.05". Immutable once created.
    pub version: String,
    /// Staging head at init time
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub orig_staging_commit: String,
    /// Production head after merge-production
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub new_production_commit: String,
    /// Append-only stage history
    #[serde(default)]
    pub history: Vec<StageRecord>,
}

impl BranchRelease {
    /// New branch entry with an empty history
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            orig_staging_commit: String::new(),
            new_production_commit: String::new(),
            history: Vec::new(),
        }
    }

    /// Dev branch name, e.g. `fc-24.05-dev`
    pub fn branch_dev(&self) -> String {
        format!("fc-{}-dev", self.version)
    }

    /// Staging branch name
    pub fn branch_stag(&self) -> String {
        format!("fc-{}-staging", self.version)
    }

    /// Production branch name
    pub fn branch_prod(&self) -> String {
        format!("fc-{}-production", self.version)
    }

    /// Whether `stage` has a success record
    pub fn is_done(&self, stage: Stage) -> bool {
        self.history
            .iter()
            .any(|r| r.stage == stage && r.status == StageStatus::Success)
    }

    /// First canonical stage lacking a success record; `None` when the
    /// branch has completed the whole pipeline. Derived, never stored.
    pub fn current_phase(&self) -> Option<Stage> {
        BRANCH_STAGES.iter().copied().find(|s| !self.is_done(*s))
    }

    /// Detail of the most recent failure of `stage`, if any
    pub fn last_failure(&self, stage: Stage) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|r| r.stage == stage && r.status == StageStatus::Failure)
            .and_then(|r| r.detail.as_deref())
    }
}

/// The set of all branches under management for one release cycle.
/// Branch order is insertion order (= creation order).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseTrain {
    /// Release ID in the form YYYY_NNN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_id: Option<String>,
    /// Targeted roll-out date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<NaiveDate>,
    /// Tracked branches, in creation order
    #[serde(default)]
    pub branches: Vec<BranchRelease>,
    /// Train-level stage history (currently only `doc`)
    #[serde(default)]
    pub history: Vec<StageRecord>,
}

impl ReleaseTrain {
    /// Look up a tracked branch by version
    pub fn branch(&self, version: &str) -> Option<&BranchRelease> {
        self.branches.iter().find(|b| b.version == version)
    }

    /// Mutable lookup
    pub fn branch_mut(&mut self, version: &str) -> Option<&mut BranchRelease> {
        self.branches.iter_mut().find(|b| b.version == version)
    }

    /// Whether a train-level stage has a success record
    pub fn is_done(&self, stage: Stage) -> bool {
        self.history
            .iter()
            .any(|r| r.stage == stage && r.status == StageStatus::Success)
    }

    /// Branches that have not yet completed `prerequisite`, in train order
    pub fn lagging(&self, prerequisite: Stage) -> Vec<String> {
        self.branches
            .iter()
            .filter(|b| !b.is_done(prerequisite))
            .map(|b| b.version.clone())
            .collect()
    }
}

// =============================================================================
// Auto-merge types
// =============================================================================

/// An open pull request under evaluation by the auto-merge engine.
/// Transient; not persisted across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeCandidate {
    /// PR number
    pub number: u64,
    /// PR title
    pub title: String,
    /// Author login
    pub author: String,
    /// Label names
    pub labels: Vec<String>,
    /// Head branch name
    pub head_ref: String,
    /// Head commit SHA
    pub head_sha: String,
    /// Base branch name
    pub base_ref: String,
    /// Whether the PR is a draft
    pub is_draft: bool,
    /// Web URL
    pub html_url: String,
}

/// Aggregated review state of a pull request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    /// At least one approval, no outstanding blockers
    Approved,
    /// A review requested changes
    ChangesRequested,
    /// Review still required / requested and not yet given
    ReviewRequired,
}

/// Result of a forge merge call
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Whether the PR was merged
    pub merged: bool,
    /// Merge commit SHA on success
    pub sha: Option<String>,
    /// Message from the forge (especially on failure)
    pub message: Option<String>,
}

/// Action the auto-merge engine took for one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeAction {
    /// Candidate was merged
    Merged,
    /// Candidate was skipped as ineligible
    Skipped,
    /// Merge was attempted but the gateway call failed
    Failed,
}

/// One entry of the `auto-merge-status.json` artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateReport {
    /// PR number
    #[serde(rename = "candidate-id")]
    pub candidate_id: u64,
    /// Verdict of the rule chain
    pub eligible: bool,
    /// Ineligibility reasons (empty when eligible)
    pub reasons: Vec<String>,
    /// What the engine did
    pub action: MergeAction,
    /// Raw gateway error, if the merge failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The machine-readable artifact written at the end of an auto-merge run.
/// Serialized as a bare JSON array, one entry per evaluated candidate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusReport {
    /// Per-candidate entries in evaluation order
    pub candidates: Vec<CandidateReport>,
}

impl StatusReport {
    /// Whether any candidate hit a gateway error. Drives the process exit
    /// status for upstream alerting.
    pub fn has_errors(&self) -> bool {
        self.candidates.iter().any(|c| c.error.is_some())
    }
}

// =============================================================================
// Dependency-update types
// =============================================================================

/// Outcome of one dependency-update run
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// Pinned revision already matches upstream; nothing staged
    NoOp {
        /// The (unchanged) pinned revision
        pinned: String,
    },
    /// An update branch + PR were staged
    Staged {
        /// Previously pinned revision
        previous: String,
        /// New target revision
        target: String,
        /// Deterministic update branch name
        branch: String,
        /// PR number (existing or freshly created)
        pr_number: Option<u64>,
        /// Whether an existing branch for this target was reused
        reused_branch: bool,
    },
}

impl std::fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoOp { pinned } => write!(f, "no-op (pinned at {pinned})"),
            Self::Staged {
                previous,
                target,
                branch,
                pr_number,
                reused_branch,
            } => {
                write!(f, "staged {previous}..{target} on {branch}")?;
                if *reused_branch {
                    write!(f, " (reused)")?;
                }
                if let Some(n) = pr_number {
                    write!(f, ", PR #{n}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_phase_is_first_unfinished_stage() {
        let mut branch = BranchRelease::new("24.05");
        assert_eq!(branch.current_phase(), Some(Stage::Init));

        branch.history.push(StageRecord::success(Stage::Init, None));
        assert_eq!(branch.current_phase(), Some(Stage::TestBranch));

        // a failure does not advance the phase
        branch
            .history
            .push(StageRecord::failure(Stage::TestBranch, "checks red"));
        assert_eq!(branch.current_phase(), Some(Stage::TestBranch));

        branch
            .history
            .push(StageRecord::success(Stage::TestBranch, None));
        assert_eq!(branch.current_phase(), Some(Stage::MergeProduction));
    }

    #[test]
    fn branch_complete_after_all_stages() {
        let mut branch = BranchRelease::new("24.05");
        for stage in BRANCH_STAGES {
            branch.history.push(StageRecord::success(stage, None));
        }
        assert_eq!(branch.current_phase(), None);
    }

    #[test]
    fn lagging_lists_branches_in_train_order() {
        let mut train = ReleaseTrain::default();
        let mut done = BranchRelease::new("23.11");
        done.history
            .push(StageRecord::success(Stage::ReleaseProduction, None));
        train.branches.push(done);
        train.branches.push(BranchRelease::new("24.05"));

        assert_eq!(train.lagging(Stage::ReleaseProduction), vec!["24.05"]);
    }

    #[test]
    fn status_report_serializes_as_array_with_kebab_keys() {
        let report = StatusReport {
            candidates: vec![CandidateReport {
                candidate_id: 17,
                eligible: false,
                reasons: vec!["draft".to_string()],
                action: MergeAction::Skipped,
                error: None,
            }],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["candidate-id"], 17);
        assert_eq!(json[0]["action"], "skipped");
        assert!(json[0].get("error").is_none());
    }
}
