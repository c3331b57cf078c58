//! Forge gateway for pull-request and CI-check operations
//!
//! The [`Forge`] trait is the seam between the engines and the GitHub API;
//! tests drive the engines with a mock implementation.

mod github;

pub use github::GitHubForge;

use crate::error::Result;
use crate::types::{MergeCandidate, MergeOutcome, ReviewDecision};
use async_trait::async_trait;

/// Forge operations used by the release pipeline and the auto-merge engine
#[async_trait]
pub trait Forge: Send + Sync {
    /// All open pull requests of the managed repository
    async fn list_open_prs(&self) -> Result<Vec<MergeCandidate>>;

    /// Names of CI checks that are not passing for `ref_name` (commit SHA or
    /// branch). Empty means all required checks are green. Covers both the
    /// legacy commit-status API and check runs.
    async fn failing_checks(&self, ref_name: &str) -> Result<Vec<String>>;

    /// Aggregated review state of a pull request
    async fn review_decision(&self, pr_number: u64) -> Result<ReviewDecision>;

    /// Merge a pull request (merge-commit method)
    async fn merge_pr(&self, pr_number: u64) -> Result<MergeOutcome>;

    /// Number of an open PR with the given head branch, if any
    async fn find_existing_pr(&self, head_branch: &str) -> Result<Option<u64>>;

    /// Create a pull request, returning its number
    async fn create_pr(&self, head: &str, base: &str, title: &str, body: &str) -> Result<u64>;

    /// Comment on a pull request
    async fn create_pr_comment(&self, pr_number: u64, body: &str) -> Result<()>;

    /// Delete a branch ref (used for merged PR heads; best-effort at call
    /// sites)
    async fn delete_branch(&self, branch: &str) -> Result<()>;
}
