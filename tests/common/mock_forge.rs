//! Mock forge and monitoring gate for testing
//!
//! These are test utilities - not all may be used in current tests but are
//! available for future test development.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use fc_release_tools::error::{Error, Result};
use fc_release_tools::forge::Forge;
use fc_release_tools::review::{BoardReview, MonitoringGate};
use fc_release_tools::types::{MergeCandidate, MergeOutcome, ReviewDecision};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Call record for `create_pr`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePrCall {
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
}

/// Call record for `create_pr_comment`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCommentCall {
    pub pr_number: u64,
    pub body: String,
}

/// A clean candidate from a recognized bot author
pub fn bot_candidate(number: u64) -> MergeCandidate {
    MergeCandidate {
        number,
        title: format!("Automated update #{number}"),
        author: "fc-release-bot".to_string(),
        labels: Vec::new(),
        head_ref: format!("update-{number}"),
        head_sha: format!("sha-{number}"),
        base_ref: "fc-24.05-dev".to_string(),
        is_draft: false,
        html_url: format!("https://github.com/flyingcircusio/fc-nixos/pull/{number}"),
    }
}

/// Hand-written mock `Forge` with call tracking, configurable responses
/// and error injection.
#[derive(Default)]
pub struct MockForge {
    next_pr_number: AtomicU64,
    // Configurable responses
    pub open_prs: Mutex<Vec<MergeCandidate>>,
    pub failing_checks_responses: Mutex<HashMap<String, Vec<String>>>,
    pub review_responses: Mutex<HashMap<u64, ReviewDecision>>,
    pub find_pr_responses: Mutex<HashMap<String, u64>>,
    // Call tracking
    pub failing_checks_calls: Mutex<Vec<String>>,
    pub review_calls: Mutex<Vec<u64>>,
    pub merge_calls: Mutex<Vec<u64>>,
    pub delete_branch_calls: Mutex<Vec<String>>,
    pub create_pr_calls: Mutex<Vec<CreatePrCall>>,
    pub create_comment_calls: Mutex<Vec<CreateCommentCall>>,
    // Error injection
    pub error_on_merge: Mutex<HashMap<u64, String>>,
    pub error_on_failing_checks: Mutex<HashMap<String, String>>,
}

impl MockForge {
    pub fn new() -> Self {
        let mock = Self::default();
        mock.next_pr_number.store(100, Ordering::SeqCst);
        mock
    }

    /// Register an open PR
    pub fn add_pr(&self, candidate: MergeCandidate) {
        self.open_prs.lock().unwrap().push(candidate);
    }

    /// Make CI report `failing` for `sha`
    pub fn set_failing_checks(&self, sha: &str, failing: &[&str]) {
        self.failing_checks_responses
            .lock()
            .unwrap()
            .insert(sha.to_string(), failing.iter().map(|s| s.to_string()).collect());
    }

    /// Set the review decision for a PR (default is `Approved`)
    pub fn set_review(&self, pr_number: u64, decision: ReviewDecision) {
        self.review_responses
            .lock()
            .unwrap()
            .insert(pr_number, decision);
    }

    /// Make `merge_pr` fail for one PR
    pub fn fail_merge(&self, pr_number: u64, msg: &str) {
        self.error_on_merge
            .lock()
            .unwrap()
            .insert(pr_number, msg.to_string());
    }

    /// Make `failing_checks` fail for one sha
    pub fn fail_failing_checks(&self, sha: &str, msg: &str) {
        self.error_on_failing_checks
            .lock()
            .unwrap()
            .insert(sha.to_string(), msg.to_string());
    }
}

#[async_trait]
impl Forge for MockForge {
    async fn list_open_prs(&self) -> Result<Vec<MergeCandidate>> {
        Ok(self.open_prs.lock().unwrap().clone())
    }

    async fn failing_checks(&self, ref_name: &str) -> Result<Vec<String>> {
        self.failing_checks_calls
            .lock()
            .unwrap()
            .push(ref_name.to_string());
        if let Some(msg) = self.error_on_failing_checks.lock().unwrap().get(ref_name) {
            return Err(Error::Forge(msg.clone()));
        }
        Ok(self
            .failing_checks_responses
            .lock()
            .unwrap()
            .get(ref_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn review_decision(&self, pr_number: u64) -> Result<ReviewDecision> {
        self.review_calls.lock().unwrap().push(pr_number);
        Ok(self
            .review_responses
            .lock()
            .unwrap()
            .get(&pr_number)
            .copied()
            .unwrap_or(ReviewDecision::Approved))
    }

    async fn merge_pr(&self, pr_number: u64) -> Result<MergeOutcome> {
        self.merge_calls.lock().unwrap().push(pr_number);
        if let Some(msg) = self.error_on_merge.lock().unwrap().get(&pr_number) {
            return Err(Error::Forge(msg.clone()));
        }
        Ok(MergeOutcome {
            merged: true,
            sha: Some(format!("merge-{pr_number}")),
            message: None,
        })
    }

    async fn find_existing_pr(&self, head_branch: &str) -> Result<Option<u64>> {
        Ok(self
            .find_pr_responses
            .lock()
            .unwrap()
            .get(head_branch)
            .copied())
    }

    async fn create_pr(&self, head: &str, base: &str, title: &str, body: &str) -> Result<u64> {
        self.create_pr_calls.lock().unwrap().push(CreatePrCall {
            head: head.to_string(),
            base: base.to_string(),
            title: title.to_string(),
            body: body.to_string(),
        });
        Ok(self.next_pr_number.fetch_add(1, Ordering::SeqCst))
    }

    async fn create_pr_comment(&self, pr_number: u64, body: &str) -> Result<()> {
        self.create_comment_calls
            .lock()
            .unwrap()
            .push(CreateCommentCall {
                pr_number,
                body: body.to_string(),
            });
        Ok(())
    }

    async fn delete_branch(&self, branch: &str) -> Result<()> {
        self.delete_branch_calls
            .lock()
            .unwrap()
            .push(branch.to_string());
        Ok(())
    }
}

/// Mock monitoring gate with per-board responses
#[derive(Default)]
pub struct MockGate {
    pub responses: Mutex<HashMap<String, BoardReview>>,
    pub calls: Mutex<Vec<String>>,
}

impl MockGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Board reviewed right now, without a blocker
    pub fn set_clear(&self, board: &str) {
        self.set_review(board, &Utc::now().to_rfc3339(), false);
    }

    /// Board reviewed right now, with a release blocker
    pub fn set_blocked(&self, board: &str) {
        self.set_review(board, &Utc::now().to_rfc3339(), true);
    }

    pub fn set_review(&self, board: &str, last_review: &str, blocker: bool) {
        self.responses.lock().unwrap().insert(
            board.to_string(),
            BoardReview {
                last_review: last_review.to_string(),
                has_platform_release_blocker: blocker,
            },
        );
    }
}

#[async_trait]
impl MonitoringGate for MockGate {
    async fn board_review(&self, board: &str) -> Result<BoardReview> {
        self.calls.lock().unwrap().push(board.to_string());
        self.responses
            .lock()
            .unwrap()
            .get(board)
            .cloned()
            .ok_or_else(|| Error::Forge(format!("no review configured for board '{board}'")))
    }
}
