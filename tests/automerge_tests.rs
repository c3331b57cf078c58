//! Integration tests for the auto-merge engine

mod common;

use common::mock_forge::{MockForge, MockGate, bot_candidate};
use fc_release_tools::automerge::{AutoMerge, STATUS_ARTIFACT, write_report};
use fc_release_tools::types::{MergeAction, ReviewDecision};
use tempfile::TempDir;

fn authors() -> Vec<String> {
    vec!["fc-release-bot".to_string()]
}

#[tokio::test]
async fn clean_candidate_is_merged_exactly_once() {
    let forge = MockForge::new();
    let gate = MockGate::new();
    forge.add_pr(bot_candidate(1));

    let authors = authors();
    let engine = AutoMerge::new(&forge, &gate, &authors, &[]);
    let report = engine.run().await.unwrap();

    assert_eq!(report.candidates.len(), 1);
    let entry = &report.candidates[0];
    assert_eq!(entry.candidate_id, 1);
    assert!(entry.eligible);
    assert_eq!(entry.action, MergeAction::Merged);
    assert!(entry.error.is_none());
    assert!(!report.has_errors());

    assert_eq!(*forge.merge_calls.lock().unwrap(), vec![1]);
    // head branch cleanup after the merge
    assert_eq!(
        *forge.delete_branch_calls.lock().unwrap(),
        vec!["update-1".to_string()]
    );
}

#[tokio::test]
async fn one_failing_candidate_does_not_abort_the_batch() {
    let forge = MockForge::new();
    let gate = MockGate::new();
    for number in 1..=3 {
        forge.add_pr(bot_candidate(number));
    }
    forge.fail_merge(2, "merge conflict");

    let authors = authors();
    let engine = AutoMerge::new(&forge, &gate, &authors, &[]);
    let report = engine.run().await.unwrap();

    assert_eq!(report.candidates.len(), 3);
    assert_eq!(report.candidates[0].action, MergeAction::Merged);
    assert_eq!(report.candidates[1].action, MergeAction::Failed);
    assert!(
        report.candidates[1]
            .error
            .as_deref()
            .unwrap()
            .contains("merge conflict")
    );
    assert_eq!(report.candidates[2].action, MergeAction::Merged);
    assert!(report.has_errors());

    // the error stays confined; every candidate was still attempted
    assert_eq!(*forge.merge_calls.lock().unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn evaluation_error_is_confined_to_its_candidate() {
    let forge = MockForge::new();
    let gate = MockGate::new();
    forge.add_pr(bot_candidate(1));
    forge.add_pr(bot_candidate(2));
    forge.fail_failing_checks("sha-1", "gateway timeout");

    let authors = authors();
    let engine = AutoMerge::new(&forge, &gate, &authors, &[]);
    let report = engine.run().await.unwrap();

    assert_eq!(report.candidates.len(), 2);
    assert_eq!(report.candidates[0].action, MergeAction::Failed);
    assert!(!report.candidates[0].eligible);
    assert!(report.candidates[0].error.is_some());
    assert_eq!(report.candidates[1].action, MergeAction::Merged);
    assert!(report.has_errors());

    // the broken candidate never reached the merge call
    assert_eq!(*forge.merge_calls.lock().unwrap(), vec![2]);
}

#[tokio::test]
async fn ineligible_candidate_reports_all_violations() {
    let forge = MockForge::new();
    let gate = MockGate::new();
    let mut candidate = bot_candidate(7);
    candidate.is_draft = true;
    candidate.base_ref = "main".to_string();
    forge.add_pr(candidate);
    forge.set_failing_checks("sha-7", &["build"]);
    forge.set_review(7, ReviewDecision::ChangesRequested);

    let authors = authors();
    let engine = AutoMerge::new(&forge, &gate, &authors, &[]);
    let report = engine.run().await.unwrap();

    let entry = &report.candidates[0];
    assert!(!entry.eligible);
    assert_eq!(entry.action, MergeAction::Skipped);
    assert_eq!(entry.reasons.len(), 4);
    assert!(entry.reasons.contains(&"draft".to_string()));
    assert!(entry.reasons.contains(&"changes requested".to_string()));
    assert!(forge.merge_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn exempt_checks_do_not_block_the_merge() {
    let forge = MockForge::new();
    let gate = MockGate::new();
    forge.add_pr(bot_candidate(4));
    forge.set_failing_checks(
        "sha-4",
        &["check-auto-mergeability-of-pr", "Backport Pull Request"],
    );

    let authors = authors();
    let engine = AutoMerge::new(&forge, &gate, &authors, &[]);
    let report = engine.run().await.unwrap();

    assert_eq!(report.candidates[0].action, MergeAction::Merged);
}

#[tokio::test]
async fn monitoring_sensitive_candidate_waits_for_the_review() {
    let forge = MockForge::new();
    let gate = MockGate::new();
    gate.set_blocked("platform");
    let mut candidate = bot_candidate(9);
    candidate.labels = vec!["monitoring-sensitive".to_string()];
    forge.add_pr(candidate);

    let authors = authors();
    let boards = vec!["platform".to_string()];
    let engine = AutoMerge::new(&forge, &gate, &authors, &boards);
    let report = engine.run().await.unwrap();

    let entry = &report.candidates[0];
    assert_eq!(entry.action, MergeAction::Skipped);
    assert_eq!(
        entry.reasons,
        vec!["monitoring board 'platform' has a release blocker".to_string()]
    );
    assert!(forge.merge_calls.lock().unwrap().is_empty());
    assert_eq!(*gate.calls.lock().unwrap(), vec!["platform".to_string()]);
}

#[tokio::test]
async fn monitoring_sensitive_candidate_merges_when_boards_are_clear() {
    let forge = MockForge::new();
    let gate = MockGate::new();
    gate.set_clear("platform");
    gate.set_clear("storage");
    let mut candidate = bot_candidate(9);
    candidate.labels = vec!["monitoring-sensitive".to_string()];
    forge.add_pr(candidate);

    let authors = authors();
    let boards = vec!["platform".to_string(), "storage".to_string()];
    let engine = AutoMerge::new(&forge, &gate, &authors, &boards);
    let report = engine.run().await.unwrap();

    assert_eq!(report.candidates[0].action, MergeAction::Merged);
}

#[tokio::test]
async fn unlabeled_candidate_never_consults_the_gate() {
    let forge = MockForge::new();
    let gate = MockGate::new();
    forge.add_pr(bot_candidate(3));

    let authors = authors();
    let boards = vec!["platform".to_string()];
    let engine = AutoMerge::new(&forge, &gate, &authors, &boards);
    engine.run().await.unwrap();

    assert!(gate.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn prs_from_other_authors_are_ignored() {
    let forge = MockForge::new();
    let gate = MockGate::new();
    let mut candidate = bot_candidate(5);
    candidate.author = "some-human".to_string();
    forge.add_pr(candidate);

    let authors = authors();
    let engine = AutoMerge::new(&forge, &gate, &authors, &[]);
    let report = engine.run().await.unwrap();

    assert!(report.candidates.is_empty());
    assert!(forge.failing_checks_calls.lock().unwrap().is_empty());
    assert!(forge.merge_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn status_artifact_is_a_bare_json_array() {
    let forge = MockForge::new();
    let gate = MockGate::new();
    forge.add_pr(bot_candidate(1));
    let mut draft = bot_candidate(2);
    draft.is_draft = true;
    forge.add_pr(draft);

    let authors = authors();
    let engine = AutoMerge::new(&forge, &gate, &authors, &[]);
    let report = engine.run().await.unwrap();

    let dir = TempDir::new().unwrap();
    let path = write_report(&report, dir.path()).unwrap();
    assert_eq!(path.file_name().unwrap(), STATUS_ARTIFACT);

    let content = std::fs::read_to_string(&path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
    let entries = parsed.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["candidate-id"], 1);
    assert_eq!(entries[0]["eligible"], true);
    assert_eq!(entries[0]["action"], "merged");
    assert_eq!(entries[1]["candidate-id"], 2);
    assert_eq!(entries[1]["eligible"], false);
    assert_eq!(entries[1]["action"], "skipped");
    assert_eq!(entries[1]["reasons"][0], "draft");
}
