//! Eligibility rules for auto-merge candidates.
//!
//! The rule chain is pure: every external fact is gathered first and
//! condensed into [`CandidateFacts`], then [`evaluate`] derives the verdict.
//! Safety rules are a closed set keyed by label; there is no open-ended
//! predicate registry.

use crate::types::ReviewDecision;

/// Label marking changes that must wait for the monitoring review
pub const MONITORING_SENSITIVE_LABEL: &str = "monitoring-sensitive";

/// Check names that never block a merge. The mergeability check itself and
/// backport bookkeeping report against the same commit.
const EXEMPT_CHECKS: [&str; 2] = ["check-auto-mergeability-of-pr", "Backport Pull Request"];

/// Label-keyed safety predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyRule {
    /// The monitoring boards must be reviewed today and blocker-free
    MonitoringReview,
}

/// Safety rules triggered by a candidate's labels
pub fn safety_rules_for(labels: &[String]) -> Vec<SafetyRule> {
    labels
        .iter()
        .filter_map(|label| match label.as_str() {
            MONITORING_SENSITIVE_LABEL => Some(SafetyRule::MonitoringReview),
            _ => None,
        })
        .collect()
}

/// Drop checks that are exempt from the CI-green rule
pub fn relevant_failing_checks(failing: Vec<String>) -> Vec<String> {
    failing
        .into_iter()
        .filter(|name| !EXEMPT_CHECKS.contains(&name.as_str()))
        .collect()
}

/// Whether the merge target is one of the managed dev branches
pub fn is_dev_branch(base_ref: &str) -> bool {
    base_ref.starts_with("fc-") && base_ref.ends_with("-dev")
}

/// Everything the verdict depends on, gathered up front
#[derive(Debug, Clone)]
pub struct CandidateFacts {
    /// The PR is a draft
    pub is_draft: bool,
    /// The PR targets a managed dev branch
    pub base_is_dev: bool,
    /// Names of non-exempt failing checks
    pub failing_checks: Vec<String>,
    /// Aggregated review state
    pub review: ReviewDecision,
    /// Rendered holds from the triggered safety rules
    pub safety_holds: Vec<String>,
}

/// Verdict of the rule chain for one candidate
#[derive(Debug, Clone)]
pub struct Verdict {
    /// Whether the candidate may be merged
    pub eligible: bool,
    /// Ineligibility reasons, empty when eligible
    pub reasons: Vec<String>,
}

/// Evaluate the ordered rule chain. All violated rules are reported, not
/// just the first one.
pub fn evaluate(facts: &CandidateFacts) -> Verdict {
    let mut reasons = Vec::new();

    if facts.is_draft {
        reasons.push("draft".to_string());
    }
    if !facts.base_is_dev {
        reasons.push("base branch is not a managed dev branch".to_string());
    }
    if !facts.failing_checks.is_empty() {
        reasons.push(format!(
            "failing checks: {}",
            facts.failing_checks.join(", ")
        ));
    }
    match facts.review {
        ReviewDecision::Approved => {}
        ReviewDecision::ChangesRequested => reasons.push("changes requested".to_string()),
        ReviewDecision::ReviewRequired => reasons.push("review required".to_string()),
    }
    reasons.extend(facts.safety_holds.iter().cloned());

    Verdict {
        eligible: reasons.is_empty(),
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_facts() -> CandidateFacts {
        CandidateFacts {
            is_draft: false,
            base_is_dev: true,
            failing_checks: Vec::new(),
            review: ReviewDecision::Approved,
            safety_holds: Vec::new(),
        }
    }

    #[test]
    fn clean_candidate_is_eligible() {
        let verdict = evaluate(&clean_facts());
        assert!(verdict.eligible);
        assert!(verdict.reasons.is_empty());
    }

    #[test]
    fn failing_checks_are_named_in_the_reason() {
        let mut facts = clean_facts();
        facts.failing_checks = vec!["build".to_string(), "test-24.05".to_string()];
        let verdict = evaluate(&facts);
        assert!(!verdict.eligible);
        assert_eq!(verdict.reasons, vec!["failing checks: build, test-24.05"]);
    }

    #[test]
    fn review_states_block() {
        for (review, reason) in [
            (ReviewDecision::ChangesRequested, "changes requested"),
            (ReviewDecision::ReviewRequired, "review required"),
        ] {
            let mut facts = clean_facts();
            facts.review = review;
            let verdict = evaluate(&facts);
            assert!(!verdict.eligible);
            assert_eq!(verdict.reasons, vec![reason]);
        }
    }

    #[test]
    fn all_violations_are_reported() {
        let facts = CandidateFacts {
            is_draft: true,
            base_is_dev: false,
            failing_checks: vec!["build".to_string()],
            review: ReviewDecision::ReviewRequired,
            safety_holds: vec!["monitoring board 'platform' has a release blocker".to_string()],
        };
        let verdict = evaluate(&facts);
        assert_eq!(verdict.reasons.len(), 5);
    }

    #[test]
    fn exempt_checks_are_dropped() {
        let failing = vec![
            "check-auto-mergeability-of-pr".to_string(),
            "Backport Pull Request".to_string(),
            "build".to_string(),
        ];
        assert_eq!(relevant_failing_checks(failing), vec!["build"]);
    }

    #[test]
    fn monitoring_label_triggers_the_safety_rule() {
        let labels = vec!["bug".to_string(), "monitoring-sensitive".to_string()];
        assert_eq!(
            safety_rules_for(&labels),
            vec![SafetyRule::MonitoringReview]
        );
        assert!(safety_rules_for(&["bug".to_string()]).is_empty());
    }

    #[test]
    fn dev_branch_detection() {
        assert!(is_dev_branch("fc-24.05-dev"));
        assert!(!is_dev_branch("fc-24.05-production"));
        assert!(!is_dev_branch("main"));
    }
}
