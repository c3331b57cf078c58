//! Auto-merge engine.
//!
//! Evaluates every open pull request from the recognized bot authors
//! against the rule chain in [`rules`] and merges the eligible ones.
//! One candidate's failure never aborts the batch; the per-candidate
//! outcome lands in the `auto-merge-status.json` artifact and the process
//! exit status reflects whether any candidate errored.

pub mod rules;

use crate::error::{Error, Result};
use crate::forge::Forge;
use crate::git::GitRepo;
use crate::review::{MonitoringGate, first_hold};
use crate::types::{CandidateReport, MergeAction, MergeCandidate, StatusReport};
use chrono::Utc;
use regex::Regex;
use rules::{CandidateFacts, SafetyRule};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Filename of the status artifact picked up by CI
pub const STATUS_ARTIFACT: &str = "auto-merge-status.json";

/// The auto-merge engine, bound to a forge and the monitoring gate
pub struct AutoMerge<'a> {
    forge: &'a dyn Forge,
    gate: &'a dyn MonitoringGate,
    /// Author logins whose PRs are considered
    authors: &'a [String],
    /// Monitoring boards consulted for monitoring-sensitive candidates
    boards: &'a [String],
}

impl<'a> AutoMerge<'a> {
    /// Engine over `forge`, holding monitoring-sensitive merges until
    /// `gate` reports all `boards` clear
    pub fn new(
        forge: &'a dyn Forge,
        gate: &'a dyn MonitoringGate,
        authors: &'a [String],
        boards: &'a [String],
    ) -> Self {
        Self {
            forge,
            gate,
            authors,
            boards,
        }
    }

    /// Evaluate and merge all candidates. Fails only when the candidate
    /// list itself cannot be fetched; per-candidate errors are isolated
    /// into the report.
    pub async fn run(&self) -> Result<StatusReport> {
        let open = self.forge.list_open_prs().await?;
        let candidates: Vec<_> = open
            .into_iter()
            .filter(|pr| self.authors.contains(&pr.author))
            .collect();
        info!(count = candidates.len(), "evaluating auto-merge candidates");

        let mut report = StatusReport::default();
        for candidate in &candidates {
            let entry = match self.process(candidate).await {
                Ok(entry) => entry,
                // evaluation error: confined to this candidate
                Err(err) => {
                    warn!(pr = candidate.number, %err, "candidate evaluation failed");
                    CandidateReport {
                        candidate_id: candidate.number,
                        eligible: false,
                        reasons: Vec::new(),
                        action: MergeAction::Failed,
                        error: Some(err.to_string()),
                    }
                }
            };
            report.candidates.push(entry);
        }
        Ok(report)
    }

    async fn process(&self, candidate: &MergeCandidate) -> Result<CandidateReport> {
        let facts = self.gather_facts(candidate).await?;
        let verdict = rules::evaluate(&facts);

        if !verdict.eligible {
            info!(
                pr = candidate.number,
                reasons = verdict.reasons.join("; "),
                "skipping candidate"
            );
            return Ok(CandidateReport {
                candidate_id: candidate.number,
                eligible: false,
                reasons: verdict.reasons,
                action: MergeAction::Skipped,
                error: None,
            });
        }

        match self.forge.merge_pr(candidate.number).await {
            Ok(outcome) if outcome.merged => {
                info!(pr = candidate.number, sha = ?outcome.sha, "merged");
                // branch cleanup is best effort; GitHub may have deleted it
                if let Err(err) = self.forge.delete_branch(&candidate.head_ref).await {
                    debug!(pr = candidate.number, %err, "head branch cleanup failed");
                }
                Ok(CandidateReport {
                    candidate_id: candidate.number,
                    eligible: true,
                    reasons: Vec::new(),
                    action: MergeAction::Merged,
                    error: None,
                })
            }
            Ok(outcome) => Ok(CandidateReport {
                candidate_id: candidate.number,
                eligible: true,
                reasons: Vec::new(),
                action: MergeAction::Failed,
                error: Some(
                    outcome
                        .message
                        .unwrap_or_else(|| "merge rejected by forge".to_string()),
                ),
            }),
            Err(err) => {
                warn!(pr = candidate.number, %err, "merge failed");
                Ok(CandidateReport {
                    candidate_id: candidate.number,
                    eligible: true,
                    reasons: Vec::new(),
                    action: MergeAction::Failed,
                    error: Some(err.to_string()),
                })
            }
        }
    }

    async fn gather_facts(&self, candidate: &MergeCandidate) -> Result<CandidateFacts> {
        let failing = rules::relevant_failing_checks(
            self.forge.failing_checks(&candidate.head_sha).await?,
        );
        let review = self.forge.review_decision(candidate.number).await?;

        let mut safety_holds = Vec::new();
        for rule in rules::safety_rules_for(&candidate.labels) {
            match rule {
                SafetyRule::MonitoringReview => {
                    let today = Utc::now().date_naive();
                    if let Some(hold) = first_hold(self.gate, self.boards, today).await? {
                        safety_holds.push(hold.to_string());
                    }
                }
            }
        }

        Ok(CandidateFacts {
            is_draft: candidate.is_draft,
            base_is_dev: rules::is_dev_branch(&candidate.base_ref),
            failing_checks: failing,
            review,
            safety_holds,
        })
    }
}

/// Write the status artifact into `dir`, returning its path
pub fn write_report(report: &StatusReport, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(STATUS_ARTIFACT);
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| Error::Pipeline(format!("failed to serialize status report: {e}")))?;
    std::fs::write(&path, json)?;
    debug!(path = %path.display(), "wrote status artifact");
    Ok(path)
}

/// Merge the dev branches into their staging branches and push. Runs before
/// the PR pass while the monitoring review is clear; a dev branch already
/// contained in staging is skipped, so repeated runs converge without empty
/// merges. Returns the versions whose staging branch actually moved.
pub fn merge_staging(repo: &GitRepo) -> Result<Vec<String>> {
    let pattern = Regex::new(r"^origin/fc-([0-9]{2}\.[0-9]{2})-staging$")
        .map_err(|e| Error::Pipeline(format!("invalid branch pattern: {e}")))?;
    repo.ensure_repo()?;
    let mut versions = repo.match_branches(&pattern)?;
    versions.sort();
    versions.dedup();

    let mut merged = Vec::new();
    for version in versions {
        let dev = format!("origin/fc-{version}-dev");
        let staging = format!("fc-{version}-staging");
        if repo.rev_parse_opt(&dev)?.is_none() {
            debug!(version, "no dev branch, skipping staging merge");
            continue;
        }
        repo.checkout(&staging, true, true)?;
        if repo.is_ancestor(&dev, &staging)? {
            continue;
        }
        let message = format!("Merge branch 'fc-{version}-dev' into '{staging}'");
        repo.merge(&dev, &message)?;
        repo.push(&[&staging])?;
        info!(version, "merged dev into staging");
        merged.push(version);
    }
    Ok(merged)
}
