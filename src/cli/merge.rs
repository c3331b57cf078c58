//! Auto-merge command: daily staging merges plus eligible bot PRs

use async_trait::async_trait;
use chrono::Utc;
use fc_release_tools::automerge::{AutoMerge, merge_staging, write_report};
use fc_release_tools::config::Config;
use fc_release_tools::error::{Error, Result};
use fc_release_tools::forge::GitHubForge;
use fc_release_tools::git::GitRepo;
use fc_release_tools::notify::Notifier;
use fc_release_tools::review::{BoardReview, MonitoringGate, MonitoringReviewClient, first_hold};
use fc_release_tools::types::MergeAction;
use std::path::{Path, PathBuf};
use tracing::info;

/// Options for the `merge` command
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// fc-nixos checkout used for the staging merges
    pub fc_nixos_dir: PathBuf,
    /// Repository whose CI workflow collects the status artifact
    pub action_run_repo_name: String,
}

/// Placeholder gate; never consulted because it is paired with an empty
/// board list
struct UnconfiguredGate;

#[async_trait]
impl MonitoringGate for UnconfiguredGate {
    async fn board_review(&self, _board: &str) -> Result<BoardReview> {
        Err(Error::Config(
            "MONITORING_REVIEW_URL is not set".to_string(),
        ))
    }
}

/// Run the auto-merge pass. Returns whether any candidate errored, which
/// drives the process exit status.
pub async fn run_merge(config: &Config, options: &MergeOptions) -> Result<bool> {
    info!(
        artifact_repo = options.action_run_repo_name,
        "starting auto-merge run"
    );

    let forge = GitHubForge::new(&config.github_token, config.fc_nixos_repo.clone())?;
    let notifier = Notifier::new(config.chat_webhook_url.clone())?;

    let empty: Vec<String> = Vec::new();
    let (gate, boards): (Box<dyn MonitoringGate>, &[String]) = match &config.monitoring_review_url {
        Some(url) => (
            Box::new(MonitoringReviewClient::new(url.clone())?),
            &config.monitoring_boards,
        ),
        // without a review endpoint the monitoring rule does not gate
        None => (Box::new(UnconfiguredGate), &empty),
    };

    // daily dev -> staging merges, held while the monitoring review is open
    let hold = if boards.is_empty() {
        None
    } else {
        first_hold(gate.as_ref(), boards, Utc::now().date_naive()).await?
    };
    match hold {
        Some(hold) => {
            notifier
                .try_send(&format!(
                    "fc-nixos auto-merge: {hold}. Not merging staging."
                ))
                .await;
            info!(%hold, "skipping staging merges");
        }
        None => {
            let origin =
                super::authenticated_url(&config.github_token, &config.fc_nixos_repo.full_name());
            let repo = GitRepo::new(&options.fc_nixos_dir, origin);
            let merged = merge_staging(&repo)?;
            if !merged.is_empty() {
                info!(versions = merged.join(", "), "staging branches updated");
            }
        }
    }

    let engine = AutoMerge::new(&forge, gate.as_ref(), &config.automerge_authors, boards);
    let report = engine.run().await?;

    for entry in &report.candidates {
        match entry.action {
            MergeAction::Merged => println!("PR #{}: merged", entry.candidate_id),
            MergeAction::Skipped => println!(
                "PR #{}: skipped ({})",
                entry.candidate_id,
                entry.reasons.join("; ")
            ),
            MergeAction::Failed => println!(
                "PR #{}: FAILED ({})",
                entry.candidate_id,
                entry.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }

    let path = write_report(&report, Path::new("."))?;
    info!(path = %path.display(), "status artifact written");
    Ok(report.has_errors())
}
