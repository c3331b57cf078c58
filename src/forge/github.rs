//! GitHub forge implementation using octocrab

use crate::config::RepoCoords;
use crate::error::{Error, Result};
use crate::forge::Forge;
use crate::types::{MergeCandidate, MergeOutcome, ReviewDecision};
use async_trait::async_trait;
use octocrab::Octocrab;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// GitHub gateway for one repository
pub struct GitHubForge {
    client: Octocrab,
    coords: RepoCoords,
    /// Token for raw HTTP requests (check-status endpoints)
    token: String,
    /// HTTP client for raw requests
    http_client: Client,
    api_host: String,
}

impl GitHubForge {
    /// Create a gateway for `coords` authenticated with `token`
    pub fn new(token: &str, coords: RepoCoords) -> Result<Self> {
        let client = Octocrab::builder()
            .personal_token(token.to_string())
            .build()
            .map_err(|e| Error::Forge(e.to_string()))?;

        let http_client = Client::builder()
            .user_agent("fc-release-tools")
            .build()
            .map_err(|e| Error::Forge(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            coords,
            token: token.to_string(),
            http_client,
            api_host: "api.github.com".to_string(),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<Option<T>> {
        let response = self
            .http_client
            .get(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await?;

        if !response.status().is_success() {
            debug!(status = %response.status(), url, "non-success response");
            return Ok(None);
        }
        Ok(Some(response.json::<T>().await?))
    }

    /// Failing entries of the legacy combined-status API
    async fn failing_commit_statuses(&self, ref_name: &str) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct CombinedStatus {
            statuses: Vec<CommitStatus>,
        }
        #[derive(Deserialize)]
        struct CommitStatus {
            state: String,
            context: String,
        }

        let url = format!(
            "https://{}/repos/{}/{}/commits/{}/status",
            self.api_host, self.coords.owner, self.coords.repo, ref_name
        );
        // Missing endpoint or no statuses configured counts as passing
        let Some(combined) = self.get_json::<CombinedStatus>(&url).await? else {
            return Ok(Vec::new());
        };

        Ok(combined
            .statuses
            .into_iter()
            .filter(|s| s.state != "success")
            .map(|s| s.context)
            .collect())
    }

    /// Failing check runs (GitHub Actions API)
    async fn failing_check_runs(&self, ref_name: &str) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct CheckRunsResponse {
            check_runs: Vec<CheckRun>,
        }
        #[derive(Deserialize)]
        struct CheckRun {
            name: String,
            status: String,
            conclusion: Option<String>,
        }

        let url = format!(
            "https://{}/repos/{}/{}/commits/{}/check-runs",
            self.api_host, self.coords.owner, self.coords.repo, ref_name
        );
        let Some(runs) = self.get_json::<CheckRunsResponse>(&url).await? else {
            return Ok(Vec::new());
        };

        let mut failing = Vec::new();
        for run in runs.check_runs {
            if run.status != "completed" {
                failing.push(run.name);
                continue;
            }
            match run.conclusion.as_deref() {
                Some("success" | "neutral" | "skipped") => {}
                // completed without a conclusion counts as failing
                _ => failing.push(run.name),
            }
        }
        Ok(failing)
    }
}

fn candidate_from_octocrab(pr: &octocrab::models::pulls::PullRequest) -> MergeCandidate {
    MergeCandidate {
        number: pr.number,
        title: pr.title.as_deref().unwrap_or_default().to_string(),
        author: pr
            .user
            .as_ref()
            .map(|u| u.login.clone())
            .unwrap_or_default(),
        labels: pr
            .labels
            .as_ref()
            .map(|labels| labels.iter().map(|l| l.name.clone()).collect())
            .unwrap_or_default(),
        head_ref: pr.head.ref_field.clone(),
        head_sha: pr.head.sha.clone(),
        base_ref: pr.base.ref_field.clone(),
        is_draft: pr.draft.unwrap_or(false),
        html_url: pr
            .html_url
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default(),
    }
}

#[async_trait]
impl Forge for GitHubForge {
    async fn list_open_prs(&self) -> Result<Vec<MergeCandidate>> {
        debug!("listing open PRs");
        let page = self
            .client
            .pulls(&self.coords.owner, &self.coords.repo)
            .list()
            .state(octocrab::params::State::Open)
            .per_page(100)
            .send()
            .await?;

        let result: Vec<MergeCandidate> =
            page.items.iter().map(candidate_from_octocrab).collect();
        debug!(count = result.len(), "listed open PRs");
        Ok(result)
    }

    async fn failing_checks(&self, ref_name: &str) -> Result<Vec<String>> {
        debug!(ref_name, "checking CI status");
        let mut failing = self.failing_commit_statuses(ref_name).await?;
        failing.extend(self.failing_check_runs(ref_name).await?);
        debug!(ref_name, failing = failing.len(), "checked CI status");
        Ok(failing)
    }

    async fn review_decision(&self, pr_number: u64) -> Result<ReviewDecision> {
        debug!(pr_number, "checking review state");
        let reviews = self
            .client
            .pulls(&self.coords.owner, &self.coords.repo)
            .list_reviews(pr_number)
            .send()
            .await?;

        // latest review per reviewer wins
        let mut latest: HashMap<String, octocrab::models::pulls::ReviewState> = HashMap::new();
        for review in &reviews.items {
            let Some(user) = review.user.as_ref() else {
                continue;
            };
            let Some(state) = review.state.clone() else {
                continue;
            };
            use octocrab::models::pulls::ReviewState;
            match state {
                ReviewState::Approved | ReviewState::ChangesRequested => {
                    latest.insert(user.login.clone(), state);
                }
                // comments and dismissals do not change the decision
                _ => {}
            }
        }

        if latest
            .values()
            .any(|s| *s == octocrab::models::pulls::ReviewState::ChangesRequested)
        {
            return Ok(ReviewDecision::ChangesRequested);
        }

        // an outstanding review request blocks even with a prior approval
        let pr = self
            .client
            .pulls(&self.coords.owner, &self.coords.repo)
            .get(pr_number)
            .await?;
        let pending_request = pr
            .requested_reviewers
            .as_ref()
            .is_some_and(|r| !r.is_empty());
        if pending_request {
            return Ok(ReviewDecision::ReviewRequired);
        }

        if latest
            .values()
            .any(|s| *s == octocrab::models::pulls::ReviewState::Approved)
        {
            Ok(ReviewDecision::Approved)
        } else {
            Ok(ReviewDecision::ReviewRequired)
        }
    }

    async fn merge_pr(&self, pr_number: u64) -> Result<MergeOutcome> {
        debug!(pr_number, "merging PR");
        let result = self
            .client
            .pulls(&self.coords.owner, &self.coords.repo)
            .merge(pr_number)
            .method(octocrab::params::pulls::MergeMethod::Merge)
            .send()
            .await
            .map_err(|e| Error::Forge(format!("merge of PR #{pr_number} failed: {e}")))?;

        let outcome = MergeOutcome {
            merged: result.merged,
            sha: result.sha,
            message: result.message,
        };
        debug!(pr_number, merged = outcome.merged, "merge complete");
        Ok(outcome)
    }

    async fn find_existing_pr(&self, head_branch: &str) -> Result<Option<u64>> {
        debug!(head_branch, "finding existing PR");
        let head = format!("{}:{}", &self.coords.owner, head_branch);
        let prs = self
            .client
            .pulls(&self.coords.owner, &self.coords.repo)
            .list()
            .head(head)
            .state(octocrab::params::State::Open)
            .send()
            .await?;
        Ok(prs.items.first().map(|pr| pr.number))
    }

    async fn create_pr(&self, head: &str, base: &str, title: &str, body: &str) -> Result<u64> {
        debug!(head, base, "creating PR");
        let pr = self
            .client
            .pulls(&self.coords.owner, &self.coords.repo)
            .create(title, head, base)
            .body(body)
            .send()
            .await?;
        debug!(pr_number = pr.number, "created PR");
        Ok(pr.number)
    }

    async fn create_pr_comment(&self, pr_number: u64, body: &str) -> Result<()> {
        debug!(pr_number, "creating PR comment");
        self.client
            .issues(&self.coords.owner, &self.coords.repo)
            .create_comment(pr_number, body)
            .await?;
        Ok(())
    }

    async fn delete_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "deleting branch ref");
        let url = format!(
            "https://{}/repos/{}/{}/git/refs/heads/{}",
            self.api_host, self.coords.owner, self.coords.repo, branch
        );
        let response = self
            .http_client
            .delete(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Forge(format!(
                "deleting branch {branch} failed with status {}",
                response.status()
            )));
        }
        Ok(())
    }
}
