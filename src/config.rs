//! Environment-provided configuration
//!
//! Secrets and endpoints are consumed from the environment and passed
//! opaquely to the respective gateway; nothing here is interpreted by the
//! engines themselves.

use crate::error::{Error, Result};
use url::Url;

/// Repository coordinates on the forge
#[derive(Debug, Clone)]
pub struct RepoCoords {
    /// Repository owner (user or organization)
    pub owner: String,
    /// Repository name
    pub repo: String,
}

impl RepoCoords {
    /// Parse "owner/repo"
    pub fn parse(full_name: &str) -> Result<Self> {
        match full_name.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() => Ok(Self {
                owner: owner.to_string(),
                repo: repo.to_string(),
            }),
            _ => Err(Error::Config(format!(
                "invalid repository name '{full_name}', expected owner/repo"
            ))),
        }
    }

    /// "owner/repo"
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Runtime configuration assembled from the environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Forge access token (`GH_TOKEN`)
    pub github_token: String,
    /// Chat webhook URL (`CHAT_WEBHOOK_URL`), optional
    pub chat_webhook_url: Option<Url>,
    /// Monitoring-review endpoint (`MONITORING_REVIEW_URL`), optional
    pub monitoring_review_url: Option<Url>,
    /// The managed repository
    pub fc_nixos_repo: RepoCoords,
    /// The nixpkgs fork holding the pinned dependency tree
    pub nixpkgs_repo: RepoCoords,
    /// Upstream branch the nixpkgs pin tracks
    pub nixpkgs_upstream_branch: String,
    /// Platform version the update bot targets
    pub update_platform_version: String,
    /// Author logins whose PRs the auto-merge engine considers
    pub automerge_authors: Vec<String>,
    /// Monitoring-review boards that must be clear before merging
    pub monitoring_boards: Vec<String>,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_url(key: &str) -> Result<Option<Url>> {
    env_opt(key)
        .map(|v| Url::parse(&v).map_err(|e| Error::Config(format!("{key}: {e}"))))
        .transpose()
}

impl Config {
    /// Assemble from the environment. Fails only on a missing token or an
    /// unparseable URL; everything else has defaults with env overrides.
    pub fn from_env() -> Result<Self> {
        let github_token = env_opt("GH_TOKEN")
            .ok_or_else(|| Error::Config("missing GH_TOKEN environment variable".to_string()))?;

        let fc_nixos_repo = RepoCoords::parse(
            &env_opt("FC_NIXOS_REPO").unwrap_or_else(|| "flyingcircusio/fc-nixos".to_string()),
        )?;
        let nixpkgs_repo = RepoCoords::parse(
            &env_opt("NIXPKGS_REPO").unwrap_or_else(|| "flyingcircusio/nixpkgs".to_string()),
        )?;

        let automerge_authors = env_opt("AUTOMERGE_AUTHORS")
            .map(|v| v.split(',').map(str::trim).map(String::from).collect())
            .unwrap_or_else(|| {
                vec![
                    "fc-release-bot".to_string(),
                    "dependabot[bot]".to_string(),
                ]
            });

        let monitoring_boards = env_opt("MONITORING_BOARDS")
            .map(|v| v.split(',').map(str::trim).map(String::from).collect())
            .unwrap_or_else(|| vec!["platform".to_string()]);

        let update_platform_version =
            env_opt("UPDATE_PLATFORM_VERSION").unwrap_or_else(|| "25.05".to_string());
        let nixpkgs_upstream_branch = env_opt("NIXPKGS_UPSTREAM_BRANCH")
            .unwrap_or_else(|| format!("nixos-{update_platform_version}"));

        Ok(Self {
            github_token,
            chat_webhook_url: env_url("CHAT_WEBHOOK_URL")?,
            monitoring_review_url: env_url("MONITORING_REVIEW_URL")?,
            fc_nixos_repo,
            nixpkgs_repo,
            nixpkgs_upstream_branch,
            update_platform_version,
            automerge_authors,
            monitoring_boards,
        })
    }
}
