//! Dependency-update command

use fc_release_tools::config::Config;
use fc_release_tools::error::Result;
use fc_release_tools::forge::GitHubForge;
use fc_release_tools::notify::Notifier;
use fc_release_tools::update::{UpdateBot, UpdateOptions};
use std::path::PathBuf;

/// Options for the `update` command
#[derive(Debug, Clone)]
pub struct UpdateArgs {
    /// fc-nixos checkout the pin is advanced in
    pub fc_nixos_dir: PathBuf,
    /// Local nixpkgs mirror checkout
    pub nixpkgs_dir: PathBuf,
    /// Upstream nixpkgs URL
    pub nixpkgs_upstream_url: String,
    /// URL of the nixpkgs fork
    pub nixpkgs_origin_url: String,
    /// Stage even when the pin is current
    pub force: bool,
}

fn options(config: &Config, args: &UpdateArgs) -> UpdateOptions {
    UpdateOptions {
        fc_nixos_dir: args.fc_nixos_dir.clone(),
        nixpkgs_dir: args.nixpkgs_dir.clone(),
        upstream_url: args.nixpkgs_upstream_url.clone(),
        origin_url: args.nixpkgs_origin_url.clone(),
        fc_nixos_origin_url: super::authenticated_url(
            &config.github_token,
            &config.fc_nixos_repo.full_name(),
        ),
        force: args.force,
    }
}

/// Run the update bot once
pub async fn run_update(config: &Config, args: &UpdateArgs) -> Result<()> {
    let forge = GitHubForge::new(&config.github_token, config.fc_nixos_repo.clone())?;
    let notifier = Notifier::new(config.chat_webhook_url.clone())?;
    let opts = options(config, args);

    let nixpkgs_repo_name = config.nixpkgs_repo.full_name();
    let bot = UpdateBot::new(
        &forge,
        &notifier,
        &config.update_platform_version,
        &config.nixpkgs_upstream_branch,
        &nixpkgs_repo_name,
        &opts,
    );

    let outcome = bot.run().await?;
    println!("{outcome}");
    Ok(())
}

/// Promote the merged pin on the fork and prune stale update branches
pub async fn run_cleanup(config: &Config, args: &UpdateArgs) -> Result<()> {
    let forge = GitHubForge::new(&config.github_token, config.fc_nixos_repo.clone())?;
    let notifier = Notifier::new(config.chat_webhook_url.clone())?;
    let opts = options(config, args);

    let nixpkgs_repo_name = config.nixpkgs_repo.full_name();
    let bot = UpdateBot::new(
        &forge,
        &notifier,
        &config.update_platform_version,
        &config.nixpkgs_upstream_branch,
        &nixpkgs_repo_name,
        &opts,
    );

    let deleted = bot.cleanup().await?;
    if deleted.is_empty() {
        println!("No stale update branches.");
    }
    for branch in deleted {
        println!("deleted {branch}");
    }
    Ok(())
}
