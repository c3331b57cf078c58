//! Release pipeline commands

use chrono::NaiveDate;
use fc_release_tools::config::Config;
use fc_release_tools::error::Result;
use fc_release_tools::forge::GitHubForge;
use fc_release_tools::release::Pipeline;
use std::path::Path;

fn pipeline(dir: &Path, config: &Config) -> Result<Pipeline> {
    let origin = super::authenticated_url(&config.github_token, &config.fc_nixos_repo.full_name());
    Pipeline::open(dir, origin)
}

fn forge(config: &Config) -> Result<GitHubForge> {
    GitHubForge::new(&config.github_token, config.fc_nixos_repo.clone())
}

/// `fc-release start [release-id] [release-date]`
pub fn run_start(
    dir: &Path,
    config: &Config,
    release_id: Option<String>,
    release_date: Option<NaiveDate>,
) -> Result<()> {
    let mut pipeline = pipeline(dir, config)?;
    let found = pipeline.start(release_id, release_date)?;

    if found.is_empty() {
        println!("No production branches found on origin.");
    }
    for branch in &found {
        if branch.pending {
            println!(
                "{}: staging has pending changes, register with `fc-release add-branch {}`",
                branch.version, branch.version
            );
        } else {
            println!("{}: no pending changes", branch.version);
        }
    }
    println!();
    print!("{}", pipeline.status());
    Ok(())
}

/// `fc-release status` — needs no credentials
pub fn run_status(dir: &Path) -> Result<()> {
    let pipeline = Pipeline::open(dir, String::new())?;
    print!("{}", pipeline.status());
    Ok(())
}

/// `fc-release add-branch <version>`
pub fn run_add_branch(dir: &Path, config: &Config, version: &str) -> Result<()> {
    pipeline(dir, config)?.add_branch(version)
}

/// `fc-release test-branch <version>`
pub async fn run_test_branch(dir: &Path, config: &Config, version: &str) -> Result<()> {
    let forge = forge(config)?;
    pipeline(dir, config)?.test_branch(&forge, version).await
}

/// `fc-release merge-production <version>`
pub fn run_merge_production(dir: &Path, config: &Config, version: &str) -> Result<()> {
    pipeline(dir, config)?.merge_production(version)
}

/// `fc-release release-production <version>`
pub async fn run_release_production(dir: &Path, config: &Config, version: &str) -> Result<()> {
    let forge = forge(config)?;
    pipeline(dir, config)?
        .release_production(&forge, version)
        .await
}

/// `fc-release doc`
pub fn run_doc(dir: &Path, config: &Config) -> Result<()> {
    pipeline(dir, config)?.doc(
        &config.fc_nixos_repo.full_name(),
        &config.nixpkgs_repo.full_name(),
    )
}

/// `fc-release tag`
pub fn run_tag(dir: &Path, config: &Config) -> Result<()> {
    pipeline(dir, config)?.tag()
}
