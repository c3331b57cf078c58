//! fc-release: release automation for the fc-nixos branch train

mod cli;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use fc_release_tools::config::Config;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "fc-release",
    version,
    about = "Release pipeline, auto-merge and nixpkgs update automation for fc-nixos"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new release cycle and scan for pending changes
    Start {
        /// Release ID in the form YYYY_NNN
        release_id: Option<String>,
        /// Targeted roll-out date (YYYY-MM-DD)
        release_date: Option<NaiveDate>,
        #[arg(long, default_value = "work/fc-nixos")]
        fc_nixos_dir: PathBuf,
    },
    /// Show the train status and the next commands to run
    Status {
        #[arg(long, default_value = "work/fc-nixos")]
        fc_nixos_dir: PathBuf,
    },
    /// Register a platform version for the release train
    AddBranch {
        /// Platform version, e.g. 24.05
        version: String,
        #[arg(long, default_value = "work/fc-nixos")]
        fc_nixos_dir: PathBuf,
    },
    /// Verify the staging branch has green CI
    TestBranch {
        version: String,
        #[arg(long, default_value = "work/fc-nixos")]
        fc_nixos_dir: PathBuf,
    },
    /// Merge staging into production and backmerge to dev
    MergeProduction {
        version: String,
        #[arg(long, default_value = "work/fc-nixos")]
        fc_nixos_dir: PathBuf,
    },
    /// Verify the merged production commit has green CI
    ReleaseProduction {
        version: String,
        #[arg(long, default_value = "work/fc-nixos")]
        fc_nixos_dir: PathBuf,
    },
    /// Collect and commit the release changelog
    Doc {
        #[arg(long, default_value = "work/fc-nixos")]
        fc_nixos_dir: PathBuf,
    },
    /// Tag the released production commits
    Tag {
        #[arg(long, default_value = "work/fc-nixos")]
        fc_nixos_dir: PathBuf,
    },
    /// Merge the staging branches and eligible bot PRs
    Merge {
        /// Repository whose CI workflow collects the status artifact
        #[arg(long)]
        action_run_repo_name: String,
        #[arg(long, default_value = "work/fc-nixos")]
        fc_nixos_dir: PathBuf,
    },
    /// Stage a nixpkgs pin update and open a PR
    Update {
        #[arg(long, default_value = "work/fc-nixos")]
        fc_nixos_dir: PathBuf,
        #[arg(long, default_value = "work/nixpkgs")]
        nixpkgs_dir: PathBuf,
        /// Upstream nixpkgs URL the pin tracks
        #[arg(long)]
        nixpkgs_upstream_url: String,
        /// URL of the nixpkgs fork update branches are pushed to
        #[arg(long)]
        nixpkgs_origin_url: String,
        /// Stage even when the pin already matches upstream
        #[arg(long)]
        force: bool,
    },
    /// Promote the merged nixpkgs pin on the fork and prune stale update
    /// branches
    Cleanup {
        #[arg(long, default_value = "work/fc-nixos")]
        fc_nixos_dir: PathBuf,
        #[arg(long, default_value = "work/nixpkgs")]
        nixpkgs_dir: PathBuf,
        /// Upstream nixpkgs URL the pin tracks
        #[arg(long)]
        nixpkgs_upstream_url: String,
        /// URL of the nixpkgs fork update branches are pushed to
        #[arg(long)]
        nixpkgs_origin_url: String,
    },
}

async fn run(command: Command) -> Result<ExitCode> {
    match command {
        Command::Status { fc_nixos_dir } => {
            cli::release::run_status(&fc_nixos_dir)?;
        }
        Command::Start {
            release_id,
            release_date,
            fc_nixos_dir,
        } => {
            let config = Config::from_env()?;
            cli::release::run_start(&fc_nixos_dir, &config, release_id, release_date)?;
        }
        Command::AddBranch {
            version,
            fc_nixos_dir,
        } => {
            let config = Config::from_env()?;
            cli::release::run_add_branch(&fc_nixos_dir, &config, &version)?;
        }
        Command::TestBranch {
            version,
            fc_nixos_dir,
        } => {
            let config = Config::from_env()?;
            cli::release::run_test_branch(&fc_nixos_dir, &config, &version).await?;
        }
        Command::MergeProduction {
            version,
            fc_nixos_dir,
        } => {
            let config = Config::from_env()?;
            cli::release::run_merge_production(&fc_nixos_dir, &config, &version)?;
        }
        Command::ReleaseProduction {
            version,
            fc_nixos_dir,
        } => {
            let config = Config::from_env()?;
            cli::release::run_release_production(&fc_nixos_dir, &config, &version).await?;
        }
        Command::Doc { fc_nixos_dir } => {
            let config = Config::from_env()?;
            cli::release::run_doc(&fc_nixos_dir, &config)?;
        }
        Command::Tag { fc_nixos_dir } => {
            let config = Config::from_env()?;
            cli::release::run_tag(&fc_nixos_dir, &config)?;
        }
        Command::Merge {
            action_run_repo_name,
            fc_nixos_dir,
        } => {
            let config = Config::from_env()?;
            let options = cli::merge::MergeOptions {
                fc_nixos_dir,
                action_run_repo_name,
            };
            if cli::merge::run_merge(&config, &options).await? {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Update {
            fc_nixos_dir,
            nixpkgs_dir,
            nixpkgs_upstream_url,
            nixpkgs_origin_url,
            force,
        } => {
            let config = Config::from_env()?;
            let args = cli::update::UpdateArgs {
                fc_nixos_dir,
                nixpkgs_dir,
                nixpkgs_upstream_url,
                nixpkgs_origin_url,
                force,
            };
            cli::update::run_update(&config, &args).await?;
        }
        Command::Cleanup {
            fc_nixos_dir,
            nixpkgs_dir,
            nixpkgs_upstream_url,
            nixpkgs_origin_url,
        } => {
            let config = Config::from_env()?;
            let args = cli::update::UpdateArgs {
                fc_nixos_dir,
                nixpkgs_dir,
                nixpkgs_upstream_url,
                nixpkgs_origin_url,
                force: false,
            };
            cli::update::run_cleanup(&config, &args).await?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
