//! Error types for fc-release-tools

use crate::types::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// All errors produced by the release tooling
#[derive(Debug, Error)]
pub enum Error {
    /// The persisted release state could not be parsed. Fatal; the operator
    /// has to repair (or remove) the file by hand.
    #[error("release state {path} is corrupt: {detail}")]
    CorruptState {
        /// Path of the state file
        path: PathBuf,
        /// Parse failure detail
        detail: String,
    },

    /// A stage was requested before its predecessors completed.
    #[error(
        "stage '{stage}' is out of order for {branch}: run `fc-release {missing} {branch}` first"
    )]
    OutOfOrderStage {
        /// Branch (platform version) the stage was requested for
        branch: String,
        /// The requested stage
        stage: Stage,
        /// The first stage still missing a success record
        missing: Stage,
    },

    /// A train-wide stage was requested while branches are still lagging.
    #[error("train is not ready for '{stage}': waiting on release-production for {}", lagging.join(", "))]
    TrainNotReady {
        /// The requested train stage
        stage: Stage,
        /// Branches lacking the prerequisite stage
        lagging: Vec<String>,
    },

    /// A stage side effect was applied only partially. Recorded in the state
    /// file; re-running the same stage converges.
    #[error("stage '{stage}' partially applied for {branch}: {detail}")]
    PartialStage {
        /// Branch the stage ran for
        branch: String,
        /// The stage that failed mid-way
        stage: Stage,
        /// What was applied and what was not
        detail: String,
    },

    /// A git command failed for a non-network reason.
    #[error("git: {0}")]
    Git(String),

    /// A network-facing gateway call failed; safe to retry the same command.
    #[error("gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// Forge (GitHub) API error
    #[error("forge API error: {0}")]
    Forge(String),

    /// Configuration / environment error
    #[error("config: {0}")]
    Config(String),

    /// Pipeline usage error (unknown branch, wrong train state, ...)
    #[error("{0}")]
    Pipeline(String),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<octocrab::Error> for Error {
    fn from(err: octocrab::Error) -> Self {
        Self::Forge(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::GatewayUnavailable(err.to_string())
        } else {
            Self::Forge(err.to_string())
        }
    }
}
