//! Release automation for the fc-nixos branch train.
//!
//! Three engines share the gateways in this crate:
//!
//! - [`release`] — the resumable release pipeline moving each platform
//!   version through `add-branch` → `test-branch` → `merge-production` →
//!   `release-production` → `tag`, with the train-wide `doc` stage. Progress
//!   is persisted through [`state`] and every stage converges on re-run.
//! - [`automerge`] — evaluates open bot PRs against a rule chain and merges
//!   the eligible ones, emitting the `auto-merge-status.json` artifact.
//! - [`update`] — advances the nixpkgs pin and stages an update PR.
//!
//! External I/O goes through [`git`] (system git binary), [`forge`]
//! (GitHub), [`review`] (monitoring-review service) and [`notify`]
//! (chat webhook) so the engines stay testable against mocks.

pub mod automerge;
pub mod config;
pub mod error;
pub mod forge;
pub mod git;
pub mod notify;
pub mod release;
pub mod review;
pub mod state;
pub mod types;
pub mod update;

pub use error::{Error, Result};
