//! Status store: persistence for the release train record.
//!
//! The train state lives as a single human-diffable TOML file inside the
//! managed fc-nixos checkout. It is read once at invocation start and
//! rewritten wholesale after every stage transition; the write is atomic
//! (temp file + rename) so a crash mid-write never leaves a torn record.

use crate::error::{Error, Result};
use crate::types::{ReleaseTrain, StageRecord, StageStatus};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Filename of the persisted train record inside the checkout
const STATE_FILE: &str = "release-state.toml";

/// Handle to the persisted release train record.
///
/// The store is the single writer of the record; `record_*_outcome` are the
/// only mutation entry points and each one saves immediately.
pub struct StatusStore {
    path: PathBuf,
}

impl StatusStore {
    /// Store for the record inside `checkout_dir`
    pub fn new(checkout_dir: &Path) -> Self {
        Self {
            path: checkout_dir.join(STATE_FILE),
        }
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted train. A missing file yields an empty train; an
    /// unparseable file is `CorruptState` and never silently dropped.
    pub fn load(&self) -> Result<ReleaseTrain> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no state file, starting empty");
            return Ok(ReleaseTrain::default());
        }

        let content = fs::read_to_string(&self.path)?;
        toml::from_str(&content).map_err(|e| Error::CorruptState {
            path: self.path.clone(),
            detail: e.to_string(),
        })
    }

    /// Atomically overwrite the record: serialize to a temp file in the same
    /// directory, then rename over the target.
    pub fn save(&self, train: &ReleaseTrain) -> Result<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| Error::Pipeline(format!("state path {} has no parent", self.path.display())))?;

        let content = toml::to_string_pretty(train)
            .map_err(|e| Error::Pipeline(format!("failed to serialize release state: {e}")))?;
        let content = format!(
            "# fc-release train state\n# Auto-generated - manual edits may be overwritten\n\n{content}"
        );

        let tmp = NamedTempFile::new_in(dir)?;
        fs::write(tmp.path(), &content)?;
        tmp.persist(&self.path)
            .map_err(|e| Error::Io(e.error))?;

        debug!(path = %self.path.display(), "saved release state");
        Ok(())
    }

    /// Append a stage outcome for `version` and save. Success for a stage
    /// already marked done is not appended again (re-runs verify, they do
    /// not repeat); failures are always kept as an audit trail.
    pub fn record_branch_outcome(
        &self,
        train: &mut ReleaseTrain,
        version: &str,
        record: StageRecord,
    ) -> Result<()> {
        let branch = train
            .branch_mut(version)
            .ok_or_else(|| Error::Pipeline(format!("branch '{version}' is not tracked")))?;
        if record.status == StageStatus::Success && branch.is_done(record.stage) {
            return Ok(());
        }
        branch.history.push(record);
        self.save(train)
    }

    /// Append a train-level stage outcome and save
    pub fn record_train_outcome(
        &self,
        train: &mut ReleaseTrain,
        record: StageRecord,
    ) -> Result<()> {
        if record.status == StageStatus::Success && train.is_done(record.stage) {
            return Ok(());
        }
        train.history.push(record);
        self.save(train)
    }
}
