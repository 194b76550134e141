//! The staging area (`new_snapshot`) a run writes into before commit.
//!
//! The marker file `save_to_continue` is the persisted recovery state: a
//! staging directory without it holds stale leftovers and is wiped, one with
//! it holds a partial backup that the next run extends.

use super::sid::{SnapshotId, BACKUP_DIR};
use crate::config::Config;
use crate::fs::remove_tree;
use crate::utils::{Result, SnapshotError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const STAGING_DIR_NAME: &str = "new_snapshot";
pub const SAVE_TO_CONTINUE: &str = "save_to_continue";

/// What `prepare` found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingState {
    Absent,
    /// Leftover without the resumable marker
    Stale,
    Resumable,
}

#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(config: &Config) -> Self {
        Self {
            dir: config.profile_snapshot_dir().join(STAGING_DIR_NAME),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dir.join(name)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.dir.join(BACKUP_DIR)
    }

    pub fn state(&self) -> StagingState {
        if !self.dir.exists() {
            StagingState::Absent
        } else if self.path(SAVE_TO_CONTINUE).exists() {
            StagingState::Resumable
        } else {
            StagingState::Stale
        }
    }

    /// Get the staging area ready for a transfer and return what was found.
    ///
    /// Stale leftovers are removed; resumable contents are kept.
    pub fn prepare(&self) -> Result<StagingState> {
        let state = self.state();
        match state {
            StagingState::Stale => {
                info!(
                    "Removing leftovers of an abandoned snapshot in {}",
                    self.dir.display()
                );
                remove_tree(&self.dir).map_err(|e| SnapshotError::staging(&self.dir, e))?;
            }
            StagingState::Resumable => {
                info!("Found leftover {} which can be continued", self.dir.display());
            }
            StagingState::Absent => {}
        }

        self.make_dirs()?;
        Ok(state)
    }

    /// Create the staging directory and its backup subtree
    pub fn make_dirs(&self) -> Result<()> {
        let backup = self.backup_path();
        fs::create_dir_all(&backup).map_err(|e| SnapshotError::staging(&backup, e))
    }

    pub fn mark_resumable(&self) -> Result<()> {
        let marker = self.path(SAVE_TO_CONTINUE);
        debug!("Marking {} resumable", self.dir.display());
        fs::write(&marker, b"").map_err(|e| SnapshotError::staging(&marker, e))
    }

    pub fn clear_resumable(&self) -> Result<()> {
        let marker = self.path(SAVE_TO_CONTINUE);
        match fs::remove_file(&marker) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SnapshotError::staging(&marker, err)),
        }
    }

    /// Atomically turn the staging area into the snapshot `sid`.
    pub fn commit_into(&self, sid: &SnapshotId) -> Result<()> {
        if sid.dir().exists() {
            return Err(SnapshotError::SnapshotExists(sid.name().to_string()));
        }
        fs::rename(&self.dir, sid.dir()).map_err(|e| {
            SnapshotError::Commit(format!(
                "cannot rename {} to {}: {}",
                self.dir.display(),
                sid.dir().display(),
                e
            ))
        })
    }
}
