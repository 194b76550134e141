//! Companion metadata of a committed snapshot and the scheduling spool file.
//!
//! Metadata is written into the staging directory before it is renamed, so a
//! snapshot directory is either complete or absent.

use super::staging::StagingArea;
use crate::config::Config;
use crate::executor::{fileinfo, ExecutionSummary};
use crate::policy::IncludeEntry;
use crate::transfer::{Outcome, TransferLog, TransferStats};
use crate::utils::compress::write_compressed;
use crate::utils::{Result, SnapshotError};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

pub const CONFIG_FILE: &str = "config";
pub const FILEINFO_FILE: &str = "fileinfo.zst";
pub const LOG_FILE: &str = "takesnapshot.log.zst";
pub const INFO_FILE: &str = "info";
pub const FAILED_FILE: &str = "failed";

/// Layout version of committed snapshots
pub const SNAPSHOT_VERSION: u32 = 1;

/// Run metadata stored as `info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub snapshot_version: u32,
    pub sid: String,
    pub profile_id: String,
    pub profile_name: String,
    pub host: String,
    pub user: String,
    pub started: DateTime<Local>,
    pub finished: DateTime<Local>,
    pub transfer_tool: String,
    pub change_reason: String,
    /// The run extended a resumable staging area
    pub resumed: bool,
    pub includes: Vec<IncludeEntry>,
    pub excludes: Vec<String>,
    pub stats: TransferStats,
    pub error_occurred: bool,
}

/// Write `config`, `fileinfo.zst`, `takesnapshot.log.zst`, `info` and, when
/// the run had file errors, `failed` into the staging directory.
pub fn write_metadata(
    staging: &StagingArea,
    config: &Config,
    info: &RunInfo,
    summary: &ExecutionSummary,
    log: &TransferLog,
) -> Result<()> {
    let level = config.snapshots.compression_level;
    let commit_err = |what: &str, err: std::io::Error| {
        SnapshotError::Commit(format!("cannot write {}: {}", what, err))
    };

    fs::write(staging.path(CONFIG_FILE), config.to_toml()?)
        .map_err(|e| commit_err(CONFIG_FILE, e))?;

    fileinfo::write(&staging.path(FILEINFO_FILE), &summary.outcomes, level)
        .map_err(|e| commit_err(FILEINFO_FILE, e))?;

    write_compressed(&staging.path(LOG_FILE), log.to_text().as_bytes(), level)
        .map_err(|e| commit_err(LOG_FILE, e))?;

    fs::write(staging.path(INFO_FILE), serde_json::to_string_pretty(info)?)
        .map_err(|e| commit_err(INFO_FILE, e))?;

    let failed_marker = staging.path(FAILED_FILE);
    if info.error_occurred {
        let mut failed = String::new();
        for outcome in &summary.outcomes {
            if let Outcome::Failed(reason) = &outcome.outcome {
                failed.push_str(&format!("{}: {}\n", outcome.path.display(), reason));
            }
        }
        fs::write(&failed_marker, failed).map_err(|e| commit_err(FAILED_FILE, e))?;
    } else if failed_marker.exists() {
        // Left over from a resumed attempt
        fs::remove_file(&failed_marker).map_err(|e| commit_err(FAILED_FILE, e))?;
    }

    debug!("Wrote snapshot metadata into {}", staging.dir().display());
    Ok(())
}

/// Update the modification time of the scheduling spool file, creating it
/// (and its parent directory) when missing.
pub fn touch_spool(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;
    file.set_modified(std::time::SystemTime::now())?;
    Ok(())
}
