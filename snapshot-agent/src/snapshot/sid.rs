//! Snapshot identifiers.
//!
//! A snapshot is named `YYYYMMDD-HHMMSS-TAG` after the local time it was
//! started and the profile's three digit tag, so names sort chronologically.
//! Its directory lives below the profile snapshot directory and holds the
//! copied data under `backup/`, mirroring absolute source paths.

use super::commit::{RunInfo, FAILED_FILE, INFO_FILE};
use crate::config::Config;
use crate::policy::relative_to_root;
use crate::utils::{Result, SnapshotError};
use chrono::{DateTime, Local, NaiveDateTime, Timelike};
use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// `chrono` format of the timestamp part of a name
pub const DATE_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Subdirectory holding the copied data
pub const BACKUP_DIR: &str = "backup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotId {
    name: String,
    date: NaiveDateTime,
    dir: PathBuf,
}

impl SnapshotId {
    /// Identifier for a snapshot started at `date` (seconds precision).
    pub fn new(date: DateTime<Local>, config: &Config) -> Self {
        let date = date.naive_local();
        let date = date.with_nanosecond(0).unwrap_or(date);
        let name = format!("{}-{}", date.format(DATE_FORMAT), config.profile.tag);
        let dir = config.profile_snapshot_dir().join(&name);
        Self { name, date, dir }
    }

    /// Parse a snapshot directory name.
    pub fn parse(name: &str, config: &Config) -> Result<Self> {
        let invalid = || SnapshotError::State(format!("'{}' is not a snapshot name", name));

        if name.len() != 19 || !name.is_ascii() || name.as_bytes()[15] != b'-' {
            return Err(invalid());
        }
        let (stamp, tag) = (&name[..15], &name[16..]);
        if !tag.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let date = NaiveDateTime::parse_from_str(stamp, DATE_FORMAT).map_err(|_| invalid())?;

        Ok(Self {
            name: name.to_string(),
            date,
            dir: config.profile_snapshot_dir().join(name),
        })
    }

    /// Committed snapshots of the profile, newest first.
    pub fn list(config: &Config) -> Result<Vec<SnapshotId>> {
        let root = config.profile_snapshot_dir();
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Ok(sid) = Self::parse(&name, config) {
                if sid.exists() {
                    snapshots.push(sid);
                }
            }
        }

        snapshots.sort_by(|a, b| b.cmp(a));
        Ok(snapshots)
    }

    /// The newest committed snapshot
    pub fn last(config: &Config) -> Result<Option<SnapshotId>> {
        Ok(Self::list(config)?.into_iter().next())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn date(&self) -> NaiveDateTime {
        self.date
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A file or directory directly inside the snapshot directory
    pub fn path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dir.join(name)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.dir.join(BACKUP_DIR)
    }

    /// Where `source` (an absolute path) is stored inside this snapshot
    pub fn path_inside_backup_tree(&self, source: &Path) -> PathBuf {
        self.backup_path().join(relative_to_root(source))
    }

    /// Committed snapshots have a backup subtree
    pub fn exists(&self) -> bool {
        self.dir.is_dir() && self.backup_path().is_dir()
    }

    /// Whether `source` was captured by this snapshot.
    ///
    /// Symlinks are not followed, so a captured dangling link still counts.
    pub fn is_existing_path_inside_snapshot_folder(&self, source: &Path) -> bool {
        self.exists() && fs::symlink_metadata(self.path_inside_backup_tree(source)).is_ok()
    }

    /// The snapshot was committed with file errors
    pub fn has_failed(&self) -> bool {
        self.path(FAILED_FILE).exists()
    }

    /// Run-info record written at commit
    pub fn info(&self) -> Result<RunInfo> {
        let content = fs::read_to_string(self.path(INFO_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl PartialOrd for SnapshotId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SnapshotId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}
