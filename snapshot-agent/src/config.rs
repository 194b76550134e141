//! Configuration management for the snapshot agent.
//!
//! Loads configuration from a TOML file. The loaded [`Config`] is treated as
//! immutable for the duration of a run and shared behind an `Arc`.

use crate::policy::IncludeEntry;
use crate::utils::{Result, SnapshotError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub profile: ProfileConfig,
    #[serde(default)]
    pub snapshots: SnapshotsConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub mount: MountConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Profile identifier, part of the snapshot directory layout
    #[serde(default = "default_profile_id")]
    pub id: String,

    /// Human readable profile name
    #[serde(default = "default_profile_name")]
    pub name: String,

    /// Host the snapshots belong to
    #[serde(default = "default_host")]
    pub host: String,

    /// User the snapshots belong to
    #[serde(default = "default_user")]
    pub user: String,

    /// Three digit suffix appended to every snapshot name
    #[serde(default = "default_tag")]
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotsConfig {
    /// Root directory holding the snapshots of all hosts and profiles
    #[serde(default = "default_snapshot_root")]
    pub root: PathBuf,

    /// Paths to back up
    #[serde(default)]
    pub include: Vec<IncludeEntry>,

    /// Glob patterns to leave out
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Commit a snapshot even when some files failed to transfer
    #[serde(default = "default_true")]
    pub continue_on_errors: bool,

    /// Take a snapshot even if nothing changed since the previous one
    #[serde(default)]
    pub regardless_of_changes: bool,

    /// Touched after every clean run, read by external schedulers
    #[serde(default = "default_spool_file")]
    pub spool_file: PathBuf,

    /// zstd level for the fileinfo listing and transfer log
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferTool {
    Builtin,
    Rsync,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_transfer_tool")]
    pub tool: TransferTool,

    /// rsync executable, only used with `tool = "rsync"`
    #[serde(default = "default_rsync_path")]
    pub rsync_path: PathBuf,

    /// Extra arguments appended to every rsync invocation
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountMode {
    Local,
    Directory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    #[serde(default = "default_mount_mode")]
    pub mode: MountMode,

    /// Directory presenting the source filesystem (mode = "directory")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output (stdout, stderr)
    #[serde(default = "default_log_output")]
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// PID lock file guarding against concurrent runs
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,

    /// Persistent application state
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

// Default values
fn default_profile_id() -> String {
    "1".to_string()
}

fn default_profile_name() -> String {
    "Main profile".to_string()
}

fn default_host() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

fn default_user() -> String {
    nix::unistd::User::from_uid(nix::unistd::Uid::current())
        .ok()
        .flatten()
        .map(|u| u.name)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "root".to_string())
}

fn default_tag() -> String {
    let random = uuid::Uuid::new_v4().as_u128();
    format!("{:03}", 100 + random % 900)
}

fn default_snapshot_root() -> PathBuf {
    PathBuf::from("/var/backups/snapshots")
}

fn default_true() -> bool {
    true
}

fn default_spool_file() -> PathBuf {
    PathBuf::from("/var/lib/snapshot-agent/spool/1")
}

fn default_compression_level() -> i32 {
    3
}

fn default_transfer_tool() -> TransferTool {
    TransferTool::Builtin
}

fn default_rsync_path() -> PathBuf {
    PathBuf::from("rsync")
}

fn default_mount_mode() -> MountMode {
    MountMode::Local
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_output() -> String {
    "stdout".to_string()
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("/var/run/snapshot-agent.pid")
}

fn default_state_file() -> PathBuf {
    PathBuf::from("/var/lib/snapshot-agent/state.json")
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            id: default_profile_id(),
            name: default_profile_name(),
            host: default_host(),
            user: default_user(),
            tag: default_tag(),
        }
    }
}

impl Default for SnapshotsConfig {
    fn default() -> Self {
        Self {
            root: default_snapshot_root(),
            include: Vec::new(),
            exclude: Vec::new(),
            continue_on_errors: true,
            regardless_of_changes: false,
            spool_file: default_spool_file(),
            compression_level: default_compression_level(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            tool: default_transfer_tool(),
            rsync_path: default_rsync_path(),
            extra_args: Vec::new(),
        }
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            mode: default_mount_mode(),
            root: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: default_log_output(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            lock_file: default_lock_file(),
            state_file: default_state_file(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            profile: ProfileConfig::default(),
            snapshots: SnapshotsConfig::default(),
            transfer: TransferConfig::default(),
            mount: MountConfig::default(),
            log: LogConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration back to TOML (stored inside every snapshot)
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.profile.id.trim().is_empty() {
            return Err(SnapshotError::Config("profile id must not be empty".into()));
        }
        if self.profile.id.contains('/') {
            return Err(SnapshotError::Config(format!(
                "profile id '{}' must not contain '/'",
                self.profile.id
            )));
        }
        if self.profile.tag.len() != 3 || !self.profile.tag.chars().all(|c| c.is_ascii_digit()) {
            return Err(SnapshotError::Config(format!(
                "snapshot tag '{}' must be three digits",
                self.profile.tag
            )));
        }
        if !self.snapshots.root.is_absolute() {
            return Err(SnapshotError::Config(format!(
                "snapshot root {} must be an absolute path",
                self.snapshots.root.display()
            )));
        }
        for entry in &self.snapshots.include {
            if !entry.path.is_absolute() {
                return Err(SnapshotError::Config(format!(
                    "include path {} must be absolute",
                    entry.path.display()
                )));
            }
        }
        if self.mount.mode == MountMode::Directory && self.mount.root.is_none() {
            return Err(SnapshotError::Config(
                "mount mode 'directory' requires mount.root".into(),
            ));
        }
        Ok(())
    }

    /// Directory holding the snapshots (and the staging area) of this profile:
    /// `<root>/<host>/<user>/<profile id>`
    pub fn profile_snapshot_dir(&self) -> PathBuf {
        self.snapshots
            .root
            .join(&self.profile.host)
            .join(&self.profile.user)
            .join(&self.profile.id)
    }
}
