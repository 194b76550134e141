//! Persistent application state.
//!
//! Small JSON document with per-profile bookkeeping, read and written by the
//! CLI around a run. The engine itself never touches it.

use crate::config::Config;
use crate::snapshot::{SnapshotId, SnapshotRunResult};
use crate::utils::{Result, SnapshotError};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use tracing::info;

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateData {
    pub version: u32,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileState>,
}

/// Bookkeeping for one profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileState {
    pub last_snapshot: Option<String>,
    pub last_run: Option<DateTime<Local>>,
    pub last_result: Option<SnapshotRunResult>,
    #[serde(default)]
    pub consecutive_failures: u32,
}

impl Default for StateData {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            profiles: BTreeMap::new(),
        }
    }
}

impl StateData {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let state: StateData = serde_json::from_str(&content)?;
        if state.version > STATE_VERSION {
            return Err(SnapshotError::State(format!(
                "state file {} has unsupported version {}",
                path.display(),
                state.version
            )));
        }
        Ok(state)
    }

    /// Load the state file, or build a fresh state from the configuration
    /// and the snapshots already on disk when there is none.
    pub fn load_or_migrate(path: &Path, config: &Config) -> Result<Self> {
        match Self::load(path) {
            Ok(state) => return Ok(state),
            Err(SnapshotError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }

        info!("No state file at {}, creating a new one", path.display());
        let mut state = StateData::default();
        let profile = state.profile_mut(&config.profile.id);
        profile.last_snapshot = SnapshotId::last(config)?.map(|sid| sid.name().to_string());
        Ok(state)
    }

    pub fn profile(&self, id: &str) -> Option<&ProfileState> {
        self.profiles.get(id)
    }

    pub fn profile_mut(&mut self, id: &str) -> &mut ProfileState {
        self.profiles.entry(id.to_string()).or_default()
    }

    /// Record the result of a run for profile `id`.
    pub fn record_run(
        &mut self,
        id: &str,
        sid: &SnapshotId,
        when: DateTime<Local>,
        result: SnapshotRunResult,
    ) {
        let profile = self.profile_mut(id);
        profile.last_run = Some(when);
        profile.last_result = Some(result);
        if result.snapshot_created {
            profile.last_snapshot = Some(sid.name().to_string());
        }
        if result.error_occurred {
            profile.consecutive_failures += 1;
        } else {
            profile.consecutive_failures = 0;
        }
    }

    /// Write the state atomically (temporary file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
