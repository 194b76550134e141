//! The snapshot engine.
//!
//! [`Snapshots::take_snapshot`] drives one run through
//! `Idle -> Staging -> Transferring -> {Committed, Discarded}`:
//!
//! 1. resolve includes/excludes and mount the sources,
//! 2. ask the [`ChangeDetector`] whether anything changed since the last
//!    committed snapshot (if not, touch the spool file and stop),
//! 3. prepare the staging area and mark it resumable,
//! 4. transfer every include entry, hard-linking against the last snapshot,
//! 5. either write the metadata and rename staging into the snapshot
//!    directory, or clear the marker and leave staging in place.
//!
//! A process interruption during step 4 leaves the marker set, so the next
//! run extends the partial transfer instead of starting over.

pub mod change;
pub mod commit;
pub mod sid;
pub mod staging;

pub use change::{ChangeDecision, ChangeDetector};
pub use sid::SnapshotId;
pub use staging::{StagingArea, StagingState};

use crate::config::Config;
use crate::executor::{TransferExecutor, TransferSource};
use crate::mount::{self, Mount, MountGuard};
use crate::policy::{self, IncludeEntry};
use crate::transfer::{self, Transfer, TransferLog};
use crate::utils::{Result, SnapshotError};
use chrono::{DateTime, Local};
use commit::{RunInfo, SNAPSHOT_VERSION};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of [`Snapshots::take_snapshot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRunResult {
    /// A new snapshot directory was committed
    pub snapshot_created: bool,
    /// A file failed or the run hit a fatal error
    pub error_occurred: bool,
}

impl SnapshotRunResult {
    /// Nothing changed, nothing to do
    pub const NO_CHANGE: Self = Self {
        snapshot_created: false,
        error_occurred: false,
    };

    /// Discarded or fatal
    pub const FAILED: Self = Self {
        snapshot_created: false,
        error_occurred: true,
    };

    pub fn committed(error_occurred: bool) -> Self {
        Self {
            snapshot_created: true,
            error_occurred,
        }
    }
}

/// Run states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Staging,
    Transferring,
    Committed,
    Discarded,
}

/// The snapshot engine for one profile
pub struct Snapshots {
    config: Arc<Config>,
    transfer: Arc<dyn Transfer>,
    mount: Arc<dyn Mount>,
}

impl Snapshots {
    /// Engine using the transfer tool and mount selected in `config`
    pub fn new(config: Arc<Config>) -> Self {
        let transfer = transfer::from_config(&config.transfer);
        let mount = mount::from_config(&config.mount);
        Self {
            config,
            transfer,
            mount,
        }
    }

    pub fn with_transfer(mut self, transfer: Arc<dyn Transfer>) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn with_mount(mut self, mount: Arc<dyn Mount>) -> Self {
        self.mount = mount;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Take a snapshot named `sid` of `includes`.
    ///
    /// Never fails: fatal errors are logged and reported as
    /// [`SnapshotRunResult::FAILED`].
    pub fn take_snapshot(
        &self,
        sid: &SnapshotId,
        now: DateTime<Local>,
        includes: &[IncludeEntry],
    ) -> SnapshotRunResult {
        info!(sid = %sid, "Taking snapshot");
        let mut run = Run::new(self.config.as_ref());

        match self.run(&mut run, sid, now, includes) {
            Ok(result) => result,
            Err(err) => {
                error!(sid = %sid, "Snapshot failed: {}", err);
                if matches!(run.state, RunState::Staging | RunState::Transferring) {
                    run.discard();
                }
                SnapshotRunResult::FAILED
            }
        }
    }

    fn run(
        &self,
        run: &mut Run,
        sid: &SnapshotId,
        now: DateTime<Local>,
        includes: &[IncludeEntry],
    ) -> Result<SnapshotRunResult> {
        let config = self.config.as_ref();
        let resolved = policy::resolve(
            includes,
            &config.snapshots.exclude,
            config.snapshots.continue_on_errors,
            config.snapshots.regardless_of_changes,
        )?;
        if resolved.includes.is_empty() {
            return Err(SnapshotError::InvalidInclude(
                "nothing to back up after applying excludes".into(),
            ));
        }
        if sid.dir().exists() {
            return Err(SnapshotError::SnapshotExists(sid.name().to_string()));
        }

        let mount = MountGuard::mount(self.mount.as_ref())?;
        let sources: Vec<TransferSource> = resolved
            .includes
            .iter()
            .map(|entry| TransferSource::new(entry.clone(), mount.handle().resolve(&entry.path)))
            .collect();

        let previous = SnapshotId::last(config)?;
        let decision = ChangeDetector::new(self.transfer.as_ref()).detect(
            previous.as_ref(),
            &sources,
            &resolved.excludes,
            resolved.policy.force,
        )?;
        if !decision.is_needed() {
            info!("Nothing changed, no new snapshot necessary");
            touch_spool(config);
            return Ok(SnapshotRunResult::NO_CHANGE);
        }
        info!(sid = %sid, "Snapshot needed: {}", decision.reason());

        run.enter(RunState::Staging);
        let found = run.staging.prepare()?;
        run.staging.mark_resumable()?;

        run.enter(RunState::Transferring);
        let mut log = TransferLog::new();
        log.info(format!("Taking snapshot {}", sid));
        log.info(format!("Snapshot needed: {}", decision.reason()));
        if found == StagingState::Resumable {
            log.info("Continuing the transfer of an earlier, interrupted snapshot");
        }

        let link_dest = previous.as_ref().map(SnapshotId::backup_path);
        let summary = TransferExecutor::new(self.transfer.as_ref()).execute(
            &sources,
            &resolved.excludes,
            &run.staging.backup_path(),
            link_dest.as_deref(),
            resolved.policy.continue_on_errors,
            &mut log,
        )?;

        let error_occurred = summary.has_failures();
        if error_occurred {
            if !resolved.policy.continue_on_errors {
                warn!(sid = %sid, "Discarding snapshot after a failed transfer");
                run.discard();
                return Ok(SnapshotRunResult::FAILED);
            }
            if summary.successes() == 0 {
                warn!(sid = %sid, "Discarding snapshot: every transferred path failed");
                run.discard();
                return Ok(SnapshotRunResult::FAILED);
            }
            warn!(
                sid = %sid,
                "{} path(s) failed, keeping snapshot because continue on errors is enabled",
                summary.stats.failed
            );
        }

        let info = RunInfo {
            snapshot_version: SNAPSHOT_VERSION,
            sid: sid.name().to_string(),
            profile_id: config.profile.id.clone(),
            profile_name: config.profile.name.clone(),
            host: config.profile.host.clone(),
            user: config.profile.user.clone(),
            started: now,
            finished: Local::now(),
            transfer_tool: self.transfer.name().to_string(),
            change_reason: decision.reason(),
            resumed: found == StagingState::Resumable,
            includes: resolved.includes.clone(),
            excludes: resolved.excludes.patterns().to_vec(),
            stats: summary.stats.clone(),
            error_occurred,
        };
        commit::write_metadata(&run.staging, config, &info, &summary, &log)?;
        run.staging.clear_resumable()?;
        run.staging.commit_into(sid)?;
        run.enter(RunState::Committed);
        info!(sid = %sid, "Snapshot committed: {}", summary.stats.summary());

        if !error_occurred {
            touch_spool(config);
        }
        Ok(SnapshotRunResult::committed(error_occurred))
    }
}

/// State of one run plus the staging area it owns
struct Run {
    state: RunState,
    staging: StagingArea,
}

impl Run {
    fn new(config: &Config) -> Self {
        Self {
            state: RunState::Idle,
            staging: StagingArea::new(config),
        }
    }

    fn enter(&mut self, state: RunState) {
        debug!("Snapshot run {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Clear the resumable marker and leave the staging contents in place.
    fn discard(&mut self) {
        if let Err(err) = self.staging.clear_resumable() {
            warn!("Failed to clear resumable marker: {}", err);
        }
        self.enter(RunState::Discarded);
    }
}

fn touch_spool(config: &Config) {
    let spool = &config.snapshots.spool_file;
    if let Err(err) = commit::touch_spool(spool) {
        warn!("Failed to touch spool file {}: {}", spool.display(), err);
    }
}
