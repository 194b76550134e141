#![allow(dead_code)]

use chrono::{Duration, Local};
use snapshot_agent::policy::relative_to_root;
use snapshot_agent::transfer::{LocalTransfer, Outcome, Transfer, TransferReport, TransferRequest};
use snapshot_agent::{Config, IncludeEntry, SnapshotId, SnapshotRunResult, Snapshots};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const CREATED: SnapshotRunResult = SnapshotRunResult {
    snapshot_created: true,
    error_occurred: false,
};

pub const CREATED_WITH_ERRORS: SnapshotRunResult = SnapshotRunResult {
    snapshot_created: true,
    error_occurred: true,
};

pub const NOTHING_CHANGED: SnapshotRunResult = SnapshotRunResult {
    snapshot_created: false,
    error_occurred: false,
};

pub const FAILED: SnapshotRunResult = SnapshotRunResult {
    snapshot_created: false,
    error_occurred: true,
};

/// Create `foo/bar/baz`, `test` and `file with spaces` below `path`.
pub fn create_test_files(path: &Path) {
    fs::create_dir_all(path.join("foo/bar")).unwrap();
    fs::write(path.join("foo/bar/baz"), "foo").unwrap();
    fs::write(path.join("test"), "bar").unwrap();
    fs::write(path.join("file with spaces"), "asdf").unwrap();
}

/// A scratch profile: an include folder with test files and a snapshot root.
pub struct TestEnv {
    pub dir: TempDir,
    pub include: PathBuf,
    pub config: Config,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let include = dir.path().join("include");
        create_test_files(&include);

        let mut config = Config::default();
        config.profile.host = "test-host".into();
        config.profile.user = "test-user".into();
        config.profile.tag = "123".into();
        config.snapshots.root = dir.path().join("snapshots");
        config.snapshots.spool_file = dir.path().join("spool/1");
        config.daemon.lock_file = dir.path().join("run/agent.pid");
        config.daemon.state_file = dir.path().join("state.json");
        fs::create_dir_all(&config.snapshots.root).unwrap();

        Self {
            dir,
            include,
            config,
        }
    }

    pub fn snapshots(&self) -> Snapshots {
        Snapshots::new(Arc::new(self.config.clone()))
    }

    /// Snapshot id for a run started `minutes_ago` minutes ago
    pub fn sid(&self, minutes_ago: i64) -> (SnapshotId, chrono::DateTime<Local>) {
        let now = Local::now() - Duration::minutes(minutes_ago);
        (SnapshotId::new(now, &self.config), now)
    }

    pub fn take(&self, sid: &SnapshotId, now: chrono::DateTime<Local>) -> SnapshotRunResult {
        self.take_entries(sid, now, &[IncludeEntry::folder(&self.include)])
    }

    pub fn take_entries(
        &self,
        sid: &SnapshotId,
        now: chrono::DateTime<Local>,
        includes: &[IncludeEntry],
    ) -> SnapshotRunResult {
        self.snapshots().take_snapshot(sid, now, includes)
    }

    pub fn include_path(&self, relative: &str) -> PathBuf {
        self.include.join(relative)
    }

    pub fn spool_file(&self) -> &Path {
        &self.config.snapshots.spool_file
    }

    pub fn inode(&self, sid: &SnapshotId, relative: &str) -> u64 {
        fs::metadata(sid.path_inside_backup_tree(&self.include_path(relative)))
            .unwrap()
            .ino()
    }
}

pub fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

pub fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
}

/// Builtin transfer that reports one path as unreadable and leaves it out
/// of the destination, whoever runs the tests.
pub struct FailingTransfer {
    inner: LocalTransfer,
    failing: PathBuf,
}

impl FailingTransfer {
    pub fn new(failing: impl Into<PathBuf>) -> Self {
        Self {
            inner: LocalTransfer::new(),
            failing: failing.into(),
        }
    }
}

impl Transfer for FailingTransfer {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn transfer(&self, request: &TransferRequest<'_>) -> snapshot_agent::Result<TransferReport> {
        let mut report = self.inner.transfer(request)?;
        for outcome in &mut report.outcomes {
            if outcome.path == self.failing {
                let copied = request.destination.join(relative_to_root(&self.failing));
                fs::remove_file(copied)?;
                outcome.outcome = Outcome::Failed("Permission denied (os error 13)".into());
                outcome.bytes = 0;
                report.aborted = request.stop_on_error;
            }
        }
        Ok(report)
    }

    fn dry_run(&self, request: &TransferRequest<'_>) -> snapshot_agent::Result<TransferReport> {
        self.inner.dry_run(request)
    }
}
