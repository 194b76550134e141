//! Transfer executor - runs the transfer tool over every include entry.
//!
//! The executor is the only place that knows about the continue-on-errors
//! policy at the transfer level: with it disabled, the first failed path ends
//! the run and the remaining include entries are not attempted.

pub mod fileinfo;

use crate::policy::{ExcludeSet, IncludeEntry};
use crate::transfer::progress::format_duration;
use crate::transfer::{FileOutcome, Transfer, TransferLog, TransferRequest, TransferStats};
use crate::utils::Result;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// An include entry together with the location it is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSource {
    pub entry: IncludeEntry,
    pub physical: PathBuf,
}

impl TransferSource {
    pub fn new(entry: IncludeEntry, physical: PathBuf) -> Self {
        Self { entry, physical }
    }

    /// A source read from its own location
    pub fn direct(entry: IncludeEntry) -> Self {
        let physical = entry.path.clone();
        Self { entry, physical }
    }

    pub fn request<'a>(
        &'a self,
        destination: &'a Path,
        link_dest: Option<&'a Path>,
        excludes: &'a ExcludeSet,
        stop_on_error: bool,
    ) -> TransferRequest<'a> {
        TransferRequest {
            source: &self.physical,
            target: &self.entry.path,
            kind: self.entry.kind,
            destination,
            link_dest,
            excludes,
            stop_on_error,
        }
    }
}

/// Everything the executor learned during a run
#[derive(Debug, Default)]
pub struct ExecutionSummary {
    pub outcomes: Vec<FileOutcome>,
    pub stats: TransferStats,
    /// Stopped before all include entries were transferred
    pub aborted: bool,
    pub duration_secs: u64,
}

impl ExecutionSummary {
    pub fn has_failures(&self) -> bool {
        self.stats.failed > 0
    }

    /// Paths that were copied, hard-linked or kept
    pub fn successes(&self) -> usize {
        self.stats.successes()
    }
}

/// Main transfer executor
pub struct TransferExecutor<'t> {
    transfer: &'t dyn Transfer,
}

impl<'t> TransferExecutor<'t> {
    pub fn new(transfer: &'t dyn Transfer) -> Self {
        Self { transfer }
    }

    /// Transfer every source into `destination`, hard-linking against
    /// `link_dest` when given. Progress is appended to `log`.
    ///
    /// Only tool failures are returned as `Err`; per-path failures end up in
    /// the summary.
    pub fn execute(
        &self,
        sources: &[TransferSource],
        excludes: &ExcludeSet,
        destination: &Path,
        link_dest: Option<&Path>,
        continue_on_errors: bool,
        log: &mut TransferLog,
    ) -> Result<ExecutionSummary> {
        let start = Instant::now();
        let mut summary = ExecutionSummary::default();

        log.info(format!("Transfer tool: {}", self.transfer.name()));
        if let Some(link_dest) = link_dest {
            log.info(format!("Hard-linking unchanged files from {}", link_dest.display()));
        }

        for source in sources {
            info!("Transferring {}", source.entry.path.display());
            log.info(format!("Transferring {}", source.entry.path.display()));
            if source.physical != source.entry.path {
                debug!("Reading {} from {}", source.entry.path.display(), source.physical.display());
            }

            let request = source.request(destination, link_dest, excludes, !continue_on_errors);
            let report = self.transfer.transfer(&request)?;

            for message in &report.messages {
                log.info(message);
            }
            for outcome in report.outcomes {
                summary.stats.record(&outcome);
                log.record(&outcome);
                summary.outcomes.push(outcome);
            }

            if report.aborted || (!continue_on_errors && summary.has_failures()) {
                warn!(
                    "Stopping after failure in {} (continue on errors is disabled)",
                    source.entry.path.display()
                );
                log.error("Stopping at first error because continue on errors is disabled");
                summary.aborted = true;
                break;
            }
        }

        summary.duration_secs = start.elapsed().as_secs();
        info!(
            "Transfer finished in {}: {}",
            format_duration(summary.duration_secs),
            summary.stats.summary()
        );
        log.info(summary.stats.summary());
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{LocalTransfer, Outcome, TransferReport};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records the requests it sees and fails every source named `bad`.
    #[derive(Default)]
    struct ScriptedTransfer {
        seen: Mutex<Vec<PathBuf>>,
    }

    impl Transfer for ScriptedTransfer {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn transfer(&self, request: &TransferRequest<'_>) -> Result<TransferReport> {
            self.seen.lock().unwrap().push(request.target.to_path_buf());
            let mut report = TransferReport::default();
            if request.target.ends_with("bad") {
                report.push(FileOutcome::failed(request.target, "Permission denied"));
            } else {
                report.push(FileOutcome::new(request.target, Outcome::Copied, 1));
            }
            Ok(report)
        }

        fn dry_run(&self, request: &TransferRequest<'_>) -> Result<TransferReport> {
            self.transfer(request)
        }
    }

    fn sources(paths: &[&str]) -> Vec<TransferSource> {
        paths
            .iter()
            .map(|p| TransferSource::direct(IncludeEntry::folder(*p)))
            .collect()
    }

    #[test]
    fn test_continue_on_errors_runs_every_source() {
        let transfer = ScriptedTransfer::default();
        let mut log = TransferLog::new();

        let summary = TransferExecutor::new(&transfer)
            .execute(
                &sources(&["/a", "/bad", "/c"]),
                &ExcludeSet::empty(),
                Path::new("/dest"),
                None,
                true,
                &mut log,
            )
            .unwrap();

        assert_eq!(transfer.seen.lock().unwrap().len(), 3);
        assert!(summary.has_failures());
        assert!(!summary.aborted);
        assert_eq!(summary.successes(), 2);
        assert!(log.lines().iter().any(|l| l == "[E] /bad: Permission denied"));
    }

    #[test]
    fn test_stops_at_first_failure_without_continue() {
        let transfer = ScriptedTransfer::default();
        let mut log = TransferLog::new();

        let summary = TransferExecutor::new(&transfer)
            .execute(
                &sources(&["/a", "/bad", "/c"]),
                &ExcludeSet::empty(),
                Path::new("/dest"),
                None,
                false,
                &mut log,
            )
            .unwrap();

        assert_eq!(
            *transfer.seen.lock().unwrap(),
            vec![PathBuf::from("/a"), PathBuf::from("/bad")]
        );
        assert!(summary.aborted);
    }

    #[test]
    fn test_execute_with_builtin_tool() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let source = temp_dir.path().join("src");
        fs::create_dir_all(source.join("foo"))?;
        fs::write(source.join("foo/data"), b"data")?;
        let destination = temp_dir.path().join("backup");
        let transfer = LocalTransfer::new();
        let mut log = TransferLog::new();

        let summary = TransferExecutor::new(&transfer)
            .execute(
                &[TransferSource::direct(IncludeEntry::folder(&source))],
                &ExcludeSet::empty(),
                &destination,
                None,
                true,
                &mut log,
            )
            .unwrap();

        assert_eq!(summary.stats.copied_files, 3);
        assert_eq!(summary.stats.copied_bytes, 4);
        assert!(log.lines()[0].starts_with("[I] Transfer tool: builtin"));
        Ok(())
    }
}
