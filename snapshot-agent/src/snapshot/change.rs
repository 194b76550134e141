//! Change detection against the previous snapshot.
//!
//! The transfer tool is dry-run with the previous snapshot's backup tree as
//! destination; any copy, deletion or failure it would perform means the
//! source has changed since then.

use super::sid::SnapshotId;
use crate::executor::TransferSource;
use crate::policy::{ExcludeSet, IncludeEntry};
use crate::transfer::Transfer;
use crate::utils::Result;
use tracing::debug;

/// Why a snapshot is (or is not) needed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDecision {
    FirstSnapshot,
    /// The include list differs from the one the previous snapshot used
    IncludesChanged,
    Changed { changes: usize },
    Forced,
    Unchanged,
}

impl ChangeDecision {
    pub fn is_needed(&self) -> bool {
        !matches!(self, ChangeDecision::Unchanged)
    }

    pub fn reason(&self) -> String {
        match self {
            ChangeDecision::FirstSnapshot => "no previous snapshot".to_string(),
            ChangeDecision::IncludesChanged => "include list changed".to_string(),
            ChangeDecision::Changed { changes } => format!("{} changed path(s)", changes),
            ChangeDecision::Forced => "forced regardless of changes".to_string(),
            ChangeDecision::Unchanged => "nothing changed".to_string(),
        }
    }
}

pub struct ChangeDetector<'t> {
    transfer: &'t dyn Transfer,
}

impl<'t> ChangeDetector<'t> {
    pub fn new(transfer: &'t dyn Transfer) -> Self {
        Self { transfer }
    }

    /// Decide whether a new snapshot is needed.
    ///
    /// Stops comparing at the first include entry with changes.
    pub fn detect(
        &self,
        previous: Option<&SnapshotId>,
        sources: &[TransferSource],
        excludes: &ExcludeSet,
        force: bool,
    ) -> Result<ChangeDecision> {
        let Some(previous) = previous else {
            return Ok(ChangeDecision::FirstSnapshot);
        };
        if force {
            return Ok(ChangeDecision::Forced);
        }

        match previous.info() {
            Ok(info) => {
                let current: Vec<&IncludeEntry> = sources.iter().map(|s| &s.entry).collect();
                let recorded: Vec<&IncludeEntry> = info.includes.iter().collect();
                if current != recorded {
                    return Ok(ChangeDecision::IncludesChanged);
                }
            }
            Err(err) => {
                debug!("No usable run info in {}: {}", previous, err);
                return Ok(ChangeDecision::IncludesChanged);
            }
        }

        let destination = previous.backup_path();
        for source in sources {
            let request = source.request(&destination, None, excludes, false);
            let report = self.transfer.dry_run(&request)?;
            let changes = report.change_count();
            if changes > 0 {
                debug!(
                    "{} has {} change(s) since {}",
                    source.entry.path.display(),
                    changes,
                    previous
                );
                return Ok(ChangeDecision::Changed { changes });
            }
        }

        Ok(ChangeDecision::Unchanged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{FileOutcome, Outcome, TransferReport, TransferRequest};

    struct FixedTransfer(Vec<Outcome>);

    impl Transfer for FixedTransfer {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn transfer(&self, _request: &TransferRequest<'_>) -> Result<TransferReport> {
            unreachable!("change detection only dry-runs")
        }

        fn dry_run(&self, request: &TransferRequest<'_>) -> Result<TransferReport> {
            let mut report = TransferReport::default();
            for outcome in &self.0 {
                report.push(FileOutcome::new(request.target, outcome.clone(), 0));
            }
            Ok(report)
        }
    }

    #[test]
    fn test_first_snapshot_is_always_needed() {
        let transfer = FixedTransfer(Vec::new());
        let decision = ChangeDetector::new(&transfer)
            .detect(None, &[], &ExcludeSet::empty(), false)
            .unwrap();
        assert_eq!(decision, ChangeDecision::FirstSnapshot);
        assert!(decision.is_needed());
    }

    #[test]
    fn test_decision_reasons() {
        assert!(!ChangeDecision::Unchanged.is_needed());
        assert!(ChangeDecision::Forced.is_needed());
        assert_eq!(
            ChangeDecision::Changed { changes: 2 }.reason(),
            "2 changed path(s)"
        );
    }
}
