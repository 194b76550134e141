//! Transfer statistics and human-readable formatting.

use super::{FileOutcome, Outcome};
use serde::{Deserialize, Serialize};

/// Aggregated per-outcome counters for a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStats {
    pub copied_files: usize,
    pub copied_bytes: u64,
    pub linked_files: usize,
    pub linked_bytes: u64,
    pub kept_files: usize,
    pub excluded: usize,
    pub deleted: usize,
    pub failed: usize,
}

impl TransferStats {
    pub fn record(&mut self, outcome: &FileOutcome) {
        match outcome.outcome {
            Outcome::Copied => {
                self.copied_files += 1;
                self.copied_bytes += outcome.bytes;
            }
            Outcome::HardLinked => {
                self.linked_files += 1;
                self.linked_bytes += outcome.bytes;
            }
            Outcome::Kept => self.kept_files += 1,
            Outcome::Excluded => self.excluded += 1,
            Outcome::Deleted => self.deleted += 1,
            Outcome::Failed(_) => self.failed += 1,
        }
    }

    /// Paths that ended up in the destination
    pub fn successes(&self) -> usize {
        self.copied_files + self.linked_files + self.kept_files
    }

    pub fn summary(&self) -> String {
        format!(
            "{} copied ({}), {} hard-linked ({}), {} kept, {} excluded, {} deleted, {} failed",
            self.copied_files,
            format_bytes(self.copied_bytes),
            self.linked_files,
            format_bytes(self.linked_bytes),
            self.kept_files,
            self.excluded,
            self.deleted,
            self.failed
        )
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_outcomes() {
        let outcomes = vec![
            FileOutcome::new("/a", Outcome::Copied, 10),
            FileOutcome::new("/b", Outcome::Copied, 5),
            FileOutcome::new("/c", Outcome::HardLinked, 7),
            FileOutcome::new("/d", Outcome::Excluded, 0),
            FileOutcome::failed("/e", "Permission denied"),
        ];

        let mut stats = TransferStats::default();
        for outcome in &outcomes {
            stats.record(outcome);
        }
        assert_eq!(stats.copied_files, 2);
        assert_eq!(stats.copied_bytes, 15);
        assert_eq!(stats.linked_files, 1);
        assert_eq!(stats.linked_bytes, 7);
        assert_eq!(stats.excluded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.successes(), 3);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3665), "1h 1m");
    }
}
