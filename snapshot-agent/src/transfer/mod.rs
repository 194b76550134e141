//! The transfer tool contract.
//!
//! A [`Transfer`] copies one include entry into a snapshot's backup subtree,
//! hard-linking files that are unchanged relative to a link source, and
//! reports one [`FileOutcome`] per path it touched. The engine treats the
//! tool as a black box; [`LocalTransfer`] is the builtin implementation and
//! [`RsyncTransfer`] drives an external `rsync`.

pub mod local;
pub mod progress;
pub mod rsync;

pub use local::LocalTransfer;
pub use progress::TransferStats;
pub use rsync::RsyncTransfer;

use crate::config::{TransferConfig, TransferTool};
use crate::policy::{relative_to_root, ExcludeSet, IncludeKind};
use crate::utils::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What happened to a single path during a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    /// Physically copied (new or modified)
    Copied,
    /// Realised as a hard link to the link source's copy
    HardLinked,
    /// Already present and identical in the destination
    Kept,
    /// Left out by an exclude pattern
    Excluded,
    /// Removed from the destination because the source no longer has it
    Deleted,
    Failed(String),
}

impl Outcome {
    /// Short code used in the fileinfo listing
    pub fn code(&self) -> &'static str {
        match self {
            Outcome::Copied => "copied",
            Outcome::HardLinked => "linked",
            Outcome::Kept => "kept",
            Outcome::Excluded => "excluded",
            Outcome::Deleted => "deleted",
            Outcome::Failed(_) => "failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// Whether the outcome means the destination differs from the source.
    pub fn is_change(&self) -> bool {
        matches!(self, Outcome::Copied | Outcome::Deleted | Outcome::Failed(_))
    }

    /// Whether the path made it into the destination.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Copied | Outcome::HardLinked | Outcome::Kept)
    }
}

/// Outcome for one path (the logical source path)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub outcome: Outcome,
    /// Bytes copied or linked, 0 when unknown
    pub bytes: u64,
}

impl FileOutcome {
    pub fn new(path: impl Into<PathBuf>, outcome: Outcome, bytes: u64) -> Self {
        Self {
            path: path.into(),
            outcome,
            bytes,
        }
    }

    pub fn failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::new(path, Outcome::Failed(reason.into()), 0)
    }
}

/// One include entry to transfer
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest<'a> {
    /// Where the data is read from (after mount resolution)
    pub source: &'a Path,
    /// The include path as configured; decides the destination location
    pub target: &'a Path,
    pub kind: IncludeKind,
    /// Backup subtree root receiving the data
    pub destination: &'a Path,
    /// Backup subtree root of the previous snapshot, for hard links
    pub link_dest: Option<&'a Path>,
    pub excludes: &'a ExcludeSet,
    /// Stop at the first failed path
    pub stop_on_error: bool,
}

impl TransferRequest<'_> {
    /// Location of the include entry inside the destination tree
    pub fn destination_path(&self) -> PathBuf {
        self.destination.join(relative_to_root(self.target))
    }

    /// Location of the include entry inside the link source tree
    pub fn link_path(&self) -> Option<PathBuf> {
        self.link_dest.map(|root| root.join(relative_to_root(self.target)))
    }
}

/// Result of transferring one include entry
#[derive(Debug, Clone, Default)]
pub struct TransferReport {
    pub outcomes: Vec<FileOutcome>,
    /// Free-form messages from the tool
    pub messages: Vec<String>,
    /// The tool stopped early because of `stop_on_error`
    pub aborted: bool,
}

impl TransferReport {
    pub fn push(&mut self, outcome: FileOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| o.outcome.is_failure())
    }

    pub fn change_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_change()).count()
    }
}

/// An external or builtin copy/hard-link engine.
///
/// `Err` is reserved for failures of the tool itself (it cannot be started,
/// crashed, reported a protocol error). Per-path problems are reported as
/// [`Outcome::Failed`] entries in an `Ok` report.
pub trait Transfer: Send + Sync {
    fn name(&self) -> &'static str;

    fn transfer(&self, request: &TransferRequest<'_>) -> Result<TransferReport>;

    /// Compare source and destination without writing anything.
    fn dry_run(&self, request: &TransferRequest<'_>) -> Result<TransferReport>;
}

/// Build the transfer tool selected in the configuration
pub fn from_config(config: &TransferConfig) -> Arc<dyn Transfer> {
    match config.tool {
        TransferTool::Builtin => Arc::new(LocalTransfer::new()),
        TransferTool::Rsync => Arc::new(RsyncTransfer::new(
            config.rsync_path.clone(),
            config.extra_args.clone(),
        )),
    }
}

/// Human readable log of a run, persisted inside the snapshot.
///
/// Lines are prefixed with `[I]` (info), `[E]` (error) or `[C]` (change).
#[derive(Debug, Clone, Default)]
pub struct TransferLog {
    lines: Vec<String>,
}

impl TransferLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        self.lines.push(format!("[I] {}", message.as_ref()));
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        self.lines.push(format!("[E] {}", message.as_ref()));
    }

    pub fn record(&mut self, outcome: &FileOutcome) {
        match &outcome.outcome {
            Outcome::Failed(reason) => {
                self.error(format!("{}: {}", outcome.path.display(), reason))
            }
            o if o.is_change() => self
                .lines
                .push(format!("[C] {} {}", o.code(), outcome.path.display())),
            _ => {}
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn to_text(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}
