//! Snapshot Agent Library
//!
//! Incremental filesystem snapshots: every snapshot is a full directory tree,
//! and files unchanged since the previous snapshot are hard links to its
//! copies, so only changed data takes up space.

pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod mount;
pub mod policy;
pub mod snapshot;
pub mod state;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use policy::{IncludeEntry, IncludeKind};
pub use snapshot::{SnapshotId, SnapshotRunResult, Snapshots};
pub use utils::errors::{Result, SnapshotError};
