pub mod compress;
pub mod errors;
pub mod logger;

pub use errors::{Result, SnapshotError};
