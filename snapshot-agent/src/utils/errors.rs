//! Custom error types for the snapshot agent.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid include entry: {0}")]
    InvalidInclude(String),

    #[error("Invalid exclude pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("Staging area error at {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Mount error: {0}")]
    Mount(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Snapshot already exists: {0}")]
    SnapshotExists(String),

    #[error("Commit error: {0}")]
    Commit(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("TOML error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("State error: {0}")]
    State(String),
}

impl SnapshotError {
    /// Wrap an I/O error that happened while touching the staging area.
    pub fn staging(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SnapshotError::Staging {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SnapshotError>;
