//! Error types for the definition stores.

use std::path::PathBuf;

use muster_types::MusterError;
use thiserror::Error;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors specific to store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem access failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A document could not be parsed.
    #[error("Failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// A document could not be serialized.
    #[error("Failed to serialize {0}")]
    Serialize(String),

    /// The file watcher could not be started.
    #[error("Failed to watch {}: {message}", path.display())]
    Watch { path: PathBuf, message: String },

    /// A core error surfaced while loading (e.g. an invalid definition).
    #[error(transparent)]
    Core(#[from] MusterError),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<StoreError> for MusterError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Core(e) => e,
            other => MusterError::Store(other.to_string()),
        }
    }
}
