//! Error types for the snapshot store.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for explain operations.
pub type Result<T> = std::result::Result<T, ExplainError>;

/// Storage failures. Snapshot writes are on the audit path, so callers
/// treat these as fatal.
#[derive(Debug, Error)]
pub enum ExplainError {
    /// Filesystem failure.
    #[error("snapshot I/O error at {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The advisory lock was not acquired in time.
    #[error("timed out after {timeout_ms} ms waiting for lock on {path}")]
    LockTimeout {
        /// Locked file
        path: PathBuf,
        /// Configured timeout
        timeout_ms: u64,
    },

    /// A snapshot could not be encoded.
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ExplainError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ExplainError::Io {
            path: path.into(),
            source,
        }
    }
}
