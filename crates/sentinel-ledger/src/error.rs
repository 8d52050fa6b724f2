//! Error types for the audit ledger.
//!
//! Every variant here is fatal to the caller: a decision whose audit
//! record cannot be persisted must not be reported as made.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors raised by the ledger, keyring and lock helpers.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Filesystem failure.
    #[error("ledger I/O error at {path}: {source}")]
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

    /// A record could not be encoded or decoded.
    #[error("ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Signing key material is unusable.
    #[error("signing key error: {0}")]
    Key(String),

    /// Keys supplied through the environment are managed externally.
    #[error("signing key comes from ${0} and cannot be rotated here")]
    ExternalKey(String),
}

impl LedgerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LedgerError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_display() {
        let err = LedgerError::LockTimeout {
            path: PathBuf::from("/tmp/sentinel-2026-01-01.jsonl"),
            timeout_ms: 5000,
        };
        let msg = err.to_string();
        assert!(msg.contains("5000"));
        assert!(msg.contains("sentinel-2026-01-01.jsonl"));
    }

    #[test]
    fn test_external_key_display() {
        let err = LedgerError::ExternalKey("SENTINEL_HMAC_KEY".to_string());
        assert!(err.to_string().contains("$SENTINEL_HMAC_KEY"));
    }
}
