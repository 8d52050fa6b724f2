//! Error types for the safety gate.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

/// Core error type for gate operations.
///
/// Storage failures from the ledger, snapshot store and policy store are
/// all fatal here: a decision that cannot be recorded is not returned.
#[derive(Debug, Error)]
pub enum SentinelError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file is not valid TOML for [`crate::SentinelConfig`].
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Filesystem failure outside the component crates.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The policy file lock was not acquired in time.
    #[error("Timed out after {timeout_ms} ms waiting for lock on {path}")]
    LockTimeout { path: PathBuf, timeout_ms: u64 },

    /// Encoding or decoding failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A sanitizer pattern failed to compile.
    #[error("Sanitizer pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// No verified ledger record carries the requested timestamp.
    #[error("No ledger record at {0}")]
    RecordNotFound(DateTime<Utc>),

    /// Memory error passthrough.
    #[error("Memory error: {0}")]
    Memory(#[from] sentinel_memory::MemoryError),

    /// Council error passthrough.
    #[error("Council error: {0}")]
    Council(#[from] sentinel_council::CouncilError),

    /// Ledger error passthrough.
    #[error("Ledger error: {0}")]
    Ledger(#[from] sentinel_ledger::LedgerError),

    /// Snapshot store error passthrough.
    #[error("Explain error: {0}")]
    Explain(#[from] sentinel_explain::ExplainError),

    /// Evolution error passthrough.
    #[error("Evolution error: {0}")]
    Evolution(#[from] sentinel_evolution::EvolutionError),
}

impl SentinelError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SentinelError::Io {
            path: path.into(),
            source,
        }
    }
}
