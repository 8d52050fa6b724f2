//! Error types for the shared memory store.

use thiserror::Error;

/// Result type alias for memory operations.
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Errors raised at the memory store boundary.
///
/// Only key validation and writer startup are surfaced. A full queue,
/// a vanished writer, or an expired entry all degrade to a miss.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The key cannot be stored.
    #[error("invalid memory key: {reason}")]
    InvalidKey {
        /// Why the key was rejected
        reason: String,
    },

    /// The writer thread could not be started.
    #[error("failed to start memory writer: {0}")]
    WriterSpawn(#[from] std::io::Error),
}
