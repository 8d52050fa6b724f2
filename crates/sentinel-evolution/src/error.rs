//! Error types for policy evolution.
//!
//! Invariant violations are not errors: they are recorded in candidate
//! metrics and the candidate is dropped.

use thiserror::Error;

/// Result type alias for evolution operations.
pub type Result<T> = std::result::Result<T, EvolutionError>;

/// Errors raised by the evaluation harness and the search.
#[derive(Debug, Error)]
pub enum EvolutionError {
    /// No candidate satisfying the invariants was ever seen.
    #[error("no admissible candidate found after {rounds} rounds")]
    NoAdmissibleCandidate {
        /// Rounds searched
        rounds: usize,
    },

    /// Search parameters rejected.
    #[error("invalid search configuration: {0}")]
    InvalidConfig(String),

    /// The micro-council's memory store could not be created.
    #[error("memory error: {0}")]
    Memory(#[from] sentinel_memory::MemoryError),

    /// Candidate metrics could not be hashed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_admissible_display() {
        let err = EvolutionError::NoAdmissibleCandidate { rounds: 40 };
        assert!(err.to_string().contains("40"));
    }
}
