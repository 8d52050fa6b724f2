//! Error types for the council.
//!
//! Agent failures are data (failure reports), not errors. These cover
//! council construction only.

use thiserror::Error;

/// Errors that can occur while building a council.
#[derive(Debug, Error)]
pub enum CouncilError {
    /// An agent with the same id is already registered.
    #[error("agent '{0}' is already registered")]
    DuplicateAgent(String),

    /// Configuration rejected.
    #[error("invalid council configuration: {0}")]
    InvalidConfig(String),

    /// The shared memory store could not be created.
    #[error("memory error: {0}")]
    Memory(#[from] sentinel_memory::MemoryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_agent_display() {
        let err = CouncilError::DuplicateAgent("meta_arbiter".to_string());
        assert!(err.to_string().contains("meta_arbiter"));
    }

    #[test]
    fn test_invalid_config_display() {
        let err = CouncilError::InvalidConfig("budget_ms must be positive".to_string());
        assert!(err.to_string().contains("budget_ms"));
    }
}
