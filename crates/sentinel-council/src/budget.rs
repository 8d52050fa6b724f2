//! # Dispatch Budget
//!
//! Global wall-clock budget shared by every agent in one dispatch.
//!
//! ## Design
//!
//! The budget starts when dispatch starts and only ever shrinks. It is
//! checked twice per agent: once on the worker before the agent is
//! invoked, and once by the collector to bound how long it waits.
//!
//! ## Security Notes
//!
//! - The check happens BEFORE the agent runs, so a skipped agent is never invoked
//! - Budget-exempt agents (coordinator, arbiter) bypass both checks
//! - Exhaustion is recorded as a distinct reason, not folded into timeouts

use std::time::{Duration, Instant};

/// Wall-clock budget for one dispatch.
///
/// # Example
///
/// ```rust
/// use sentinel_council::DispatchBudget;
/// use std::time::Duration;
///
/// let budget = DispatchBudget::start(Duration::from_millis(100));
/// assert!(!budget.is_exhausted());
/// assert!(budget.remaining() <= Duration::from_millis(100));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct DispatchBudget {
    started: Instant,
    limit: Duration,
}

impl DispatchBudget {
    /// Starts a budget now.
    #[must_use]
    pub fn start(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    /// Total budget.
    #[inline]
    #[must_use]
    pub const fn limit(&self) -> Duration {
        self.limit
    }

    /// Time spent since start.
    #[inline]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left, zero once exhausted.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.elapsed())
    }

    /// Returns true once elapsed time passes the limit.
    #[inline]
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.elapsed() > self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_budget_not_exhausted() {
        let budget = DispatchBudget::start(Duration::from_secs(60));
        assert!(!budget.is_exhausted());
        assert_eq!(budget.limit(), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_budget_exhausts() {
        let budget = DispatchBudget::start(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        assert!(budget.is_exhausted());
        assert_eq!(budget.remaining(), Duration::ZERO);
    }
}
