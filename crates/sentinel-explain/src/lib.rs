//! # Sentinel Explain
//!
//! Auditor tooling over recorded decisions.
//!
//! - [`ExplainStore`]: every live decision's edge weights and agent
//!   influences, appended to daily gzip partitions and pruned after a
//!   retention window.
//! - [`DriftDetector`]: Welch's t-test per edge and per agent between two
//!   time windows; reports the largest significant shifts.
//! - [`WhyEngine`]: replays a recorded input with one agent ablated and
//!   reports whether the decision changes.
//! - [`VirtueAnchor`]: scalar distance from fixed fairness, transparency
//!   and accountability targets.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sentinel_explain::{DriftDetector, ExplainConfig, ExplainStore};
//!
//! let store = Arc::new(ExplainStore::open(ExplainConfig::new("./explain"))?);
//! store.record(&bundle)?;
//! let report = DriftDetector::new(store).top_shifts_hours(24, 1, 3);
//! ```

pub mod drift;
pub mod error;
pub mod stats;
pub mod store;
pub mod virtue;
pub mod why;

pub use drift::{compare, DriftDetector, DriftReport, Shift, TimeWindow, SIGNIFICANCE};
pub use error::{ExplainError, Result};
pub use stats::{welch_t_test, WelchTest};
pub use store::{ExplainConfig, ExplainSnapshot, ExplainStore};
pub use virtue::{VirtueAnchor, VirtueMetrics};
pub use why::{CounterfactualResult, WhyEngine};
