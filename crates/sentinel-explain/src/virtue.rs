//! Distance from fixed fairness/transparency/accountability targets.
//!
//! A compliance indicator only; it never gates a decision.

use serde::{Deserialize, Serialize};

use sentinel_council::{clamp_unit, AgentKind, CouncilBundle};

/// Target values, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VirtueAnchor {
    pub fairness: f64,
    pub transparency: f64,
    pub accountability: f64,
}

impl Default for VirtueAnchor {
    fn default() -> Self {
        Self::new(0.7, 0.8, 0.9)
    }
}

impl VirtueAnchor {
    /// Creates an anchor, clamping each target.
    #[must_use]
    pub fn new(fairness: f64, transparency: f64, accountability: f64) -> Self {
        Self {
            fairness: clamp_unit(fairness),
            transparency: clamp_unit(transparency),
            accountability: clamp_unit(accountability),
        }
    }

    /// Euclidean distance to `(fairness_score, avg_integrity, 1 - risk)`.
    #[must_use]
    pub fn distance(&self, metrics: &VirtueMetrics) -> f64 {
        let df = self.fairness - metrics.fairness_score;
        let dt = self.transparency - metrics.avg_integrity;
        let da = self.accountability - (1.0 - metrics.risk);
        (df * df + dt * dt + da * da).sqrt()
    }
}

/// Empirical values of one decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VirtueMetrics {
    pub fairness_score: f64,
    pub avg_integrity: f64,
    pub risk: f64,
}

impl Default for VirtueMetrics {
    fn default() -> Self {
        Self {
            fairness_score: 0.5,
            avg_integrity: 0.5,
            risk: 0.0,
        }
    }
}

impl VirtueMetrics {
    /// Reads fairness from the fairness report and integrity and risk
    /// from the meta-arbiter report. Missing values fall back to defaults.
    #[must_use]
    pub fn from_bundle(bundle: &CouncilBundle) -> Self {
        let defaults = Self::default();
        let detail = |kind: AgentKind, key: &str| {
            bundle
                .reports
                .iter()
                .filter(|r| r.ok && r.kind == kind)
                .find_map(|r| r.detail_f64(key))
        };
        Self {
            fairness_score: detail(AgentKind::Fairness, "fairness_score").unwrap_or(defaults.fairness_score),
            avg_integrity: detail(AgentKind::MetaArbiter, "avg_integrity").unwrap_or(defaults.avg_integrity),
            risk: detail(AgentKind::MetaArbiter, "risk").unwrap_or(defaults.risk),
        }
    }
}
