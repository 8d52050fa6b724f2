//! Meta-arbiter: folds every prior report into the final decision.
//!
//! ## Algorithm
//!
//! Over successful reports only:
//!
//! - `severity` = max severity
//! - `avg_integrity` = mean reliability (or the input's integrity override)
//! - `stress`, `conflict`, `risk`, `timescale` = max of the `stress`,
//!   `conflict`, `context_risk` and `avg_timescale` detail fields, 0 if absent
//!
//! ```text
//! cautious = severity > risk_cap
//!         || avg_integrity < min_integrity
//!         || stress > stress_cap
//!         || conflict > 0.5
//!         || timescale > timescale_cap
//!
//! BLOCK                 if risk > 0.9 || (conflict > 0.85 && stress > 0.7)
//! PROCEED_WITH_CAUTION  else if cautious
//! PROCEED               otherwise
//! ```
//!
//! BLOCK is evaluated first and always wins.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use super::{Agent, AgentContext, AgentFault, AgentKind, Assessment};
use crate::model::{clamp_unit, AgentReport, Decision, Genes, InputBundle, InputField};

/// Risk above which the decision is always BLOCK.
pub const BLOCK_RISK: f64 = 0.9;
/// Conflict above which (with high stress) the decision is BLOCK.
pub const BLOCK_CONFLICT: f64 = 0.85;
/// Stress that must accompany high conflict for a BLOCK.
pub const BLOCK_STRESS: f64 = 0.7;
/// Conflict above which the decision is at least cautious.
pub const CAUTION_CONFLICT: f64 = 0.5;

/// Aggregates and outcome of one arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArbiterVerdict {
    pub decision: Decision,
    pub cautious: bool,
    pub severity: f64,
    pub avg_integrity: f64,
    pub stress: f64,
    pub conflict: f64,
    pub risk: f64,
    pub timescale: f64,
}

/// Arbitrates a completed report set. Pure and order-independent.
#[must_use]
pub fn arbitrate(reports: &[AgentReport], policy: &Genes, integrity_override: Option<f64>) -> ArbiterVerdict {
    let ok: Vec<&AgentReport> = reports.iter().filter(|r| r.ok).collect();

    let severity = ok.iter().map(|r| r.severity).fold(0.0, f64::max);
    let avg_integrity = match integrity_override {
        Some(value) => clamp_unit(value),
        None => ok.iter().map(|r| r.reliability).sum::<f64>() / ok.len().max(1) as f64,
    };
    let max_detail = |key: &str| {
        ok.iter()
            .filter_map(|r| r.detail_f64(key))
            .fold(0.0, f64::max)
    };
    let stress = max_detail("stress");
    let conflict = max_detail("conflict");
    let risk = max_detail("context_risk");
    let timescale = max_detail("avg_timescale");

    let cautious = severity > policy.risk_cap
        || avg_integrity < policy.min_integrity
        || stress > policy.stress_cap
        || conflict > CAUTION_CONFLICT
        || timescale > policy.timescale_cap;

    let decision = if risk > BLOCK_RISK || (conflict > BLOCK_CONFLICT && stress > BLOCK_STRESS) {
        Decision::Block
    } else if cautious {
        Decision::ProceedWithCaution
    } else {
        Decision::Proceed
    };

    ArbiterVerdict {
        decision,
        cautious,
        severity,
        avg_integrity,
        stress,
        conflict,
        risk,
        timescale,
    }
}

/// Renders the council decision from every prior report.
#[derive(Debug, Clone)]
pub struct MetaArbiter {
    id: String,
}

impl MetaArbiter {
    pub fn new() -> Self {
        Self {
            id: AgentKind::MetaArbiter.default_id().to_string(),
        }
    }
}

impl Default for MetaArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for MetaArbiter {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::MetaArbiter
    }

    fn required_fields(&self) -> &[InputField] {
        &[]
    }

    fn assess(&self, input: &InputBundle, ctx: &AgentContext<'_>) -> Result<Assessment, AgentFault> {
        let verdict = arbitrate(ctx.reports, ctx.policy, input.integrity_override);
        ctx.memory.write(
            &format!("{}:decision", self.id),
            json!({ "decision": verdict.decision }),
            Some(Duration::from_secs(3600)),
        )?;
        Ok(Assessment::new(1.0, 0.99)
            .with_severity(verdict.severity)
            .with_detail("decision", verdict.decision.as_str())
            .with_detail("avg_integrity", verdict.avg_integrity)
            .with_detail("stress", verdict.stress)
            .with_detail("conflict", verdict.conflict)
            .with_detail("risk", verdict.risk)
            .with_detail("timescale", verdict.timescale))
    }
}
