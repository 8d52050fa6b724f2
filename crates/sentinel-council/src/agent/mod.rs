//! Agent framework for council scoring.
//!
//! Defines the [`Agent`] trait and supporting types. Every agent shares
//! one vote contract: it receives the input plus an [`AgentContext`] and
//! returns an [`AgentReport`]. [`Agent::run`] never panics outward;
//! rejections and internal errors become zero-weight failure reports.

pub mod arbiter;
pub mod segment;
pub mod signal;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

use sentinel_memory::{MemoryError, SharedMemory};

use crate::model::{AgentReport, FailureReason, Genes, InputBundle, InputField};

pub use arbiter::{arbitrate, ArbiterVerdict, MetaArbiter, BLOCK_RISK};
pub use segment::{Segment, SegmentAgent, TimescaleCoordinator};
pub use signal::{
    BiofeedbackAgent, ConflictAgent, ContextRiskAgent, EnvironmentAgent, FairnessAgent,
    IdentityProbe, TimescaleAgent,
};

/// Closed set of agent kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    IdentityProbe,
    Fairness,
    ContextRisk,
    Timescale,
    Biofeedback,
    Environment,
    Conflict,
    ShortTerm,
    MidTerm,
    LongTerm,
    TimescaleCoordinator,
    MetaArbiter,
}

impl AgentKind {
    /// Capability tag advertised by agents of this kind.
    #[must_use]
    pub const fn capability(&self) -> &'static str {
        match self {
            AgentKind::IdentityProbe => "liveness",
            AgentKind::Fairness => "fairness",
            AgentKind::ContextRisk => "risk",
            AgentKind::Timescale => "temporal",
            AgentKind::Biofeedback => "biofeedback",
            AgentKind::Environment => "environment",
            AgentKind::Conflict => "conflict",
            AgentKind::ShortTerm => "short_term",
            AgentKind::MidTerm => "mid_term",
            AgentKind::LongTerm => "long_term",
            AgentKind::TimescaleCoordinator => "timescale_coordination",
            AgentKind::MetaArbiter => "arbitration",
        }
    }

    /// Default agent id for this kind.
    #[must_use]
    pub const fn default_id(&self) -> &'static str {
        match self {
            AgentKind::IdentityProbe => "identity_probe",
            AgentKind::Fairness => "fairness",
            AgentKind::ContextRisk => "context_risk",
            AgentKind::Timescale => "timescale",
            AgentKind::Biofeedback => "biofeedback",
            AgentKind::Environment => "environment",
            AgentKind::Conflict => "conflict",
            AgentKind::ShortTerm => "short_term",
            AgentKind::MidTerm => "mid_term",
            AgentKind::LongTerm => "long_term",
            AgentKind::TimescaleCoordinator => "timescale_coordinator",
            AgentKind::MetaArbiter => "meta_arbiter",
        }
    }

    /// Dispatch stage agents of this kind run in.
    #[must_use]
    pub const fn stage(&self) -> AgentStage {
        match self {
            AgentKind::TimescaleCoordinator => AgentStage::Coordinate,
            AgentKind::MetaArbiter => AgentStage::Arbitrate,
            _ => AgentStage::Signal,
        }
    }

    /// Whether agents of this kind survive global budget exhaustion.
    #[must_use]
    pub const fn budget_exempt(&self) -> bool {
        matches!(
            self,
            AgentKind::TimescaleCoordinator | AgentKind::MetaArbiter
        )
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_id())
    }
}

/// Dispatch stage. Stages run in declaration order; agents within one
/// stage run in parallel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AgentStage {
    /// Scores raw input signals.
    Signal,
    /// Reads signal reports.
    Coordinate,
    /// Reads every prior report and renders the decision.
    Arbitrate,
}

impl AgentStage {
    /// All stages in execution order.
    pub const ORDER: [AgentStage; 3] = [
        AgentStage::Signal,
        AgentStage::Coordinate,
        AgentStage::Arbitrate,
    ];
}

/// What an agent sees besides the input.
#[derive(Debug, Clone, Copy)]
pub struct AgentContext<'a> {
    /// Policy frozen at dispatch start.
    pub policy: &'a Genes,
    /// Reports completed in earlier stages.
    pub reports: &'a [AgentReport],
    /// Shared intermediate state.
    pub memory: &'a SharedMemory,
}

/// Scores produced by a successful assessment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assessment {
    pub influence: f64,
    pub reliability: f64,
    pub severity: f64,
    pub details: BTreeMap<String, Value>,
}

impl Assessment {
    /// Creates an assessment with zero severity.
    #[must_use]
    pub fn new(influence: f64, reliability: f64) -> Self {
        Self {
            influence,
            reliability,
            ..Self::default()
        }
    }

    /// Sets the severity.
    #[must_use]
    pub fn with_severity(mut self, severity: f64) -> Self {
        self.severity = severity;
        self
    }

    /// Adds a detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Why an assessment did not produce scores.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AgentFault {
    /// Expected rejection, such as an out-of-range timescale.
    #[error("{message}")]
    Rejected {
        reason: FailureReason,
        message: String,
    },

    /// Malformed input or a failing collaborator.
    #[error("invalid input: {0}")]
    Invalid(String),
}

impl AgentFault {
    /// Reason code recorded in the failure report.
    #[must_use]
    pub fn reason(&self) -> FailureReason {
        match self {
            AgentFault::Rejected { reason, .. } => *reason,
            AgentFault::Invalid(_) => FailureReason::InvalidInput,
        }
    }
}

impl From<MemoryError> for AgentFault {
    fn from(err: MemoryError) -> Self {
        AgentFault::Invalid(err.to_string())
    }
}

/// Independently pluggable scoring unit.
///
/// # Implementors
///
/// - [`signal`]: raw-signal scorers
/// - [`segment`]: timescale-segmented agents and their coordinator
/// - [`arbiter::MetaArbiter`]: renders the final decision
pub trait Agent: Send + Sync {
    /// Unique id within one council.
    fn id(&self) -> &str;

    /// The agent's kind.
    fn kind(&self) -> AgentKind;

    /// Input fields that must be present for the agent to run.
    fn required_fields(&self) -> &[InputField];

    /// Capability tag.
    fn capability(&self) -> &'static str {
        self.kind().capability()
    }

    /// Dispatch stage.
    fn stage(&self) -> AgentStage {
        self.kind().stage()
    }

    /// Whether global budget exhaustion may skip this agent.
    fn budget_exempt(&self) -> bool {
        self.kind().budget_exempt()
    }

    /// Scores the input.
    ///
    /// # Errors
    ///
    /// Returns an [`AgentFault`] for expected rejections and bad input.
    fn assess(&self, input: &InputBundle, ctx: &AgentContext<'_>) -> Result<Assessment, AgentFault>;

    /// Runs the assessment and converts every outcome into a report.
    fn run(&self, input: &InputBundle, ctx: &AgentContext<'_>) -> AgentReport {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.assess(input, ctx)));
        let report = match outcome {
            Ok(Ok(a)) => AgentReport::success(
                self.id(),
                self.kind(),
                a.influence,
                a.reliability,
                a.severity,
                a.details,
            ),
            Ok(Err(fault)) => {
                debug!(agent = self.id(), %fault, "agent rejected input");
                AgentReport::failure(self.id(), self.kind(), fault.reason(), fault.to_string())
            }
            Err(_) => AgentReport::failure(
                self.id(),
                self.kind(),
                FailureReason::Panicked,
                "agent panicked during assessment",
            ),
        };
        report.with_elapsed(started.elapsed())
    }
}

/// Reads an optional score, rejecting non-finite values and clamping the rest.
pub(crate) fn unit_signal(value: Option<f64>, name: &str) -> Result<f64, AgentFault> {
    match value {
        None => Ok(0.0),
        Some(v) if v.is_finite() => Ok(v.clamp(0.0, 1.0)),
        Some(_) => Err(AgentFault::Invalid(format!("{name} is not finite"))),
    }
}

/// The full live pool in registration order.
#[must_use]
pub fn default_agents() -> Vec<Arc<dyn Agent>> {
    vec![
        Arc::new(IdentityProbe::new()),
        Arc::new(FairnessAgent::new()),
        Arc::new(ContextRiskAgent::new()),
        Arc::new(TimescaleAgent::new()),
        Arc::new(BiofeedbackAgent::new()),
        Arc::new(EnvironmentAgent::new()),
        Arc::new(ConflictAgent::new()),
        Arc::new(SegmentAgent::new(Segment::Short)),
        Arc::new(SegmentAgent::new(Segment::Mid)),
        Arc::new(SegmentAgent::new(Segment::Long)),
        Arc::new(TimescaleCoordinator::new()),
        Arc::new(MetaArbiter::new()),
    ]
}

/// Reduced pool used for offline policy evaluation.
#[must_use]
pub fn micro_agents() -> Vec<Arc<dyn Agent>> {
    vec![
        Arc::new(BiofeedbackAgent::new()),
        Arc::new(EnvironmentAgent::new()),
        Arc::new(ConflictAgent::new()),
        Arc::new(MetaArbiter::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_memory::MemoryConfig;

    struct Panicky;

    impl Agent for Panicky {
        fn id(&self) -> &str {
            "panicky"
        }
        fn kind(&self) -> AgentKind {
            AgentKind::IdentityProbe
        }
        fn required_fields(&self) -> &[InputField] {
            &[]
        }
        fn assess(&self, _: &InputBundle, _: &AgentContext<'_>) -> Result<Assessment, AgentFault> {
            panic!("boom")
        }
    }

    #[test]
    fn test_run_converts_panic_to_failure() {
        let memory = SharedMemory::new(MemoryConfig::default()).unwrap();
        let policy = Genes::default();
        let ctx = AgentContext {
            policy: &policy,
            reports: &[],
            memory: &memory,
        };
        let report = Panicky.run(&InputBundle::new("x"), &ctx);
        assert!(!report.ok);
        assert_eq!(report.failure_reason(), Some(FailureReason::Panicked));
        assert_eq!(report.influence, 0.0);
    }

    #[test]
    fn test_kind_stages_and_exemptions() {
        assert_eq!(AgentKind::MetaArbiter.stage(), AgentStage::Arbitrate);
        assert_eq!(AgentKind::TimescaleCoordinator.stage(), AgentStage::Coordinate);
        assert_eq!(AgentKind::Conflict.stage(), AgentStage::Signal);
        assert!(AgentKind::MetaArbiter.budget_exempt());
        assert!(!AgentKind::ContextRisk.budget_exempt());
    }

    #[test]
    fn test_default_pool_has_unique_ids() {
        let agents = default_agents();
        let mut ids: Vec<&str> = agents.iter().map(|a| a.id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 12);
        assert_eq!(micro_agents().len(), 4);
    }

    #[test]
    fn test_unit_signal() {
        assert_eq!(unit_signal(None, "x").unwrap(), 0.0);
        assert_eq!(unit_signal(Some(1.5), "x").unwrap(), 1.0);
        assert!(unit_signal(Some(f64::INFINITY), "x").is_err());
    }
}
