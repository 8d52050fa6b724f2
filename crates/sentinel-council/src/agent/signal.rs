//! Raw-signal scorers.
//!
//! Each agent reads one facet of the input, clamps it to `[0, 1]`,
//! records it in shared memory and reports it as a detail field the
//! meta-arbiter knows how to fold.
//!
//! | Agent | Reads | Detail | Severity |
//! |-------|-------|--------|----------|
//! | [`IdentityProbe`] | text | `echo` | 0 |
//! | [`FairnessAgent`] | signals.fairness | `fairness_score` | 0 |
//! | [`ContextRiskAgent`] | env.context_risk | `context_risk` | risk |
//! | [`TimescaleAgent`] | timescale | `timescale` | timescale above 0.5 |
//! | [`BiofeedbackAgent`] | bio.stress | `stress` | stress |
//! | [`EnvironmentAgent`] | env.context_risk | `context_risk` | risk |
//! | [`ConflictAgent`] | both | `conflict` | conflict above 0.5 |

use serde_json::json;
use std::time::Duration;

use super::{unit_signal, Agent, AgentContext, AgentFault, AgentKind, Assessment};
use crate::model::{InputBundle, InputField};

const PROBE_TTL: Duration = Duration::from_secs(1800);
const SIGNAL_TTL: Duration = Duration::from_secs(3600);

/// Fairness assumed when the input carries none.
pub const NEUTRAL_FAIRNESS: f64 = 0.5;

fn stress(input: &InputBundle) -> Result<f64, AgentFault> {
    unit_signal(input.signals.as_ref().and_then(|s| s.bio.stress), "stress")
}

fn context_risk(input: &InputBundle) -> Result<f64, AgentFault> {
    unit_signal(
        input.signals.as_ref().and_then(|s| s.env.context_risk),
        "context_risk",
    )
}

fn remember(ctx: &AgentContext<'_>, agent: &str, field: &str, value: serde_json::Value) -> Result<(), AgentFault> {
    ctx.memory
        .write(&format!("{agent}:{field}"), value, Some(SIGNAL_TTL))?;
    Ok(())
}

/// Liveness probe that echoes the text back.
#[derive(Debug, Clone)]
pub struct IdentityProbe {
    id: String,
}

impl IdentityProbe {
    pub fn new() -> Self {
        Self {
            id: AgentKind::IdentityProbe.default_id().to_string(),
        }
    }
}

impl Default for IdentityProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for IdentityProbe {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::IdentityProbe
    }

    fn required_fields(&self) -> &[InputField] {
        &[InputField::Text]
    }

    fn assess(&self, input: &InputBundle, ctx: &AgentContext<'_>) -> Result<Assessment, AgentFault> {
        let text = input.text.clone().unwrap_or_default();
        ctx.memory.write(
            &format!("{}:echo", self.id),
            json!({ "text": text }),
            Some(PROBE_TTL),
        )?;
        Ok(Assessment::new(0.1, 0.99).with_detail("echo", text))
    }
}

/// Passes through an externally measured fairness score.
#[derive(Debug, Clone)]
pub struct FairnessAgent {
    id: String,
}

impl FairnessAgent {
    pub fn new() -> Self {
        Self {
            id: AgentKind::Fairness.default_id().to_string(),
        }
    }
}

impl Default for FairnessAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for FairnessAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Fairness
    }

    fn required_fields(&self) -> &[InputField] {
        &[InputField::Text, InputField::Signals]
    }

    fn assess(&self, input: &InputBundle, ctx: &AgentContext<'_>) -> Result<Assessment, AgentFault> {
        let raw = input
            .signals
            .as_ref()
            .and_then(|s| s.fairness)
            .unwrap_or(NEUTRAL_FAIRNESS);
        let score = unit_signal(Some(raw), "fairness")?;
        remember(ctx, &self.id, "fairness", json!({ "score": score }))?;
        Ok(Assessment::new(0.3, 0.9).with_detail("fairness_score", score))
    }
}

/// Contextual risk; severity tracks the risk itself.
#[derive(Debug, Clone)]
pub struct ContextRiskAgent {
    id: String,
}

impl ContextRiskAgent {
    pub fn new() -> Self {
        Self {
            id: AgentKind::ContextRisk.default_id().to_string(),
        }
    }

    /// Same agent under a different id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl Default for ContextRiskAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for ContextRiskAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::ContextRisk
    }

    fn required_fields(&self) -> &[InputField] {
        &[InputField::Signals]
    }

    fn assess(&self, input: &InputBundle, ctx: &AgentContext<'_>) -> Result<Assessment, AgentFault> {
        let risk = context_risk(input)?;
        remember(ctx, &self.id, "risk", json!({ "risk": risk }))?;
        Ok(Assessment::new(0.4, 0.95)
            .with_severity(risk)
            .with_detail("context_risk", risk))
    }
}

/// Raw timescale; long horizons count as severity.
#[derive(Debug, Clone)]
pub struct TimescaleAgent {
    id: String,
}

impl TimescaleAgent {
    pub fn new() -> Self {
        Self {
            id: AgentKind::Timescale.default_id().to_string(),
        }
    }
}

impl Default for TimescaleAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for TimescaleAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Timescale
    }

    fn required_fields(&self) -> &[InputField] {
        &[InputField::Timescale]
    }

    fn assess(&self, input: &InputBundle, ctx: &AgentContext<'_>) -> Result<Assessment, AgentFault> {
        let timescale = unit_signal(input.timescale, "timescale")?;
        remember(ctx, &self.id, "timescale", json!({ "timescale": timescale }))?;
        let severity = if timescale > 0.5 { timescale } else { 0.0 };
        Ok(Assessment::new(0.2, 0.9)
            .with_severity(severity)
            .with_detail("timescale", timescale))
    }
}

/// Biofeedback stress.
#[derive(Debug, Clone)]
pub struct BiofeedbackAgent {
    id: String,
}

impl BiofeedbackAgent {
    pub fn new() -> Self {
        Self {
            id: AgentKind::Biofeedback.default_id().to_string(),
        }
    }
}

impl Default for BiofeedbackAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for BiofeedbackAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Biofeedback
    }

    fn required_fields(&self) -> &[InputField] {
        &[InputField::Signals]
    }

    fn assess(&self, input: &InputBundle, ctx: &AgentContext<'_>) -> Result<Assessment, AgentFault> {
        let stress = stress(input)?;
        remember(ctx, &self.id, "stress", json!({ "stress": stress }))?;
        Ok(Assessment::new(0.3, 0.9)
            .with_severity(stress)
            .with_detail("stress", stress))
    }
}

/// Environment risk, a lower-weight second opinion on context risk.
#[derive(Debug, Clone)]
pub struct EnvironmentAgent {
    id: String,
}

impl EnvironmentAgent {
    pub fn new() -> Self {
        Self {
            id: AgentKind::Environment.default_id().to_string(),
        }
    }
}

impl Default for EnvironmentAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for EnvironmentAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Environment
    }

    fn required_fields(&self) -> &[InputField] {
        &[InputField::Signals]
    }

    fn assess(&self, input: &InputBundle, ctx: &AgentContext<'_>) -> Result<Assessment, AgentFault> {
        let risk = context_risk(input)?;
        remember(ctx, &self.id, "risk", json!({ "risk": risk }))?;
        Ok(Assessment::new(0.3, 0.9)
            .with_severity(risk)
            .with_detail("context_risk", risk))
    }
}

/// Disagreement between stress and context risk.
#[derive(Debug, Clone)]
pub struct ConflictAgent {
    id: String,
}

impl ConflictAgent {
    pub fn new() -> Self {
        Self {
            id: AgentKind::Conflict.default_id().to_string(),
        }
    }
}

impl Default for ConflictAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for ConflictAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Conflict
    }

    fn required_fields(&self) -> &[InputField] {
        &[InputField::Signals]
    }

    fn assess(&self, input: &InputBundle, ctx: &AgentContext<'_>) -> Result<Assessment, AgentFault> {
        let conflict = (stress(input)? - context_risk(input)?).abs().min(1.0);
        remember(ctx, &self.id, "conflict", json!({ "conflict": conflict }))?;
        let severity = if conflict > 0.5 { conflict } else { 0.0 };
        Ok(Assessment::new(0.4, 0.9)
            .with_severity(severity)
            .with_detail("conflict", conflict))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FailureReason, Genes};
    use sentinel_memory::{MemoryConfig, SharedMemory};

    fn run(agent: &dyn Agent, input: &InputBundle) -> crate::model::AgentReport {
        let memory = SharedMemory::new(MemoryConfig::default()).unwrap();
        let policy = Genes::default();
        let ctx = AgentContext {
            policy: &policy,
            reports: &[],
            memory: &memory,
        };
        agent.run(input, &ctx)
    }

    #[test]
    fn test_identity_probe_echoes() {
        let report = run(&IdentityProbe::new(), &InputBundle::new("hello"));
        assert!(report.ok);
        assert_eq!(report.details["echo"], json!("hello"));
        assert_eq!(report.reliability, 0.99);
    }

    #[test]
    fn test_fairness_defaults_to_neutral() {
        let report = run(&FairnessAgent::new(), &InputBundle::new("x").with_stress(0.1));
        assert_eq!(report.detail_f64("fairness_score"), Some(NEUTRAL_FAIRNESS));
    }

    #[test]
    fn test_risk_severity_tracks_risk() {
        let report = run(&ContextRiskAgent::new(), &InputBundle::new("x").with_context_risk(0.7));
        assert_eq!(report.severity, 0.7);
        assert_eq!(report.detail_f64("context_risk"), Some(0.7));
    }

    #[test]
    fn test_timescale_severity_threshold() {
        let low = run(&TimescaleAgent::new(), &InputBundle::new("x").with_timescale(0.4));
        let high = run(&TimescaleAgent::new(), &InputBundle::new("x").with_timescale(0.7));
        assert_eq!(low.severity, 0.0);
        assert_eq!(high.severity, 0.7);
    }

    #[test]
    fn test_biofeedback_clamps_stress() {
        let report = run(&BiofeedbackAgent::new(), &InputBundle::new("x").with_stress(1.8));
        assert_eq!(report.detail_f64("stress"), Some(1.0));
    }

    #[test]
    fn test_conflict_is_absolute_difference() {
        let input = InputBundle::new("x").with_stress(0.9).with_context_risk(0.2);
        let report = run(&ConflictAgent::new(), &input);
        let conflict = report.detail_f64("conflict").unwrap();
        assert!((conflict - 0.7).abs() < 1e-9);
        assert!((report.severity - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_signal_fails_softly() {
        let report = run(&BiofeedbackAgent::new(), &InputBundle::new("x").with_stress(f64::NAN));
        assert!(!report.ok);
        assert_eq!(report.failure_reason(), Some(FailureReason::InvalidInput));
    }
}
