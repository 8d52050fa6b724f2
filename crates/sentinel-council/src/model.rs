//! Data model shared by the agent pool, the dispatcher and downstream
//! consumers (ledger, explain store, policy search).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::agent::AgentKind;

/// Source node of every explainability edge.
pub const INPUT_NODE: &str = "input";

/// Clamps a score to `[0, 1]`, mapping NaN to zero.
#[inline]
#[must_use]
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Final decision rendered by the council.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// Safe to proceed.
    Proceed,
    /// Proceed, but flag for caution.
    #[serde(alias = "CAUTION")]
    ProceedWithCaution,
    /// Refuse.
    Block,
}

impl Decision {
    /// Wire name of the decision.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Decision::Proceed => "PROCEED",
            Decision::ProceedWithCaution => "PROCEED_WITH_CAUTION",
            Decision::Block => "BLOCK",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCEED" => Ok(Decision::Proceed),
            "PROCEED_WITH_CAUTION" | "CAUTION" => Ok(Decision::ProceedWithCaution),
            "BLOCK" => Ok(Decision::Block),
            other => Err(format!("unknown decision '{other}'")),
        }
    }
}

/// Evolvable decision thresholds.
///
/// Values are plain copies: a dispatch freezes one at start and later
/// policy changes never reach it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Genes {
    /// Severity above this is cautious.
    pub risk_cap: f64,
    /// Mean integrity below this is cautious.
    pub min_integrity: f64,
    /// Stress above this is cautious.
    pub stress_cap: f64,
    /// Coordinated timescale above this is cautious.
    pub timescale_cap: f64,
}

impl Default for Genes {
    fn default() -> Self {
        Self {
            risk_cap: 0.85,
            min_integrity: 0.15,
            stress_cap: 0.7,
            timescale_cap: 0.9,
        }
    }
}

impl Genes {
    /// Creates a gene tuple.
    #[must_use]
    pub const fn new(risk_cap: f64, min_integrity: f64, stress_cap: f64, timescale_cap: f64) -> Self {
        Self {
            risk_cap,
            min_integrity,
            stress_cap,
            timescale_cap,
        }
    }

    /// Returns a copy with every threshold clamped to `[0, 1]`.
    #[must_use]
    pub fn clipped(self) -> Self {
        Self::from_array(self.to_array().map(clamp_unit))
    }

    /// Thresholds in field order.
    #[must_use]
    pub const fn to_array(self) -> [f64; 4] {
        [self.risk_cap, self.min_integrity, self.stress_cap, self.timescale_cap]
    }

    /// Inverse of [`to_array`](Self::to_array).
    #[must_use]
    pub const fn from_array(values: [f64; 4]) -> Self {
        Self::new(values[0], values[1], values[2], values[3])
    }
}

/// Biofeedback signal group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BioSignals {
    /// Normalized stress level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stress: Option<f64>,
}

/// Environment signal group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvSignals {
    /// Normalized contextual risk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_risk: Option<f64>,
}

/// Nested signal groups carried by an input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signals {
    #[serde(default)]
    pub bio: BioSignals,
    #[serde(default)]
    pub env: EnvSignals,
    /// Externally measured fairness score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fairness: Option<f64>,
}

/// Input fields an agent can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputField {
    Text,
    Signals,
    Timescale,
}

impl fmt::Display for InputField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputField::Text => f.write_str("text"),
            InputField::Signals => f.write_str("signals"),
            InputField::Timescale => f.write_str("timescale"),
        }
    }
}

/// Request-scoped input to one dispatch.
///
/// Accepts `_signals` and `avg_integrity` as aliases so legacy fixture
/// payloads deserialize unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, alias = "_signals", skip_serializing_if = "Option::is_none")]
    pub signals: Option<Signals>,
    /// Normalized horizon in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timescale: Option<f64>,
    /// Externally supplied integrity that replaces the computed mean.
    #[serde(default, alias = "avg_integrity", skip_serializing_if = "Option::is_none")]
    pub integrity_override: Option<f64>,
}

impl InputBundle {
    /// Creates an input carrying only text.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Sets the intent.
    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    /// Sets the biofeedback stress signal.
    pub fn with_stress(mut self, stress: f64) -> Self {
        self.signals.get_or_insert_with(Signals::default).bio.stress = Some(stress);
        self
    }

    /// Sets the environment risk signal.
    pub fn with_context_risk(mut self, risk: f64) -> Self {
        self.signals.get_or_insert_with(Signals::default).env.context_risk = Some(risk);
        self
    }

    /// Sets the fairness signal.
    pub fn with_fairness(mut self, fairness: f64) -> Self {
        self.signals.get_or_insert_with(Signals::default).fairness = Some(fairness);
        self
    }

    /// Sets the timescale.
    pub fn with_timescale(mut self, timescale: f64) -> Self {
        self.timescale = Some(timescale);
        self
    }

    /// Sets the integrity override.
    pub fn with_integrity_override(mut self, integrity: f64) -> Self {
        self.integrity_override = Some(integrity);
        self
    }

    /// Returns true if `field` is present.
    #[must_use]
    pub fn has(&self, field: InputField) -> bool {
        match field {
            InputField::Text => self.text.is_some(),
            InputField::Signals => self.signals.is_some(),
            InputField::Timescale => self.timescale.is_some(),
        }
    }

    /// Stress signal, zero if absent.
    #[must_use]
    pub fn stress(&self) -> f64 {
        self.signals.as_ref().and_then(|s| s.bio.stress).unwrap_or(0.0)
    }

    /// Environment risk signal, zero if absent.
    #[must_use]
    pub fn context_risk(&self) -> f64 {
        self.signals
            .as_ref()
            .and_then(|s| s.env.context_risk)
            .unwrap_or(0.0)
    }
}

/// Reason code attached to a failed report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// A required input field was absent; the agent was not invoked.
    MissingInputs,
    /// Input outside the agent's valid sub-range.
    OutOfRange,
    /// Input present but unusable (non-finite, wrong shape).
    InvalidInput,
    /// The agent did not report within its individual timeout.
    Timeout,
    /// The global dispatch budget ran out first.
    BudgetExceeded,
    /// The agent panicked.
    Panicked,
    /// Forced to zero for counterfactual replay.
    Ablated,
}

/// Diagnostics attached to every report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

/// One agent's vote.
///
/// Scores are clamped to `[0, 1]` on construction, and a failed report
/// always carries zero influence, reliability and severity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    pub agent: String,
    pub kind: AgentKind,
    pub ok: bool,
    pub influence: f64,
    pub reliability: f64,
    pub severity: f64,
    #[serde(default)]
    pub details: BTreeMap<String, Value>,
    #[serde(default)]
    pub diagnostics: Diagnostics,
}

impl AgentReport {
    /// Builds a successful report.
    pub fn success(
        agent: impl Into<String>,
        kind: AgentKind,
        influence: f64,
        reliability: f64,
        severity: f64,
        details: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            agent: agent.into(),
            kind,
            ok: true,
            influence: clamp_unit(influence),
            reliability: clamp_unit(reliability),
            severity: clamp_unit(severity),
            details,
            diagnostics: Diagnostics::default(),
        }
    }

    /// Builds a zero-weight failure report.
    pub fn failure(
        agent: impl Into<String>,
        kind: AgentKind,
        reason: FailureReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            agent: agent.into(),
            kind,
            ok: false,
            influence: 0.0,
            reliability: 0.0,
            severity: 0.0,
            details: BTreeMap::new(),
            diagnostics: Diagnostics {
                reason: Some(reason),
                message: Some(message.into()),
                elapsed_ms: None,
            },
        }
    }

    /// Records how long the agent took.
    #[must_use]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.diagnostics.elapsed_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Numeric detail, if present.
    #[must_use]
    pub fn detail_f64(&self, key: &str) -> Option<f64> {
        self.details.get(key).and_then(Value::as_f64)
    }

    /// Failure reason, if the report failed.
    #[must_use]
    pub fn failure_reason(&self) -> Option<FailureReason> {
        self.diagnostics.reason
    }
}

/// Weighted edge of the explainability graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub weight: f64,
}

/// Agents that reported, and how much each influenced the outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExplainGraph {
    /// Every agent with a report, sorted.
    pub nodes: Vec<String>,
    /// `input -> agent` edges for successful reports, sorted by endpoints.
    pub edges: Vec<GraphEdge>,
}

/// Aggregate output of one dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouncilBundle {
    pub id: Uuid,
    /// Reports in agent registration order.
    pub reports: Vec<AgentReport>,
    pub graph: ExplainGraph,
    pub decision: Decision,
    /// Policy frozen at dispatch start.
    pub policy: Genes,
    pub input: InputBundle,
    /// Sanitizer issues when the input never reached the council.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audit_issues: Vec<String>,
}

impl CouncilBundle {
    /// Bundle for input rejected before dispatch.
    pub fn rejected(input: InputBundle, policy: Genes, issues: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            reports: Vec::new(),
            graph: ExplainGraph::default(),
            decision: Decision::Block,
            policy,
            input,
            audit_issues: issues,
        }
    }

    /// Report produced by `agent`, if any.
    #[must_use]
    pub fn report(&self, agent: &str) -> Option<&AgentReport> {
        self.reports.iter().find(|r| r.agent == agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decision_wire_names() {
        assert_eq!(
            serde_json::to_value(Decision::ProceedWithCaution).unwrap(),
            json!("PROCEED_WITH_CAUTION")
        );
        let legacy: Decision = serde_json::from_value(json!("CAUTION")).unwrap();
        assert_eq!(legacy, Decision::ProceedWithCaution);
        assert_eq!("BLOCK".parse::<Decision>().unwrap(), Decision::Block);
        assert!("MAYBE".parse::<Decision>().is_err());
    }

    #[test]
    fn test_genes_clipped() {
        let genes = Genes::new(1.4, -0.2, f64::NAN, 0.5).clipped();
        assert_eq!(genes.to_array(), [1.0, 0.0, 0.0, 0.5]);
    }

    #[test]
    fn test_failure_report_is_zero_weight() {
        let report = AgentReport::failure("x", AgentKind::Biofeedback, FailureReason::Timeout, "slow");
        assert!(!report.ok);
        assert_eq!(report.influence, 0.0);
        assert_eq!(report.reliability, 0.0);
        assert_eq!(report.severity, 0.0);
        assert_eq!(report.failure_reason(), Some(FailureReason::Timeout));
    }

    #[test]
    fn test_success_report_clamps() {
        let report = AgentReport::success("x", AgentKind::ContextRisk, 1.7, -0.5, 0.4, BTreeMap::new());
        assert_eq!(report.influence, 1.0);
        assert_eq!(report.reliability, 0.0);
        assert_eq!(report.severity, 0.4);
    }

    #[test]
    fn test_input_accepts_legacy_aliases() {
        let input: InputBundle = serde_json::from_value(json!({
            "text": "Ship now.",
            "_signals": {"bio": {"stress": 0.82}, "env": {"context_risk": 0.7}},
            "timescale": 0.7,
            "avg_integrity": 0.12
        }))
        .unwrap();
        assert_eq!(input.stress(), 0.82);
        assert_eq!(input.context_risk(), 0.7);
        assert_eq!(input.integrity_override, Some(0.12));
        assert!(input.has(InputField::Signals));
    }

    #[test]
    fn test_input_builders() {
        let input = InputBundle::new("go").with_stress(0.3).with_context_risk(0.4);
        assert!(input.has(InputField::Text));
        assert!(!input.has(InputField::Timescale));
        assert_eq!(input.stress(), 0.3);
        assert_eq!(input.context_risk(), 0.4);
    }
}
