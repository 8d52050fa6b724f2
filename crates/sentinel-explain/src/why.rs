//! Counterfactual agent-ablation probes.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use sentinel_council::{Council, CouncilBundle, Decision};

/// Decision with and without one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterfactualResult {
    pub agent: String,
    pub original: Decision,
    pub counterfactual: Decision,
    pub changed: bool,
}

/// Replays recorded inputs through the live council.
#[derive(Debug, Clone)]
pub struct WhyEngine {
    council: Arc<Council>,
}

impl WhyEngine {
    pub fn new(council: Arc<Council>) -> Self {
        Self { council }
    }

    /// Re-dispatches `bundle.input` with `agent` ablated and compares the
    /// decision with the recorded one.
    ///
    /// The replay uses the council's current policy, so a policy change
    /// since the recording can also change the outcome.
    pub async fn counterfactual_probe(&self, bundle: &CouncilBundle, agent: &str) -> CounterfactualResult {
        let replay = self
            .council
            .dispatch_with_ablation(bundle.input.clone(), agent)
            .await;
        let result = CounterfactualResult {
            agent: agent.to_string(),
            original: bundle.decision,
            counterfactual: replay.decision,
            changed: replay.decision != bundle.decision,
        };
        debug!(agent, original = %result.original, counterfactual = %result.counterfactual, "counterfactual probe");
        result
    }

    /// Probes every agent that reported in `bundle`, in report order.
    pub async fn counterfactual_analysis(&self, bundle: &CouncilBundle) -> Vec<CounterfactualResult> {
        let mut results = Vec::with_capacity(bundle.reports.len());
        for report in &bundle.reports {
            results.push(self.counterfactual_probe(bundle, &report.agent).await);
        }
        results
    }
}
