//! Council dispatcher.
//!
//! Runs every registered agent against one input under a global time
//! budget and an individual per-agent timeout, then folds the completed
//! reports into a [`CouncilBundle`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sentinel_memory::SharedMemory;

use crate::agent::{Agent, AgentContext, AgentKind, AgentStage};
use crate::budget::DispatchBudget;
use crate::error::CouncilError;
use crate::model::{
    AgentReport, CouncilBundle, Decision, ExplainGraph, FailureReason, Genes, GraphEdge,
    InputBundle, InputField, INPUT_NODE,
};
use crate::Result;

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouncilConfig {
    /// Global budget per dispatch, in milliseconds.
    pub budget_ms: u64,
    /// Individual wait per agent, in milliseconds.
    pub per_agent_timeout_ms: u64,
    /// Capacity of the asynchronous intake queue.
    pub intake_capacity: usize,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            budget_ms: 100,
            per_agent_timeout_ms: 2500,
            intake_capacity: 100,
        }
    }
}

impl CouncilConfig {
    /// Global budget as a duration.
    #[must_use]
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }

    /// Per-agent timeout as a duration.
    #[must_use]
    pub fn per_agent_timeout(&self) -> Duration {
        Duration::from_millis(self.per_agent_timeout_ms)
    }

    /// Rejects zero budgets and zero-capacity queues.
    ///
    /// # Errors
    ///
    /// Returns [`CouncilError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.budget_ms == 0 {
            return Err(CouncilError::InvalidConfig("budget_ms must be positive".into()));
        }
        if self.per_agent_timeout_ms == 0 {
            return Err(CouncilError::InvalidConfig(
                "per_agent_timeout_ms must be positive".into(),
            ));
        }
        if self.intake_capacity == 0 {
            return Err(CouncilError::InvalidConfig(
                "intake_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Orchestrates one pool of agents.
///
/// Each council owns its agents and its policy; a live council and any
/// number of evaluation councils coexist without shared registries.
///
/// # Example
///
/// ```rust,ignore
/// let memory = SharedMemory::new(MemoryConfig::default())?;
/// let council = Council::with_agents(CouncilConfig::default(), memory, default_agents())?;
///
/// let bundle = council.dispatch(InputBundle::new("Ship now.").with_stress(0.82)).await;
/// println!("{}", bundle.decision);
/// ```
pub struct Council {
    config: CouncilConfig,
    memory: SharedMemory,
    agents: RwLock<Vec<Arc<dyn Agent>>>,
    policy: RwLock<Genes>,
}

impl std::fmt::Debug for Council {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Council")
            .field("config", &self.config)
            .field("agents", &self.agent_ids())
            .field("policy", &*self.policy.read())
            .finish()
    }
}

impl Council {
    /// Creates an empty council.
    ///
    /// # Errors
    ///
    /// Returns [`CouncilError::InvalidConfig`] if the configuration is invalid.
    pub fn new(config: CouncilConfig, memory: SharedMemory) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            memory,
            agents: RwLock::new(Vec::new()),
            policy: RwLock::new(Genes::default()),
        })
    }

    /// Creates a council and registers `agents` in order.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or duplicate agent ids.
    pub fn with_agents(
        config: CouncilConfig,
        memory: SharedMemory,
        agents: Vec<Arc<dyn Agent>>,
    ) -> Result<Self> {
        let council = Self::new(config, memory)?;
        for agent in agents {
            council.register_agent(agent)?;
        }
        Ok(council)
    }

    /// Adds an agent. Registration order is report order.
    ///
    /// # Errors
    ///
    /// Returns [`CouncilError::DuplicateAgent`] if the id is taken.
    pub fn register_agent(&self, agent: Arc<dyn Agent>) -> Result<()> {
        let mut agents = self.agents.write();
        if agents.iter().any(|a| a.id() == agent.id()) {
            return Err(CouncilError::DuplicateAgent(agent.id().to_string()));
        }
        debug!(agent = agent.id(), kind = %agent.kind(), "agent registered");
        agents.push(agent);
        Ok(())
    }

    /// Ids of registered agents, in registration order.
    #[must_use]
    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.read().iter().map(|a| a.id().to_string()).collect()
    }

    /// Replaces the active policy. In-flight dispatches keep their snapshot.
    pub fn set_policy(&self, genes: Genes) {
        *self.policy.write() = genes;
        info!(?genes, "council policy updated");
    }

    /// The active policy.
    #[must_use]
    pub fn policy(&self) -> Genes {
        *self.policy.read()
    }

    /// The dispatcher configuration.
    #[must_use]
    pub fn config(&self) -> &CouncilConfig {
        &self.config
    }

    /// The shared memory store agents write to.
    #[must_use]
    pub fn memory(&self) -> &SharedMemory {
        &self.memory
    }

    /// Runs every agent against `input` and returns the assembled bundle.
    ///
    /// # Process
    ///
    /// 1. Freeze the active policy
    /// 2. Per stage: skip agents missing inputs, run the rest in parallel
    /// 3. Wait on each agent for min(per-agent timeout, remaining budget)
    /// 4. Assemble graph and decision from the completed reports
    pub async fn dispatch(&self, input: InputBundle) -> CouncilBundle {
        self.run_dispatch(Uuid::new_v4(), input, None).await
    }

    /// Dispatch whose bundle carries a caller-chosen `id`.
    pub(crate) async fn dispatch_as(&self, id: Uuid, input: InputBundle) -> CouncilBundle {
        self.run_dispatch(id, input, None).await
    }

    /// Like [`dispatch`](Self::dispatch), with `agent_id` forced to a
    /// zero-weight report and never invoked.
    pub async fn dispatch_with_ablation(&self, input: InputBundle, agent_id: &str) -> CouncilBundle {
        self.run_dispatch(Uuid::new_v4(), input, Some(agent_id)).await
    }

    async fn run_dispatch(&self, id: Uuid, input: InputBundle, ablate: Option<&str>) -> CouncilBundle {
        let policy = self.policy();
        let agents: Vec<Arc<dyn Agent>> = self.agents.read().clone();
        let budget = DispatchBudget::start(self.config.budget());
        let input = Arc::new(input);
        let mut slots: Vec<Option<AgentReport>> = vec![None; agents.len()];

        for stage in AgentStage::ORDER {
            let prior: Arc<Vec<AgentReport>> = Arc::new(slots.iter().flatten().cloned().collect());
            let mut pending = Vec::new();

            for (idx, agent) in agents.iter().enumerate() {
                if agent.stage() != stage {
                    continue;
                }
                if let Some(report) = precheck(agent.as_ref(), &input, ablate) {
                    slots[idx] = Some(report);
                    continue;
                }
                let handle = self.spawn_agent(
                    Arc::clone(agent),
                    Arc::clone(&input),
                    Arc::clone(&prior),
                    policy,
                    budget,
                );
                pending.push((idx, handle));
            }

            for (idx, handle) in pending {
                slots[idx] = Some(self.collect(agents[idx].as_ref(), handle, budget).await);
            }
        }

        let reports: Vec<AgentReport> = slots.into_iter().flatten().collect();
        let input = Arc::try_unwrap(input).unwrap_or_else(|shared| (*shared).clone());
        let bundle = assemble_as(id, reports, policy, input);
        debug!(
            id = %bundle.id,
            decision = %bundle.decision,
            elapsed_ms = budget.elapsed().as_millis() as u64,
            "dispatch complete"
        );
        bundle
    }

    fn spawn_agent(
        &self,
        agent: Arc<dyn Agent>,
        input: Arc<InputBundle>,
        prior: Arc<Vec<AgentReport>>,
        policy: Genes,
        budget: DispatchBudget,
    ) -> JoinHandle<AgentReport> {
        let memory = self.memory.clone();
        tokio::task::spawn_blocking(move || {
            if !agent.budget_exempt() && budget.is_exhausted() {
                return AgentReport::failure(
                    agent.id(),
                    agent.kind(),
                    FailureReason::BudgetExceeded,
                    "global budget exhausted before start",
                );
            }
            let ctx = AgentContext {
                policy: &policy,
                reports: &prior,
                memory: &memory,
            };
            agent.run(&input, &ctx)
        })
    }

    async fn collect(
        &self,
        agent: &dyn Agent,
        handle: JoinHandle<AgentReport>,
        budget: DispatchBudget,
    ) -> AgentReport {
        let per_agent = self.config.per_agent_timeout();
        let remaining = budget.remaining();
        let (wait, reason) = if agent.budget_exempt() || per_agent <= remaining {
            (per_agent, FailureReason::Timeout)
        } else {
            (remaining, FailureReason::BudgetExceeded)
        };

        match tokio::time::timeout(wait, handle).await {
            Ok(Ok(report)) => {
                if report.failure_reason() == Some(FailureReason::BudgetExceeded) {
                    warn!(agent = agent.id(), "agent skipped: budget exhausted");
                }
                report
            }
            Ok(Err(join)) => {
                warn!(agent = agent.id(), error = %join, "agent task failed");
                AgentReport::failure(agent.id(), agent.kind(), FailureReason::Panicked, join.to_string())
            }
            Err(_) => {
                warn!(agent = agent.id(), ?reason, wait_ms = wait.as_millis() as u64, "agent did not report in time");
                AgentReport::failure(
                    agent.id(),
                    agent.kind(),
                    reason,
                    format!("no report within {} ms", wait.as_millis()),
                )
            }
        }
    }
}

/// Report for an agent that must not be invoked, if any.
fn precheck(agent: &dyn Agent, input: &InputBundle, ablate: Option<&str>) -> Option<AgentReport> {
    if ablate == Some(agent.id()) {
        return Some(AgentReport::failure(
            agent.id(),
            agent.kind(),
            FailureReason::Ablated,
            "influence forced to zero",
        ));
    }
    let missing: Vec<String> = agent
        .required_fields()
        .iter()
        .filter(|f| !input.has(**f))
        .map(InputField::to_string)
        .collect();
    if missing.is_empty() {
        return None;
    }
    warn!(agent = agent.id(), missing = ?missing, "skipping agent: missing inputs");
    Some(AgentReport::failure(
        agent.id(),
        agent.kind(),
        FailureReason::MissingInputs,
        format!("missing required inputs: {}", missing.join(", ")),
    ))
}

/// Runs `agents` stage by stage on the calling thread with no budget.
///
/// Used by evaluation councils that score many samples offline. Ablation
/// and missing-input handling match [`Council::dispatch`].
pub fn run_inline(
    agents: &[Arc<dyn Agent>],
    input: &InputBundle,
    policy: &Genes,
    memory: &SharedMemory,
) -> Vec<AgentReport> {
    let mut slots: Vec<Option<AgentReport>> = vec![None; agents.len()];
    for stage in AgentStage::ORDER {
        let prior: Vec<AgentReport> = slots.iter().flatten().cloned().collect();
        let ctx = AgentContext {
            policy,
            reports: &prior,
            memory,
        };
        for (idx, agent) in agents.iter().enumerate() {
            if agent.stage() == stage {
                let report = precheck(agent.as_ref(), input, None)
                    .unwrap_or_else(|| agent.run(input, &ctx));
                slots[idx] = Some(report);
            }
        }
    }
    slots.into_iter().flatten().collect()
}

/// Folds a completed report set into a bundle.
///
/// Graph and decision depend only on the set of reports, not on their
/// completion order: nodes and edges are sorted, and the decision is read
/// from the meta-arbiter report (PROCEED if it did not succeed).
#[must_use]
pub fn assemble(reports: Vec<AgentReport>, policy: Genes, input: InputBundle) -> CouncilBundle {
    assemble_as(Uuid::new_v4(), reports, policy, input)
}

/// [`assemble`] with a fixed bundle id.
#[must_use]
pub fn assemble_as(id: Uuid, reports: Vec<AgentReport>, policy: Genes, input: InputBundle) -> CouncilBundle {
    let mut nodes: Vec<String> = reports.iter().map(|r| r.agent.clone()).collect();
    nodes.sort();
    nodes.dedup();

    let mut edges: Vec<GraphEdge> = reports
        .iter()
        .filter(|r| r.ok)
        .map(|r| GraphEdge {
            from: INPUT_NODE.to_string(),
            to: r.agent.clone(),
            weight: r.influence,
        })
        .collect();
    edges.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));

    let decision = reports
        .iter()
        .filter(|r| r.ok && r.kind == AgentKind::MetaArbiter)
        .min_by(|a, b| a.agent.cmp(&b.agent))
        .and_then(|r| r.details.get("decision"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<Decision>().ok())
        .unwrap_or(Decision::Proceed);

    CouncilBundle {
        id,
        reports,
        graph: ExplainGraph { nodes, edges },
        decision,
        policy,
        input,
        audit_issues: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{default_agents, AgentFault, Assessment, ContextRiskAgent, MetaArbiter};
    use sentinel_memory::MemoryConfig;

    fn memory() -> SharedMemory {
        SharedMemory::new(MemoryConfig::default()).unwrap()
    }

    fn roomy() -> CouncilConfig {
        CouncilConfig {
            budget_ms: 5_000,
            per_agent_timeout_ms: 5_000,
            intake_capacity: 8,
        }
    }

    struct Sleeper {
        id: &'static str,
        nap: Duration,
        kind: AgentKind,
    }

    impl Agent for Sleeper {
        fn id(&self) -> &str {
            self.id
        }
        fn kind(&self) -> AgentKind {
            self.kind
        }
        fn required_fields(&self) -> &[InputField] {
            &[]
        }
        fn assess(&self, _: &InputBundle, _: &AgentContext<'_>) -> std::result::Result<Assessment, AgentFault> {
            std::thread::sleep(self.nap);
            Ok(Assessment::new(0.5, 0.9))
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ship_now_is_cautious() {
        let council = Council::with_agents(roomy(), memory(), default_agents()).unwrap();
        let input = InputBundle::new("Ship now.")
            .with_intent("proceed fast")
            .with_stress(0.82)
            .with_context_risk(0.7)
            .with_timescale(0.7);
        let bundle = council.dispatch(input).await;

        assert_eq!(bundle.decision, Decision::ProceedWithCaution);
        assert_eq!(bundle.reports.len(), 12);
        assert_eq!(bundle.policy, Genes::default());
        let short = bundle.report("short_term").unwrap();
        assert_eq!(short.failure_reason(), Some(FailureReason::OutOfRange));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reports_respect_unit_bounds() {
        let council = Council::with_agents(roomy(), memory(), default_agents()).unwrap();
        let input = InputBundle::new("x")
            .with_stress(3.0)
            .with_context_risk(-1.0)
            .with_timescale(0.2);
        let bundle = council.dispatch(input).await;
        for report in &bundle.reports {
            for score in [report.influence, report.reliability, report.severity] {
                assert!((0.0..=1.0).contains(&score), "{report:?}");
            }
            if !report.ok {
                assert_eq!(report.influence + report.reliability + report.severity, 0.0);
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_inputs_skip_agent() {
        let council = Council::with_agents(roomy(), memory(), default_agents()).unwrap();
        let bundle = council.dispatch(InputBundle::new("hello")).await;

        let risk = bundle.report("context_risk").unwrap();
        assert_eq!(risk.failure_reason(), Some(FailureReason::MissingInputs));
        assert!(risk.diagnostics.elapsed_ms.is_none());
        assert!(bundle.report("identity_probe").unwrap().ok);
        assert!(!bundle.graph.nodes.is_empty());
        assert!(bundle.graph.edges.iter().all(|e| e.to != "context_risk"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_per_agent_timeout() {
        let config = CouncilConfig {
            per_agent_timeout_ms: 20,
            ..roomy()
        };
        let council = Council::new(config, memory()).unwrap();
        council
            .register_agent(Arc::new(Sleeper {
                id: "slow",
                nap: Duration::from_millis(300),
                kind: AgentKind::Fairness,
            }))
            .unwrap();
        council
            .register_agent(Arc::new(Sleeper {
                id: "fast",
                nap: Duration::ZERO,
                kind: AgentKind::Fairness,
            }))
            .unwrap();

        let bundle = council.dispatch(InputBundle::new("x")).await;
        assert_eq!(
            bundle.report("slow").unwrap().failure_reason(),
            Some(FailureReason::Timeout)
        );
        assert!(bundle.report("fast").unwrap().ok);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_budget_exhaustion_spares_exempt_agents() {
        let config = CouncilConfig {
            budget_ms: 20,
            ..roomy()
        };
        let council = Council::new(config, memory()).unwrap();
        council
            .register_agent(Arc::new(Sleeper {
                id: "slow",
                nap: Duration::from_millis(300),
                kind: AgentKind::Fairness,
            }))
            .unwrap();
        council.register_agent(Arc::new(MetaArbiter::new())).unwrap();

        let bundle = council.dispatch(InputBundle::new("x")).await;
        assert_eq!(
            bundle.report("slow").unwrap().failure_reason(),
            Some(FailureReason::BudgetExceeded)
        );
        assert!(bundle.report("meta_arbiter").unwrap().ok);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ablation_removes_blocking_agent() {
        let council = Council::new(roomy(), memory()).unwrap();
        council.register_agent(Arc::new(ContextRiskAgent::new())).unwrap();
        council.register_agent(Arc::new(MetaArbiter::new())).unwrap();
        let input = InputBundle::new("x").with_context_risk(0.95);

        let original = council.dispatch(input.clone()).await;
        assert_eq!(original.decision, Decision::Block);

        let replay = council.dispatch_with_ablation(input, "context_risk").await;
        assert_ne!(replay.decision, Decision::Block);
        assert_eq!(
            replay.report("context_risk").unwrap().failure_reason(),
            Some(FailureReason::Ablated)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_policy_frozen_per_dispatch() {
        let council = Council::with_agents(roomy(), memory(), default_agents()).unwrap();
        let strict = Genes::new(0.5, 0.15, 0.5, 0.5);
        council.set_policy(strict);
        let bundle = council.dispatch(InputBundle::new("x").with_stress(0.6)).await;
        assert_eq!(bundle.policy, strict);
        assert_eq!(bundle.decision, Decision::ProceedWithCaution);
    }

    #[test]
    fn test_duplicate_agent_rejected() {
        let council = Council::new(roomy(), memory()).unwrap();
        council.register_agent(Arc::new(MetaArbiter::new())).unwrap();
        assert!(matches!(
            council.register_agent(Arc::new(MetaArbiter::new())),
            Err(CouncilError::DuplicateAgent(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CouncilConfig {
            budget_ms: 0,
            ..CouncilConfig::default()
        };
        assert!(Council::new(config, memory()).is_err());
    }

    #[test]
    fn test_assemble_is_order_independent() {
        let agents = default_agents();
        let input = InputBundle::new("go").with_stress(0.2).with_context_risk(0.1).with_timescale(0.1);
        let reports = run_inline(&agents, &input, &Genes::default(), &memory());

        let forward = assemble(reports.clone(), Genes::default(), input.clone());
        let mut reversed_reports = reports;
        reversed_reports.reverse();
        let reversed = assemble(reversed_reports, Genes::default(), input);

        assert_eq!(forward.graph, reversed.graph);
        assert_eq!(forward.decision, reversed.decision);
        assert_eq!(forward.decision, Decision::Proceed);
    }

    #[test]
    fn test_assemble_defaults_to_proceed_without_arbiter() {
        let bundle = assemble(Vec::new(), Genes::default(), InputBundle::default());
        assert_eq!(bundle.decision, Decision::Proceed);
        assert!(bundle.graph.nodes.is_empty());
    }
}
