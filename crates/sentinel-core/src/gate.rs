//! The safety gate: sanitizer, council, audit ledger and snapshot store
//! wired into one entry point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use sentinel_council::{default_agents, Council, CouncilBundle, Genes, InputBundle};
use sentinel_evolution::{demo_datasets, BeamSearch, Datasets, EvalWeights, EvaluationHarness, SearchConfig, SearchOutcome};
use sentinel_explain::{
    CounterfactualResult, DriftDetector, DriftReport, ExplainSnapshot, ExplainStore, VirtueAnchor, VirtueMetrics, WhyEngine,
};
use sentinel_ledger::{digest_of, LedgerRecord, LedgerVerification, Provenance, SignedLedger};
use sentinel_memory::SharedMemory;

use crate::challenge::{daily_seed, default_challenges, ChallengeBank, ChallengeHarness, ChallengeReport};
use crate::config::SentinelConfig;
use crate::error::SentinelError;
use crate::policy::PolicyStore;
use crate::sanitizer::{BasicSanitizer, InputAuditor};
use crate::signed::SignedConfig;
use crate::Result;

/// Result of [`SafetyGate::health_check`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Every ledger line verified.
    pub ledger_ok: bool,
    pub ledger_records: usize,
    pub bad_records: usize,
    pub challenge_passed: usize,
    pub challenge_total: usize,
    /// SHA-256 of the canonical active policy.
    pub policy_hash: String,
}

impl HealthReport {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.ledger_ok && self.challenge_passed == self.challenge_total
    }
}

/// A gated decision and its audit record.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub bundle: CouncilBundle,
    /// `None` when the sanitizer rejected the input before dispatch.
    pub record: Option<LedgerRecord>,
}

/// Safety gate facade.
///
/// Every input passes the [`InputAuditor`] first. Unsafe text is blocked
/// without reaching the council; everything else is dispatched under the
/// stored policy, snapshotted for drift analysis and appended to the
/// signed ledger before the decision is returned.
pub struct SafetyGate {
    config: SentinelConfig,
    council: Arc<Council>,
    ledger: SignedLedger,
    explain: Arc<ExplainStore>,
    policy: PolicyStore,
    bank: ChallengeBank,
    auditor: Box<dyn InputAuditor>,
    anchor: VirtueAnchor,
}

impl std::fmt::Debug for SafetyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyGate")
            .field("council", &self.council)
            .field("ledger", &self.ledger)
            .field("explain", &self.explain)
            .field("policy", &self.policy)
            .field("scenarios", &self.bank.len())
            .finish_non_exhaustive()
    }
}

impl SafetyGate {
    /// Builds the gate with the default agent pool and the built-in
    /// sanitizer.
    pub fn open(config: SentinelConfig) -> Result<Self> {
        config.validate()?;

        let memory = SharedMemory::new(config.memory.clone())?;
        let council = Arc::new(Council::with_agents(config.council.clone(), memory, default_agents())?);
        let policy = PolicyStore::new(&config.policy);
        council.set_policy(policy.load()?);

        let ledger = SignedLedger::open(config.ledger.clone(), Provenance::current())?;
        let explain = Arc::new(ExplainStore::open(config.explain.clone())?);

        let mut bank = ChallengeBank::load_with_fraction(
            &config.challenges.dir,
            daily_seed(Utc::now()),
            config.challenges.shadow_fraction,
        )?;
        if config.challenges.include_defaults {
            bank.extend(default_challenges());
        }

        let auditor = Box::new(BasicSanitizer::new(config.sanitizer.max_input_length)?);
        let anchor = config.virtue;

        info!(
            agents = council.agent_ids().len(),
            scenarios = bank.len(),
            key_id = %ledger.active_key_id(),
            "safety gate ready"
        );
        Ok(Self {
            config,
            council,
            ledger,
            explain,
            policy,
            bank,
            auditor,
            anchor,
        })
    }

    /// Replaces the input auditor.
    #[must_use]
    pub fn with_auditor(mut self, auditor: impl InputAuditor + 'static) -> Self {
        self.auditor = Box::new(auditor);
        self
    }

    /// Replaces the challenge bank.
    #[must_use]
    pub fn with_bank(mut self, bank: ChallengeBank) -> Self {
        self.bank = bank;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }

    #[must_use]
    pub fn council(&self) -> &Arc<Council> {
        &self.council
    }

    #[must_use]
    pub fn ledger(&self) -> &SignedLedger {
        &self.ledger
    }

    #[must_use]
    pub fn explain_store(&self) -> &Arc<ExplainStore> {
        &self.explain
    }

    #[must_use]
    pub fn bank(&self) -> &ChallengeBank {
        &self.bank
    }

    /// Gates one input and returns the decision.
    pub async fn check(&self, input: InputBundle) -> Result<CouncilBundle> {
        Ok(self.check_recorded(input).await?.bundle)
    }

    /// Like [`check`](Self::check), also returning the ledger record.
    ///
    /// The ledger append is the commit point: once it succeeds the
    /// decision is returned, and a failed snapshot write is only logged
    /// (the decision is then absent from drift and `why`).
    pub async fn check_recorded(&self, mut input: InputBundle) -> Result<GateOutcome> {
        let audit = self.auditor.audit(input.text.as_deref().unwrap_or_default());
        if !audit.safe {
            warn!(issues = ?audit.issues, "input rejected by sanitizer");
            let bundle = CouncilBundle::rejected(input, self.council.policy(), audit.issues);
            return Ok(GateOutcome { bundle, record: None });
        }
        if input.text.is_some() {
            input.text = Some(audit.normalized);
        }

        let policy = self.policy.load()?;
        if policy != self.council.policy() {
            self.council.set_policy(policy);
        }

        let bundle = self.council.dispatch(input).await;
        let record = self.ledger.append(&bundle.input, &bundle, bundle.policy)?;
        if let Err(err) = self.explain.append(&ExplainSnapshot::from_bundle(&bundle, record.ts)) {
            warn!(id = %bundle.id, ts = %record.ts, error = %err, "decision recorded without snapshot");
        }
        info!(id = %bundle.id, decision = %bundle.decision, ts = %record.ts, "decision recorded");
        Ok(GateOutcome {
            bundle,
            record: Some(record),
        })
    }

    /// Ledger verification, a challenge run and the active policy hash.
    pub async fn health_check(&self) -> Result<HealthReport> {
        let verification = self.verify_ledger()?;
        let challenges = self.run_challenges().await;
        let policy_hash = digest_of(&self.policy.load()?)?;

        let report = HealthReport {
            ledger_ok: verification.ok,
            ledger_records: verification.total_records(),
            bad_records: verification.bad_records(),
            challenge_passed: challenges.passed,
            challenge_total: challenges.total,
            policy_hash,
        };
        if !report.is_healthy() {
            warn!(?report, "health check failed");
        }
        Ok(report)
    }

    /// Verifies every ledger file.
    pub fn verify_ledger(&self) -> Result<LedgerVerification> {
        Ok(self.ledger.verify_all()?)
    }

    /// Runs the challenge bank, shadow scenarios included.
    pub async fn run_challenges(&self) -> ChallengeReport {
        ChallengeHarness::new(Arc::clone(&self.council))
            .run_all(&self.bank)
            .await
    }

    /// Top-`k` influence shifts between the hour ending `hours` ago and
    /// the last hour.
    #[must_use]
    pub fn drift_report(&self, hours: u32, k: usize) -> DriftReport {
        DriftDetector::new(Arc::clone(&self.explain)).top_shifts_hours(hours, 1, k)
    }

    /// Restores the policy recorded in the ledger entry stamped `ts`.
    pub fn rollback(&self, ts: DateTime<Utc>) -> Result<Genes> {
        let record = self
            .ledger
            .find_record(ts)?
            .ok_or(SentinelError::RecordNotFound(ts))?;
        self.activate_policy(record.policy)?;
        info!(%ts, policy = ?record.policy, "policy rolled back");
        Ok(record.policy)
    }

    /// Persists `genes` and applies them to the live council.
    pub fn activate_policy(&self, genes: Genes) -> Result<()> {
        self.policy.save(genes)?;
        self.council.set_policy(genes);
        Ok(())
    }

    /// The stored policy.
    pub fn active_policy(&self) -> Result<Genes> {
        self.policy.load()
    }

    /// Beam search from the active policy over `datasets`, or over the
    /// configured datasets when `None`. Does not activate the result.
    pub fn evolve(&self, datasets: Option<Datasets>, search: SearchConfig) -> Result<SearchOutcome> {
        let datasets = match datasets {
            Some(datasets) => datasets,
            None => self.configured_datasets()?,
        };
        let start = self.policy.load()?;
        let harness = EvaluationHarness::new(datasets, EvalWeights::default());
        let outcome = BeamSearch::new(harness, search).search(start)?;
        info!(
            score = outcome.best.score,
            evaluated = outcome.evaluated,
            rejected = outcome.rejected,
            "policy search finished"
        );
        Ok(outcome)
    }

    fn configured_datasets(&self) -> Result<Datasets> {
        match &self.config.evolution.datasets {
            Some(path) => {
                let raw = std::fs::read(path).map_err(|e| SentinelError::io(path, e))?;
                Ok(serde_json::from_slice(&raw)?)
            }
            None => Ok(demo_datasets()),
        }
    }

    /// Snapshot of the decision whose ledger record is stamped `ts`.
    #[must_use]
    pub fn snapshot_at(&self, ts: DateTime<Utc>) -> Option<ExplainSnapshot> {
        self.explain
            .load_window(ts, ts)
            .into_iter()
            .find(|s| s.ts == ts)
    }

    /// Replays `bundle` once per reporting agent with that agent ablated.
    pub async fn counterfactuals(&self, bundle: &CouncilBundle) -> Vec<CounterfactualResult> {
        WhyEngine::new(Arc::clone(&self.council))
            .counterfactual_analysis(bundle)
            .await
    }

    /// Distance of `bundle` from the configured virtue targets.
    #[must_use]
    pub fn virtue_distance(&self, bundle: &CouncilBundle) -> f64 {
        self.anchor.distance(&VirtueMetrics::from_bundle(bundle))
    }

    /// The running configuration sealed with the ledger's active key.
    pub fn sign_config(&self) -> Result<SignedConfig> {
        let seal = self.ledger.seal(&serde_json::to_value(&self.config)?)?;
        Ok(SignedConfig {
            config: self.config.clone(),
            seal,
        })
    }

    /// True if `signed` was sealed by this ledger's active or a retired key
    /// and is unchanged since.
    #[must_use]
    pub fn verify_config(&self, signed: &SignedConfig) -> bool {
        match serde_json::to_value(&signed.config) {
            Ok(document) => self.ledger.check_seal(&document, &signed.seal),
            Err(err) => {
                warn!(error = %err, "cannot serialize config for seal check");
                false
            }
        }
    }
}
