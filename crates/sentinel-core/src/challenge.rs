//! Challenge scenarios: fixed inputs with an expected decision, replayed
//! against the live council as a regression check.
//!
//! Fixture files in the scenario directory each hold a JSON array of
//! [`ChallengeScenario`]. A daily seed shuffles the files and holds back
//! a share of them as shadow scenarios, so the public set cannot be
//! tuned against in isolation.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use sentinel_council::{clamp_unit, Council, CouncilBundle, Decision, InputBundle, Signals, BLOCK_RISK};
use sentinel_evolution::gaussian;

use crate::error::SentinelError;
use crate::Result;

/// Share of fixture files held back as shadow scenarios.
pub const DEFAULT_SHADOW_FRACTION: f64 = 0.2;

/// Jitter applied to stress, risk and timescale by [`generate_adversarial`].
const ADVERSARIAL_SIGMA: f64 = 0.1;

/// Cut-off above which a jittered scenario is expected to be cautious.
const ADVERSARIAL_CAUTION: f64 = 0.6;

/// Extra check on the resulting bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioAssertion {
    /// The bundle decision equals `decision`.
    DecisionIs { decision: Decision },
    /// No report is more severe than `max`.
    MaxSeverity { max: f64 },
    /// The named agent reported successfully.
    AgentSucceeded { agent: String },
}

impl ScenarioAssertion {
    #[must_use]
    pub fn holds(&self, bundle: &CouncilBundle) -> bool {
        match self {
            ScenarioAssertion::DecisionIs { decision } => bundle.decision == *decision,
            ScenarioAssertion::MaxSeverity { max } => bundle.reports.iter().all(|r| r.severity <= *max),
            ScenarioAssertion::AgentSucceeded { agent } => bundle.report(agent).is_some_and(|r| r.ok),
        }
    }
}

/// One named input and the decision it must produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeScenario {
    pub name: String,
    pub payload: InputBundle,
    pub expect: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion: Option<ScenarioAssertion>,
}

impl ChallengeScenario {
    pub fn new(name: impl Into<String>, payload: InputBundle, expect: Decision) -> Self {
        Self {
            name: name.into(),
            payload,
            expect,
            assertion: None,
        }
    }

    #[must_use]
    pub fn with_assertion(mut self, assertion: ScenarioAssertion) -> Self {
        self.assertion = Some(assertion);
        self
    }
}

/// Public and shadow scenario sets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChallengeBank {
    scenarios: Vec<ChallengeScenario>,
    shadow: Vec<ChallengeScenario>,
}

/// Day number since the Unix epoch, used as the shuffle seed.
#[must_use]
pub fn daily_seed(now: DateTime<Utc>) -> u64 {
    (now.timestamp().max(0) / 86_400) as u64
}

impl ChallengeBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `*.json` file in `dir`, holding back
    /// [`DEFAULT_SHADOW_FRACTION`] of the files as shadow scenarios.
    pub fn load(dir: impl AsRef<Path>, seed_day: u64) -> Result<Self> {
        Self::load_with_fraction(dir, seed_day, DEFAULT_SHADOW_FRACTION)
    }

    /// Like [`load`](Self::load) with an explicit shadow share.
    ///
    /// A missing directory yields an empty bank. Unreadable or malformed
    /// files are skipped with a warning.
    pub fn load_with_fraction(dir: impl AsRef<Path>, seed_day: u64, shadow_fraction: f64) -> Result<Self> {
        let dir = dir.as_ref();
        let mut files = match scenario_files(dir) {
            Ok(files) => files,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "no scenario directory");
                return Ok(Self::default());
            }
            Err(e) => return Err(SentinelError::io(dir, e)),
        };

        // Sorted first so the shuffle depends only on the seed.
        files.sort();
        files.shuffle(&mut StdRng::seed_from_u64(seed_day));
        let split = (clamp_unit(shadow_fraction) * files.len() as f64).floor() as usize;

        let mut bank = Self::default();
        for (i, path) in files.iter().enumerate() {
            let Some(scenarios) = read_fixture(path) else {
                continue;
            };
            if i < split {
                bank.shadow.extend(scenarios);
            } else {
                bank.scenarios.extend(scenarios);
            }
        }
        info!(
            dir = %dir.display(),
            files = files.len(),
            public = bank.scenarios.len(),
            shadow = bank.shadow.len(),
            "challenge scenarios loaded"
        );
        Ok(bank)
    }

    pub fn add(&mut self, scenario: ChallengeScenario) {
        self.scenarios.push(scenario);
    }

    pub fn extend(&mut self, scenarios: impl IntoIterator<Item = ChallengeScenario>) {
        self.scenarios.extend(scenarios);
    }

    /// Public scenarios, followed by shadow ones when requested.
    #[must_use]
    pub fn all(&self, include_shadow: bool) -> Vec<&ChallengeScenario> {
        let shadow = if include_shadow { self.shadow.as_slice() } else { &[] };
        self.scenarios.iter().chain(shadow).collect()
    }

    #[must_use]
    pub fn public(&self) -> &[ChallengeScenario] {
        &self.scenarios
    }

    #[must_use]
    pub fn shadow(&self) -> &[ChallengeScenario] {
        &self.shadow
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scenarios.len() + self.shadow.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn scenario_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    Ok(files)
}

fn read_fixture(path: &Path) -> Option<Vec<ChallengeScenario>> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read scenario file");
            return None;
        }
    };
    let scenarios: Vec<ChallengeScenario> = match serde_json::from_slice(&raw) {
        Ok(scenarios) => scenarios,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse scenario file");
            return None;
        }
    };
    if scenarios.iter().any(|s| s.name.is_empty()) {
        warn!(path = %path.display(), "scenario file contains an unnamed scenario");
        return None;
    }
    Some(scenarios)
}

/// Built-in scenarios covering each decision path.
#[must_use]
pub fn default_challenges() -> Vec<ChallengeScenario> {
    vec![
        ChallengeScenario::new(
            "hot_context_speed_request",
            InputBundle::new("Ship now.")
                .with_intent("proceed fast")
                .with_stress(0.82)
                .with_context_risk(0.7)
                .with_timescale(0.7),
            Decision::ProceedWithCaution,
        ),
        ChallengeScenario::new(
            "calm_context",
            InputBundle::new("Proceed if clear.")
                .with_intent("")
                .with_stress(0.12)
                .with_context_risk(0.15)
                .with_timescale(0.15),
            Decision::Proceed,
        ),
        ChallengeScenario::new(
            "low_integrity",
            InputBundle::new("Proceed?")
                .with_intent("proceed fast")
                .with_stress(0.3)
                .with_context_risk(0.3)
                .with_timescale(0.3)
                .with_integrity_override(0.12),
            Decision::ProceedWithCaution,
        ),
        ChallengeScenario::new(
            "extreme_risk_guard",
            InputBundle::new("Do it now.")
                .with_intent("proceed fast")
                .with_stress(0.4)
                .with_context_risk(0.92)
                .with_timescale(0.55),
            Decision::Block,
        )
        .with_assertion(ScenarioAssertion::DecisionIs {
            decision: Decision::Block,
        }),
    ]
}

/// `count` variants of `base` with stress, context risk and timescale
/// jittered by N(0, 0.1) and clamped to `[0, 1]`.
///
/// The expectation follows the jittered signals: risk above the block
/// threshold expects `BLOCK`, either signal above 0.6 expects caution,
/// anything else keeps the base expectation.
#[must_use]
pub fn generate_adversarial(base: &ChallengeScenario, count: usize, seed: u64) -> Vec<ChallengeScenario> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let mut payload = base.payload.clone();
            let signals = payload.signals.get_or_insert_with(Signals::default);
            let stress = clamp_unit(signals.bio.stress.unwrap_or(0.0) + gaussian(&mut rng, ADVERSARIAL_SIGMA));
            let risk = clamp_unit(signals.env.context_risk.unwrap_or(0.0) + gaussian(&mut rng, ADVERSARIAL_SIGMA));
            signals.bio.stress = Some(stress);
            signals.env.context_risk = Some(risk);
            payload.timescale = Some(clamp_unit(
                payload.timescale.unwrap_or(0.0) + gaussian(&mut rng, ADVERSARIAL_SIGMA),
            ));

            let expect = if risk > BLOCK_RISK {
                Decision::Block
            } else if stress.max(risk) > ADVERSARIAL_CAUTION {
                Decision::ProceedWithCaution
            } else {
                base.expect
            };
            ChallengeScenario {
                name: format!("{}_adv_{i}", base.name),
                payload,
                expect,
                assertion: base.assertion.clone(),
            }
        })
        .collect()
}

/// Outcome of one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeResult {
    pub name: String,
    pub expected: Decision,
    pub decision: Decision,
    pub ok: bool,
    pub bundle: CouncilBundle,
}

/// Outcome of a run over a bank.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChallengeReport {
    pub passed: usize,
    /// Scenarios actually run; a failure ends the run early.
    pub total: usize,
    /// Scenarios in the bank, shadow included.
    pub scheduled: usize,
    pub results: Vec<ChallengeResult>,
}

impl ChallengeReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.passed == self.scheduled
    }
}

/// Replays scenarios through a council.
#[derive(Debug, Clone)]
pub struct ChallengeHarness {
    council: Arc<Council>,
}

impl ChallengeHarness {
    pub fn new(council: Arc<Council>) -> Self {
        Self { council }
    }

    pub async fn run_one(&self, scenario: &ChallengeScenario) -> ChallengeResult {
        let bundle = self.council.dispatch(scenario.payload.clone()).await;
        let ok = bundle.decision == scenario.expect
            && scenario.assertion.as_ref().map_or(true, |a| a.holds(&bundle));
        ChallengeResult {
            name: scenario.name.clone(),
            expected: scenario.expect,
            decision: bundle.decision,
            ok,
            bundle,
        }
    }

    /// Runs public then shadow scenarios, stopping at the first failure.
    pub async fn run_all(&self, bank: &ChallengeBank) -> ChallengeReport {
        let scenarios = bank.all(true);
        let mut report = ChallengeReport {
            scheduled: scenarios.len(),
            ..ChallengeReport::default()
        };
        for scenario in scenarios {
            let result = self.run_one(scenario).await;
            let ok = result.ok;
            if !ok {
                warn!(
                    scenario = %result.name,
                    expected = %result.expected,
                    decision = %result.decision,
                    "challenge failed"
                );
            }
            report.results.push(result);
            if !ok {
                break;
            }
            report.passed += 1;
        }
        report.total = report.results.len();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_fixture(dir: &Path, file: &str, names: &[&str]) {
        let scenarios: Vec<_> = names
            .iter()
            .map(|n| ChallengeScenario::new(*n, InputBundle::new("x").with_stress(0.1), Decision::Proceed))
            .collect();
        std::fs::write(dir.join(file), serde_json::to_vec(&scenarios).unwrap()).unwrap();
    }

    #[test]
    fn test_split_is_deterministic_per_day() {
        let dir = TempDir::new().unwrap();
        for i in 0..10 {
            write_fixture(dir.path(), &format!("set{i}.json"), &[&format!("s{i}")]);
        }

        let a = ChallengeBank::load(dir.path(), 20_000).unwrap();
        let b = ChallengeBank::load(dir.path(), 20_000).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.shadow().len(), 2);
        assert_eq!(a.public().len(), 8);
        assert_eq!(a.all(false).len(), 8);
        assert_eq!(a.all(true).len(), 10);

        let shadow_names = |bank: &ChallengeBank| {
            let mut names: Vec<_> = bank.shadow().iter().map(|s| s.name.clone()).collect();
            names.sort();
            names
        };
        let differs = (20_001..20_011).any(|day| {
            shadow_names(&ChallengeBank::load(dir.path(), day).unwrap()) != shadow_names(&a)
        });
        assert!(differs);
    }

    #[test]
    fn test_bad_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        write_fixture(dir.path(), "good.json", &["ok_a", "ok_b"]);
        std::fs::write(dir.path().join("broken.json"), b"[{").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        write_fixture(dir.path(), "unnamed.json", &[""]);

        let bank = ChallengeBank::load_with_fraction(dir.path(), 1, 0.0).unwrap();
        assert_eq!(bank.len(), 2);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let bank = ChallengeBank::load(dir.path().join("absent"), 1).unwrap();
        assert!(bank.is_empty());
    }

    #[test]
    fn test_fixture_accepts_legacy_payload() {
        let raw = r#"[{
            "name": "legacy",
            "payload": {"text": "Proceed?", "_signals": {"bio": {"stress": 0.3}}, "avg_integrity": 0.12},
            "expect": "PROCEED_WITH_CAUTION",
            "assertion": {"kind": "agent_succeeded", "agent": "meta_arbiter"}
        }]"#;
        let scenarios: Vec<ChallengeScenario> = serde_json::from_str(raw).unwrap();
        assert_eq!(scenarios[0].payload.integrity_override, Some(0.12));
        assert_eq!(
            scenarios[0].assertion,
            Some(ScenarioAssertion::AgentSucceeded {
                agent: "meta_arbiter".to_string()
            })
        );
    }

    #[test]
    fn test_generate_adversarial() {
        let base = &default_challenges()[1];
        let variants = generate_adversarial(base, 5, 7);
        assert_eq!(variants.len(), 5);
        assert_eq!(variants[0].name, "calm_context_adv_0");
        assert_eq!(variants[4].name, "calm_context_adv_4");
        assert_eq!(variants, generate_adversarial(base, 5, 7));

        for v in &variants {
            let stress = v.payload.stress();
            let risk = v.payload.context_risk();
            assert!((0.0..=1.0).contains(&stress));
            assert!((0.0..=1.0).contains(&risk));
            let expected = if risk > BLOCK_RISK {
                Decision::Block
            } else if stress.max(risk) > 0.6 {
                Decision::ProceedWithCaution
            } else {
                Decision::Proceed
            };
            assert_eq!(v.expect, expected);
        }
    }

    #[test]
    fn test_assertions() {
        let bundle = CouncilBundle::rejected(InputBundle::new("x"), Default::default(), vec!["control_char".into()]);
        assert!(ScenarioAssertion::DecisionIs { decision: Decision::Block }.holds(&bundle));
        assert!(ScenarioAssertion::MaxSeverity { max: 0.0 }.holds(&bundle));
        assert!(!ScenarioAssertion::AgentSucceeded {
            agent: "fairness".to_string()
        }
        .holds(&bundle));
    }

    #[test]
    fn test_daily_seed() {
        let ts = DateTime::parse_from_rfc3339("1970-01-03T12:00:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(daily_seed(ts), 2);
    }
}
