//! # Cross-Component Properties
//!
//! Properties that span more than one crate: decisions rendered by a
//! council, scored by the evolution harness, explained by the drift and
//! counterfactual tooling.

use std::sync::Arc;

use chrono::Utc;
use sentinel_council::agent::{ContextRiskAgent, MetaArbiter};
use sentinel_council::{default_agents, Council, CouncilConfig, Decision, FailureReason, InputBundle};
use sentinel_evolution::{overall_score, DatasetScores, EvalWeights};
use sentinel_explain::{compare, ExplainSnapshot, WhyEngine};
use sentinel_memory::{MemoryConfig, SharedMemory};

fn roomy() -> CouncilConfig {
    CouncilConfig {
        budget_ms: 5_000,
        per_agent_timeout_ms: 5_000,
        intake_capacity: 8,
    }
}

fn memory() -> SharedMemory {
    SharedMemory::new(MemoryConfig::default()).unwrap()
}

// =============================================================================
// DECISION PROPERTIES
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_reports_bounded_and_failures_zeroed() {
    let council = Council::with_agents(roomy(), memory(), default_agents()).unwrap();
    // No timescale: timescale and segment agents fail on missing input.
    let bundle = council
        .dispatch(InputBundle::new("x").with_stress(0.4).with_context_risk(0.3))
        .await;

    assert!(bundle.reports.iter().any(|r| !r.ok));
    for report in &bundle.reports {
        for value in [report.influence, report.reliability, report.severity] {
            assert!((0.0..=1.0).contains(&value), "{}: {value}", report.agent);
        }
        if !report.ok {
            assert_eq!((report.influence, report.reliability, report.severity), (0.0, 0.0, 0.0));
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_all_zero_signals_proceed() {
    let council = Council::with_agents(roomy(), memory(), default_agents()).unwrap();
    let bundle = council
        .dispatch(
            InputBundle::new("x")
                .with_stress(0.0)
                .with_context_risk(0.0)
                .with_timescale(0.0)
                .with_integrity_override(1.0),
        )
        .await;
    assert_eq!(bundle.decision, Decision::Proceed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_high_risk_blocks_over_caution() {
    let council = Council::with_agents(roomy(), memory(), default_agents()).unwrap();
    // conflict = |0.65 - 0.95| = 0.3
    let bundle = council
        .dispatch(
            InputBundle::new("x")
                .with_stress(0.65)
                .with_context_risk(0.95)
                .with_timescale(0.95)
                .with_integrity_override(0.05),
        )
        .await;
    assert_eq!(bundle.decision, Decision::Block);
}

// =============================================================================
// EXPLAIN PROPERTIES
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_ablating_sole_blocker_changes_decision() {
    let council = Arc::new(Council::new(roomy(), memory()).unwrap());
    council.register_agent(Arc::new(ContextRiskAgent::new())).unwrap();
    council.register_agent(Arc::new(MetaArbiter::new())).unwrap();

    let bundle = council.dispatch(InputBundle::new("x").with_context_risk(0.95)).await;
    assert_eq!(bundle.decision, Decision::Block);

    let why = WhyEngine::new(Arc::clone(&council));
    let probe = why.counterfactual_probe(&bundle, "context_risk").await;
    assert!(probe.changed);
    assert_eq!(probe.original, Decision::Block);
    assert_ne!(probe.counterfactual, Decision::Block);

    let replay = council.dispatch_with_ablation(bundle.input.clone(), "context_risk").await;
    assert_eq!(
        replay.report("context_risk").unwrap().failure_reason(),
        Some(FailureReason::Ablated)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_before_sample_excluded_from_drift() {
    let council = Council::with_agents(roomy(), memory(), default_agents()).unwrap();
    let now = Utc::now();
    let input = InputBundle::new("x").with_stress(0.2).with_context_risk(0.2).with_timescale(0.2);

    let one = council.dispatch(input.clone()).await;
    let before = vec![ExplainSnapshot::from_bundle(&one, now)];
    let mut after = Vec::new();
    for _ in 0..3 {
        after.push(ExplainSnapshot::from_bundle(&council.dispatch(input.clone()).await, now));
    }

    assert!(compare(&before, &after, 5).is_empty());
}

// =============================================================================
// SCORING PROPERTIES
// =============================================================================

#[test]
fn test_overall_score_is_min_minus_penalty() {
    let scores = DatasetScores {
        train: 0.9,
        holdout: 0.6,
        adversarial: 0.75,
    };
    let weights = EvalWeights::default();
    assert!((overall_score(&scores, 0, &weights) - 0.6).abs() < 1e-12);
    assert!((overall_score(&scores, 2, &weights) - 0.4).abs() < 1e-12);
}
