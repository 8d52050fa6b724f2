//! # Sentinel Core
//!
//! Safety gate facade. Wires the input sanitizer, the agent council, the
//! signed audit ledger and the explain snapshot store into one entry
//! point, and carries the operational surface around them: policy store,
//! challenge scenarios, health check, drift report and rollback.
//!
//! ## Threat Coverage
//!
//! | Layer | Component | Threats Addressed |
//! |-------|-----------|-------------------|
//! | Input | [`InputAuditor`] | Injection tokens, control characters, oversized input |
//! | Decision | Council | Single-signal blind spots, hung or faulty agents |
//! | Audit | Signed ledger | Silent tampering with recorded decisions |
//! | Policy | [`PolicyStore`] + rollback | Bad threshold changes |
//! | Regression | [`ChallengeHarness`] | Policy drift on known scenarios |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         SAFETY GATE                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   InputBundle ──► InputAuditor ──unsafe──► BLOCK (not recorded) │
//! │                        │                                        │
//! │                      safe                                       │
//! │                        ▼                                        │
//! │   PolicyStore ──► Council::dispatch ──► CouncilBundle           │
//! │                                              │                  │
//! │                         ┌────────────────────┴─────┐            │
//! │                         ▼                          ▼            │
//! │                   SignedLedger               ExplainStore       │
//! │                 (rollback, verify)          (drift, why)        │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sentinel_core::{InputBundle, SafetyGate, SentinelConfig};
//!
//! let gate = SafetyGate::open(SentinelConfig::load("sentinel.toml")?)?;
//!
//! let bundle = gate
//!     .check(InputBundle::new("Ship now.").with_stress(0.82).with_context_risk(0.7))
//!     .await?;
//! println!("{}", bundle.decision);
//!
//! let health = gate.health_check().await?;
//! assert!(health.ledger_ok);
//! ```
//!
//! ## Security Notes
//!
//! - A decision is only returned after its ledger record is on disk;
//!   storage failures surface as errors, never as silent decisions
//! - Sanitizer rejections never reach the council or the ledger
//! - The policy is re-read from the store on every check, so a policy
//!   written by another process takes effect on the next decision
//! - Ledger, policy and key files are created owner-only (`0o600`)

mod challenge;
mod config;
mod error;
mod gate;
mod policy;
mod sanitizer;
mod signed;

pub use challenge::{
    daily_seed, default_challenges, generate_adversarial, ChallengeBank, ChallengeHarness, ChallengeReport,
    ChallengeResult, ChallengeScenario, ScenarioAssertion, DEFAULT_SHADOW_FRACTION,
};
pub use config::{ChallengeConfig, EvolutionConfig, PolicyConfig, SanitizerConfig, SentinelConfig};
pub use error::SentinelError;
pub use gate::{GateOutcome, HealthReport, SafetyGate};
pub use policy::PolicyStore;
pub use sanitizer::{BasicSanitizer, InputAuditor, SanitizerAudit, MAX_INPUT_LENGTH};
pub use signed::{diff_config, ConfigChange, SignedConfig};

// Re-export component types for convenience
pub use sentinel_council::{CouncilBundle, Decision, Genes, InputBundle};
pub use sentinel_evolution::{Datasets, SearchConfig, SearchOutcome};
pub use sentinel_explain::{CounterfactualResult, DriftReport, Shift};
pub use sentinel_ledger::{LedgerRecord, LedgerVerification, Seal};

/// Core result type for gate operations.
pub type Result<T> = std::result::Result<T, SentinelError>;
