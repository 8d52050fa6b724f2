//! # Sentinel Council
//!
//! A pool of independent scoring agents, evaluated in parallel under a
//! time budget and arbitrated into one decision.
//!
//! ## Overview
//!
//! Every agent implements the same vote contract ([`Agent`]) and returns
//! an [`AgentReport`]. The [`Council`] runs all of them against one
//! [`InputBundle`], bounded by a global [`DispatchBudget`] and a per-agent
//! timeout, and folds the completed reports into a [`CouncilBundle`]:
//! an explainability graph, the policy snapshot and the final
//! [`Decision`] rendered by the [`MetaArbiter`].
//!
//! ## Threat Model
//!
//! ### Slow or hung agents
//! An agent that stalls must not stall the decision. Each agent gets an
//! individual timeout and the dispatch as a whole gets a budget; agents
//! that miss either are recorded as zero-weight failures.
//!
//! ### Faulty agents
//! Panics and malformed input are caught inside the agent boundary and
//! become failure reports, never errors surfaced to the caller.
//!
//! ### Unreproducible decisions
//! The policy is frozen at dispatch start and graph/decision assembly is
//! a pure function of the report set, so a recorded bundle can be
//! replayed and audited.
//!
//! ## Architecture
//!
//! ```text
//!        InputBundle
//!             │
//!   ┌─────────┼──────────┬──────────────┐
//!   ▼         ▼          ▼              ▼
//! signal   signal     segment  ...   segment      stage 1 (parallel)
//!   │         │          │              │
//!   └─────────┴────┬─────┴──────────────┘
//!                  ▼
//!        timescale coordinator                    stage 2
//!                  ▼
//!            meta-arbiter                         stage 3
//!                  ▼
//!            CouncilBundle
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sentinel_council::{default_agents, Council, CouncilConfig, InputBundle};
//! use sentinel_memory::{MemoryConfig, SharedMemory};
//!
//! let memory = SharedMemory::new(MemoryConfig::default())?;
//! let council = Council::with_agents(CouncilConfig::default(), memory, default_agents())?;
//!
//! let input = InputBundle::new("Ship now.")
//!     .with_stress(0.82)
//!     .with_context_risk(0.7)
//!     .with_timescale(0.7);
//! let bundle = council.dispatch(input).await;
//! assert_eq!(bundle.decision, Decision::ProceedWithCaution);
//! ```

pub mod agent;
pub mod budget;
pub mod council;
pub mod error;
pub mod intake;
pub mod model;

pub use agent::{
    arbitrate, default_agents, micro_agents, Agent, AgentContext, AgentFault, AgentKind,
    AgentStage, ArbiterVerdict, Assessment, MetaArbiter, BLOCK_RISK,
};
pub use budget::DispatchBudget;
pub use council::{assemble, assemble_as, run_inline, Council, CouncilConfig};
pub use error::CouncilError;
pub use intake::Intake;
pub use model::{
    clamp_unit, AgentReport, CouncilBundle, Decision, Diagnostics, ExplainGraph, FailureReason,
    Genes, GraphEdge, InputBundle, InputField, Signals, INPUT_NODE,
};

/// Result type for council operations.
pub type Result<T> = std::result::Result<T, CouncilError>;
