//! # Sentinel Evolution
//!
//! Offline search for better council thresholds.
//!
//! Candidates are [`Genes`](sentinel_council::Genes) tuples. Each is
//! checked against hard [`Invariants`] before it is scored; violators are
//! discarded no matter how well they would have done. Survivors are run
//! through a [`MicroCouncil`] over three labeled datasets and scored by
//! their *worst* dataset. [`BeamSearch`] mutates the frontier with
//! annealed Gaussian noise and keeps the top `beam` each round.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sentinel_evolution::{demo_datasets, BeamSearch, EvalWeights, EvaluationHarness, SearchConfig};
//!
//! let harness = EvaluationHarness::new(demo_datasets(), EvalWeights::default());
//! let outcome = BeamSearch::new(harness, SearchConfig::default()).search(Genes::default())?;
//! println!("{:?} scored {}", outcome.best.genes, outcome.best.score);
//! ```

pub mod dataset;
pub mod error;
pub mod harness;
pub mod invariants;
pub mod micro;
pub mod search;

pub use dataset::{demo_datasets, Datasets, Sample, SampleBio, SampleEnv};
pub use error::{EvolutionError, Result};
pub use harness::{
    is_high_context, overall_score, CandidateMetrics, DatasetScores, EvalWeights, EvaluationHarness,
    HIGH_CONTEXT_THRESHOLD,
};
pub use invariants::{check_invariants, guardian_hash, InvariantViolation, Invariants};
pub use micro::MicroCouncil;
pub use search::{gaussian, BeamSearch, Candidate, SearchConfig, SearchOutcome};
