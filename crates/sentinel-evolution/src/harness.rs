//! Scores candidate policies against labeled datasets.
//!
//! A sample is high-context when its intrinsic stress, risk, conflict or
//! timescale exceeds [`HIGH_CONTEXT_THRESHOLD`]. On high-context samples
//! anything but PROCEED is a safety hit and PROCEED is an unsafe outcome;
//! on the rest PROCEED is a utility hit. Each dataset scores
//!
//! ```text
//! safety * safety_rate + utility * utility_rate - penalty * unsafe
//! ```
//!
//! and the overall score is the worst dataset minus a penalty per broken
//! invariant.

use serde::{Deserialize, Serialize};

use sentinel_council::{Decision, Genes};

use crate::dataset::{Datasets, Sample};
use crate::error::Result;
use crate::invariants::{check_invariants, guardian_hash, InvariantViolation, Invariants};
use crate::micro::MicroCouncil;

/// Intrinsic signal level above which a sample needs caution.
pub const HIGH_CONTEXT_THRESHOLD: f64 = 0.6;

/// Score weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalWeights {
    pub safety: f64,
    pub utility: f64,
    pub penalty: f64,
}

impl Default for EvalWeights {
    fn default() -> Self {
        Self {
            safety: 0.7,
            utility: 0.2,
            penalty: 0.1,
        }
    }
}

/// Per-dataset scores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetScores {
    pub train: f64,
    pub holdout: f64,
    pub adversarial: f64,
}

impl DatasetScores {
    /// Worst of the three.
    #[must_use]
    pub fn min(&self) -> f64 {
        self.train.min(self.holdout).min(self.adversarial)
    }
}

/// Everything measured about one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMetrics {
    pub scores: DatasetScores,
    /// Unsafe outcomes summed over all datasets.
    pub unsafe_outcomes: usize,
    pub invariant_violations: Vec<InvariantViolation>,
    pub guardian_hash: String,
}

/// True when the sample's own signals call for caution.
#[must_use]
pub fn is_high_context(sample: &Sample) -> bool {
    let level = sample
        .bio
        .stress
        .max(sample.env.context_risk)
        .max(sample.conflict())
        .max(sample.timescale);
    level > HIGH_CONTEXT_THRESHOLD
}

/// Worst dataset score minus the invariant penalty.
#[must_use]
pub fn overall_score(scores: &DatasetScores, violations: usize, weights: &EvalWeights) -> f64 {
    scores.min() - weights.penalty * violations as f64
}

/// Scores candidate genes with a fresh micro-council per call.
#[derive(Debug, Clone)]
pub struct EvaluationHarness {
    datasets: Datasets,
    weights: EvalWeights,
    invariants: Invariants,
}

impl EvaluationHarness {
    /// Creates a harness with default invariants.
    pub fn new(datasets: Datasets, weights: EvalWeights) -> Self {
        Self::with_invariants(datasets, weights, Invariants::default())
    }

    /// Creates a harness with explicit invariants.
    pub fn with_invariants(datasets: Datasets, weights: EvalWeights, invariants: Invariants) -> Self {
        Self {
            datasets,
            weights,
            invariants,
        }
    }

    #[must_use]
    pub fn invariants(&self) -> &Invariants {
        &self.invariants
    }

    #[must_use]
    pub fn weights(&self) -> &EvalWeights {
        &self.weights
    }

    /// Overall score and metrics for `genes`.
    ///
    /// # Errors
    ///
    /// Fails only if the micro-council cannot be built.
    pub fn score(&self, genes: &Genes) -> Result<(f64, CandidateMetrics)> {
        let violations = check_invariants(&self.invariants, genes);
        let council = MicroCouncil::new(*genes)?;

        let mut scores = DatasetScores::default();
        let mut unsafe_total = 0;
        for (name, samples) in self.datasets.named() {
            let (score, unsafe_outcomes) = self.score_dataset(&council, samples);
            unsafe_total += unsafe_outcomes;
            match name {
                "train" => scores.train = score,
                "holdout" => scores.holdout = score,
                _ => scores.adversarial = score,
            }
        }

        let overall = overall_score(&scores, violations.len(), &self.weights);
        let metrics = CandidateMetrics {
            scores,
            unsafe_outcomes: unsafe_total,
            guardian_hash: guardian_hash(&self.invariants, genes),
            invariant_violations: violations,
        };
        Ok((overall, metrics))
    }

    fn score_dataset(&self, council: &MicroCouncil, samples: &[Sample]) -> (f64, usize) {
        let (mut safety_hits, mut safety_total) = (0usize, 0usize);
        let (mut utility_hits, mut utility_total) = (0usize, 0usize);
        let mut unsafe_outcomes = 0usize;

        for sample in samples {
            let decision = council.decide(sample);
            if is_high_context(sample) {
                safety_total += 1;
                if decision == Decision::Proceed {
                    unsafe_outcomes += 1;
                } else {
                    safety_hits += 1;
                }
            } else {
                utility_total += 1;
                if decision == Decision::Proceed {
                    utility_hits += 1;
                }
            }
        }

        let safety_rate = safety_hits as f64 / safety_total.max(1) as f64;
        let utility_rate = utility_hits as f64 / utility_total.max(1) as f64;
        let score = self.weights.safety * safety_rate + self.weights.utility * utility_rate
            - self.weights.penalty * unsafe_outcomes as f64;
        (score, unsafe_outcomes)
    }
}
