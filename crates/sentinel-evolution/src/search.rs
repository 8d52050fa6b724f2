//! Beam search over gene tuples.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use tracing::{debug, info};

use sentinel_council::Genes;

use crate::error::{EvolutionError, Result};
use crate::harness::{CandidateMetrics, EvaluationHarness};
use crate::invariants::check_invariants;

/// Search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub rounds: usize,
    /// Frontier width, and mutations per frontier member per round.
    pub beam: usize,
    pub seed: u64,
    /// Mutation standard deviation in round 0, annealed linearly to 0.
    pub initial_sigma: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rounds: 40,
            beam: 6,
            seed: 42,
            initial_sigma: 0.1,
        }
    }
}

/// A scored gene tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub genes: Genes,
    pub score: f64,
    pub metrics: CandidateMetrics,
}

/// Result of a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Best admissible candidate seen.
    pub best: Candidate,
    pub rounds: usize,
    /// Candidates scored, including the start.
    pub evaluated: usize,
    /// Mutants discarded for invariant violations or a low train score.
    pub rejected: usize,
}

/// Seeded beam search driven by an [`EvaluationHarness`].
#[derive(Debug)]
pub struct BeamSearch {
    harness: EvaluationHarness,
    config: SearchConfig,
    rng: StdRng,
}

impl BeamSearch {
    pub fn new(harness: EvaluationHarness, config: SearchConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { harness, config, rng }
    }

    #[must_use]
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Searches from `start`.
    ///
    /// The best-ever candidate is tracked among invariant-clean genes only;
    /// an inadmissible start is kept in the frontier as a seed but never
    /// returned.
    ///
    /// # Errors
    ///
    /// [`EvolutionError::NoAdmissibleCandidate`] if nothing admissible was
    /// seen, [`EvolutionError::InvalidConfig`] for a zero beam.
    pub fn search(&mut self, start: Genes) -> Result<SearchOutcome> {
        if self.config.beam == 0 {
            return Err(EvolutionError::InvalidConfig("beam must be at least 1".to_string()));
        }
        let rounds = self.config.rounds;
        let beam = self.config.beam;
        let baseline = self.harness.invariants().baseline_safety_score;

        let start = start.clipped();
        let (score, metrics) = self.harness.score(&start)?;
        let seed = Candidate {
            genes: start,
            score,
            metrics,
        };
        let mut best = seed.metrics.invariant_violations.is_empty().then(|| seed.clone());
        let mut frontier = vec![seed];
        let mut evaluated = 1;
        let mut rejected = 0;

        for round in 0..rounds {
            let sigma = self.config.initial_sigma * (1.0 - round as f64 / rounds as f64);
            let mut offspring = Vec::with_capacity(frontier.len() * beam);

            for parent in frontier.iter().take(beam) {
                for _ in 0..beam {
                    let genes = self.mutate(&parent.genes, sigma);
                    if !check_invariants(self.harness.invariants(), &genes).is_empty() {
                        rejected += 1;
                        continue;
                    }
                    let (score, metrics) = self.harness.score(&genes)?;
                    evaluated += 1;
                    if metrics.scores.train < baseline {
                        rejected += 1;
                        continue;
                    }
                    let candidate = Candidate { genes, score, metrics };
                    if best.as_ref().map_or(true, |b| candidate.score > b.score) {
                        best = Some(candidate.clone());
                    }
                    offspring.push(candidate);
                }
            }

            offspring.extend(frontier.into_iter().take(beam));
            offspring.sort_by(|a, b| b.score.total_cmp(&a.score));
            offspring.truncate(beam);
            frontier = offspring;

            debug!(
                round,
                sigma,
                frontier_best = frontier.first().map_or(f64::NAN, |c| c.score),
                "beam search round complete"
            );
        }

        let best = best.ok_or(EvolutionError::NoAdmissibleCandidate { rounds })?;
        info!(
            score = best.score,
            evaluated,
            rejected,
            guardian_hash = %best.metrics.guardian_hash,
            "beam search finished"
        );
        Ok(SearchOutcome {
            best,
            rounds,
            evaluated,
            rejected,
        })
    }

    fn mutate(&mut self, genes: &Genes, sigma: f64) -> Genes {
        let mut values = genes.to_array();
        for value in &mut values {
            *value += gaussian(&mut self.rng, sigma);
        }
        Genes::from_array(values).clipped()
    }
}

/// Zero-mean normal sample (Box-Muller).
pub fn gaussian<R: Rng + ?Sized>(rng: &mut R, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return 0.0;
    }
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    sigma * (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Datasets, Sample};
    use crate::harness::EvalWeights;
    use sentinel_council::Decision;

    fn datasets() -> Datasets {
        let calm = Sample::new("calm", Decision::Proceed, 0.2, 0.1, 0.1, 0.95);
        let tense = Sample::new("tense", Decision::ProceedWithCaution, 0.75, 0.6, 0.3, 0.8);
        let risky = Sample::new("risky", Decision::Block, 0.9, 0.95, 0.8, 0.3);
        Datasets {
            train: vec![calm.clone(), tense.clone()],
            holdout: vec![calm.clone(), risky.clone()],
            adversarial: vec![tense, risky],
        }
    }

    fn search(config: SearchConfig, start: Genes) -> Result<SearchOutcome> {
        let harness = EvaluationHarness::new(datasets(), EvalWeights::default());
        BeamSearch::new(harness, config).search(start)
    }

    fn small() -> SearchConfig {
        SearchConfig {
            rounds: 5,
            beam: 3,
            ..SearchConfig::default()
        }
    }

    #[test]
    fn test_search_is_deterministic_for_a_seed() {
        let a = search(small(), Genes::default()).unwrap();
        let b = search(small(), Genes::default()).unwrap();
        assert_eq!(a.best.genes, b.best.genes);
        assert_eq!(a.evaluated, b.evaluated);
    }

    #[test]
    fn test_best_never_regresses_below_start() {
        let start = Genes::default();
        let harness = EvaluationHarness::new(datasets(), EvalWeights::default());
        let (start_score, _) = harness.score(&start).unwrap();

        let outcome = search(small(), start).unwrap();
        assert!(outcome.best.score >= start_score);
        assert!(outcome.best.metrics.invariant_violations.is_empty());
    }

    #[test]
    fn test_inverted_caps_are_never_returned() {
        // min_integrity above stress_cap
        let start = Genes::new(0.85, 0.75, 0.7, 0.9);
        match search(small(), start) {
            Ok(outcome) => {
                let g = outcome.best.genes;
                assert!(g.min_integrity <= g.stress_cap);
                assert!(check_invariants(&Default::default(), &g).is_empty());
            }
            Err(err) => assert!(matches!(err, EvolutionError::NoAdmissibleCandidate { .. })),
        }
    }

    #[test]
    fn test_zero_rounds_returns_admissible_start() {
        let config = SearchConfig {
            rounds: 0,
            ..SearchConfig::default()
        };
        let outcome = search(config, Genes::default()).unwrap();
        assert_eq!(outcome.best.genes, Genes::default());
        assert_eq!(outcome.evaluated, 1);

        let err = search(
            SearchConfig {
                rounds: 0,
                ..SearchConfig::default()
            },
            Genes::new(0.85, 0.75, 0.7, 0.9),
        )
        .unwrap_err();
        assert!(matches!(err, EvolutionError::NoAdmissibleCandidate { rounds: 0 }));
    }

    #[test]
    fn test_zero_beam_is_rejected() {
        let config = SearchConfig {
            beam: 0,
            ..SearchConfig::default()
        };
        assert!(matches!(
            search(config, Genes::default()),
            Err(EvolutionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_gaussian_is_centered() {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 4000;
        let mean = (0..n).map(|_| gaussian(&mut rng, 1.0)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.1);
        assert_eq!(gaussian(&mut rng, 0.0), 0.0);
    }
}
