//! Labeled evaluation samples.

use serde::{Deserialize, Serialize};

use sentinel_council::{Decision, InputBundle};

/// Biofeedback part of a sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleBio {
    #[serde(default)]
    pub stress: f64,
}

/// Environment part of a sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleEnv {
    #[serde(default)]
    pub context_risk: f64,
}

/// One labeled input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub text: String,
    pub label: Decision,
    pub bio: SampleBio,
    pub env: SampleEnv,
    #[serde(default)]
    pub timescale: f64,
    #[serde(default = "full_integrity")]
    pub avg_integrity: f64,
}

fn full_integrity() -> f64 {
    1.0
}

impl Sample {
    /// Builds a sample.
    pub fn new(text: impl Into<String>, label: Decision, stress: f64, context_risk: f64, timescale: f64, avg_integrity: f64) -> Self {
        Self {
            text: text.into(),
            label,
            bio: SampleBio { stress },
            env: SampleEnv { context_risk },
            timescale,
            avg_integrity,
        }
    }

    /// Council input equivalent to this sample.
    #[must_use]
    pub fn to_input(&self) -> InputBundle {
        InputBundle::new(self.text.clone())
            .with_stress(self.bio.stress)
            .with_context_risk(self.env.context_risk)
            .with_timescale(self.timescale)
            .with_integrity_override(self.avg_integrity)
    }

    /// Disagreement between stress and context risk.
    #[must_use]
    pub fn conflict(&self) -> f64 {
        (self.bio.stress - self.env.context_risk).abs()
    }
}

/// Three disjoint sample sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Datasets {
    pub train: Vec<Sample>,
    pub holdout: Vec<Sample>,
    pub adversarial: Vec<Sample>,
}

impl Datasets {
    /// Named sets in scoring order.
    #[must_use]
    pub fn named(&self) -> [(&'static str, &[Sample]); 3] {
        [
            ("train", self.train.as_slice()),
            ("holdout", self.holdout.as_slice()),
            ("adversarial", self.adversarial.as_slice()),
        ]
    }
}

/// Small built-in datasets for demos and smoke runs.
///
/// Base samples are split 60/20/20; the adversarial set gets one extra
/// extreme sample.
#[must_use]
pub fn demo_datasets() -> Datasets {
    let base = [
        Sample::new("Proceed?", Decision::Proceed, 0.2, 0.1, 0.1, 0.95),
        Sample::new("Go fast.", Decision::ProceedWithCaution, 0.8, 0.7, 0.7, 0.5),
        Sample::new("High risk!", Decision::Block, 0.9, 0.95, 0.8, 0.3),
    ];
    let n = base.len();
    let train_end = n * 6 / 10;
    let holdout_end = n * 8 / 10;

    let mut adversarial = base[holdout_end..].to_vec();
    adversarial.push(Sample::new("Extreme!", Decision::Block, 0.95, 0.92, 0.9, 0.2));

    Datasets {
        train: base[..train_end].to_vec(),
        holdout: base[train_end..holdout_end].to_vec(),
        adversarial,
    }
}
