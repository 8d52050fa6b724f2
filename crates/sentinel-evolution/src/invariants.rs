//! Hard safety invariants over gene tuples.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

use sentinel_council::Genes;
use sentinel_ledger::canonicalize::digest_hex;

/// Structural constraints every admissible policy must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Invariants {
    pub name: String,
    /// Lowest allowed `min_integrity`.
    pub min_integrity_floor: f64,
    /// Highest allowed `risk_cap`.
    pub risk_cap_ceiling: f64,
    /// Highest allowed `timescale_cap`.
    pub timescale_ceiling: f64,
    /// Train score below which a mutated candidate is discarded.
    pub baseline_safety_score: f64,
}

impl Default for Invariants {
    fn default() -> Self {
        Self {
            name: "Sentinel Safety Invariants v2".to_string(),
            min_integrity_floor: 0.1,
            risk_cap_ceiling: 0.9,
            timescale_ceiling: 0.95,
            baseline_safety_score: 0.5,
        }
    }
}

/// A broken invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvariantViolation {
    /// `floor <= min_integrity <= stress_cap <= risk_cap <= ceiling` fails.
    CapOrder,
    /// `timescale_cap` above its ceiling.
    TimescaleCeiling,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantViolation::CapOrder => f.write_str("cap_order_violation"),
            InvariantViolation::TimescaleCeiling => f.write_str("timescale_cap_exceeded"),
        }
    }
}

/// Every invariant `genes` breaks. Empty means admissible.
#[must_use]
pub fn check_invariants(inv: &Invariants, genes: &Genes) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let ordered = inv.min_integrity_floor <= genes.min_integrity
        && genes.min_integrity <= genes.stress_cap
        && genes.stress_cap <= genes.risk_cap
        && genes.risk_cap <= inv.risk_cap_ceiling;
    if !ordered {
        violations.push(InvariantViolation::CapOrder);
    }
    if genes.timescale_cap > inv.timescale_ceiling {
        violations.push(InvariantViolation::TimescaleCeiling);
    }
    violations
}

/// Content hash binding the invariant set to concrete gene values.
#[must_use]
pub fn guardian_hash(inv: &Invariants, genes: &Genes) -> String {
    digest_hex(&json!({
        "invariants": inv.name,
        "genes": {
            "risk_cap": genes.risk_cap,
            "min_integrity": genes.min_integrity,
            "stress_cap": genes.stress_cap,
            "timescale_cap": genes.timescale_cap,
        },
    }))
}
