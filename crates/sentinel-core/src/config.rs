//! Configuration types for the safety gate.
//!
//! Every section carries `#[serde(default)]`, so a TOML file only needs
//! the keys it overrides:
//!
//! ```toml
//! [ledger]
//! dir = "/var/lib/sentinel/ledger"
//! retention_days = 90
//!
//! [policy.genes]
//! risk_cap = 0.8
//! min_integrity = 0.2
//! stress_cap = 0.7
//! timescale_cap = 0.9
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use sentinel_council::{CouncilConfig, Genes};
use sentinel_evolution::SearchConfig;
use sentinel_explain::{ExplainConfig, VirtueAnchor};
use sentinel_ledger::LedgerConfig;
use sentinel_memory::MemoryConfig;

use crate::error::SentinelError;
use crate::sanitizer::MAX_INPUT_LENGTH;
use crate::Result;

/// Configuration for the safety gate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// Shared memory of the live council.
    pub memory: MemoryConfig,

    /// Dispatcher budget and timeouts.
    pub council: CouncilConfig,

    /// Signed audit ledger.
    pub ledger: LedgerConfig,

    /// Explain snapshot store.
    pub explain: ExplainConfig,

    /// Active policy file and fallback genes.
    pub policy: PolicyConfig,

    /// Challenge scenario fixtures.
    pub challenges: ChallengeConfig,

    /// Built-in input sanitizer.
    pub sanitizer: SanitizerConfig,

    /// Offline policy search.
    pub evolution: EvolutionConfig,

    /// Targets for the virtue distance indicator.
    pub virtue: VirtueAnchor,
}

/// Policy store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// JSON file holding `{"genes": ...}`.
    pub path: PathBuf,

    /// Genes used while no policy file exists.
    pub genes: Genes,

    /// How long a save waits for the file lock.
    pub lock_timeout_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./sentinel_policy.json"),
            genes: Genes::default(),
            lock_timeout_ms: 5_000,
        }
    }
}

/// Challenge bank configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeConfig {
    /// Directory of `*.json` scenario files. A missing directory means
    /// only the built-in scenarios run.
    pub dir: PathBuf,

    /// Share of fixture files held back as shadow scenarios.
    pub shadow_fraction: f64,

    /// Also run the built-in scenarios.
    pub include_defaults: bool,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./sentinel_scenarios"),
            shadow_fraction: 0.2,
            include_defaults: true,
        }
    }
}

/// Built-in sanitizer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizerConfig {
    /// Longest accepted input, in characters.
    pub max_input_length: usize,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_input_length: MAX_INPUT_LENGTH,
        }
    }
}

/// Evolution configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Beam search parameters.
    pub search: SearchConfig,

    /// JSON file of `{train, holdout, adversarial}` samples. The demo
    /// datasets are used when unset.
    pub datasets: Option<PathBuf>,
}

impl SentinelConfig {
    /// Reads a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| SentinelError::io(path, e))?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration with every storage path under `root`.
    pub fn rooted(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            ledger: LedgerConfig::new(root.join("ledger")),
            explain: ExplainConfig::new(root.join("explain")),
            policy: PolicyConfig {
                path: root.join("policy.json"),
                ..PolicyConfig::default()
            },
            challenges: ChallengeConfig {
                dir: root.join("scenarios"),
                ..ChallengeConfig::default()
            },
            ..Self::default()
        }
    }

    /// Checks values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        self.council.validate()?;
        if !(0.0..=1.0).contains(&self.challenges.shadow_fraction) {
            return Err(SentinelError::Config(format!(
                "challenges.shadow_fraction must be in [0, 1], got {}",
                self.challenges.shadow_fraction
            )));
        }
        if self.policy.genes.clipped() != self.policy.genes {
            return Err(SentinelError::Config("policy.genes must lie in [0, 1]".to_string()));
        }
        if self.evolution.search.beam == 0 {
            return Err(SentinelError::Config("evolution.search.beam must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SentinelConfig::default();
        assert_eq!(config.policy.genes, Genes::default());
        assert_eq!(config.sanitizer.max_input_length, 10_000);
        assert_eq!(config.challenges.shadow_fraction, 0.2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = SentinelConfig::rooted("/tmp/sentinel");
        let text = toml::to_string(&config).unwrap();
        let parsed: SentinelConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let parsed: SentinelConfig = toml::from_str(
            r#"
            [ledger]
            retention_days = 90

            [policy.genes]
            risk_cap = 0.8
            min_integrity = 0.2
            stress_cap = 0.7
            timescale_cap = 0.9
            "#,
        )
        .unwrap();
        assert_eq!(parsed.ledger.retention_days, 90);
        assert_eq!(parsed.ledger.rotation_days, 30);
        assert_eq!(parsed.policy.genes.risk_cap, 0.8);
        assert_eq!(parsed.explain, ExplainConfig::default());
    }

    #[test]
    fn test_load_rejects_bad_values() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sentinel.toml");
        std::fs::write(&path, "[challenges]\nshadow_fraction = 1.5\n").unwrap();
        assert!(matches!(SentinelConfig::load(&path), Err(SentinelError::Config(_))));

        std::fs::write(&path, "[ledger\n").unwrap();
        assert!(matches!(SentinelConfig::load(&path), Err(SentinelError::ConfigParse(_))));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(SentinelConfig::load(&missing), Err(SentinelError::Io { .. })));
    }
}
