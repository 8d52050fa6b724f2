//! Signed configuration snapshots and configuration diffs.
//!
//! A [`SignedConfig`] carries a seal made with the ledger's active key, so a
//! config exported from one gate can be checked by any gate holding the
//! same (or a retired) key before it is applied.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use sentinel_ledger::Seal;

use crate::config::SentinelConfig;
use crate::Result;

/// A configuration with its seal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedConfig {
    pub config: SentinelConfig,
    #[serde(flatten)]
    pub seal: Seal,
}

/// One setting that differs between two configurations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigChange {
    /// Dotted path, e.g. `policy.genes.risk_cap`.
    pub path: String,
    /// `None` when the setting is absent on that side.
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// Settings that differ between `old` and `new`, sorted by path.
///
/// Tables are compared key by key; arrays and scalars are compared whole.
///
/// # Errors
///
/// Fails if either configuration cannot be serialized.
pub fn diff_config(old: &SentinelConfig, new: &SentinelConfig) -> Result<Vec<ConfigChange>> {
    let old = serde_json::to_value(old)?;
    let new = serde_json::to_value(new)?;
    let mut changes = Vec::new();
    diff_values("", Some(&old), Some(&new), &mut changes);
    Ok(changes)
}

fn diff_values(path: &str, old: Option<&Value>, new: Option<&Value>, out: &mut Vec<ConfigChange>) {
    match (old, new) {
        (Some(Value::Object(a)), Some(Value::Object(b))) => {
            let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            for key in keys {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                diff_values(&child, a.get(key), b.get(key), out);
            }
        }
        (a, b) if a != b => out.push(ConfigChange {
            path: path.to_string(),
            old: a.cloned(),
            new: b.cloned(),
        }),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identical_configs_have_no_diff() {
        let config = SentinelConfig::rooted("/srv/sentinel");
        assert!(diff_config(&config, &config.clone()).unwrap().is_empty());
    }

    #[test]
    fn test_diff_reports_leaf_paths() {
        let old = SentinelConfig::default();
        let mut new = old.clone();
        new.policy.genes.risk_cap = 0.8;
        new.ledger.retention_days = 90;
        new.evolution.datasets = Some("data.json".into());

        let changes = diff_config(&old, &new).unwrap();
        let paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["evolution.datasets", "ledger.retention_days", "policy.genes.risk_cap"]);

        let retention = &changes[1];
        assert_eq!(retention.old, Some(json!(30)));
        assert_eq!(retention.new, Some(json!(90)));
        assert_eq!(changes[0].old, Some(Value::Null));
    }
}
