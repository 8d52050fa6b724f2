//! Ledger record format, digests and signatures.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use sentinel_council::{clamp_unit, CouncilBundle, Decision, Genes, GraphEdge, InputBundle};

use crate::canonicalize::{canonicalize, digest_hex, digest_of};
use crate::error::{LedgerError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Name of the signature field, excluded from the signed content.
pub const SIG_FIELD: &str = "sig";

/// Build and data lineage stamped on every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub code_version: String,
    pub git_hash: String,
    pub dataset_version: String,
    pub evolution_seed: u64,
}

impl Provenance {
    /// Provenance of the running build. `GIT_HASH` is read from the
    /// environment.
    #[must_use]
    pub fn current() -> Self {
        Self {
            code_version: env!("CARGO_PKG_VERSION").to_string(),
            git_hash: std::env::var("GIT_HASH").unwrap_or_else(|_| "unknown".to_string()),
            dataset_version: "v1".to_string(),
            evolution_seed: 42,
        }
    }
}

impl Default for Provenance {
    fn default() -> Self {
        Self::current()
    }
}

/// One signed line of a ledger file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub ts: DateTime<Utc>,
    pub decision: Decision,
    pub policy: Genes,
    pub input_digest: String,
    pub edges_digest: String,
    pub bundle_digest: String,
    pub key_id: String,
    #[serde(flatten)]
    pub provenance: Provenance,
    /// Hex HMAC-SHA256 over the canonical form of every other field.
    pub sig: String,
}

impl LedgerRecord {
    /// Builds and signs a record for one decision.
    ///
    /// # Errors
    ///
    /// Fails if any component cannot be serialized.
    pub fn signed(
        ts: DateTime<Utc>,
        input: &InputBundle,
        bundle: &CouncilBundle,
        policy: Genes,
        provenance: Provenance,
        key_id: &str,
        key: &[u8],
    ) -> Result<Self> {
        let mut record = Self {
            ts,
            decision: bundle.decision,
            policy,
            input_digest: digest_of(input)?,
            edges_digest: edges_digest(&bundle.graph.edges),
            bundle_digest: digest_of(bundle)?,
            key_id: key_id.to_string(),
            provenance,
            sig: String::new(),
        };
        let value = serde_json::to_value(&record)?;
        record.sig = hex::encode(sign_value(&value, key)?);
        Ok(record)
    }
}

/// Digest of the explainability edges, weights clamped and sorted by
/// endpoints.
#[must_use]
pub fn edges_digest(edges: &[GraphEdge]) -> String {
    let mut canon: Vec<(&str, &str, f64)> = edges
        .iter()
        .map(|e| (e.from.as_str(), e.to.as_str(), clamp_unit(e.weight)))
        .collect();
    canon.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    let value = Value::Array(
        canon
            .into_iter()
            .map(|(from, to, weight)| serde_json::json!({"from": from, "to": to, "weight": weight}))
            .collect(),
    );
    digest_hex(&value)
}

/// HMAC over the canonical encoding of `record` without its signature.
fn sign_value(record: &Value, key: &[u8]) -> Result<Vec<u8>> {
    let mut unsigned = record.clone();
    if let Value::Object(map) = &mut unsigned {
        map.remove(SIG_FIELD);
    }
    mac_canonical(&unsigned, key)
}

fn mac_canonical(value: &Value, key: &[u8]) -> Result<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| LedgerError::Key(format!("unusable HMAC key: {e}")))?;
    mac.update(canonicalize(value).as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Detached signature over a JSON document other than a ledger line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seal {
    pub key_id: String,
    pub sig: String,
}

fn sealed_payload(document: &Value, key_id: &str) -> Value {
    serde_json::json!({ "document": document, "key_id": key_id })
}

/// Signs the canonical form of `document` together with `key_id`.
///
/// # Errors
///
/// Fails only on an unusable key.
pub fn seal_value(document: &Value, key_id: &str, key: &[u8]) -> Result<Seal> {
    let sig = mac_canonical(&sealed_payload(document, key_id), key)?;
    Ok(Seal {
        key_id: key_id.to_string(),
        sig: hex::encode(sig),
    })
}

/// True if `seal` was made over `document` with the key `key_for` returns
/// for its key id.
pub fn check_seal<'k>(document: &Value, seal: &Seal, key_for: impl Fn(&str) -> Option<&'k [u8]>) -> bool {
    let Some(key) = key_for(&seal.key_id) else {
        return false;
    };
    let (Ok(provided), Ok(expected)) = (
        hex::decode(&seal.sig),
        mac_canonical(&sealed_payload(document, &seal.key_id), key),
    ) else {
        return false;
    };
    provided.len() == expected.len() && bool::from(provided.ct_eq(&expected))
}

/// Why a stored line failed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineFault {
    Encoding(String),
    Malformed(String),
    MissingField(&'static str),
    UnknownKey(String),
    BadSignature,
}

impl std::fmt::Display for LineFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineFault::Encoding(e) => write!(f, "malformed line: {e}"),
            LineFault::Malformed(e) => write!(f, "malformed JSON: {e}"),
            LineFault::MissingField(field) => write!(f, "missing field '{field}'"),
            LineFault::UnknownKey(id) => write!(f, "unknown key id '{id}'"),
            LineFault::BadSignature => f.write_str("signature mismatch"),
        }
    }
}

/// Checks one ledger line, resolving the key by the record's `key_id`.
///
/// Works on the raw JSON value so fields unknown to this build still
/// count toward the signature.
pub fn verify_line<'k>(line: &str, key_for: impl Fn(&str) -> Option<&'k [u8]>) -> std::result::Result<Value, LineFault> {
    let value: Value = serde_json::from_str(line).map_err(|e| LineFault::Malformed(e.to_string()))?;
    let sig = value
        .get(SIG_FIELD)
        .and_then(Value::as_str)
        .ok_or(LineFault::MissingField(SIG_FIELD))?;
    let id = value
        .get("key_id")
        .and_then(Value::as_str)
        .ok_or(LineFault::MissingField("key_id"))?;
    let key = key_for(id).ok_or_else(|| LineFault::UnknownKey(id.to_string()))?;

    let provided = hex::decode(sig).map_err(|_| LineFault::BadSignature)?;
    let expected = sign_value(&value, key).map_err(|_| LineFault::BadSignature)?;
    if provided.len() != expected.len() || !bool::from(provided.ct_eq(&expected)) {
        return Err(LineFault::BadSignature);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_council::{ExplainGraph, INPUT_NODE};

    fn bundle(weights: &[(&str, f64)]) -> CouncilBundle {
        let mut bundle = CouncilBundle::rejected(InputBundle::new("audit me"), Genes::default(), Vec::new());
        bundle.decision = Decision::ProceedWithCaution;
        bundle.graph = ExplainGraph {
            nodes: weights.iter().map(|(to, _)| (*to).to_string()).collect(),
            edges: weights
                .iter()
                .map(|(to, w)| GraphEdge {
                    from: INPUT_NODE.to_string(),
                    to: (*to).to_string(),
                    weight: *w,
                })
                .collect(),
        };
        bundle
    }

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn record() -> LedgerRecord {
        let bundle = bundle(&[("fairness", 0.5), ("context_risk", 0.7)]);
        LedgerRecord::signed(
            Utc::now(),
            &bundle.input,
            &bundle,
            Genes::default(),
            Provenance::current(),
            "deadbeef",
            KEY,
        )
        .unwrap()
    }

    fn lookup(id: &str) -> Option<&'static [u8]> {
        (id == "deadbeef").then_some(KEY)
    }

    #[test]
    fn test_signed_record_verifies() {
        let line = serde_json::to_string(&record()).unwrap();
        let value = verify_line(&line, lookup).unwrap();
        assert_eq!(value["decision"], "PROCEED_WITH_CAUTION");
        assert_eq!(value["dataset_version"], "v1");
    }

    #[test]
    fn test_tampered_field_fails() {
        let mut value = serde_json::to_value(record()).unwrap();
        value["decision"] = Value::from("PROCEED");
        let line = serde_json::to_string(&value).unwrap();
        assert_eq!(verify_line(&line, lookup), Err(LineFault::BadSignature));
    }

    #[test]
    fn test_unknown_key_and_garbage() {
        let mut value = serde_json::to_value(record()).unwrap();
        value["key_id"] = Value::from("cafebabe");
        let line = serde_json::to_string(&value).unwrap();
        assert_eq!(verify_line(&line, lookup), Err(LineFault::UnknownKey("cafebabe".into())));
        assert!(matches!(verify_line("{not json", lookup), Err(LineFault::Malformed(_))));
        assert_eq!(verify_line("{}", lookup), Err(LineFault::MissingField("sig")));
    }

    #[test]
    fn test_edges_digest_ignores_order_and_clamps() {
        let a = bundle(&[("a", 0.2), ("b", 1.7)]);
        let b = bundle(&[("b", 1.0), ("a", 0.2)]);
        assert_eq!(edges_digest(&a.graph.edges), edges_digest(&b.graph.edges));
    }

    #[test]
    fn test_seal_binds_document_and_key() {
        let document = serde_json::json!({"genes": {"risk_cap": 0.7}, "budget_ms": 100});
        let seal = seal_value(&document, "deadbeef", KEY).unwrap();
        assert!(check_seal(&document, &seal, lookup));

        let changed = serde_json::json!({"genes": {"risk_cap": 0.95}, "budget_ms": 100});
        assert!(!check_seal(&changed, &seal, lookup));

        let relabeled = Seal {
            key_id: "cafebabe".into(),
            ..seal.clone()
        };
        assert!(!check_seal(&document, &relabeled, lookup));
        let garbled = Seal {
            sig: "zz".into(),
            ..seal
        };
        assert!(!check_seal(&document, &garbled, lookup));
    }

    #[test]
    fn test_record_reparses() {
        let original = record();
        let line = serde_json::to_string(&original).unwrap();
        let parsed: LedgerRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, original);
    }
}
