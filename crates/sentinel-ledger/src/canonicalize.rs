//! # Canonical JSON
//!
//! Deterministic JSON encoding (RFC 8785 style) so that digests and
//! signatures depend on content only, never on key order or whitespace.
//!
//! ## Rules
//!
//! 1. **Object keys**: sorted by UTF-16 code units
//! 2. **Numbers**: integers verbatim; whole floats printed as integers;
//!    other floats in shortest round-trip form
//! 3. **Strings**: only `"`, `\` and control characters are escaped
//! 4. **Whitespace**: none
//!
//! A ledger line is parsed back with `float_roundtrip`, so re-encoding a
//! stored record reproduces the signed bytes exactly.
//!
//! ## Example
//!
//! ```rust
//! use sentinel_ledger::canonicalize::{canonicalize, digest_hex};
//! use serde_json::json;
//!
//! assert_eq!(canonicalize(&json!({"b": 1, "a": [0.5, 2.0]})), r#"{"a":[0.5,2],"b":1}"#);
//! assert_eq!(digest_hex(&json!({"a": 1})).len(), 64);
//! ```
//!
//! ## References
//!
//! - RFC 8785, "JSON Canonicalization Scheme (JCS)"

use serde::Serialize;
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt::Write;

/// A SHA-256 digest.
pub type Hash = [u8; 32];

/// Encodes `value` canonically.
#[must_use]
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// SHA-256 of the canonical encoding.
#[must_use]
pub fn hash_canonical(value: &Value) -> Hash {
    Sha256::digest(canonicalize(value).as_bytes()).into()
}

/// Hex SHA-256 of the canonical encoding.
#[must_use]
pub fn digest_hex(value: &Value) -> String {
    hex::encode(hash_canonical(value))
}

/// Serializes `value` and returns its hex canonical digest.
///
/// # Errors
///
/// Fails only if `value` cannot be represented as JSON.
pub fn digest_of<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(digest_hex(&serde_json::to_value(value)?))
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => write_number(out, n),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => write_object(out, map),
    }
}

fn write_number(out: &mut String, n: &Number) {
    if let Some(i) = n.as_i64() {
        let _ = write!(out, "{i}");
    } else if let Some(u) = n.as_u64() {
        let _ = write!(out, "{u}");
    } else if let Some(f) = n.as_f64() {
        if !f.is_finite() {
            out.push_str("null");
        } else if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 {
            // Exactly representable integers print without a fraction.
            let _ = write!(out, "{}", f as i64);
        } else {
            let _ = write!(out, "{f}");
        }
    } else {
        out.push_str(&n.to_string());
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c < '\u{20}' => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn write_object(out: &mut String, map: &Map<String, Value>) {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|(a, _), (b, _)| compare_utf16(a, b));

    out.push('{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(out, key);
        out.push(':');
        write_value(out, value);
    }
    out.push('}');
}

fn compare_utf16(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars() {
        assert_eq!(canonicalize(&json!(null)), "null");
        assert_eq!(canonicalize(&json!(false)), "false");
        assert_eq!(canonicalize(&json!(-7)), "-7");
        assert_eq!(canonicalize(&json!(1.0)), "1");
        assert_eq!(canonicalize(&json!(0.85)), "0.85");
    }

    #[test]
    fn test_string_escaping() {
        assert_eq!(canonicalize(&json!("a\"b")), r#""a\"b""#);
        assert_eq!(canonicalize(&json!("tab\there")), r#""tab\there""#);
        assert_eq!(canonicalize(&json!("\u{01}")), r#""\u0001""#);
        assert_eq!(canonicalize(&json!("a/b é")), "\"a/b é\"");
    }

    #[test]
    fn test_nested_key_order() {
        let value = json!({"z": {"b": 1, "a": 2}, "a": [3, {"y": 1, "x": 0}]});
        assert_eq!(
            canonicalize(&value),
            r#"{"a":[3,{"x":0,"y":1}],"z":{"a":2,"b":1}}"#
        );
    }

    #[test]
    fn test_utf16_ordering_differs_from_bytes() {
        // U+FF61 sorts before U+1F600 bytewise but after it in UTF-16.
        assert_eq!(compare_utf16("\u{FF61}", "\u{1F600}"), Ordering::Greater);
        assert_eq!(compare_utf16("a", "b"), Ordering::Less);
    }

    #[test]
    fn test_reparse_is_stable() {
        let value = json!({"w": 0.1 + 0.2, "v": 1e-7, "u": 123456.789});
        let line = serde_json::to_string(&value).unwrap();
        let reparsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(canonicalize(&value), canonicalize(&reparsed));
    }

    #[test]
    fn test_digest_is_key_order_independent() {
        assert_eq!(
            digest_hex(&json!({"a": 1, "b": 2})),
            digest_hex(&json!({"b": 2, "a": 1}))
        );
        assert_ne!(digest_hex(&json!({"a": 1})), digest_hex(&json!({"a": 2})));
    }
}
