//! Request sanitizer contract and the built-in implementation.
//!
//! The gate only relies on [`InputAuditor`]; deployments with a richer
//! filter plug it in with [`SafetyGate::with_auditor`](crate::SafetyGate::with_auditor).

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Default input length cap, in characters.
pub const MAX_INPUT_LENGTH: usize = 10_000;

/// `(label, pattern)` pairs matched case-insensitively.
const DANGER_TOKENS: [(&str, &str); 8] = [
    ("exec(", r"\bexec\("),
    ("eval(", r"\beval\("),
    ("os.system", r"\bos\.system"),
    ("subprocess.", r"\bsubprocess\."),
    ("<script", r"<script\b"),
    ("../", r"\.\./"),
    ("..\\", r"\.\.\\"),
    ("esc", r"\x1b"),
];

/// Outcome of auditing one text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizerAudit {
    /// True when no issue was found.
    pub safe: bool,
    /// Sorted, de-duplicated issue labels.
    pub issues: Vec<String>,
    /// NFC-normalized text.
    pub normalized: String,
}

/// Screens request text before it reaches the council.
pub trait InputAuditor: Send + Sync {
    fn audit(&self, text: &str) -> SanitizerAudit;
}

/// Length, control-character, newline and dangerous-token checks.
#[derive(Debug, Clone)]
pub struct BasicSanitizer {
    max_len: usize,
    tokens: Vec<(&'static str, Regex)>,
}

impl BasicSanitizer {
    pub fn new(max_len: usize) -> crate::Result<Self> {
        let tokens = DANGER_TOKENS
            .iter()
            .map(|(label, pattern)| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|re| (*label, re))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { max_len, tokens })
    }
}

impl InputAuditor for BasicSanitizer {
    fn audit(&self, text: &str) -> SanitizerAudit {
        let mut issues = Vec::new();
        if text.chars().count() > self.max_len {
            issues.push("input_too_long".to_string());
        }
        if text.chars().any(|c| (c as u32) < 32 || c as u32 == 127) {
            issues.push("control_char".to_string());
        }
        for (label, re) in &self.tokens {
            if re.is_match(text) {
                issues.push(format!("danger_token:{label}"));
            }
        }
        if text.contains(['\n', '\r']) {
            issues.push("newline_present".to_string());
        }
        issues.sort();
        issues.dedup();

        SanitizerAudit {
            safe: issues.is_empty(),
            issues,
            normalized: text.nfc().collect(),
        }
    }
}
