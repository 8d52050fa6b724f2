//! # Sentinel Ledger
//!
//! Tamper-evident audit trail for council decisions.
//!
//! ## Overview
//!
//! Every decision is written as one JSON line to a per-day file
//! (`sentinel-YYYY-MM-DD.jsonl`). A line carries digests of the input,
//! the explainability edges and the full bundle, the policy snapshot,
//! build provenance, and an HMAC-SHA256 signature over the canonical JSON
//! of all of that.
//!
//! ## Threat Model
//!
//! ### Record tampering
//! Editing any signed field invalidates the line's signature.
//! Verification reports the exact file and line and keeps going.
//!
//! ### Key exposure over time
//! File keys rotate on a fixed period. Retired keys stay in
//! `keyring.json` (owner-only) so older lines remain verifiable.
//!
//! ### Concurrent writers
//! Appends hold an exclusive advisory lock on the day file, bounded by a
//! timeout. A timeout is an error: an unrecorded decision is not made.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sentinel_ledger::{LedgerConfig, Provenance, SignedLedger};
//!
//! let ledger = SignedLedger::open(LedgerConfig::new("./audit"), Provenance::current())?;
//! let record = ledger.append(&bundle.input, &bundle, bundle.policy)?;
//! assert!(ledger.verify_all()?.ok);
//! ```
//!
//! ## Security Notes
//!
//! - Signatures are compared in constant time.
//! - An environment-supplied key (`SENTINEL_HMAC_KEY`) is never rotated by
//!   this crate.

pub mod canonicalize;
pub mod error;
pub mod keyring;
pub mod ledger;
pub mod lock;
pub mod record;

pub use canonicalize::{canonicalize, digest_hex, digest_of, hash_canonical, Hash};
pub use error::{LedgerError, Result};
pub use keyring::{key_id, KeySource, Keyring};
pub use ledger::{BadLine, FileVerification, LedgerConfig, LedgerVerification, SignedLedger};
pub use lock::{lock_exclusive, secure_permissions, write_private, FileLock};
pub use record::{check_seal, edges_digest, seal_value, verify_line, LedgerRecord, LineFault, Provenance, Seal};
