//! Signing key management.
//!
//! The active key comes either from an environment variable or from a key
//! file (hex, `0o600`) that is generated on first use. File keys rotate on a
//! fixed period; the outgoing key is retired into `keyring.json` so records
//! signed with it stay verifiable across restarts. Environment keys are
//! owned by whoever sets the variable and are never rotated here.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{LedgerError, Result};
use crate::lock::write_private;

/// Length in bytes of generated keys.
pub const KEY_LEN: usize = 32;

const KEYRING_FILE: &str = "keyring.json";

/// Where the active key lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// Environment variable, by name.
    Env(String),
    /// Hex key file.
    File(PathBuf),
}

#[derive(Clone, Serialize, Deserialize)]
struct RetiredKey {
    id: String,
    secret: String,
    retired_at: DateTime<Utc>,
}

#[derive(Clone, Serialize, Deserialize)]
struct KeyringState {
    active_since: DateTime<Utc>,
    #[serde(default)]
    retired: Vec<RetiredKey>,
}

/// Active signing key plus every retired key still needed for verification.
pub struct Keyring {
    source: KeySource,
    active: Vec<u8>,
    active_id: String,
    retired: Vec<(String, Vec<u8>)>,
    state: KeyringState,
    state_path: PathBuf,
    rotation: Duration,
}

impl fmt::Debug for Keyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyring")
            .field("source", &self.source)
            .field("active_id", &self.active_id)
            .field("retired", &self.retired.iter().map(|(id, _)| id).collect::<Vec<_>>())
            .field("active_since", &self.state.active_since)
            .finish_non_exhaustive()
    }
}

/// Short identifier of a key: the first 8 hex chars of its SHA-256.
#[must_use]
pub fn key_id(secret: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(secret));
    digest[..8].to_string()
}

impl Keyring {
    /// Loads the keyring stored in `dir`.
    ///
    /// A non-empty `key_env` variable wins over the key file; otherwise the
    /// file at `key_file` is read, or created with fresh random bytes.
    ///
    /// # Errors
    ///
    /// Fails on unreadable or malformed key material.
    pub fn load(dir: &Path, key_env: &str, key_file: &Path, rotation_days: u32) -> Result<Self> {
        let (source, active) = match std::env::var(key_env) {
            Ok(value) if !value.is_empty() => (KeySource::Env(key_env.to_string()), value.into_bytes()),
            _ => (KeySource::File(key_file.to_path_buf()), load_or_create_key(key_file)?),
        };
        let active_id = key_id(&active);

        let state_path = dir.join(KEYRING_FILE);
        let (state, fresh) = match std::fs::read(&state_path) {
            Ok(bytes) => (serde_json::from_slice::<KeyringState>(&bytes)?, false),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => (
                KeyringState {
                    active_since: Utc::now(),
                    retired: Vec::new(),
                },
                true,
            ),
            Err(err) => return Err(LedgerError::io(&state_path, err)),
        };

        let retired = state
            .retired
            .iter()
            .map(|key| {
                hex::decode(&key.secret)
                    .map(|secret| (key.id.clone(), secret))
                    .map_err(|e| LedgerError::Key(format!("retired key {} is not hex: {e}", key.id)))
            })
            .collect::<Result<Vec<_>>>()?;

        let keyring = Self {
            source,
            active,
            active_id,
            retired,
            state,
            state_path,
            rotation: Duration::days(i64::from(rotation_days)),
        };
        if fresh {
            keyring.persist()?;
        }
        Ok(keyring)
    }

    /// Where the active key comes from.
    #[must_use]
    pub fn source(&self) -> &KeySource {
        &self.source
    }

    /// Id of the active key.
    #[must_use]
    pub fn active_id(&self) -> &str {
        &self.active_id
    }

    /// Active key bytes.
    #[must_use]
    pub fn active_key(&self) -> &[u8] {
        &self.active
    }

    /// Ids of retired keys, oldest first.
    #[must_use]
    pub fn retired_ids(&self) -> Vec<&str> {
        self.retired.iter().map(|(id, _)| id.as_str()).collect()
    }

    /// Key bytes for `id`, active or retired.
    #[must_use]
    pub fn key_for(&self, id: &str) -> Option<&[u8]> {
        if id == self.active_id {
            return Some(&self.active);
        }
        self.retired
            .iter()
            .rev()
            .find(|(retired_id, _)| retired_id == id)
            .map(|(_, secret)| secret.as_slice())
    }

    /// True when a file key is older than the rotation period at `now`.
    #[must_use]
    pub fn rotation_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.source, KeySource::File(_)) && now - self.state.active_since >= self.rotation
    }

    /// Rotates a file key if it is due. Returns whether it rotated.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures from [`rotate`](Self::rotate).
    pub fn rotate_if_due(&mut self, now: DateTime<Utc>) -> Result<bool> {
        if !self.rotation_due(now) {
            return Ok(false);
        }
        self.rotate(now)?;
        Ok(true)
    }

    /// Retires the active key and activates a fresh one. Returns the new id.
    ///
    /// The retired key is persisted before the new key file replaces the
    /// old one, so a crash in between never loses a verification key.
    ///
    /// # Errors
    ///
    /// [`LedgerError::ExternalKey`] for environment keys, or an I/O error.
    pub fn rotate(&mut self, now: DateTime<Utc>) -> Result<String> {
        let key_file = match &self.source {
            KeySource::Env(name) => return Err(LedgerError::ExternalKey(name.clone())),
            KeySource::File(path) => path.clone(),
        };

        let mut fresh = vec![0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut fresh);
        let previous = std::mem::replace(&mut self.active, fresh);
        let previous_id = std::mem::replace(&mut self.active_id, key_id(&self.active));

        self.state.retired.push(RetiredKey {
            id: previous_id.clone(),
            secret: hex::encode(&previous),
            retired_at: now,
        });
        self.state.active_since = now;
        self.retired.push((previous_id.clone(), previous));

        self.persist()?;
        write_private(&key_file, hex::encode(&self.active).as_bytes())
            .map_err(|e| LedgerError::io(&key_file, e))?;

        info!(retired = %previous_id, active = %self.active_id, "signing key rotated");
        Ok(self.active_id.clone())
    }

    fn persist(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.state)?;
        write_private(&self.state_path, &bytes).map_err(|e| LedgerError::io(&self.state_path, e))
    }
}

fn load_or_create_key(path: &Path) -> Result<Vec<u8>> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let secret = hex::decode(text.trim())
                .map_err(|e| LedgerError::Key(format!("{} is not hex: {e}", path.display())))?;
            if secret.is_empty() {
                return Err(LedgerError::Key(format!("{} is empty", path.display())));
            }
            Ok(secret)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "no signing key found, generating one");
            let mut secret = vec![0u8; KEY_LEN];
            rand::thread_rng().fill_bytes(&mut secret);
            write_private(path, hex::encode(&secret).as_bytes()).map_err(|e| LedgerError::io(path, e))?;
            Ok(secret)
        }
        Err(err) => Err(LedgerError::io(path, err)),
    }
}
