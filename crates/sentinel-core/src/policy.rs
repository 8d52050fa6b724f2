//! Persistent active policy.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

use sentinel_council::Genes;
use sentinel_ledger::{lock_exclusive, secure_permissions, write_private};

use crate::config::PolicyConfig;
use crate::error::SentinelError;
use crate::Result;

#[derive(Debug, Serialize, Deserialize)]
struct PolicyFile {
    genes: Genes,
}

/// Reads and writes the active policy as `{"genes": {...}}`.
///
/// Saves go through a sidecar `.lock` file and an atomic rename, so a
/// concurrent load sees either the old or the new policy.
#[derive(Debug, Clone)]
pub struct PolicyStore {
    path: PathBuf,
    fallback: Genes,
    lock_timeout: Duration,
}

impl PolicyStore {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            path: config.path.clone(),
            fallback: config.genes,
            lock_timeout: Duration::from_millis(config.lock_timeout_ms),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored genes, or the configured fallback when no file exists.
    pub fn load(&self) -> Result<Genes> {
        match std::fs::read(&self.path) {
            Ok(raw) => {
                let file: PolicyFile = serde_json::from_slice(&raw)?;
                Ok(file.genes)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no policy file, using fallback genes");
                Ok(self.fallback)
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "failed to read policy");
                Err(SentinelError::io(&self.path, e))
            }
        }
    }

    /// Persists `genes` as the active policy with owner-only permissions.
    pub fn save(&self, genes: Genes) -> Result<()> {
        self.save_inner(genes).map_err(|e| {
            error!(path = %self.path.display(), error = %e, "failed to save policy");
            e
        })
    }

    fn save_inner(&self, genes: Genes) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| SentinelError::io(parent, e))?;
        }
        let lock_path = self.path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| SentinelError::io(&lock_path, e))?;
        secure_permissions(&lock_path).map_err(|e| SentinelError::io(&lock_path, e))?;

        let _guard = lock_exclusive(&lock_file, self.lock_timeout).map_err(|e| {
            if e.kind() == ErrorKind::TimedOut {
                SentinelError::LockTimeout {
                    path: lock_path.clone(),
                    timeout_ms: self.lock_timeout.as_millis() as u64,
                }
            } else {
                SentinelError::io(&lock_path, e)
            }
        })?;

        let body = serde_json::to_vec_pretty(&PolicyFile { genes })?;
        write_private(&self.path, &body).map_err(|e| SentinelError::io(&self.path, e))?;
        info!(path = %self.path.display(), ?genes, "policy saved");
        Ok(())
    }
}
