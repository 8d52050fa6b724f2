//! Signed, append-only daily ledger files.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use sentinel_council::{CouncilBundle, Genes, InputBundle};

use crate::error::{LedgerError, Result};
use crate::keyring::Keyring;
use crate::lock::{lock_exclusive, secure_permissions};
use crate::record::{check_seal, seal_value, verify_line, LedgerRecord, LineFault, Provenance, Seal};

const FILE_PREFIX: &str = "sentinel-";
const FILE_SUFFIX: &str = ".jsonl";

/// Ledger configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Directory holding ledger files and key material.
    pub dir: PathBuf,
    /// Environment variable that, when set, supplies the signing key.
    pub key_env: String,
    /// Key file path. Defaults to `<dir>/ledger.key`.
    pub key_file: Option<PathBuf>,
    /// Age after which a file key is rotated.
    pub rotation_days: u32,
    /// Age after which daily files are deleted.
    pub retention_days: u32,
    /// How long an append waits for the file lock.
    pub lock_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./sentinel_ledger"),
            key_env: "SENTINEL_HMAC_KEY".to_string(),
            key_file: None,
            rotation_days: 30,
            retention_days: 30,
            lock_timeout_ms: 5_000,
        }
    }
}

impl LedgerConfig {
    /// Config rooted at `dir` with default settings.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    /// Effective key file path.
    #[must_use]
    pub fn key_path(&self) -> PathBuf {
        self.key_file.clone().unwrap_or_else(|| self.dir.join("ledger.key"))
    }
}

/// A line that failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BadLine {
    /// 1-based line number.
    pub line: usize,
    pub reason: String,
}

/// Verification outcome for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileVerification {
    pub file: PathBuf,
    /// Non-blank lines examined.
    pub lines: usize,
    pub bad: Vec<BadLine>,
    pub ok: bool,
}

/// Verification outcome for every retained file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerVerification {
    pub ok: bool,
    pub reports: Vec<FileVerification>,
}

impl LedgerVerification {
    /// Total failing lines across all files.
    #[must_use]
    pub fn bad_records(&self) -> usize {
        self.reports.iter().map(|r| r.bad.len()).sum()
    }

    /// Total lines examined across all files.
    #[must_use]
    pub fn total_records(&self) -> usize {
        self.reports.iter().map(|r| r.lines).sum()
    }
}

/// Tamper-evident decision ledger.
#[derive(Debug)]
pub struct SignedLedger {
    config: LedgerConfig,
    keyring: Mutex<Keyring>,
    provenance: Provenance,
}

impl SignedLedger {
    /// Opens (creating if needed) the ledger directory and its keyring.
    ///
    /// # Errors
    ///
    /// Fails if the directory or key material is unusable.
    pub fn open(config: LedgerConfig, provenance: Provenance) -> Result<Self> {
        fs::create_dir_all(&config.dir).map_err(|e| LedgerError::io(&config.dir, e))?;
        let keyring = Keyring::load(&config.dir, &config.key_env, &config.key_path(), config.rotation_days)?;
        info!(
            dir = %config.dir.display(),
            key_id = %keyring.active_id(),
            "ledger opened"
        );
        Ok(Self {
            config,
            keyring: Mutex::new(keyring),
            provenance,
        })
    }

    /// Ledger configuration.
    #[must_use]
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Id of the key new records are signed with.
    #[must_use]
    pub fn active_key_id(&self) -> String {
        self.keyring.lock().active_id().to_string()
    }

    /// Daily file for `date`.
    #[must_use]
    pub fn path_for_date(&self, date: NaiveDate) -> PathBuf {
        self.config
            .dir
            .join(format!("{FILE_PREFIX}{}{FILE_SUFFIX}", date.format("%Y-%m-%d")))
    }

    /// Signs and appends a record for one decision.
    ///
    /// Prunes expired files and rotates a due key first. Any failure is
    /// logged and returned; the caller must not treat the decision as
    /// recorded.
    ///
    /// # Errors
    ///
    /// I/O, lock timeout, serialization or key failures.
    pub fn append(&self, input: &InputBundle, bundle: &CouncilBundle, policy: Genes) -> Result<LedgerRecord> {
        self.append_at(Utc::now(), input, bundle, policy).map_err(|err| {
            error!(error = %err, bundle = %bundle.id, "ledger append failed");
            err
        })
    }

    fn append_at(
        &self,
        now: DateTime<Utc>,
        input: &InputBundle,
        bundle: &CouncilBundle,
        policy: Genes,
    ) -> Result<LedgerRecord> {
        self.prune(now)?;

        let record = {
            let mut keyring = self.keyring.lock();
            keyring.rotate_if_due(now)?;
            LedgerRecord::signed(
                now,
                input,
                bundle,
                policy,
                self.provenance.clone(),
                keyring.active_id(),
                keyring.active_key(),
            )?
        };

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let path = self.path_for_date(now.date_naive());
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LedgerError::io(&path, e))?;
        secure_permissions(&path).map_err(|e| LedgerError::io(&path, e))?;

        let timeout = std::time::Duration::from_millis(self.config.lock_timeout_ms);
        let _guard = lock_exclusive(&file, timeout).map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                LedgerError::LockTimeout {
                    path: path.clone(),
                    timeout_ms: self.config.lock_timeout_ms,
                }
            } else {
                LedgerError::io(&path, e)
            }
        })?;
        (&file)
            .write_all(line.as_bytes())
            .and_then(|()| file.sync_data())
            .map_err(|e| LedgerError::io(&path, e))?;

        debug!(decision = %record.decision, key_id = %record.key_id, file = %path.display(), "ledger record appended");
        Ok(record)
    }

    /// Verifies every line of one file.
    ///
    /// Bad lines, including lines that are not valid UTF-8, are collected,
    /// never fatal.
    ///
    /// # Errors
    ///
    /// Only if the file itself cannot be read.
    pub fn verify_file(&self, path: &Path) -> Result<FileVerification> {
        let contents = fs::read(path).map_err(|e| LedgerError::io(path, e))?;
        let keyring = self.keyring.lock();

        let mut lines = 0;
        let mut bad = Vec::new();
        for (number, raw) in split_lines(&contents) {
            lines += 1;
            let verdict = raw.and_then(|text| verify_line(text, |id| keyring.key_for(id)).map(drop));
            if let Err(fault) = verdict {
                warn!(file = %path.display(), line = number, reason = %fault, "ledger line failed verification");
                bad.push(BadLine {
                    line: number,
                    reason: fault.to_string(),
                });
            }
        }

        Ok(FileVerification {
            file: path.to_path_buf(),
            lines,
            ok: bad.is_empty(),
            bad,
        })
    }

    /// Prunes, then verifies every retained file.
    ///
    /// A file that cannot be read is reported as failed with a single
    /// line-0 entry; the pass continues with the next file.
    ///
    /// # Errors
    ///
    /// Directory read failures.
    pub fn verify_all(&self) -> Result<LedgerVerification> {
        self.prune(Utc::now())?;
        let reports: Vec<FileVerification> = self
            .ledger_files()?
            .into_iter()
            .map(|path| {
                self.verify_file(&path).unwrap_or_else(|err| {
                    error!(file = %path.display(), error = %err, "ledger file unreadable");
                    FileVerification {
                        file: path,
                        lines: 0,
                        bad: vec![BadLine {
                            line: 0,
                            reason: err.to_string(),
                        }],
                        ok: false,
                    }
                })
            })
            .collect();
        let ok = reports.iter().all(|r| r.ok);
        Ok(LedgerVerification { ok, reports })
    }

    /// Retires the active key and activates a fresh one.
    ///
    /// # Errors
    ///
    /// [`LedgerError::ExternalKey`] for environment-supplied keys.
    pub fn rotate_key(&self) -> Result<String> {
        self.keyring.lock().rotate(Utc::now())
    }

    /// Signs `document` with the active key.
    ///
    /// # Errors
    ///
    /// Fails only on an unusable key.
    pub fn seal(&self, document: &serde_json::Value) -> Result<Seal> {
        let keyring = self.keyring.lock();
        seal_value(document, keyring.active_id(), keyring.active_key())
    }

    /// Checks a seal against the active and retired keys.
    #[must_use]
    pub fn check_seal(&self, document: &serde_json::Value, seal: &Seal) -> bool {
        let keyring = self.keyring.lock();
        check_seal(document, seal, |id| keyring.key_for(id))
    }

    /// Finds the verified record written at exactly `ts`.
    ///
    /// Lines that fail verification are never returned.
    ///
    /// # Errors
    ///
    /// Read failures of the day file. A missing file is `Ok(None)`.
    pub fn find_record(&self, ts: DateTime<Utc>) -> Result<Option<LedgerRecord>> {
        let path = self.path_for_date(ts.date_naive());
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(LedgerError::io(&path, err)),
        };

        let keyring = self.keyring.lock();
        for (_, raw) in split_lines(&contents) {
            let Ok(value) = raw.and_then(|text| verify_line(text, |id| keyring.key_for(id))) else {
                continue;
            };
            match serde_json::from_value::<LedgerRecord>(value) {
                Ok(record) if record.ts == ts => return Ok(Some(record)),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "verified ledger line has an unexpected shape"),
            }
        }
        Ok(None)
    }

    /// Daily ledger files, oldest first.
    ///
    /// # Errors
    ///
    /// Directory read failures.
    pub fn ledger_files(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.config.dir;
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| LedgerError::io(dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| file_date(path).is_some())
            .collect();
        files.sort();
        Ok(files)
    }

    /// Deletes daily files older than the retention window. Returns how
    /// many were removed.
    ///
    /// # Errors
    ///
    /// Directory read failures. Individual delete failures are logged.
    pub fn prune(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = (now - Duration::days(i64::from(self.config.retention_days))).date_naive();
        let mut removed = 0;
        for path in self.ledger_files()? {
            let Some(date) = file_date(&path) else { continue };
            if date >= cutoff {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    removed += 1;
                    info!(file = %path.display(), "pruned expired ledger file");
                }
                Err(err) => warn!(file = %path.display(), error = %err, "failed to prune ledger file"),
            }
        }
        Ok(removed)
    }
}

/// Non-blank lines of a ledger file with their 1-based numbers. Lines
/// that are not valid UTF-8 come back as [`LineFault::Encoding`].
fn split_lines(contents: &[u8]) -> impl Iterator<Item = (usize, std::result::Result<&str, LineFault>)> {
    contents
        .split(|&b| b == b'\n')
        .enumerate()
        .filter(|(_, raw)| !raw.iter().all(u8::is_ascii_whitespace))
        .map(|(idx, raw)| {
            let text = std::str::from_utf8(raw).map_err(|e| LineFault::Encoding(e.to_string()));
            (idx + 1, text)
        })
}

fn file_date(path: &Path) -> Option<NaiveDate> {
    let name = path.file_name()?.to_str()?;
    let date = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_council::{Decision, ExplainGraph, GraphEdge, INPUT_NODE};
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> LedgerConfig {
        LedgerConfig {
            key_env: "SENTINEL_LEDGER_TEST_UNSET_KEY".to_string(),
            lock_timeout_ms: 200,
            ..LedgerConfig::new(temp_dir.path())
        }
    }

    fn bundle(text: &str, decision: Decision) -> CouncilBundle {
        let mut bundle = CouncilBundle::rejected(InputBundle::new(text), Genes::default(), Vec::new());
        bundle.decision = decision;
        bundle.graph = ExplainGraph {
            nodes: vec!["fairness".into()],
            edges: vec![GraphEdge {
                from: INPUT_NODE.into(),
                to: "fairness".into(),
                weight: 0.5,
            }],
        };
        bundle
    }

    fn append(ledger: &SignedLedger, text: &str) -> LedgerRecord {
        let bundle = bundle(text, Decision::Proceed);
        ledger.append(&bundle.input, &bundle, Genes::default()).unwrap()
    }

    #[test]
    fn test_append_then_verify() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = SignedLedger::open(test_config(&temp_dir), Provenance::current()).unwrap();
        let record = append(&ledger, "one");
        append(&ledger, "two");

        assert_eq!(record.key_id, ledger.active_key_id());
        let report = ledger.verify_all().unwrap();
        assert!(report.ok);
        assert_eq!(report.total_records(), 2);
        assert_eq!(report.bad_records(), 0);
    }

    #[test]
    fn test_tampered_line_is_flagged_exactly() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = SignedLedger::open(test_config(&temp_dir), Provenance::current()).unwrap();
        let record = append(&ledger, "one");
        append(&ledger, "two");
        append(&ledger, "three");

        let path = ledger.path_for_date(record.ts.date_naive());
        let contents = fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = contents.lines().map(String::from).collect();
        lines[1] = lines[1].replace("\"PROCEED\"", "\"BLOCK\"");
        fs::write(&path, lines.join("\n") + "\n").unwrap();

        let report = ledger.verify_file(&path).unwrap();
        assert!(!report.ok);
        assert_eq!(report.lines, 3);
        assert_eq!(report.bad.len(), 1);
        assert_eq!(report.bad[0].line, 2);
    }

    #[test]
    fn test_garbage_line_does_not_abort() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = SignedLedger::open(test_config(&temp_dir), Provenance::current()).unwrap();
        let record = append(&ledger, "one");

        let path = ledger.path_for_date(record.ts.date_naive());
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{truncated").unwrap();
        drop(file);
        append(&ledger, "after");

        let report = ledger.verify_file(&path).unwrap();
        assert_eq!(report.lines, 3);
        assert_eq!(report.bad.iter().map(|b| b.line).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_invalid_utf8_line_is_flagged_without_aborting() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = SignedLedger::open(test_config(&temp_dir), Provenance::current()).unwrap();
        let record = append(&ledger, "one");
        let target = append(&ledger, "two");
        append(&ledger, "three");

        let path = ledger.path_for_date(record.ts.date_naive());
        let mut bytes = fs::read(&path).unwrap();
        let second_line = bytes.iter().position(|&b| b == b'\n').unwrap() + 1;
        bytes[second_line + 5] = 0x80;
        fs::write(&path, &bytes).unwrap();

        let report = ledger.verify_file(&path).unwrap();
        assert_eq!(report.lines, 3);
        assert_eq!(report.bad.iter().map(|b| b.line).collect::<Vec<_>>(), vec![2]);
        assert!(report.bad[0].reason.starts_with("malformed line"));

        let all = ledger.verify_all().unwrap();
        assert!(!all.ok);
        assert_eq!(all.total_records(), 3);
        assert_eq!(all.bad_records(), 1);

        assert_eq!(ledger.find_record(record.ts).unwrap(), Some(record));
        assert_eq!(ledger.find_record(target.ts).unwrap(), None);
    }

    #[test]
    fn test_unreadable_file_is_reported_and_pass_continues() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = SignedLedger::open(test_config(&temp_dir), Provenance::current()).unwrap();
        append(&ledger, "today");
        let unreadable = ledger.path_for_date((Utc::now() - Duration::days(1)).date_naive());
        fs::create_dir(&unreadable).unwrap();

        let all = ledger.verify_all().unwrap();
        assert!(!all.ok);
        assert_eq!(all.reports.len(), 2);
        let broken = all.reports.iter().find(|r| r.file == unreadable).unwrap();
        assert_eq!(broken.bad[0].line, 0);
        assert!(all.reports.iter().any(|r| r.ok && r.lines == 1));
    }

    #[test]
    fn test_records_verify_after_rotation_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = SignedLedger::open(test_config(&temp_dir), Provenance::current()).unwrap();
        let before = append(&ledger, "before");
        let new_id = ledger.rotate_key().unwrap();
        let after = append(&ledger, "after");
        assert_ne!(before.key_id, after.key_id);
        assert_eq!(after.key_id, new_id);
        drop(ledger);

        let reopened = SignedLedger::open(test_config(&temp_dir), Provenance::current()).unwrap();
        assert!(reopened.verify_all().unwrap().ok);
    }

    #[test]
    fn test_find_record_by_timestamp() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = SignedLedger::open(test_config(&temp_dir), Provenance::current()).unwrap();
        append(&ledger, "one");
        let target = append(&ledger, "two");

        assert_eq!(ledger.find_record(target.ts).unwrap(), Some(target.clone()));
        let missing = target.ts - Duration::days(3);
        assert_eq!(ledger.find_record(missing).unwrap(), None);
    }

    #[test]
    fn test_prune_removes_expired_files() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = SignedLedger::open(test_config(&temp_dir), Provenance::current()).unwrap();
        let now = Utc::now();
        let old = ledger.path_for_date((now - Duration::days(45)).date_naive());
        let recent = ledger.path_for_date((now - Duration::days(2)).date_naive());
        fs::write(&old, "").unwrap();
        fs::write(&recent, "").unwrap();
        fs::write(temp_dir.path().join("notes.jsonl"), "").unwrap();

        assert_eq!(ledger.prune(now).unwrap(), 1);
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(temp_dir.path().join("notes.jsonl").exists());
    }

    #[test]
    fn test_append_fails_on_lock_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = SignedLedger::open(test_config(&temp_dir), Provenance::current()).unwrap();
        let path = ledger.path_for_date(Utc::now().date_naive());
        let holder = OpenOptions::new().create(true).append(true).open(&path).unwrap();
        let _guard = lock_exclusive(&holder, std::time::Duration::from_millis(50)).unwrap();

        let bundle = bundle("blocked", Decision::Block);
        let err = ledger.append(&bundle.input, &bundle, Genes::default()).unwrap_err();
        assert!(matches!(err, LedgerError::LockTimeout { timeout_ms: 200, .. }));
    }
}
