//! Daily, gzip-compressed snapshot partitions.
//!
//! Each append writes one complete gzip member holding one JSON line, so a
//! partition is a valid multi-member gzip stream at every point and
//! concurrent writers never interleave inside a member.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use sentinel_council::{CouncilBundle, Decision};
use sentinel_ledger::lock::lock_exclusive;

use crate::error::{ExplainError, Result};

const FILE_SUFFIX: &str = ".jsonl.gz";

/// Snapshot store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainConfig {
    pub dir: PathBuf,
    /// File name prefix, `<prefix>-YYYY-MM-DD.jsonl.gz`.
    pub prefix: String,
    pub retention_days: u32,
    pub lock_timeout_ms: u64,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./sentinel_explain"),
            prefix: "explain".to_string(),
            retention_days: 30,
            lock_timeout_ms: 5_000,
        }
    }
}

impl ExplainConfig {
    /// Config rooted at `dir` with default settings.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }
}

/// Influence values of one decision at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainSnapshot {
    pub ts: DateTime<Utc>,
    pub bundle: CouncilBundle,
    /// `"<from>_<to>"` -> clamped edge weight.
    pub edge_weights: BTreeMap<String, f64>,
    /// `"<agent>_influence"` -> report influence.
    pub agent_metrics: BTreeMap<String, f64>,
    pub decision: Decision,
}

impl ExplainSnapshot {
    /// Snapshot of `bundle` taken at `ts`.
    #[must_use]
    pub fn from_bundle(bundle: &CouncilBundle, ts: DateTime<Utc>) -> Self {
        let edge_weights = bundle
            .graph
            .edges
            .iter()
            .map(|e| (format!("{}_{}", e.from, e.to), sentinel_council::clamp_unit(e.weight)))
            .collect();
        let agent_metrics = bundle
            .reports
            .iter()
            .map(|r| (format!("{}_influence", r.agent), r.influence))
            .collect();
        Self {
            ts,
            bundle: bundle.clone(),
            edge_weights,
            agent_metrics,
            decision: bundle.decision,
        }
    }
}

/// Append-only snapshot log.
#[derive(Debug)]
pub struct ExplainStore {
    config: ExplainConfig,
}

impl ExplainStore {
    /// Opens the store, creating its directory.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created.
    pub fn open(config: ExplainConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir).map_err(|e| ExplainError::io(&config.dir, e))?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &ExplainConfig {
        &self.config
    }

    /// Partition for `date`.
    #[must_use]
    pub fn path_for_date(&self, date: NaiveDate) -> PathBuf {
        self.config.dir.join(format!(
            "{}-{}{FILE_SUFFIX}",
            self.config.prefix,
            date.format("%Y-%m-%d")
        ))
    }

    /// Snapshots `bundle` now and appends it.
    ///
    /// # Errors
    ///
    /// See [`append`](Self::append).
    pub fn record(&self, bundle: &CouncilBundle) -> Result<ExplainSnapshot> {
        let snapshot = ExplainSnapshot::from_bundle(bundle, Utc::now());
        self.append(&snapshot)?;
        Ok(snapshot)
    }

    /// Appends one snapshot to the partition for its timestamp.
    ///
    /// Failures are logged and returned.
    ///
    /// # Errors
    ///
    /// I/O, lock timeout or serialization failures.
    pub fn append(&self, snapshot: &ExplainSnapshot) -> Result<()> {
        self.write_member(snapshot).map_err(|err| {
            error!(error = %err, bundle = %snapshot.bundle.id, "snapshot append failed");
            err
        })
    }

    fn write_member(&self, snapshot: &ExplainSnapshot) -> Result<()> {
        self.prune(Utc::now())?;

        let mut line = serde_json::to_vec(snapshot)?;
        line.push(b'\n');
        let path = self.path_for_date(snapshot.ts.date_naive());
        let member = compress(&line).map_err(|e| ExplainError::io(&path, e))?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ExplainError::io(&path, e))?;
        let timeout = std::time::Duration::from_millis(self.config.lock_timeout_ms);
        let _guard = lock_exclusive(&file, timeout).map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                ExplainError::LockTimeout {
                    path: path.clone(),
                    timeout_ms: self.config.lock_timeout_ms,
                }
            } else {
                ExplainError::io(&path, e)
            }
        })?;
        (&file)
            .write_all(&member)
            .and_then(|()| file.sync_data())
            .map_err(|e| ExplainError::io(&path, e))?;
        debug!(file = %path.display(), bytes = member.len(), "snapshot appended");
        Ok(())
    }

    /// Snapshots with `start <= ts <= end`, in file order.
    ///
    /// Unreadable partitions and invalid lines are skipped with a warning.
    #[must_use]
    pub fn load_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<ExplainSnapshot> {
        let mut snapshots = Vec::new();
        if start > end {
            return snapshots;
        }
        let mut day = start.date_naive();
        let last = end.date_naive();
        while day <= last {
            let path = self.path_for_date(day);
            if path.exists() {
                read_partition(&path, |snapshot| {
                    if snapshot.ts >= start && snapshot.ts <= end {
                        snapshots.push(snapshot);
                    }
                });
            }
            let Some(next) = day.succ_opt() else { break };
            day = next;
        }
        snapshots
    }

    /// Partition files, oldest first.
    ///
    /// # Errors
    ///
    /// Directory read failures.
    pub fn partitions(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.config.dir;
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| ExplainError::io(dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| self.partition_date(path).is_some())
            .collect();
        files.sort();
        Ok(files)
    }

    /// Deletes partitions older than the retention window.
    ///
    /// # Errors
    ///
    /// Directory read failures. Individual delete failures are logged.
    pub fn prune(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = (now - Duration::days(i64::from(self.config.retention_days))).date_naive();
        let mut removed = 0;
        for path in self.partitions()? {
            if self.partition_date(&path).map_or(true, |date| date >= cutoff) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    removed += 1;
                    info!(file = %path.display(), "pruned expired snapshot partition");
                }
                Err(err) => warn!(file = %path.display(), error = %err, "failed to prune snapshot partition"),
            }
        }
        Ok(removed)
    }

    fn partition_date(&self, path: &Path) -> Option<NaiveDate> {
        let name = path.file_name()?.to_str()?;
        let date = name
            .strip_prefix(self.config.prefix.as_str())?
            .strip_prefix('-')?
            .strip_suffix(FILE_SUFFIX)?;
        NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
    }
}

fn compress(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn read_partition(path: &Path, mut sink: impl FnMut(ExplainSnapshot)) {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            warn!(file = %path.display(), error = %err, "cannot open snapshot partition");
            return;
        }
    };
    let reader = BufReader::new(MultiGzDecoder::new(BufReader::new(file)));
    for (idx, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(file = %path.display(), error = %err, "snapshot partition is corrupt, stopping read");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ExplainSnapshot>(&line) {
            Ok(snapshot) => sink(snapshot),
            Err(err) => warn!(file = %path.display(), line = idx + 1, error = %err, "skipping invalid snapshot"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_council::{Genes, GraphEdge, InputBundle, INPUT_NODE};
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> ExplainConfig {
        ExplainConfig {
            lock_timeout_ms: 200,
            ..ExplainConfig::new(temp_dir.path())
        }
    }

    fn bundle(weight: f64) -> CouncilBundle {
        let mut bundle = CouncilBundle::rejected(InputBundle::new("x"), Genes::default(), Vec::new());
        bundle.decision = Decision::Proceed;
        bundle.graph.nodes = vec!["fairness".into()];
        bundle.graph.edges = vec![GraphEdge {
            from: INPUT_NODE.into(),
            to: "fairness".into(),
            weight,
        }];
        bundle
    }

    #[test]
    fn test_snapshot_keys() {
        let snap = ExplainSnapshot::from_bundle(&bundle(1.4), Utc::now());
        assert_eq!(snap.edge_weights.get("input_fairness"), Some(&1.0));
        assert_eq!(snap.decision, Decision::Proceed);
    }

    #[test]
    fn test_members_accumulate_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let store = ExplainStore::open(test_config(&temp_dir)).unwrap();
        let now = Utc::now();
        for w in [0.1, 0.2, 0.3] {
            store.append(&ExplainSnapshot::from_bundle(&bundle(w), now)).unwrap();
        }

        let loaded = store.load_window(now - Duration::minutes(1), now + Duration::minutes(1));
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[2].edge_weights["input_fairness"], 0.3);
        assert!(store.load_window(now + Duration::hours(1), now + Duration::hours(2)).is_empty());
    }

    #[test]
    fn test_window_spans_days() {
        let temp_dir = TempDir::new().unwrap();
        let store = ExplainStore::open(test_config(&temp_dir)).unwrap();
        let now = Utc::now();
        let yesterday = now - Duration::days(1);
        store.append(&ExplainSnapshot::from_bundle(&bundle(0.4), yesterday)).unwrap();
        store.append(&ExplainSnapshot::from_bundle(&bundle(0.5), now)).unwrap();

        assert_eq!(store.partitions().unwrap().len(), 2);
        assert_eq!(store.load_window(yesterday, now).len(), 2);
    }

    #[test]
    fn test_invalid_member_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let store = ExplainStore::open(test_config(&temp_dir)).unwrap();
        let now = Utc::now();
        store.append(&ExplainSnapshot::from_bundle(&bundle(0.1), now)).unwrap();

        let path = store.path_for_date(now.date_naive());
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&compress(b"{\"not\":\"a snapshot\"}\n").unwrap()).unwrap();
        drop(file);
        store.append(&ExplainSnapshot::from_bundle(&bundle(0.2), now)).unwrap();

        assert_eq!(store.load_window(now, now).len(), 2);
    }

    #[test]
    fn test_append_waits_for_lock_then_times_out() {
        let temp_dir = TempDir::new().unwrap();
        let store = ExplainStore::open(test_config(&temp_dir)).unwrap();
        let now = Utc::now();
        let path = store.path_for_date(now.date_naive());
        let holder = OpenOptions::new().create(true).append(true).open(&path).unwrap();

        {
            let _guard = lock_exclusive(&holder, std::time::Duration::from_millis(50)).unwrap();
            let err = store.append(&ExplainSnapshot::from_bundle(&bundle(0.1), now)).unwrap_err();
            assert!(matches!(err, ExplainError::LockTimeout { timeout_ms: 200, .. }));
        }

        store.append(&ExplainSnapshot::from_bundle(&bundle(0.2), now)).unwrap();
        assert_eq!(store.load_window(now, now).len(), 1);
    }

    #[test]
    fn test_prune_respects_retention_and_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let store = ExplainStore::open(test_config(&temp_dir)).unwrap();
        let now = Utc::now();
        let old = store.path_for_date((now - Duration::days(40)).date_naive());
        fs::write(&old, b"").unwrap();
        fs::write(temp_dir.path().join("other-2001-01-01.jsonl.gz"), b"").unwrap();

        assert_eq!(store.prune(now).unwrap(), 1);
        assert!(!old.exists());
        assert!(temp_dir.path().join("other-2001-01-01.jsonl.gz").exists());
    }
}
