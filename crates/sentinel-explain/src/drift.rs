//! Influence drift between two time windows.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use crate::stats::welch_t_test;
use crate::store::{ExplainSnapshot, ExplainStore};

/// Significance level for reporting a shift.
pub const SIGNIFICANCE: f64 = 0.05;

/// Inclusive time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }
}

/// A key whose mean changed significantly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shift {
    pub key: String,
    pub t_stat: f64,
    pub p_value: f64,
    pub before_samples: usize,
    pub after_samples: usize,
}

/// Top shifts for edges and for agents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub edges: Vec<Shift>,
    pub agents: Vec<Shift>,
}

impl DriftReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty() && self.agents.is_empty()
    }
}

/// Compares snapshot series across windows with Welch's t-test.
#[derive(Debug, Clone)]
pub struct DriftDetector {
    store: Arc<ExplainStore>,
}

impl DriftDetector {
    pub fn new(store: Arc<ExplainStore>) -> Self {
        Self { store }
    }

    /// Top-`k` edge and agent shifts from `before` to `after`.
    ///
    /// Each key's series holds only snapshots that contain it. Keys with
    /// fewer than two samples in either window are skipped, and only
    /// shifts with `p < 0.05` are reported, largest `|t|` first.
    #[must_use]
    pub fn top_shifts(&self, before: TimeWindow, after: TimeWindow, k: usize) -> DriftReport {
        let before = self.store.load_window(before.start, before.end);
        let after = self.store.load_window(after.start, after.end);
        debug!(before = before.len(), after = after.len(), "drift windows loaded");
        compare(&before, &after, k)
    }

    /// Compares the hour ending `before_hours` ago with the span from
    /// `after_hours` ago until now.
    #[must_use]
    pub fn top_shifts_hours(&self, before_hours: u32, after_hours: u32, k: usize) -> DriftReport {
        let now = Utc::now();
        let before_end = now - Duration::hours(i64::from(before_hours));
        let before = TimeWindow::new(before_end - Duration::hours(1), before_end);
        let after = TimeWindow::new(now - Duration::hours(i64::from(after_hours)), now);
        self.top_shifts(before, after, k)
    }
}

/// Pure comparison of two snapshot sets.
#[must_use]
pub fn compare(before: &[ExplainSnapshot], after: &[ExplainSnapshot], k: usize) -> DriftReport {
    DriftReport {
        edges: shifts(before, after, k, |s| &s.edge_weights),
        agents: shifts(before, after, k, |s| &s.agent_metrics),
    }
}

fn series<'a>(
    snaps: &'a [ExplainSnapshot],
    field: &impl Fn(&ExplainSnapshot) -> &BTreeMap<String, f64>,
) -> BTreeMap<&'a str, Vec<f64>> {
    let mut out: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for snap in snaps {
        for (key, value) in field(snap) {
            out.entry(key.as_str()).or_default().push(*value);
        }
    }
    out
}

fn shifts(
    before: &[ExplainSnapshot],
    after: &[ExplainSnapshot],
    k: usize,
    field: impl Fn(&ExplainSnapshot) -> &BTreeMap<String, f64>,
) -> Vec<Shift> {
    let before = series(before, &field);
    let after = series(after, &field);
    let keys: BTreeSet<&str> = before.keys().chain(after.keys()).copied().collect();

    let mut found: Vec<Shift> = keys
        .into_iter()
        .filter_map(|key| {
            let a = before.get(key)?;
            let b = after.get(key)?;
            let test = welch_t_test(a, b)?;
            (test.p < SIGNIFICANCE).then(|| Shift {
                key: key.to_string(),
                t_stat: test.t,
                p_value: test.p,
                before_samples: a.len(),
                after_samples: b.len(),
            })
        })
        .collect();
    found.sort_by(|x, y| y.t_stat.abs().total_cmp(&x.t_stat.abs()));
    found.truncate(k);
    found
}
