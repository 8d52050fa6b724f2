//! Timescale-segmented agents and the coordinator that folds them.
//!
//! The three segments partition `[0, 1]`:
//!
//! | Segment | Range | Influence | Reliability | Memory TTL |
//! |---------|-------|-----------|-------------|------------|
//! | Short | `[0, 0.3)` | 0.2 | 0.8 | 5 min |
//! | Mid | `[0.3, 0.6]` | 0.3 | 0.85 | 1 h |
//! | Long | `(0.6, 1]` | 0.4 | 0.9 | 24 h |
//!
//! A timescale outside a segment's range is an expected rejection
//! ([`FailureReason::OutOfRange`]), never a panic.

use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::time::Duration;

use super::{unit_signal, Agent, AgentContext, AgentFault, AgentKind, Assessment};
use crate::model::{FailureReason, InputBundle, InputField};

const RING_CAPACITY: usize = 100;

/// One of the three disjoint timescale ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Short,
    Mid,
    Long,
}

impl Segment {
    /// Returns true if `timescale` lies in this segment.
    #[must_use]
    pub fn contains(&self, timescale: f64) -> bool {
        match self {
            Segment::Short => (0.0..0.3).contains(&timescale),
            Segment::Mid => (0.3..=0.6).contains(&timescale),
            Segment::Long => timescale > 0.6 && timescale <= 1.0,
        }
    }

    /// Kind of the agent covering this segment.
    #[must_use]
    pub const fn kind(&self) -> AgentKind {
        match self {
            Segment::Short => AgentKind::ShortTerm,
            Segment::Mid => AgentKind::MidTerm,
            Segment::Long => AgentKind::LongTerm,
        }
    }

    const fn weights(&self) -> (f64, f64) {
        match self {
            Segment::Short => (0.2, 0.8),
            Segment::Mid => (0.3, 0.85),
            Segment::Long => (0.4, 0.9),
        }
    }

    const fn ttl(&self) -> Duration {
        match self {
            Segment::Short => Duration::from_secs(300),
            Segment::Mid => Duration::from_secs(3600),
            Segment::Long => Duration::from_secs(86_400),
        }
    }

    const fn range_label(&self) -> &'static str {
        match self {
            Segment::Short => "[0, 0.3)",
            Segment::Mid => "[0.3, 0.6]",
            Segment::Long => "(0.6, 1]",
        }
    }
}

/// Bounded window of recent accepted timescales.
#[derive(Debug, Default)]
struct RingStats {
    window: Mutex<VecDeque<f64>>,
}

impl RingStats {
    fn push_and_mean(&self, value: f64) -> f64 {
        let mut window = self.window.lock();
        if window.len() == RING_CAPACITY {
            window.pop_front();
        }
        window.push_back(value);
        window.iter().sum::<f64>() / window.len() as f64
    }
}

/// Agent valid only within one timescale segment.
///
/// Keeps a running mean of the timescales it accepted, shared across
/// dispatches of the same council.
#[derive(Debug)]
pub struct SegmentAgent {
    id: String,
    segment: Segment,
    stats: RingStats,
}

impl SegmentAgent {
    pub fn new(segment: Segment) -> Self {
        Self {
            id: segment.kind().default_id().to_string(),
            segment,
            stats: RingStats::default(),
        }
    }

    /// The segment this agent covers.
    #[must_use]
    pub fn segment(&self) -> Segment {
        self.segment
    }
}

impl Agent for SegmentAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        self.segment.kind()
    }

    fn required_fields(&self) -> &[InputField] {
        &[InputField::Text, InputField::Timescale]
    }

    fn assess(&self, input: &InputBundle, ctx: &AgentContext<'_>) -> Result<Assessment, AgentFault> {
        let timescale = unit_signal(input.timescale, "timescale")?;
        if !self.segment.contains(timescale) {
            return Err(AgentFault::Rejected {
                reason: FailureReason::OutOfRange,
                message: format!(
                    "timescale {timescale} outside {}",
                    self.segment.range_label()
                ),
            });
        }

        let mean = self.stats.push_and_mean(timescale);
        ctx.memory.write(
            &format!("{}:context", self.id),
            json!({ "text": input.text, "timescale": timescale }),
            Some(self.segment.ttl()),
        )?;

        let (influence, reliability) = self.segment.weights();
        Ok(Assessment::new(influence, reliability)
            .with_detail("timescale", timescale)
            .with_detail("stats_mean", mean))
    }
}

/// Averages the timescale reported by successful segment agents.
#[derive(Debug, Clone)]
pub struct TimescaleCoordinator {
    id: String,
}

impl TimescaleCoordinator {
    pub fn new() -> Self {
        Self {
            id: AgentKind::TimescaleCoordinator.default_id().to_string(),
        }
    }
}

impl Default for TimescaleCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for TimescaleCoordinator {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::TimescaleCoordinator
    }

    fn required_fields(&self) -> &[InputField] {
        &[]
    }

    fn assess(&self, _input: &InputBundle, ctx: &AgentContext<'_>) -> Result<Assessment, AgentFault> {
        let timescales: Vec<f64> = ctx
            .reports
            .iter()
            .filter(|r| {
                r.ok && matches!(
                    r.kind,
                    AgentKind::ShortTerm | AgentKind::MidTerm | AgentKind::LongTerm
                )
            })
            .filter_map(|r| r.detail_f64("timescale"))
            .collect();
        let avg = timescales.iter().sum::<f64>() / timescales.len().max(1) as f64;

        ctx.memory.write(
            &format!("{}:avg_timescale", self.id),
            json!({ "avg_timescale": avg }),
            Some(Duration::from_secs(3600)),
        )?;
        Ok(Assessment::new(0.5, 0.95).with_detail("avg_timescale", avg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentReport, Genes};
    use sentinel_memory::{MemoryConfig, SharedMemory};
    use std::collections::BTreeMap;

    fn memory() -> SharedMemory {
        SharedMemory::new(MemoryConfig::default()).unwrap()
    }

    #[test]
    fn test_segments_are_disjoint_and_cover_unit_interval() {
        for i in 0..=100 {
            let t = f64::from(i) / 100.0;
            let hits = [Segment::Short, Segment::Mid, Segment::Long]
                .iter()
                .filter(|s| s.contains(t))
                .count();
            assert_eq!(hits, 1, "timescale {t} matched {hits} segments");
        }
    }

    #[test]
    fn test_out_of_range_is_soft_rejection() {
        let memory = memory();
        let policy = Genes::default();
        let ctx = AgentContext {
            policy: &policy,
            reports: &[],
            memory: &memory,
        };
        let agent = SegmentAgent::new(Segment::Short);
        let report = agent.run(&InputBundle::new("x").with_timescale(0.7), &ctx);
        assert!(!report.ok);
        assert_eq!(report.failure_reason(), Some(FailureReason::OutOfRange));
        assert_eq!(report.influence, 0.0);
    }

    #[test]
    fn test_segment_reports_running_mean() {
        let memory = memory();
        let policy = Genes::default();
        let ctx = AgentContext {
            policy: &policy,
            reports: &[],
            memory: &memory,
        };
        let agent = SegmentAgent::new(Segment::Mid);
        agent.run(&InputBundle::new("x").with_timescale(0.3), &ctx);
        let report = agent.run(&InputBundle::new("x").with_timescale(0.5), &ctx);
        assert!(report.ok);
        assert!((report.detail_f64("stats_mean").unwrap() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_coordinator_averages_segment_outputs_only() {
        let memory = memory();
        let policy = Genes::default();
        let mut details = BTreeMap::new();
        details.insert("timescale".to_string(), json!(0.7));
        let reports = vec![
            AgentReport::success("long_term", AgentKind::LongTerm, 0.4, 0.9, 0.0, details.clone()),
            AgentReport::success("timescale", AgentKind::Timescale, 0.2, 0.9, 0.7, {
                let mut d = details.clone();
                d.insert("timescale".to_string(), json!(0.1));
                d
            }),
        ];
        let ctx = AgentContext {
            policy: &policy,
            reports: &reports,
            memory: &memory,
        };
        let report = TimescaleCoordinator::new().run(&InputBundle::default(), &ctx);
        assert_eq!(report.detail_f64("avg_timescale"), Some(0.7));
    }

    #[test]
    fn test_coordinator_without_segments_reports_zero() {
        let memory = memory();
        let policy = Genes::default();
        let ctx = AgentContext {
            policy: &policy,
            reports: &[],
            memory: &memory,
        };
        let report = TimescaleCoordinator::new().run(&InputBundle::default(), &ctx);
        assert!(report.ok);
        assert_eq!(report.detail_f64("avg_timescale"), Some(0.0));
    }
}
