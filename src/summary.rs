//! Turning a flushed rule snapshot into a summary event.

use crate::clock::Clock;
use crate::event::{
    Event, COLLATED_FIELD, MESSAGE_FIELD, REALTIME_TIMESTAMP_FIELD, TIMESTAMP_FIELD,
};
use crate::table::RuleSnapshot;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, UNIX_EPOCH};

/// A synthesized event reporting how many matches a rule collapsed.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRecord {
    pub rule_id: String,
    /// Events suppressed in the window (the passed-through opener excluded).
    pub collated: u64,
    pub interval: Duration,
    /// The retained event, already stamped with summary marker fields.
    pub event: Event,
}

impl SummaryRecord {
    pub fn message(&self) -> Option<&str> {
        self.event.get_str(MESSAGE_FIELD)
    }

    pub fn into_event(self) -> Event {
        self.event
    }
}

/// Per-rule result of a flush.
#[derive(Debug, Clone, PartialEq)]
pub enum Collation {
    /// Nothing was suppressed; no record.
    Quiet,
    /// Matches came from more than one source label; no record.
    Ambiguous { rule_id: String, labels: BTreeMap<String, u64> },
    Summary(SummaryRecord),
}

/// Builds [`SummaryRecord`]s for a fixed flush interval.
#[derive(Debug)]
pub struct SummaryBuilder<'a> {
    interval: Duration,
    clock: &'a dyn Clock,
}

impl<'a> SummaryBuilder<'a> {
    pub fn new(interval: Duration, clock: &'a dyn Clock) -> Self {
        Self { interval, clock }
    }

    /// Decide what a rule's snapshot turns into.
    pub fn collate(&self, snapshot: RuleSnapshot) -> Collation {
        let RuleSnapshot { rule_id, mut state } = snapshot;
        if state.hits() <= 1 {
            return Collation::Quiet;
        }
        if state.source_labels().len() > 1 {
            return Collation::Ambiguous { rule_id, labels: state.source_labels().clone() };
        }
        let collated = state.suppressed();
        let Some(mut event) = state.take_retained() else {
            return Collation::Quiet;
        };
        let original = event.get(MESSAGE_FIELD).map(render_message);
        let now = self.clock.now();
        let stamp = DateTime::<Utc>::from(now).to_rfc3339_opts(SecondsFormat::Millis, true);
        let now_nanos = now
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));

        event.put(COLLATED_FIELD, true);
        event.put(TIMESTAMP_FIELD, stamp);
        event.put(REALTIME_TIMESTAMP_FIELD, now_nanos);
        event.put(
            MESSAGE_FIELD,
            summary_message(&rule_id, collated, self.interval, original.as_deref()),
        );
        Collation::Summary(SummaryRecord { rule_id, collated, interval: self.interval, event })
    }
}

fn render_message(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Message body for a summary.
pub fn summary_message(
    rule_id: &str,
    collated: u64,
    interval: Duration,
    original: Option<&str>,
) -> String {
    let head = format!(
        "Collated {} messages in the last {}s for rule: rule_id={}",
        collated,
        interval.as_secs(),
        rule_id
    );
    match original {
        Some(msg) => format!("{head} msg='{msg}'."),
        None => format!("{head}."),
    }
}

/// Renders a label tally as `unit (n times), ...` for operator warnings.
pub struct LabelBreakdown<'a>(pub &'a BTreeMap<String, u64>);

impl fmt::Display for LabelBreakdown<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (label, count)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{label} ({count} times)")?;
        }
        Ok(())
    }
}
