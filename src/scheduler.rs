//! Periodic flush: drain the collation table and publish summaries.
//!
//! Each tick swaps every rule's state for an empty one, turns bursts into
//! summary events, and hands the batch to the sink in a single call. Failed
//! or impossible publishes are logged and the batch is dropped.

use crate::bootstrap::{await_sink, ConnectPolicy, SinkConnection, SinkSlot};
use crate::clock::Clock;
use crate::error::CollatorError;
use crate::sink::{publish, SummaryBatch, SummarySink};
use crate::sleeper::Sleeper;
use crate::summary::{Collation, LabelBreakdown, SummaryBuilder};
use crate::table::CollationTable;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Longest accepted flush period: one year.
pub const MAX_COLLATION_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Reject periods the ticker cannot schedule.
pub(crate) fn check_interval(secs: u64) -> Result<(), CollatorError> {
    if secs == 0 || secs > MAX_COLLATION_INTERVAL.as_secs() {
        return Err(CollatorError::InvalidInterval(secs));
    }
    Ok(())
}

/// What one flush did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Summaries accepted by the sink.
    pub published: usize,
    /// Rules whose burst spanned several source labels and was not summarized.
    pub ambiguous_rules: Vec<String>,
    /// Summaries built but not delivered.
    pub dropped: usize,
    /// Rules whose state was reset.
    pub reset_rules: usize,
}

impl FlushReport {
    /// Summaries built this tick, delivered or not.
    pub fn built(&self) -> usize {
        self.published + self.dropped
    }
}

/// Drains the table and builds the batch for one tick.
#[derive(Debug, Clone)]
pub struct Flusher {
    table: Arc<CollationTable>,
    interval: Duration,
    clock: Arc<dyn Clock>,
}

impl Flusher {
    pub fn new(table: Arc<CollationTable>, interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { table, interval, clock }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Reset every rule and return the summaries plus the ambiguous rule ids.
    pub fn collect(&self) -> (SummaryBatch, Vec<String>, usize) {
        let builder = SummaryBuilder::new(self.interval, self.clock.as_ref());
        let snapshots = self.table.snapshot_and_reset();
        let reset_rules = snapshots.len();
        let mut batch = Vec::new();
        let mut ambiguous = Vec::new();
        for snapshot in snapshots {
            match builder.collate(snapshot) {
                Collation::Quiet => {}
                Collation::Ambiguous { rule_id, labels } => {
                    warn!(
                        target: "event_collator::scheduler",
                        rule_id = %rule_id,
                        "collation rule {} matches messages from multiple sources: {}",
                        rule_id,
                        LabelBreakdown(&labels)
                    );
                    ambiguous.push(rule_id);
                }
                Collation::Summary(record) => batch.push(record.into_event()),
            }
        }
        (batch, ambiguous, reset_rules)
    }

    /// Run one tick: collect, then publish outside of any table lock.
    ///
    /// Empty batches are not sent. Without a sink, built summaries are
    /// dropped and counted.
    pub async fn flush<S: SummarySink>(&self, sink: Option<&S>) -> FlushReport {
        let (batch, ambiguous_rules, reset_rules) = self.collect();
        let built = batch.len();
        let mut report = FlushReport { ambiguous_rules, reset_rules, ..FlushReport::default() };
        if built == 0 {
            return report;
        }
        match sink {
            Some(sink) => match publish(sink.clone(), batch).await {
                Ok(()) => report.published = built,
                Err(e) => {
                    error!(
                        target: "event_collator::scheduler",
                        dropped = built,
                        error = %e,
                        "could not publish {} collated events",
                        built
                    );
                    report.dropped = built;
                }
            },
            None => {
                error!(
                    target: "event_collator::scheduler",
                    dropped = built,
                    "could not publish {} collated events: no sink",
                    built
                );
                report.dropped = built;
            }
        }
        report
    }
}

/// Background task running [`Flusher::flush`] once per interval.
#[derive(Debug)]
pub struct FlushScheduler<S> {
    flusher: Flusher,
    slot: SinkSlot<S>,
    connect: ConnectPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl<S: SummarySink> FlushScheduler<S> {
    pub fn new(
        flusher: Flusher,
        slot: SinkSlot<S>,
        connect: ConnectPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self { flusher, slot, connect, sleeper }
    }

    /// Wait for the sink, then flush every interval until `cancel` fires.
    ///
    /// The first tick is one full interval after the call. Ticks that come
    /// due while waiting for the sink collapse into one. The period is
    /// clamped to [`MAX_COLLATION_INTERVAL`].
    pub async fn run(self, cancel: CancellationToken) {
        let period =
            self.flusher.interval().clamp(Duration::from_millis(1), MAX_COLLATION_INTERVAL);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let sink = match await_sink(&self.slot, &self.connect, self.sleeper.as_ref(), &cancel).await
        {
            SinkConnection::Connected(sink) => Some(sink),
            SinkConnection::Unavailable => None,
            SinkConnection::Cancelled => return,
        };

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                report = self.flusher.flush(sink.as_ref()) => {
                    debug!(
                        target: "event_collator::scheduler",
                        published = report.published,
                        dropped = report.dropped,
                        ambiguous = report.ambiguous_rules.len(),
                        "flush tick"
                    );
                }
            }
        }
        debug!(target: "event_collator::scheduler", "flush scheduler stopped");
    }
}
