//! The collator: rules, filter and flush scheduler assembled together.

use crate::bootstrap::{ConnectPolicy, SinkSlot};
use crate::clock::{Clock, SystemClock};
use crate::config::CollatorConfig;
use crate::error::CollatorError;
use crate::event::Event;
use crate::filter::{EventFilter, FieldPaths, Verdict};
use crate::predicate::Predicate;
use crate::scheduler::{check_interval, FlushReport, FlushScheduler, Flusher};
use crate::sink::SummarySink;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::table::{CollationTable, Rule};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Flush interval used when the builder is not given one.
pub const DEFAULT_COLLATION_INTERVAL_SECS: u64 = 30;

/// Suppresses bursts of matching events and reports them as summaries.
///
/// Cloning is cheap; clones share the same rule state.
#[derive(Debug, Clone)]
pub struct Collator {
    table: Arc<CollationTable>,
    filter: EventFilter,
    flusher: Flusher,
    connect: ConnectPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl Collator {
    pub fn builder() -> CollatorBuilder {
        CollatorBuilder::new()
    }

    /// Build from configuration, compiling every rule's condition.
    pub fn from_config(config: &CollatorConfig) -> Result<Self, CollatorError> {
        Self::builder_from_config(config)?.build()
    }

    /// A builder pre-populated from configuration, for overriding clock or sleeper.
    pub fn builder_from_config(config: &CollatorConfig) -> Result<CollatorBuilder, CollatorError> {
        let mut builder = CollatorBuilder::new()
            .interval_secs(config.interval_secs)
            .field_paths(config.field_paths())
            .connect_policy(config.connect_policy()?);
        for (rule_id, condition) in config.compile_rules()? {
            builder = builder.rule(rule_id, condition);
        }
        Ok(builder)
    }

    /// Decide whether `event` goes downstream.
    pub fn process(&self, event: &Event) -> Verdict {
        self.filter.process(event)
    }

    /// Pipeline form of [`process`](Self::process): the event back, or `None`
    /// when it was suppressed.
    pub fn filter(&self, event: Event) -> Option<Event> {
        match self.process(&event) {
            Verdict::PassThrough => Some(event),
            Verdict::Suppressed { .. } => None,
        }
    }

    /// Rule ids in evaluation order.
    pub fn rule_ids(&self) -> Vec<String> {
        self.table.rule_ids()
    }

    pub fn interval(&self) -> Duration {
        self.flusher.interval()
    }

    pub fn field_paths(&self) -> &FieldPaths {
        self.filter.fields()
    }

    /// Suppressed events per rule since the last flush.
    pub fn pending(&self) -> BTreeMap<String, u64> {
        self.table
            .rule_ids()
            .into_iter()
            .filter_map(|id| {
                let suppressed = self.table.state(&id)?.suppressed();
                Some((id, suppressed))
            })
            .collect()
    }

    /// Run one flush right now.
    pub async fn flush_now<S: SummarySink>(&self, sink: Option<&S>) -> FlushReport {
        self.flusher.flush(sink).await
    }

    /// Spawn the flush scheduler on the current tokio runtime.
    ///
    /// The scheduler waits for `slot` to be filled (bounded by the connect
    /// policy) and then flushes once per interval until the returned handle
    /// is shut down.
    pub fn start<S: SummarySink>(&self, slot: SinkSlot<S>) -> CollatorHandle {
        let cancel = CancellationToken::new();
        let scheduler =
            FlushScheduler::new(self.flusher.clone(), slot, self.connect, self.sleeper.clone());
        let task = tokio::spawn(scheduler.run(cancel.clone()));
        CollatorHandle { cancel, task }
    }
}

/// Handle to a running flush scheduler.
///
/// Dropping the handle leaves the scheduler running; call
/// [`shutdown`](Self::shutdown) to stop it.
#[derive(Debug)]
pub struct CollatorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl CollatorHandle {
    /// Token that stops the scheduler when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the scheduler and wait for it to exit. Pending counts are not flushed.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                error!(target: "event_collator::collator", error = %e, "flush scheduler panicked");
            }
        }
    }
}

/// Builder for [`Collator`].
#[derive(Debug)]
pub struct CollatorBuilder {
    interval_secs: u64,
    rules: Vec<Rule>,
    fields: FieldPaths,
    connect: ConnectPolicy,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl CollatorBuilder {
    pub fn new() -> Self {
        Self {
            interval_secs: DEFAULT_COLLATION_INTERVAL_SECS,
            rules: Vec::new(),
            fields: FieldPaths::default(),
            connect: ConnectPolicy::default(),
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Flush period in whole seconds, from 1 up to one year.
    pub fn interval_secs(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    /// Add a rule. Rules are evaluated in id order regardless of insertion order.
    pub fn rule<P>(mut self, id: impl Into<String>, predicate: P) -> Self
    where
        P: Predicate + 'static,
    {
        self.rules.push(Rule::new(id, Arc::new(predicate)));
        self
    }

    pub fn field_paths(mut self, fields: FieldPaths) -> Self {
        self.fields = fields;
        self
    }

    pub fn timestamp_field(mut self, path: impl Into<String>) -> Self {
        self.fields.timestamp = path.into();
        self
    }

    pub fn source_label_field(mut self, path: impl Into<String>) -> Self {
        self.fields.source_label = path.into();
        self
    }

    pub fn connect_policy(mut self, connect: ConnectPolicy) -> Self {
        self.connect = connect;
        self
    }

    /// Clock used to stamp summaries.
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Sleeper used between sink connection attempts.
    pub fn sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Validate and build. Nothing is built unless every rule is valid.
    pub fn build(self) -> Result<Collator, CollatorError> {
        check_interval(self.interval_secs)?;
        self.connect.validate()?;
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if rule.id().is_empty() {
                return Err(CollatorError::EmptyRuleId);
            }
            if !seen.insert(rule.id()) {
                return Err(CollatorError::DuplicateRule(rule.id().to_string()));
            }
        }

        let table = Arc::new(CollationTable::new(self.rules));
        let interval = Duration::from_secs(self.interval_secs);
        info!(
            target: "event_collator::collator",
            interval_secs = self.interval_secs,
            "collate_events: active rules=[{}]",
            table.rule_ids().join(",")
        );
        Ok(Collator {
            filter: EventFilter::new(table.clone(), self.fields),
            flusher: Flusher::new(table.clone(), interval, self.clock),
            table,
            connect: self.connect,
            sleeper: self.sleeper,
        })
    }
}

impl Default for CollatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
