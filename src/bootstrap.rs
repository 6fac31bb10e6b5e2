//! Wiring the summary sink in after the collator has started.
//!
//! Hosts often build their publisher after the processing pipeline, so the
//! flush scheduler starts without a sink. The host hands the sink over through
//! a [`SinkSlot`]; the scheduler waits for it a bounded number of times and
//! then runs without one for the rest of its life.

use crate::error::CollatorError;
use crate::sleeper::Sleeper;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default number of waits before giving up on the sink.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;
/// Default wait between sink checks.
pub const DEFAULT_CONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// One-time handoff of a sink from the host to the flush scheduler.
///
/// Clones share the same slot. The first `install` wins.
#[derive(Debug)]
pub struct SinkSlot<S> {
    inner: Arc<SlotInner<S>>,
}

#[derive(Debug)]
struct SlotInner<S> {
    sink: OnceLock<S>,
    installed: Notify,
}

impl<S> Clone for SinkSlot<S> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<S> Default for SinkSlot<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SinkSlot<S> {
    /// An empty slot waiting for the host.
    pub fn new() -> Self {
        Self { inner: Arc::new(SlotInner { sink: OnceLock::new(), installed: Notify::new() }) }
    }

    /// A slot that already holds `sink`.
    pub fn with_sink(sink: S) -> Self {
        let slot = Self::new();
        let _ = slot.inner.sink.set(sink);
        slot
    }

    /// Hand the sink over. Returns it back if a sink was already installed.
    pub fn install(&self, sink: S) -> Result<(), S> {
        self.inner.sink.set(sink)?;
        // notify_one keeps a permit if the scheduler is not waiting yet
        self.inner.installed.notify_one();
        Ok(())
    }

    pub fn is_installed(&self) -> bool {
        self.inner.sink.get().is_some()
    }

    async fn installed(&self) {
        self.inner.installed.notified().await;
    }
}

impl<S: Clone> SinkSlot<S> {
    pub fn get(&self) -> Option<S> {
        self.inner.sink.get().cloned()
    }
}

/// How long the scheduler waits for a sink before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    /// Number of waits; the slot is checked before each and once after the last.
    pub attempts: u32,
    pub retry_interval: Duration,
}

impl ConnectPolicy {
    pub fn new(attempts: u32, retry_interval: Duration) -> Result<Self, CollatorError> {
        let policy = Self { attempts, retry_interval };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), CollatorError> {
        if self.attempts == 0 {
            return Err(CollatorError::InvalidConnectPolicy("attempts must be > 0".into()));
        }
        if self.retry_interval.is_zero() {
            return Err(CollatorError::InvalidConnectPolicy(
                "retry interval must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Upper bound on time spent waiting for the sink.
    pub fn max_wait(&self) -> Duration {
        self.retry_interval.saturating_mul(self.attempts)
    }
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self { attempts: DEFAULT_CONNECT_ATTEMPTS, retry_interval: DEFAULT_CONNECT_INTERVAL }
    }
}

/// Result of waiting for the sink.
#[derive(Debug)]
pub enum SinkConnection<S> {
    Connected(S),
    /// The host never installed a sink within the policy's bound.
    Unavailable,
    /// Shutdown was requested while waiting.
    Cancelled,
}

/// Wait for `slot` to be filled, checking once per `retry_interval` (or as
/// soon as the host installs a sink) for at most `policy.attempts` waits.
pub async fn await_sink<S: Clone>(
    slot: &SinkSlot<S>,
    policy: &ConnectPolicy,
    sleeper: &dyn Sleeper,
    cancel: &CancellationToken,
) -> SinkConnection<S> {
    for attempt in 0..policy.attempts {
        if let Some(sink) = slot.get() {
            debug!(target: "event_collator::bootstrap", attempt, "summary sink connected");
            return SinkConnection::Connected(sink);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return SinkConnection::Cancelled,
            _ = slot.installed() => {}
            _ = sleeper.sleep(policy.retry_interval) => {}
        }
    }
    if let Some(sink) = slot.get() {
        return SinkConnection::Connected(sink);
    }
    warn!(
        target: "event_collator::bootstrap",
        attempts = policy.attempts,
        "summary sink unavailable; collated summaries will be dropped this run"
    );
    SinkConnection::Unavailable
}
