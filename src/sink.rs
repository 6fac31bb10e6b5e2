//! Sinks that receive batches of summary events.
//!
//! A sink is a `tower::Service<SummaryBatch>`, so hosts can wrap their own
//! transport with standard tower middleware. The collator calls a sink at
//! most once per flush tick, always outside of any table lock, and never
//! retries a failed call.

use crate::event::{Event, MESSAGE_FIELD};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tower::Service;
use tracing::info;

/// Summaries produced by one flush tick.
pub type SummaryBatch = Vec<Event>;

/// Boxed future returned by the provided sinks.
pub type BoxSinkFuture<E> = Pin<Box<dyn Future<Output = Result<(), E>> + Send>>;

/// A sink that publishes summary batches.
pub trait SummarySink:
    tower::Service<SummaryBatch, Response = (), Error = Self::SinkError, Future = Self::SinkFuture>
    + Clone
    + Send
    + Sync
    + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + Sync + 'static;
    /// Future returned by `call`.
    type SinkFuture: Future<Output = Result<(), Self::SinkError>> + Send + 'static;
}

/// Publish `batch`, honoring `poll_ready`. Errors are returned for the caller
/// to log; nothing is retried.
pub async fn publish<S>(sink: S, batch: SummaryBatch) -> Result<(), S::SinkError>
where
    S: SummarySink,
{
    use tower::ServiceExt;

    let mut ready = sink.ready_oneshot().await?;
    ready.call(batch).await
}

/// A sink that discards every batch.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<SummaryBatch> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = BoxSinkFuture<Infallible>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _batch: SummaryBatch) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl SummarySink for NullSink {
    type SinkError = Infallible;
    type SinkFuture = BoxSinkFuture<Infallible>;
}

/// A sink that logs each summary through `tracing`.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<SummaryBatch> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = BoxSinkFuture<Infallible>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, batch: SummaryBatch) -> Self::Future {
        for event in &batch {
            info!(
                target: "event_collator::sink",
                summary = event.get_str(MESSAGE_FIELD).unwrap_or_default(),
                "collated_event"
            );
        }
        Box::pin(async { Ok(()) })
    }
}

impl SummarySink for LogSink {
    type SinkError = Infallible;
    type SinkFuture = BoxSinkFuture<Infallible>;
}

/// A sink that keeps summaries in memory, evicting the oldest past capacity.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<Event>>>,
    batches: Arc<AtomicU64>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            batches: Arc::new(AtomicU64::new(0)),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of `call`s received, empty batches included.
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<SummaryBatch> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = BoxSinkFuture<Infallible>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, batch: SummaryBatch) -> Self::Future {
        self.batches.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.lock();
        for event in batch {
            if guard.len() >= self.capacity {
                guard.pop_front();
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
            guard.push_back(event);
        }
        Box::pin(async { Ok(()) })
    }
}

impl SummarySink for MemorySink {
    type SinkError = Infallible;
    type SinkFuture = BoxSinkFuture<Infallible>;
}

/// Why a [`ChannelSink`] could not hand a batch over.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChannelSinkError {
    #[error("summary channel is full")]
    Full,
    #[error("summary channel is closed")]
    Closed,
}

/// Forwards batches over a bounded channel without waiting for room.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: tokio::sync::mpsc::Sender<SummaryBatch>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    pub fn new(capacity: usize) -> (Self, tokio::sync::mpsc::Receiver<SummaryBatch>) {
        let (tx, rx) = tokio::sync::mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Service<SummaryBatch> for ChannelSink {
    type Response = ();
    type Error = ChannelSinkError;
    type Future = BoxSinkFuture<ChannelSinkError>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, batch: SummaryBatch) -> Self::Future {
        use tokio::sync::mpsc::error::TrySendError;

        let result = self.tx.try_send(batch).map_err(|e| match e {
            TrySendError::Full(_) => ChannelSinkError::Full,
            TrySendError::Closed(_) => ChannelSinkError::Closed,
        });
        Box::pin(async move { result })
    }
}

impl SummarySink for ChannelSink {
    type SinkError = ChannelSinkError;
    type SinkFuture = BoxSinkFuture<ChannelSinkError>;
}
