//! Abstraction for the waits between sink connection attempts.
//!
//! Lets bootstrap tests run without real delays while still observing how long
//! the collator would have waited.

use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Abstraction for sleeping/waiting.
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Production sleeper using the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Test sleeper that records every requested wait and returns immediately.
///
/// Each wait yields to the scheduler once so concurrently running tasks (for
/// example a host installing the sink) get a chance to make progress.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Sum of all recorded waits.
    pub fn total(&self) -> Duration {
        self.calls().into_iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_sleeper_doesnt_sleep() {
        let sleeper = RecordingSleeper::new();
        let start = std::time::Instant::now();
        sleeper.sleep(Duration::from_secs(10)).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn recording_sleeper_records_calls() {
        let sleeper = RecordingSleeper::new();
        sleeper.sleep(Duration::from_millis(100)).await;
        sleeper.sleep(Duration::from_millis(250)).await;

        assert_eq!(sleeper.calls(), vec![Duration::from_millis(100), Duration::from_millis(250)]);
        assert_eq!(sleeper.total(), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_sleeper_follows_tokio_time() {
        let start = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_secs(1)).await;
        assert!(start.elapsed() >= Duration::from_secs(1));
    }
}
