//! Wall-clock abstraction used to stamp summaries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Clock abstraction so summary timestamps can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> SystemTime;

    /// Current time as nanoseconds since the Unix epoch, saturating.
    fn now_nanos(&self) -> u64 {
        let since_epoch = self.now().duration_since(UNIX_EPOCH).unwrap_or_default();
        u64::try_from(since_epoch.as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Clock backed by `SystemTime::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Manually driven clock for tests. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    /// Start the clock at `nanos` since the Unix epoch.
    pub fn at_nanos(nanos: u64) -> Self {
        Self { nanos: Arc::new(AtomicU64::new(nanos)) }
    }

    pub fn set_nanos(&self, nanos: u64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let step = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        let _ = self
            .nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_add(step)));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at_nanos(0)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_shared_time() {
        let clock = ManualClock::at_nanos(1_000);
        let other = clock.clone();
        clock.advance(Duration::from_nanos(500));
        assert_eq!(other.now_nanos(), 1_500);
        other.set_nanos(7);
        assert_eq!(clock.now_nanos(), 7);
    }

    #[test]
    fn system_clock_is_after_epoch() {
        assert!(SystemClock.now_nanos() > 0);
    }
}
