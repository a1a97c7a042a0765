//! Process-wide request spacing.
//!
//! Every model request, across all sessions and retries, goes through one
//! [`RequestPacer`]. The pacer reserves the next issue slot *before* the
//! caller sleeps or sends, so in-flight latency never shortens the gap
//! between two requests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default minimum spacing between two model requests.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(500);

/// Time source used by the pacer. Injected so tests control time.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by tokio's timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Shared scheduler resource holding the last issue timestamp.
pub struct RequestPacer {
    clock: Arc<dyn Clock>,
    min_interval_ms: AtomicU64,
    last_issue: Mutex<Option<Instant>>,
}

static GLOBAL_PACER: OnceLock<Arc<RequestPacer>> = OnceLock::new();

impl RequestPacer {
    pub fn new(clock: Arc<dyn Clock>, min_interval: Duration) -> Self {
        Self {
            clock,
            min_interval_ms: AtomicU64::new(min_interval.as_millis() as u64),
            last_issue: Mutex::new(None),
        }
    }

    /// The process-wide pacer shared by every agent.
    pub fn global() -> Arc<RequestPacer> {
        Arc::clone(GLOBAL_PACER.get_or_init(|| {
            Arc::new(RequestPacer::new(Arc::new(SystemClock), DEFAULT_MIN_INTERVAL))
        }))
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms.load(Ordering::Relaxed))
    }

    pub fn set_min_interval(&self, interval: Duration) {
        self.min_interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }

    /// Reserve the next request slot and wait until it arrives.
    ///
    /// Returns the reserved issue timestamp. The timestamp is recorded before
    /// any waiting happens, so a second caller always queues behind it.
    pub async fn acquire(&self) -> Instant {
        let (issue_at, wait) = {
            let mut last = self
                .last_issue
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = self.clock.now();
            let issue_at = match *last {
                Some(previous) => now.max(previous + self.min_interval()),
                None => now,
            };
            *last = Some(issue_at);
            (issue_at, issue_at.saturating_duration_since(now))
        };

        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "pacing model request");
            self.clock.sleep(wait).await;
        }
        issue_at
    }

    /// Timestamp of the most recently reserved slot.
    pub fn last_issue(&self) -> Option<Instant> {
        *self
            .last_issue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Manually advanced clock for deterministic tests.
#[cfg(test)]
pub(crate) struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
    pub(crate) sleeps: Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl ManualClock {
    pub(crate) fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

#[cfg(test)]
#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pacer(interval_ms: u64) -> (Arc<ManualClock>, RequestPacer) {
        let clock = Arc::new(ManualClock::new());
        let pacer = RequestPacer::new(clock.clone(), Duration::from_millis(interval_ms));
        (clock, pacer)
    }

    #[tokio::test]
    async fn first_request_is_not_delayed() {
        let (clock, pacer) = pacer(1_000);
        pacer.acquire().await;
        assert!(clock.sleeps.lock().unwrap().is_empty());
    }

    // Verifies back-to-back requests are spaced by the minimum interval at issue time.
    #[tokio::test]
    async fn back_to_back_requests_are_spaced() {
        let (clock, pacer) = pacer(1_000);
        let first = pacer.acquire().await;
        let second = pacer.acquire().await;
        assert!(second - first >= Duration::from_millis(1_000));
        assert_eq!(
            clock.sleeps.lock().unwrap().as_slice(),
            &[Duration::from_millis(1_000)]
        );
    }

    #[tokio::test]
    async fn elapsed_time_counts_toward_interval() {
        let (clock, pacer) = pacer(1_000);
        pacer.acquire().await;
        clock.advance(Duration::from_millis(700));
        pacer.acquire().await;
        assert_eq!(
            clock.sleeps.lock().unwrap().as_slice(),
            &[Duration::from_millis(300)]
        );
    }

    // Verifies the slot is reserved before waiting so concurrent callers queue up.
    #[tokio::test]
    async fn slot_is_reserved_before_the_wait() {
        let clock = Arc::new(ManualClock::new());
        let pacer = Arc::new(RequestPacer::new(clock.clone(), Duration::from_millis(500)));
        let a = pacer.acquire().await;
        let b = pacer.acquire().await;
        let c = pacer.acquire().await;
        assert!(b - a >= Duration::from_millis(500));
        assert!(c - b >= Duration::from_millis(500));
        assert_eq!(pacer.last_issue(), Some(c));
    }

    #[tokio::test]
    async fn zero_interval_never_waits() {
        let (clock, pacer) = pacer(0);
        pacer.acquire().await;
        pacer.acquire().await;
        assert!(clock.sleeps.lock().unwrap().is_empty());
    }

    #[test]
    fn global_pacer_is_shared() {
        let a = RequestPacer::global();
        let b = RequestPacer::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
