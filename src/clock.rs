//! Clock abstractions used by rate-limit buckets and the global window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Clock abstraction so timing can be faked in tests.
///
/// `now_millis` rounds down and is what deadlines are compared against;
/// `now_millis_ceil` rounds up and is what deadlines are computed from, so a
/// deadline never lands before the instant it stands for.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_millis(&self) -> u64;

    fn now_millis_ceil(&self) -> u64 {
        self.now_millis()
    }

    /// Deadline `after` from now, in clock milliseconds.
    fn deadline_millis(&self, after: Duration) -> u64 {
        self.now_millis_ceil().saturating_add(duration_to_millis(after))
    }
}

/// Monotonic clock backed by `tokio::time::Instant`.
///
/// Follows tokio's paused clock under `#[tokio::test(start_paused = true)]`, so
/// waits driven by [`crate::TokioSleeper`] and readings from this clock advance
/// together.
#[derive(Debug, Clone)]
pub struct TokioClock {
    start: tokio::time::Instant,
}

impl Default for TokioClock {
    fn default() -> Self {
        Self { start: tokio::time::Instant::now() }
    }
}

impl Clock for TokioClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn now_millis_ceil(&self) -> u64 {
        duration_to_millis(self.start.elapsed())
    }
}

/// Hand-driven clock for unit tests of bucket arithmetic.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_to_millis(by), Ordering::SeqCst);
    }

    pub fn set_millis(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Whole milliseconds, rounded up so a wait never ends before the requested instant.
pub(crate) fn duration_to_millis(duration: Duration) -> u64 {
    let whole = duration.as_millis();
    let rounded = if duration.subsec_nanos() % 1_000_000 == 0 { whole } else { whole + 1 };
    u64::try_from(rounded).unwrap_or(u64::MAX)
}
