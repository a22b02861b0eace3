//! Process-wide (per scheduler) request budget shared by every bucket.
//!
//! With a configured limit the state behaves as a fixed window of `limit`
//! requests per `window`. Without one it only enforces lockouts reported by the
//! server through a global 429.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::warn;

use crate::clock::Clock;

#[derive(Debug, Default)]
struct GlobalWindow {
    remaining: u32,
    reset_at_millis: u64,
    /// Bumped whenever the window is replaced; refunds only apply to the window
    /// the permit was taken from.
    generation: u64,
}

/// Proof of one unit taken from the global budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalPermit {
    generation: u64,
    counted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalSnapshot {
    pub limit: Option<u32>,
    pub remaining: u32,
    pub resets_in: Duration,
}

#[derive(Debug)]
pub struct GlobalRateState {
    limit: Option<u32>,
    window: Duration,
    state: Mutex<GlobalWindow>,
    clock: Arc<dyn Clock>,
}

impl GlobalRateState {
    pub fn new(limit: Option<u32>, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { limit, window, state: Mutex::new(GlobalWindow::default()), clock }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, GlobalWindow> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take one unit of global budget, or learn how long to wait for one.
    pub fn try_acquire(&self) -> Result<GlobalPermit, Duration> {
        let now = self.clock.now_millis();
        let mut state = self.state();

        if now >= state.reset_at_millis {
            match self.limit {
                None => return Ok(GlobalPermit { generation: state.generation, counted: false }),
                Some(limit) => {
                    state.remaining = limit;
                    state.reset_at_millis = self.clock.deadline_millis(self.window);
                    state.generation += 1;
                }
            }
        }

        if state.remaining > 0 {
            state.remaining -= 1;
            Ok(GlobalPermit { generation: state.generation, counted: true })
        } else {
            let wait = Duration::from_millis(state.reset_at_millis.saturating_sub(now));
            Err(wait.max(Duration::from_millis(1)))
        }
    }

    /// Return a unit that was taken but never used to send a request.
    pub fn refund(&self, permit: GlobalPermit) {
        if !permit.counted {
            return;
        }
        let now = self.clock.now_millis();
        let mut state = self.state();
        if state.generation == permit.generation && now < state.reset_at_millis {
            let cap = self.limit.unwrap_or(u32::MAX);
            state.remaining = state.remaining.saturating_add(1).min(cap);
        }
    }

    /// Block every bucket for at least `duration` (global 429).
    pub fn lock_for(&self, duration: Duration) {
        let now = self.clock.now_millis();
        let until = self.clock.deadline_millis(duration);
        let mut state = self.state();
        state.remaining = 0;
        state.reset_at_millis = state.reset_at_millis.max(until);
        state.generation += 1;
        warn!(
            target: "restlanes::global",
            locked_ms = state.reset_at_millis.saturating_sub(now),
            "global rate limit hit; all buckets suspended"
        );
    }

    pub fn time_until_reset(&self) -> Duration {
        let now = self.clock.now_millis();
        Duration::from_millis(self.state().reset_at_millis.saturating_sub(now))
    }

    pub fn snapshot(&self) -> GlobalSnapshot {
        let resets_in = self.time_until_reset();
        let state = self.state();
        GlobalSnapshot { limit: self.limit, remaining: state.remaining, resets_in }
    }
}
