//! Per-route rate-limit buckets and the registry that owns them.
//!
//! A bucket holds the last server-reported `limit`, the remaining budget and the
//! instant the window resets. All mutation happens under the bucket's own mutex,
//! which is never held across an await point; two buckets never contend.
//!
//! Semantics:
//! - A bucket that has never seen rate-limit headers grants freely.
//! - Grants decrement `remaining` optimistically; the next response overwrites
//!   it with the server's value.
//! - Once `reset_at` passes with a known limit, the bucket refills to `limit`
//!   and opens a new window of `reset_after`.
//! - A window opened that way is unconfirmed. It is not renewed locally again
//!   while requests granted from it are still in flight; only a server update,
//!   a 429 lockout, or the last of those requests completing lets the bucket
//!   open another window. Callers report completion with
//!   [`RateLimitBucket::complete`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tracing::trace;

use crate::clock::{duration_to_millis, Clock};
use crate::route::BucketId;

/// Result of asking a bucket (or the global state) for one unit of budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// Budget granted. `remaining` is what is left after this grant, `None` if
    /// the bucket has no observed limit.
    Granted { remaining: Option<u32> },
    /// No budget until `wait` has elapsed.
    Exhausted { wait: Duration },
}

impl Acquire {
    pub fn is_granted(&self) -> bool {
        matches!(self, Acquire::Granted { .. })
    }
}

#[derive(Debug, Clone, Default)]
struct BucketState {
    limit: Option<u32>,
    remaining: u32,
    reset_at_millis: u64,
    reset_after: Duration,
    /// Current window was opened locally and no response has confirmed it.
    unconfirmed: bool,
    /// Grants not yet reported back through `complete`.
    in_flight: u32,
}

/// Point-in-time copy of a bucket's accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub id: BucketId,
    pub limit: Option<u32>,
    pub remaining: u32,
    pub reset_after: Duration,
    /// Time left until the current window resets.
    pub resets_in: Duration,
    /// Granted requests that have not completed yet.
    pub in_flight: u32,
}

/// Budget for one `(route, major id)` pair.
#[derive(Debug)]
pub struct RateLimitBucket {
    id: BucketId,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

impl RateLimitBucket {
    pub fn new(id: BucketId, clock: Arc<dyn Clock>) -> Self {
        Self { id, state: Mutex::new(BucketState::default()), clock }
    }

    pub fn id(&self) -> BucketId {
        self.id
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take one unit of budget if available. Every grant must be followed by
    /// exactly one [`complete`](Self::complete).
    pub fn try_acquire(&self) -> Acquire {
        let now = self.clock.now_millis();
        let mut state = self.state();

        if now >= state.reset_at_millis {
            let limit = state.limit;
            match limit {
                // never observed (or only ever locked by a 429 that has expired)
                None => {
                    state.in_flight = state.in_flight.saturating_add(1);
                    return Acquire::Granted { remaining: None };
                }
                // the local window may be leftover budget the server never counted
                // as reset; wait for its requests to come back
                Some(_) if state.unconfirmed && state.in_flight > 0 => {}
                Some(limit) => {
                    state.remaining = limit;
                    state.reset_at_millis = self.clock.deadline_millis(state.reset_after);
                    state.unconfirmed = true;
                }
            }
        }

        if state.remaining > 0 {
            state.remaining -= 1;
            state.in_flight = state.in_flight.saturating_add(1);
            Acquire::Granted { remaining: Some(state.remaining) }
        } else {
            let wait = if now >= state.reset_at_millis {
                // unconfirmed window with requests outstanding: poll once per window
                state.reset_after
            } else {
                Duration::from_millis(state.reset_at_millis - now)
            };
            // A zero-length window with no budget would spin; wait at least 1ms.
            Acquire::Exhausted { wait: wait.max(Duration::from_millis(1)) }
        }
    }

    /// Report that a granted request finished, successfully or not, or was
    /// abandoned before a response arrived.
    pub fn complete(&self) {
        let mut state = self.state();
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    /// Replace local accounting with server-reported values.
    pub fn update(&self, limit: u32, remaining: u32, reset_after: Duration) {
        let reset_at_millis = self.clock.deadline_millis(reset_after);
        let mut state = self.state();
        state.limit = Some(limit);
        state.remaining = remaining;
        state.reset_after = reset_after;
        state.reset_at_millis = reset_at_millis;
        state.unconfirmed = false;
        trace!(
            target: "restlanes::bucket",
            bucket = %self.id,
            limit,
            remaining,
            reset_after_ms = duration_to_millis(reset_after),
            "bucket updated from response headers"
        );
    }

    /// Drain the bucket until at least `duration` from now (bucket-scoped 429).
    pub fn lock_for(&self, duration: Duration) {
        let until = self.clock.deadline_millis(duration);
        let mut state = self.state();
        state.remaining = 0;
        state.reset_at_millis = state.reset_at_millis.max(until);
        state.unconfirmed = false;
    }

    pub fn time_until_reset(&self) -> Duration {
        let now = self.clock.now_millis();
        Duration::from_millis(self.state().reset_at_millis.saturating_sub(now))
    }

    pub fn snapshot(&self) -> BucketSnapshot {
        let resets_in = self.time_until_reset();
        let state = self.state();
        BucketSnapshot {
            id: self.id,
            limit: state.limit,
            remaining: state.remaining,
            reset_after: state.reset_after,
            resets_in,
            in_flight: state.in_flight,
        }
    }
}

/// Lazily populated map from bucket identity to bucket. Buckets live as long
/// as the registry.
#[derive(Debug)]
pub struct BucketRegistry {
    buckets: RwLock<HashMap<BucketId, Arc<RateLimitBucket>>>,
    clock: Arc<dyn Clock>,
}

impl BucketRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { buckets: RwLock::new(HashMap::new()), clock }
    }

    /// Look up the bucket for `id`, creating it on first use.
    pub fn get_or_create(&self, id: BucketId) -> Arc<RateLimitBucket> {
        if let Some(bucket) = self.get(id) {
            return bucket;
        }
        let mut map = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        map.entry(id)
            .or_insert_with(|| {
                trace!(target: "restlanes::bucket", bucket = %id, "bucket created");
                Arc::new(RateLimitBucket::new(id, self.clock.clone()))
            })
            .clone()
    }

    pub fn get(&self, id: BucketId) -> Option<Arc<RateLimitBucket>> {
        let map = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        map.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot every bucket, sorted by identity.
    pub fn snapshot(&self) -> Vec<BucketSnapshot> {
        let map = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<_> = map.values().map(|b| b.snapshot()).collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::route::{resolve, MajorId, Route};

    fn bucket() -> (RateLimitBucket, ManualClock) {
        let clock = ManualClock::new();
        let id = resolve(Route::GuildsSidRoles, Some(MajorId(42)));
        (RateLimitBucket::new(id, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn unknown_bucket_grants_without_limit() {
        let (bucket, _) = bucket();
        for _ in 0..10 {
            assert_eq!(bucket.try_acquire(), Acquire::Granted { remaining: None });
        }
    }

    #[test]
    fn roles_scenario_blocks_sixth_call_until_reset() {
        let (bucket, clock) = bucket();
        assert!(bucket.try_acquire().is_granted());
        bucket.update(5, 4, Duration::from_secs(10));

        for expected in (0..4).rev() {
            assert_eq!(bucket.try_acquire(), Acquire::Granted { remaining: Some(expected) });
        }
        assert_eq!(bucket.try_acquire(), Acquire::Exhausted { wait: Duration::from_secs(10) });

        clock.advance(Duration::from_secs(4));
        assert_eq!(bucket.try_acquire(), Acquire::Exhausted { wait: Duration::from_secs(6) });
        assert_eq!(bucket.time_until_reset(), Duration::from_secs(6));

        clock.advance(Duration::from_secs(6));
        assert_eq!(bucket.try_acquire(), Acquire::Granted { remaining: Some(4) });
    }

    #[test]
    fn grants_per_window_never_exceed_limit() {
        let (bucket, clock) = bucket();
        bucket.update(3, 3, Duration::from_secs(1));

        for _window in 0..5 {
            let granted = (0..10).filter(|_| bucket.try_acquire().is_granted()).count();
            assert_eq!(granted, 3);
            for _ in 0..granted {
                bucket.complete();
            }
            clock.advance(bucket.time_until_reset());
        }
    }

    #[test]
    fn local_window_is_not_renewed_while_its_grants_are_in_flight() {
        let (bucket, clock) = bucket();
        bucket.update(2, 0, Duration::from_millis(100));
        clock.advance(Duration::from_millis(100));

        // one local refill
        assert!(bucket.try_acquire().is_granted());
        assert!(bucket.try_acquire().is_granted());
        assert_eq!(bucket.try_acquire(), Acquire::Exhausted { wait: Duration::from_millis(100) });

        // the window lapses but neither request has come back
        for _ in 0..5 {
            clock.advance(Duration::from_millis(100));
            assert_eq!(bucket.try_acquire(), Acquire::Exhausted { wait: Duration::from_millis(100) });
        }
        assert_eq!(bucket.snapshot().in_flight, 2);

        // the server confirms a fresh window
        bucket.update(2, 1, Duration::from_millis(100));
        bucket.complete();
        assert_eq!(bucket.try_acquire(), Acquire::Granted { remaining: Some(0) });
    }

    #[test]
    fn unconfirmed_window_reopens_once_grants_complete() {
        let (bucket, clock) = bucket();
        bucket.update(1, 0, Duration::from_millis(200));
        clock.advance(Duration::from_millis(200));
        assert!(bucket.try_acquire().is_granted());

        clock.advance(Duration::from_millis(200));
        assert!(!bucket.try_acquire().is_granted());

        // completed without rate-limit headers (error, transport failure, cancel)
        bucket.complete();
        assert_eq!(bucket.try_acquire(), Acquire::Granted { remaining: Some(0) });
        assert_eq!(bucket.snapshot().in_flight, 1);
    }

    #[test]
    fn leftover_budget_of_unconfirmed_window_stays_usable() {
        let (bucket, clock) = bucket();
        bucket.update(3, 0, Duration::from_millis(100));
        clock.advance(Duration::from_millis(100));
        assert_eq!(bucket.try_acquire(), Acquire::Granted { remaining: Some(2) });

        clock.advance(Duration::from_millis(300));
        assert_eq!(bucket.try_acquire(), Acquire::Granted { remaining: Some(1) });
        assert_eq!(bucket.try_acquire(), Acquire::Granted { remaining: Some(0) });
        assert!(!bucket.try_acquire().is_granted());
    }

    #[test]
    fn complete_never_underflows() {
        let (bucket, _) = bucket();
        bucket.complete();
        assert_eq!(bucket.snapshot().in_flight, 0);
        assert!(bucket.try_acquire().is_granted());
        assert_eq!(bucket.snapshot().in_flight, 1);
    }

    #[test]
    fn update_is_idempotent() {
        let (bucket, _) = bucket();
        bucket.update(5, 2, Duration::from_secs(3));
        let first = bucket.snapshot();
        bucket.update(5, 2, Duration::from_secs(3));
        assert_eq!(bucket.snapshot(), first);
        assert_eq!(first.remaining, 2);
    }

    #[test]
    fn server_values_override_optimistic_decrements() {
        let (bucket, _) = bucket();
        bucket.update(5, 1, Duration::from_secs(3));
        assert!(bucket.try_acquire().is_granted());
        assert!(!bucket.try_acquire().is_granted());
        bucket.update(5, 3, Duration::from_secs(3));
        assert_eq!(bucket.snapshot().remaining, 3);
    }

    #[test]
    fn depleted_bucket_replenishes_after_reset() {
        let (bucket, clock) = bucket();
        bucket.update(2, 0, Duration::from_millis(500));
        assert!(!bucket.try_acquire().is_granted());
        clock.advance(Duration::from_millis(500));
        assert_eq!(bucket.try_acquire(), Acquire::Granted { remaining: Some(1) });
        assert_eq!(bucket.time_until_reset(), Duration::from_millis(500));
    }

    #[test]
    fn lock_for_blocks_unknown_bucket() {
        let (bucket, clock) = bucket();
        bucket.lock_for(Duration::from_millis(1200));
        assert_eq!(bucket.try_acquire(), Acquire::Exhausted { wait: Duration::from_millis(1200) });
        clock.advance(Duration::from_millis(1200));
        assert!(bucket.try_acquire().is_granted());
    }

    #[test]
    fn lock_for_never_shortens_reset() {
        let (bucket, _) = bucket();
        bucket.update(5, 3, Duration::from_secs(10));
        bucket.lock_for(Duration::from_secs(2));
        assert_eq!(bucket.time_until_reset(), Duration::from_secs(10));
        assert_eq!(bucket.snapshot().remaining, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_for_at_sub_millisecond_offset_never_ends_early() {
        let bucket = RateLimitBucket::new(
            resolve(Route::GuildsSidRoles, Some(MajorId(42))),
            Arc::new(crate::clock::TokioClock::default()),
        );
        tokio::time::advance(Duration::from_micros(400)).await;
        bucket.lock_for(Duration::from_millis(2));

        // 2.3ms after start: the lock began at 0.4ms and still has 0.1ms to go
        tokio::time::advance(Duration::from_micros(1_900)).await;
        assert!(!bucket.try_acquire().is_granted());

        tokio::time::advance(Duration::from_micros(700)).await;
        assert!(bucket.try_acquire().is_granted());
    }

    #[test]
    fn registry_creates_lazily_and_reuses() {
        let registry = BucketRegistry::new(Arc::new(ManualClock::new()));
        assert!(registry.is_empty());
        let id = resolve(Route::GuildsSidMembers, Some(MajorId(7)));
        let a = registry.get_or_create(id);
        let b = registry.get_or_create(id);
        assert!(Arc::ptr_eq(&a, &b));
        registry.get_or_create(resolve(Route::GuildsSidMembers, Some(MajorId(8))));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.snapshot()[0].id, id);
    }

    #[test]
    fn concurrent_acquires_never_oversubscribe() {
        let clock = ManualClock::new();
        let bucket = Arc::new(RateLimitBucket::new(
            resolve(Route::GuildsSidBans, Some(MajorId(1))),
            Arc::new(clock),
        ));
        bucket.update(50, 50, Duration::from_secs(60));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bucket = bucket.clone();
                std::thread::spawn(move || {
                    (0..20).filter(|_| bucket.try_acquire().is_granted()).count()
                })
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 50);
    }
}
