//! Backoff and jitter for transient-failure retries.
//!
//! Attempt semantics: `attempt` is the 1-based number of the failure being
//! retried; `delay(0)` is zero. Exponential delays double per attempt and
//! saturate at the configured cap (or [`MAX_BACKOFF`]).
//!
//! ```rust
//! use std::time::Duration;
//! use restlanes::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(500), Duration::from_secs(4));
//! assert_eq!(backoff.delay(1), Duration::from_millis(500));
//! assert_eq!(backoff.delay(3), Duration::from_secs(2));
//! assert_eq!(backoff.delay(10), Duration::from_secs(4));
//! ```

use std::time::Duration;

use rand::{rng, Rng};
use serde::Deserialize;

/// Upper bound for any computed delay (1 hour).
pub const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Constant(Duration),
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant(delay)
    }

    pub fn exponential(base: Duration, max: Duration) -> Self {
        Backoff::Exponential { base, max }
    }

    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match *self {
            Backoff::Constant(delay) => delay.min(MAX_BACKOFF),
            Backoff::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
                let nanos = base.as_nanos().saturating_mul(2u128.saturating_pow(exponent));
                let cap = max.min(MAX_BACKOFF);
                Duration::from_nanos(nanos.min(cap.as_nanos()) as u64)
            }
        }
    }
}

/// Randomization applied on top of a backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Jitter {
    /// Exact backoff delay.
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay/2, delay]`.
    #[default]
    Equal,
}

impl Jitter {
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        match self {
            Jitter::None => delay,
            _ if millis == 0 => Duration::ZERO,
            Jitter::Full => Duration::from_millis(rng.random_range(0..=millis)),
            Jitter::Equal => Duration::from_millis(rng.random_range(millis / 2..=millis)),
        }
    }
}
