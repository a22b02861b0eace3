//! Retry policy for dispatched requests.
//!
//! Semantics:
//! - 429 is flow control, not failure: retried after exactly the server's
//!   `retry_after`, without limit unless a rate-limit cap is configured.
//! - 5xx and transport failures are retried at most `max_retries` times with
//!   exponential backoff plus jitter.
//! - Any other status is terminal.
//!
//! `attempt` is the 1-based count of failures of the same kind seen so far for
//! one request, so `max_retries = 3` allows the 1st, 2nd and 3rd failure to be
//! retried and fails on the 4th.

use std::time::Duration;

use http::StatusCode;

use crate::backoff::{Backoff, Jitter};

/// Decision returned by [`RetryPolicy::should_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    Fail,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
    max_rate_limit_retries: Option<usize>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::exponential(Duration::from_millis(500), Duration::from_secs(30)),
            jitter: Jitter::Equal,
            max_rate_limit_retries: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: usize,
        backoff: Backoff,
        jitter: Jitter,
        max_rate_limit_retries: Option<usize>,
    ) -> Self {
        Self { max_retries, backoff, jitter, max_rate_limit_retries }
    }

    /// `status` is `None` for transport failures.
    pub fn should_retry(
        &self,
        attempt: usize,
        status: Option<StatusCode>,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        match status {
            Some(StatusCode::TOO_MANY_REQUESTS) => match self.max_rate_limit_retries {
                Some(cap) if attempt > cap => RetryDecision::Fail,
                _ => RetryDecision::Retry(retry_after.unwrap_or(Duration::from_secs(1))),
            },
            Some(status) if !status.is_server_error() => RetryDecision::Fail,
            _ if attempt > self.max_retries => RetryDecision::Fail,
            _ => RetryDecision::Retry(self.jitter.apply(self.backoff.delay(attempt))),
        }
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn max_rate_limit_retries(&self) -> Option<usize> {
        self.max_rate_limit_retries
    }
}
