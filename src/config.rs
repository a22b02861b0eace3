//! Scheduler configuration.
//!
//! Built fluently from [`SchedulerConfig::default`] or deserialized from JSON
//! (durations in milliseconds). Values are checked by [`SchedulerConfig::validate`],
//! which [`crate::SchedulerBuilder::build`] always calls.

use std::time::Duration;

use http::HeaderValue;
use serde::{Deserialize, Deserializer};

use crate::backoff::{Backoff, Jitter};
use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str =
    concat!("DiscordBot (https://crates.io/crates/restlanes, ", env!("CARGO_PKG_VERSION"), ")");

/// Errors produced while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("global_limit must be > 0 when set")]
    ZeroGlobalLimit,
    #[error("global_window must be > 0")]
    ZeroGlobalWindow,
    #[error("max_backoff ({max:?}) must be >= base_backoff ({base:?})")]
    MaxBackoffBelowBase { base: Duration, max: Duration },
    #[error("{field} is not a valid header value")]
    InvalidHeader { field: &'static str },
    #[error("request_timeout must be > 0 when set")]
    ZeroTimeout,
    #[error("invalid configuration document: {0}")]
    Parse(String),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Sent as `User-Agent` on every request.
    pub user_agent: String,
    /// Default `Authorization` value for requests that carry none.
    pub token: Option<String>,
    /// Retries on 5xx and transport failures.
    pub max_retries: usize,
    #[serde(rename = "base_backoff_ms", deserialize_with = "millis")]
    pub base_backoff: Duration,
    #[serde(rename = "max_backoff_ms", deserialize_with = "millis")]
    pub max_backoff: Duration,
    pub jitter: Jitter,
    /// Hard cap on 429 retries per request; `None` retries until success.
    pub max_rate_limit_retries: Option<usize>,
    /// Requests per `global_window` across all buckets; `None` disables the local window.
    pub global_limit: Option<u32>,
    #[serde(rename = "global_window_ms", deserialize_with = "millis")]
    pub global_window: Duration,
    #[serde(rename = "request_timeout_ms", deserialize_with = "optional_millis")]
    pub request_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            token: None,
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            jitter: Jitter::Equal,
            max_rate_limit_retries: None,
            global_limit: Some(50),
            global_window: Duration::from_secs(1),
            request_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl SchedulerConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(document).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.global_limit == Some(0) {
            return Err(ConfigError::ZeroGlobalLimit);
        }
        if self.global_window.is_zero() {
            return Err(ConfigError::ZeroGlobalWindow);
        }
        if self.max_backoff < self.base_backoff {
            return Err(ConfigError::MaxBackoffBelowBase {
                base: self.base_backoff,
                max: self.max_backoff,
            });
        }
        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ZeroTimeout);
        }
        if HeaderValue::from_str(&self.user_agent).is_err() {
            return Err(ConfigError::InvalidHeader { field: "user_agent" });
        }
        if let Some(token) = &self.token {
            if HeaderValue::from_str(token).is_err() {
                return Err(ConfigError::InvalidHeader { field: "token" });
            }
        }
        Ok(())
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_rate_limit_retries(mut self, cap: Option<usize>) -> Self {
        self.max_rate_limit_retries = cap;
        self
    }

    pub fn with_global_limit(mut self, limit: Option<u32>, window: Duration) -> Self {
        self.global_limit = limit;
        self.global_window = window;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Backoff::exponential(self.base_backoff, self.max_backoff),
            self.jitter,
            self.max_rate_limit_retries,
        )
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

fn optional_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
    Option::<u64>::deserialize(deserializer).map(|v| v.map(Duration::from_millis))
}
