//! Rate-limit response headers and the 429 body.

use std::time::Duration;

use http::HeaderMap;
use serde::Deserialize;

pub const LIMIT: &str = "x-ratelimit-limit";
pub const REMAINING: &str = "x-ratelimit-remaining";
pub const RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const GLOBAL: &str = "x-ratelimit-global";
pub const SCOPE: &str = "x-ratelimit-scope";
pub const RETRY_AFTER: &str = "retry-after";
pub const AUDIT_LOG_REASON: &str = "x-audit-log-reason";

/// Value of `X-RateLimit-Scope` on a 429.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    /// Per-credential limit.
    User,
    /// Limit across the whole application.
    Global,
    /// Limit shared by every caller of the resource.
    Shared,
}

impl RateLimitScope {
    fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            v if v.eq_ignore_ascii_case("user") => Some(Self::User),
            v if v.eq_ignore_ascii_case("global") => Some(Self::Global),
            v if v.eq_ignore_ascii_case("shared") => Some(Self::Shared),
            _ => None,
        }
    }
}

/// Rate-limit information carried by a response. Every field is optional;
/// absent or malformed headers are treated as missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_after: Option<Duration>,
    pub global: bool,
    pub scope: Option<RateLimitScope>,
    pub retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    pub fn parse(headers: &HeaderMap) -> Self {
        let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);

        Self {
            limit: text(LIMIT).and_then(|v| v.parse().ok()),
            remaining: text(REMAINING).and_then(|v| v.parse().ok()),
            reset_after: text(RESET_AFTER).and_then(parse_seconds),
            global: text(GLOBAL).map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false),
            scope: text(SCOPE).and_then(RateLimitScope::parse),
            retry_after: text(RETRY_AFTER).and_then(parse_seconds),
        }
    }

    /// `(limit, remaining, reset_after)` when the response carried all three.
    pub fn bucket_info(&self) -> Option<(u32, u32, Duration)> {
        Some((self.limit?, self.remaining?, self.reset_after?))
    }

    pub fn is_global(&self) -> bool {
        self.global || self.scope == Some(RateLimitScope::Global)
    }
}

/// JSON body of a 429 response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RateLimitBody {
    /// Fractional seconds to wait.
    pub retry_after: f64,
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl RateLimitBody {
    pub fn parse(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }

    pub fn retry_after(&self) -> Option<Duration> {
        seconds_to_duration(self.retry_after)
    }
}

/// What a 429 asked for: how long to hold off and whether it applies to
/// every bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHit {
    pub retry_after: Duration,
    pub global: bool,
}

impl RateLimitHit {
    /// Combine header and body. The body's fractional value is preferred since
    /// the header is rounded to whole seconds; the hit is global if either says so.
    pub fn from_response(headers: &RateLimitHeaders, body: &[u8]) -> Self {
        let parsed = RateLimitBody::parse(body);
        let retry_after = parsed
            .as_ref()
            .and_then(RateLimitBody::retry_after)
            .or(headers.retry_after)
            .or(headers.reset_after)
            .unwrap_or(Duration::from_secs(1));
        let global = headers.is_global() || parsed.map(|b| b.global).unwrap_or(false);
        Self { retry_after, global }
    }
}

fn parse_seconds(value: &str) -> Option<Duration> {
    value.parse::<f64>().ok().and_then(seconds_to_duration)
}

fn seconds_to_duration(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs >= 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}
