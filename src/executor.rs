//! HTTP transport.
//!
//! Executors perform exactly one network call per `execute` and never retry;
//! all scheduling decisions belong to [`crate::Scheduler`].

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};

use crate::config::{ConfigError, SchedulerConfig};
use crate::error::TransportError;
use crate::headers;
use crate::request::{RawResponse, RestRequest};
use crate::route::{MajorId, Route};

#[async_trait]
pub trait HttpExecutor: Send + Sync + std::fmt::Debug {
    async fn execute(&self, request: &RestRequest) -> Result<RawResponse, TransportError>;
}

/// Executor backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl ReqwestExecutor {
    pub fn new(client: reqwest::Client, timeout: Option<Duration>) -> Self {
        Self { client, timeout }
    }

    pub fn from_config(config: &SchedulerConfig) -> Result<Self, ConfigError> {
        let client =
            reqwest::Client::builder().build().map_err(|e| ConfigError::Client(e.to_string()))?;
        Ok(Self::new(client, config.request_timeout))
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(&self, request: &RestRequest) -> Result<RawResponse, TransportError> {
        let descriptor = request.descriptor();
        let mut builder = self
            .client
            .request(descriptor.method().clone(), descriptor.url())
            .headers(request.headers().clone());
        if let Some(body) = request.body() {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(RawResponse { status, headers, body })
    }
}

impl RawResponse {
    pub fn new(status: StatusCode) -> Self {
        Self { status, headers: HeaderMap::new(), body: Bytes::new() }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a header; invalid values are skipped.
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_bucket(self, limit: u32, remaining: u32, reset_after: Duration) -> Self {
        self.with_header(headers::LIMIT, &limit.to_string())
            .with_header(headers::REMAINING, &remaining.to_string())
            .with_header(headers::RESET_AFTER, &format!("{:.3}", reset_after.as_secs_f64()))
    }

    /// A 429 with a JSON body carrying fractional `retry_after`.
    pub fn rate_limited(retry_after: Duration, global: bool) -> Self {
        let secs = retry_after.as_secs_f64();
        let mut response = Self::new(StatusCode::TOO_MANY_REQUESTS)
            .with_header(headers::RETRY_AFTER, &secs.ceil().to_string())
            .with_body(format!(
                r#"{{"message":"You are being rate limited.","retry_after":{secs},"global":{global}}}"#
            ));
        if global {
            response = response.with_header(headers::GLOBAL, "true");
        }
        response
    }
}

/// One call seen by a [`ScriptedExecutor`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub route: Route,
    pub major: Option<MajorId>,
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub at: tokio::time::Instant,
}

/// In-process executor answering from a queue of canned outcomes; when the
/// queue is empty it answers `200 {}`. Records every call it receives.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    latency: Duration,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait this long (on tokio time) before answering each call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push(&self, outcome: Result<RawResponse, TransportError>) -> &Self {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).push_back(outcome);
        self
    }

    pub fn respond(&self, response: RawResponse) -> &Self {
        self.push(Ok(response))
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl HttpExecutor for ScriptedExecutor {
    async fn execute(&self, request: &RestRequest) -> Result<RawResponse, TransportError> {
        let descriptor = request.descriptor();
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(RecordedCall {
            route: descriptor.route(),
            major: descriptor.major(),
            method: descriptor.method().clone(),
            url: descriptor.url().to_string(),
            headers: request.headers().clone(),
            body: request.body().cloned(),
            at: tokio::time::Instant::now(),
        });
        let next = self.script.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        next.unwrap_or_else(|| Ok(RawResponse::new(StatusCode::OK).with_body("{}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::{RateLimitHeaders, RateLimitHit};
    use crate::route::RouteDescriptor;

    #[test]
    fn bucket_headers_round_trip_through_parser() {
        let response = RawResponse::new(StatusCode::OK).with_bucket(5, 4, Duration::from_millis(1500));
        let parsed = RateLimitHeaders::parse(&response.headers);
        assert_eq!(parsed.bucket_info(), Some((5, 4, Duration::from_millis(1500))));
    }

    #[test]
    fn rate_limited_response_parses_as_hit() {
        let response = RawResponse::rate_limited(Duration::from_millis(1250), true);
        let hit = RateLimitHit::from_response(&RateLimitHeaders::parse(&response.headers), &response.body);
        assert_eq!(hit, RateLimitHit { retry_after: Duration::from_millis(1250), global: true });
    }

    #[tokio::test]
    async fn scripted_executor_replays_then_defaults() {
        let executor = ScriptedExecutor::new();
        executor.respond(RawResponse::new(StatusCode::NOT_FOUND));
        let request = RestRequest::new(
            RouteDescriptor::scoped(Route::GuildsSidInvites, 3u64, Method::GET, "http://x/guilds/3/invites")
                .unwrap(),
        );

        assert_eq!(executor.execute(&request).await.unwrap().status, StatusCode::NOT_FOUND);
        let second = executor.execute(&request).await.unwrap();
        assert_eq!(second.status, StatusCode::OK);
        assert_eq!(second.body.as_ref(), b"{}");
        assert_eq!(executor.call_count(), 2);
        assert_eq!(executor.calls()[0].major, Some(MajorId(3)));
    }
}
