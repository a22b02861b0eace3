//! Request scheduler: the only component that decides when a request is sent.
//!
//! Each dispatch resolves its bucket, waits on the global window and then the
//! bucket, sends through the executor and feeds the response's rate-limit
//! headers back into the bucket. 429s lock the bucket (or, when global, every
//! bucket) for exactly the server's `retry_after` and are retried
//! transparently. 5xx and transport failures are retried with backoff.
//!
//! ```rust,no_run
//! use http::Method;
//! use restlanes::{RestRequest, Route, RouteDescriptor, Scheduler, SchedulerConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let scheduler = Scheduler::new(SchedulerConfig::default().with_token("Bot abc"))?;
//! let descriptor = RouteDescriptor::scoped(
//!     Route::GuildsSidRoles,
//!     42u64,
//!     Method::GET,
//!     "https://discord.com/api/v10/guilds/42/roles",
//! )?;
//! let roles: serde_json::Value = scheduler.dispatch(RestRequest::new(descriptor)).await?.json()?;
//! # let _ = roles;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use http::header::{AUTHORIZATION, USER_AGENT};
use http::{HeaderValue, StatusCode};
use tower_service::Service;
use tracing::{debug, warn};

use crate::bucket::{Acquire, BucketRegistry, BucketSnapshot, RateLimitBucket};
use crate::clock::{duration_to_millis, Clock, TokioClock};
use crate::config::{ConfigError, SchedulerConfig};
use crate::error::RestError;
use crate::executor::{HttpExecutor, ReqwestExecutor};
use crate::global::{GlobalRateState, GlobalSnapshot};
use crate::headers::{RateLimitHeaders, RateLimitHit};
use crate::request::{RawResponse, RestRequest, RestResponse};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::route::{resolve, MajorId, Route};
use crate::sleeper::{Sleeper, TokioSleeper};

#[derive(Debug)]
struct Shared<X> {
    executor: X,
    buckets: BucketRegistry,
    global: GlobalRateState,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    user_agent: HeaderValue,
    authorization: Option<HeaderValue>,
    config: SchedulerConfig,
}

/// Rate-limit-aware dispatcher. Cloning is cheap; clones share buckets and
/// the global window.
#[derive(Debug)]
pub struct Scheduler<X = ReqwestExecutor> {
    inner: Arc<Shared<X>>,
}

impl<X> Clone for Scheduler<X> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl Scheduler<ReqwestExecutor> {
    /// Scheduler over a pooled reqwest client, on tokio time.
    pub fn new(config: SchedulerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let executor = ReqwestExecutor::from_config(&config)?;
        Scheduler::builder(executor).config(config).build()
    }
}

impl<X: HttpExecutor> Scheduler<X> {
    pub fn builder(executor: X) -> SchedulerBuilder<X> {
        SchedulerBuilder { executor, config: SchedulerConfig::default(), clock: None, sleeper: None }
    }

    /// Send `request`, waiting out rate limits and retrying transient
    /// failures. Only the terminal outcome is returned.
    pub async fn dispatch(&self, mut request: RestRequest) -> Result<RestResponse, RestError> {
        let shared = &*self.inner;
        shared.apply_default_headers(&mut request);

        let bucket = shared.buckets.get_or_create(request.descriptor().bucket_id());
        let mut sent = 0usize;
        let mut rate_limited = 0usize;
        let mut failures = 0usize;

        loop {
            let in_flight = shared.acquire(&bucket).await;
            sent += 1;

            let response = match shared.executor.execute(&request).await {
                Ok(response) => response,
                Err(err) => {
                    drop(in_flight);
                    failures += 1;
                    shared.retry_transient(&bucket, failures, sent, None, err.into()).await?;
                    continue;
                }
            };

            let headers = RateLimitHeaders::parse(&response.headers);
            if let Some((limit, remaining, reset_after)) = headers.bucket_info() {
                bucket.update(limit, remaining, reset_after);
            }
            drop(in_flight);

            let RawResponse { status, headers: response_headers, body } = response;
            if status == StatusCode::TOO_MANY_REQUESTS {
                rate_limited += 1;
                let hit = RateLimitHit::from_response(&headers, &body);
                match shared.policy.should_retry(rate_limited, Some(status), Some(hit.retry_after)) {
                    RetryDecision::Retry(wait) => {
                        warn!(
                            target: "restlanes::scheduler",
                            bucket = %bucket.id(),
                            global = hit.global,
                            retry_after_ms = duration_to_millis(wait),
                            rate_limited,
                            "rate limited; retrying after server-provided delay"
                        );
                        if hit.global {
                            shared.global.lock_for(wait);
                        } else {
                            bucket.lock_for(wait);
                        }
                        continue;
                    }
                    RetryDecision::Fail => {
                        warn!(
                            target: "restlanes::scheduler",
                            bucket = %bucket.id(),
                            rate_limited,
                            "rate-limit retry cap reached"
                        );
                        return Err(RestError::RateLimitExceeded {
                            attempts: rate_limited,
                            retry_after: hit.retry_after,
                        });
                    }
                }
            }

            if status.is_success() {
                debug!(target: "restlanes::scheduler", bucket = %bucket.id(), %status, sent, "request completed");
                return Ok(RestResponse { status, headers: response_headers, body });
            }

            if status.is_server_error() {
                failures += 1;
                let err = RestError::ServerError { status, body };
                shared.retry_transient(&bucket, failures, sent, Some(status), err).await?;
                continue;
            }

            debug!(target: "restlanes::scheduler", bucket = %bucket.id(), %status, "client error; not retried");
            return Err(RestError::ClientError { status, body });
        }
    }

    /// State of the bucket for `(route, major)`, if it has been used.
    pub fn bucket_snapshot(&self, route: Route, major: Option<MajorId>) -> Option<BucketSnapshot> {
        self.inner.buckets.get(resolve(route, major)).map(|bucket| bucket.snapshot())
    }

    /// Every bucket seen so far, sorted by identity.
    pub fn buckets(&self) -> Vec<BucketSnapshot> {
        self.inner.buckets.snapshot()
    }

    pub fn global_snapshot(&self) -> GlobalSnapshot {
        self.inner.global.snapshot()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn executor(&self) -> &X {
        &self.inner.executor
    }
}

impl<X: HttpExecutor> Shared<X> {
    fn apply_default_headers(&self, request: &mut RestRequest) {
        let headers = request.headers_mut();
        headers.insert(USER_AGENT, self.user_agent.clone());
        if let Some(token) = &self.authorization {
            headers.entry(AUTHORIZATION).or_insert_with(|| token.clone());
        }
    }

    /// Wait until both the global window and `bucket` grant a unit.
    async fn acquire<'b>(&self, bucket: &'b RateLimitBucket) -> InFlight<'b> {
        loop {
            let permit = match self.global.try_acquire() {
                Ok(permit) => permit,
                Err(wait) => {
                    debug!(
                        target: "restlanes::scheduler",
                        bucket = %bucket.id(),
                        wait_ms = duration_to_millis(wait),
                        "global budget exhausted; waiting"
                    );
                    self.sleeper.sleep(wait).await;
                    continue;
                }
            };

            match bucket.try_acquire() {
                Acquire::Granted { remaining } => {
                    debug!(target: "restlanes::scheduler", bucket = %bucket.id(), ?remaining, "budget granted");
                    return InFlight(bucket);
                }
                Acquire::Exhausted { wait } => {
                    self.global.refund(permit);
                    debug!(
                        target: "restlanes::scheduler",
                        bucket = %bucket.id(),
                        wait_ms = duration_to_millis(wait),
                        "bucket exhausted; waiting for reset"
                    );
                    self.sleeper.sleep(wait).await;
                }
            }
        }
    }

    /// Back off before retrying a 5xx or transport failure, or return the
    /// terminal error when retries are used up.
    async fn retry_transient(
        &self,
        bucket: &RateLimitBucket,
        failures: usize,
        sent: usize,
        status: Option<StatusCode>,
        err: RestError,
    ) -> Result<(), RestError> {
        match self.policy.should_retry(failures, status, None) {
            RetryDecision::Retry(delay) => {
                warn!(
                    target: "restlanes::scheduler",
                    bucket = %bucket.id(),
                    attempt = failures,
                    delay_ms = duration_to_millis(delay),
                    error = %err,
                    "transient failure; retrying"
                );
                self.sleeper.sleep(delay).await;
                Ok(())
            }
            // no retry was ever allowed: surface the failure itself
            RetryDecision::Fail if failures == 1 => Err(err),
            RetryDecision::Fail => {
                warn!(
                    target: "restlanes::scheduler",
                    bucket = %bucket.id(),
                    attempts = sent,
                    error = %err,
                    "retries exhausted"
                );
                Err(RestError::RetryExhausted { attempts: sent, last: Box::new(err) })
            }
        }
    }
}

/// A bucket grant whose request has not finished. Dropping it, including when
/// the dispatch future is cancelled mid-request, reports completion.
struct InFlight<'a>(&'a RateLimitBucket);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.complete();
    }
}

impl<X: HttpExecutor + 'static> Service<RestRequest> for Scheduler<X> {
    type Response = RestResponse;
    type Error = RestError;
    type Future = BoxFuture<'static, Result<RestResponse, RestError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: RestRequest) -> Self::Future {
        let scheduler = self.clone();
        Box::pin(async move { scheduler.dispatch(request).await })
    }
}

/// Fluent construction of a [`Scheduler`] over any executor.
pub struct SchedulerBuilder<X> {
    executor: X,
    config: SchedulerConfig,
    clock: Option<Arc<dyn Clock>>,
    sleeper: Option<Arc<dyn Sleeper>>,
}

impl<X: HttpExecutor> SchedulerBuilder<X> {
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Clock for bucket and global windows. Defaults to [`TokioClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sleeper for every wait. Defaults to [`TokioSleeper`].
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    pub fn build(self) -> Result<Scheduler<X>, ConfigError> {
        let config = self.config;
        config.validate()?;

        let user_agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|_| ConfigError::InvalidHeader { field: "user_agent" })?;
        let authorization = match &config.token {
            Some(token) => {
                let mut value = HeaderValue::from_str(token)
                    .map_err(|_| ConfigError::InvalidHeader { field: "token" })?;
                value.set_sensitive(true);
                Some(value)
            }
            None => None,
        };

        let clock = self.clock.unwrap_or_else(|| Arc::new(TokioClock::default()));
        let sleeper = self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper));

        Ok(Scheduler {
            inner: Arc::new(Shared {
                executor: self.executor,
                buckets: BucketRegistry::new(clock.clone()),
                global: GlobalRateState::new(config.global_limit, config.global_window, clock),
                policy: config.retry_policy(),
                sleeper,
                user_agent,
                authorization,
                config,
            }),
        })
    }
}
