#![forbid(unsafe_code)]

//! # restlanes
//!
//! Rate-limit-aware REST request scheduling for guild-style HTTP APIs.
//!
//! ## Features
//!
//! - **Per-route buckets** keyed by route and major parameter (guild id)
//! - **Server-authoritative accounting** from `X-RateLimit-*` headers
//! - **Global window** shared by every bucket, locked by global 429s
//! - **Exact `retry_after`** handling; callers never see intermediate 429s
//! - **Bounded retries** with exponential backoff and jitter for 5xx and transport failures
//! - **Pluggable transport and time** for deterministic tests
//!
//! ## Quick Start
//!
//! ```rust
//! use http::Method;
//! use restlanes::{RestRequest, Route, RouteDescriptor, Scheduler, ScriptedExecutor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scheduler = Scheduler::builder(ScriptedExecutor::new()).build()?;
//!
//!     let descriptor = RouteDescriptor::scoped(
//!         Route::GuildsSidMembers,
//!         81384788765712384u64,
//!         Method::GET,
//!         "https://discord.com/api/v10/guilds/81384788765712384/members",
//!     )?;
//!     let response = scheduler.dispatch(RestRequest::new(descriptor)).await?;
//!     assert!(response.status.is_success());
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod bucket;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod global;
pub mod headers;
pub mod patch;
pub mod request;
pub mod retry;
pub mod route;
pub mod scheduler;
pub mod sleeper;

// Re-exports
pub use backoff::{Backoff, Jitter};
pub use bucket::{Acquire, BucketRegistry, BucketSnapshot, RateLimitBucket};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{ConfigError, SchedulerConfig, DEFAULT_USER_AGENT};
pub use error::{RestError, TransportError};
pub use executor::{HttpExecutor, RecordedCall, ReqwestExecutor, ScriptedExecutor};
pub use global::{GlobalPermit, GlobalRateState, GlobalSnapshot};
pub use headers::{RateLimitBody, RateLimitHeaders, RateLimitHit, RateLimitScope};
pub use patch::Patch;
pub use request::{encode_audit_log_reason, RawResponse, RestRequest, RestResponse};
pub use retry::{RetryDecision, RetryPolicy};
pub use route::{resolve, BucketId, MajorId, Route, RouteDescriptor};
pub use scheduler::{Scheduler, SchedulerBuilder};
pub use sleeper::{RecordingSleeper, Sleeper, TokioSleeper};
