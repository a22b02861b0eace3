#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use http::Method;
use restlanes::{
    Jitter, RecordingSleeper, RestRequest, Route, RouteDescriptor, Scheduler, SchedulerConfig,
    ScriptedExecutor,
};

pub struct Harness {
    pub scheduler: Scheduler<ScriptedExecutor>,
    pub sleeper: RecordingSleeper,
    pub start: tokio::time::Instant,
}

impl Harness {
    pub fn executor(&self) -> &ScriptedExecutor {
        self.scheduler.executor()
    }

    /// Offsets of every executor call from the harness start.
    pub fn call_offsets(&self) -> Vec<Duration> {
        self.executor().calls().iter().map(|call| call.at - self.start).collect()
    }
}

/// Backoff of 100ms doubling, no jitter, three retries.
pub fn config() -> SchedulerConfig {
    SchedulerConfig::default()
        .with_backoff(Duration::from_millis(100), Duration::from_secs(10))
        .with_jitter(Jitter::None)
        .with_max_retries(3)
}

/// Must be called from inside a paused tokio runtime.
pub fn harness(config: SchedulerConfig) -> Harness {
    harness_with(ScriptedExecutor::new(), config)
}

/// Like [`harness`], over a preconfigured executor (e.g. with latency).
pub fn harness_with(executor: ScriptedExecutor, config: SchedulerConfig) -> Harness {
    let sleeper = RecordingSleeper::new();
    let scheduler = Scheduler::builder(executor)
        .config(config)
        .sleeper(Arc::new(sleeper.clone()))
        .build()
        .expect("valid config");
    Harness { scheduler, sleeper, start: tokio::time::Instant::now() }
}

pub fn roles(guild: u64) -> RestRequest {
    let url = format!("https://api.test/guilds/{guild}/roles");
    RestRequest::new(RouteDescriptor::scoped(Route::GuildsSidRoles, guild, Method::GET, url).unwrap())
}

pub fn members(guild: u64) -> RestRequest {
    let url = format!("https://api.test/guilds/{guild}/members");
    RestRequest::new(RouteDescriptor::scoped(Route::GuildsSidMembers, guild, Method::GET, url).unwrap())
}
