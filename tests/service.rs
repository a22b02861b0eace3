mod common;

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{config, harness, members, roles};
use futures::future::poll_fn;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{Method, StatusCode};
use restlanes::{Patch, RawResponse, RestRequest, Route, RouteDescriptor};
use serde::Serialize;
use tower_service::Service;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone)]
struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedGuard;
    fn make_writer(&'a self) -> Self::Writer {
        SharedGuard(self.0.clone())
    }
}

struct SharedGuard(Arc<Mutex<Vec<u8>>>);

impl Write for SharedGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn scheduler_serves_as_tower_service() {
    let h = harness(config());
    h.executor().respond(RawResponse::new(StatusCode::OK).with_body(r#"[{"id":"1","name":"mod"}]"#));

    let mut service = h.scheduler.clone();
    poll_fn(|cx| service.poll_ready(cx)).await.unwrap();
    let response = service.call(roles(5)).await.unwrap();

    let roles: Vec<serde_json::Value> = response.json().unwrap();
    assert_eq!(roles[0]["name"], "mod");
    assert_eq!(h.scheduler.buckets().len(), 1, "clones share one registry");
}

#[tokio::test(start_paused = true)]
async fn modify_payload_and_audit_reason_reach_executor() {
    #[derive(Serialize)]
    struct MemberUpdate {
        #[serde(skip_serializing_if = "Patch::is_absent")]
        nick: Patch<String>,
        #[serde(skip_serializing_if = "Patch::is_absent")]
        mute: Patch<bool>,
        #[serde(skip_serializing_if = "Patch::is_absent")]
        channel_id: Patch<u64>,
    }

    let h = harness(config().with_token("Bot secret"));
    let descriptor = RouteDescriptor::scoped(
        Route::GuildsSidMembersUid,
        10u64,
        Method::PATCH,
        "https://api.test/guilds/10/members/20",
    )
    .unwrap();
    let update = MemberUpdate { nick: Patch::Null, mute: Patch::Present(true), channel_id: Patch::Absent };
    let request = RestRequest::new(descriptor)
        .json(&update)
        .unwrap()
        .audit_log_reason(Some("spam in #général"))
        .unwrap();
    h.executor().respond(RawResponse::new(StatusCode::NO_CONTENT));

    let response = h.scheduler.dispatch(request).await.unwrap();
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let call = &h.executor().calls()[0];
    assert_eq!(call.method, Method::PATCH);
    assert_eq!(call.body.as_deref(), Some(&br#"{"nick":null,"mute":true}"#[..]));
    assert_eq!(call.headers[CONTENT_TYPE], "application/json");
    assert_eq!(call.headers[AUTHORIZATION], "Bot secret");
    assert_eq!(call.headers["x-audit-log-reason"], "spam in #g%C3%A9n%C3%A9ral");
}

#[tokio::test(start_paused = true)]
async fn rate_limit_waits_are_logged() {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
        .with_target(true)
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .without_time()
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let h = harness(config());
    h.executor()
        .respond(RawResponse::rate_limited(Duration::from_millis(250), false))
        .respond(RawResponse::rate_limited(Duration::from_millis(250), true));
    h.scheduler.dispatch(members(3)).await.unwrap();

    let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("restlanes::scheduler"));
    assert!(logs.contains("rate limited; retrying after server-provided delay"));
    assert!(logs.contains("retry_after_ms=250"));
    assert!(logs.contains("global rate limit hit; all buckets suspended"));
    assert!(logs.contains("bucket=guilds_sid_members:3"));
}
