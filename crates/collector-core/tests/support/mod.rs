#![allow(dead_code)]

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use collector_core::testing::{Reply, TestHost};
use collector_core::{CallbackParams, CallbackRegistry, COLLECT_BEGIN, COLLECT_END, StartConfig};
use serde_json::{Value, json};

pub const ORIGIN: &str = "https://tst.kaptcha.com";
pub const CLIENT_ID: &str = "900900";

pub type Events = Rc<RefCell<Vec<(String, CallbackParams)>>>;

/// Runs `future` inside a `LocalSet` so the SDK can spawn local tasks.
pub async fn local<F: Future>(future: F) -> F::Output {
    tokio::task::LocalSet::new().run_until(future).await
}

pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

pub fn start_config() -> StartConfig {
    StartConfig::new(CLIENT_ID)
        .with_environment("TEST")
        .with_single_page_app(false)
}

/// Registry recording `collect-begin` and `collect-end` into the returned log.
pub fn recording_callbacks() -> (CallbackRegistry, Events) {
    let events: Events = Rc::new(RefCell::new(Vec::new()));
    let begin = Rc::clone(&events);
    let end = Rc::clone(&events);
    let registry = CallbackRegistry::new()
        .on(COLLECT_BEGIN, move |params| {
            begin.borrow_mut().push((COLLECT_BEGIN.to_string(), params));
        })
        .on(COLLECT_END, move |params| {
            end.borrow_mut().push((COLLECT_END.to_string(), params));
        });
    (registry, events)
}

pub fn event_names(events: &Events) -> Vec<String> {
    events.borrow().iter().map(|(name, _)| name.clone()).collect()
}

pub fn config_payload(collect: bool, ttl_ms: u64) -> Value {
    json!({
        "ttlms": ttl_ms,
        "collection": {
            "collect": collect,
            "feature_flags": {
                "app": true, "battery": true, "browser": true,
                "exp": true, "page": true, "ui": true
            }
        }
    })
}

pub fn identifier_payload(value: &str) -> Value {
    json!({ "value": value })
}

/// Host answering the session, config and identifier endpoints successfully.
pub fn happy_host(issued_identifier: &str) -> TestHost {
    let host = TestHost::default();
    route_happy(&host, issued_identifier);
    host
}

pub fn route_happy(host: &TestHost, issued_identifier: &str) {
    host.transport.route("/session", Reply::status(201, ""));
    host.transport
        .route("/cs/config", Reply::json(&config_payload(true, 60_000)));
    host.transport.route(
        "/cs/generatecookie",
        Reply::json(&identifier_payload(issued_identifier)),
    );
    host.transport.route("/cs/storecookie", Reply::status(200, ""));
}
