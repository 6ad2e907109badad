mod support;

use std::time::Duration;

use collector_core::testing::{Reply, TestHost};
use collector_core::{
    COLLECT_BEGIN, COLLECT_END, CollectorSdk, Configuration, HttpResponse, IterationOutcome,
    MAX_REFRESH_INTERVAL_MS,
};
use support::{
    CLIENT_ID, advance, config_payload, event_names, happy_host, identifier_payload, local,
    recording_callbacks, start_config,
};

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn iteration_in_flight_blocks_a_second_entry() {
    local(async {
        let host = TestHost::default();
        host.transport.route("/session", Reply::status(201, ""));
        let release = host.transport.defer("/cs/config");

        let sdk = CollectorSdk::start(start_config(), "sess-1", host.tokio_host()).expect("started");
        advance(10).await;

        let before = host.transport.requests().len();
        assert_eq!(sdk.orchestration().iterations, 1);
        assert!(sdk.orchestration().locked);

        let outcome = sdk.orchestrate_now().await;
        assert_eq!(outcome, IterationOutcome::Skipped);
        assert_eq!(host.transport.requests().len(), before);
        let snapshot = sdk.orchestration();
        assert_eq!(snapshot.reschedules, 0);
        assert_eq!(snapshot.skipped, 1);
        assert_eq!(snapshot.iterations, 1);

        let _ = release.send(HttpResponse::new(
            200,
            config_payload(false, 30_000).to_string(),
        ));
        advance(10).await;

        let snapshot = sdk.orchestration();
        assert!(!snapshot.locked);
        assert_eq!(snapshot.reschedules, 1);
        assert_eq!(snapshot.next_delay, Some(Duration::from_millis(30_000)));
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn transport_failure_still_reschedules_with_default_interval() {
    local(async {
        let host = TestHost::default();
        host.transport.route("/session", Reply::status(201, ""));
        host.transport.route("/cs/config", Reply::fail("offline"));
        host.transport.route(
            "/cs/generatecookie",
            Reply::json(&identifier_payload("fp-1")),
        );

        let sdk = CollectorSdk::start(start_config(), "sess-1", host.tokio_host()).expect("started");
        advance(50).await;

        let snapshot = sdk.orchestration();
        assert_eq!(snapshot.reschedules, 1);
        assert_eq!(snapshot.next_delay, Some(Duration::from_millis(900_000)));
        assert!(snapshot.timer_pending);
        assert_eq!(sdk.last_configuration(), Some(Configuration::default()));
        assert!(
            sdk.errors()
                .iter()
                .any(|error| error.contains("collector_request_failed:offline"))
        );
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn oversized_server_interval_is_capped_and_still_rescheduled() {
    local(async {
        let host = TestHost::default();
        host.transport.route("/session", Reply::status(201, ""));
        host.transport.route(
            "/cs/config",
            Reply::json(&config_payload(false, 5_000_000_000)),
        );

        let sdk = CollectorSdk::start(start_config(), "sess-1", host.tokio_host()).expect("started");
        advance(50).await;

        let snapshot = sdk.orchestration();
        assert!(!snapshot.locked);
        assert_eq!(snapshot.reschedules, 1);
        assert!(snapshot.timer_pending);
        assert_eq!(
            snapshot.next_delay,
            Some(Duration::from_millis(MAX_REFRESH_INTERVAL_MS))
        );
        assert_eq!(host.transport.requests_to("/cs/config").len(), 1);
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn configuration_timeout_falls_back_and_loop_continues() {
    local(async {
        let host = TestHost::default();
        host.transport.route("/session", Reply::status(201, ""));
        host.transport.route("/cs/config", Reply::Hang);
        host.transport.route(
            "/cs/generatecookie",
            Reply::json(&identifier_payload("fp-1")),
        );

        let sdk = CollectorSdk::start(start_config(), "sess-1", host.tokio_host()).expect("started");

        advance(2_900).await;
        assert_eq!(sdk.orchestration().reschedules, 0);

        advance(200).await;
        let snapshot = sdk.orchestration();
        assert_eq!(snapshot.reschedules, 1);
        assert_eq!(snapshot.next_delay, Some(Duration::from_millis(900_000)));
        assert!(
            sdk.errors()
                .iter()
                .any(|error| error.contains("collector_timeout_after_3000ms"))
        );
        assert!(host.page.live_surface("ibody").is_some());

        advance(900_000).await;
        let snapshot = sdk.orchestration();
        assert_eq!(snapshot.iterations, 2);
        assert!(snapshot.locked);
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn disabled_collection_fires_both_callbacks_without_surface() {
    local(async {
        let host = TestHost::default();
        host.transport.route("/session", Reply::status(201, ""));
        host.transport
            .route("/cs/config", Reply::json(&config_payload(false, 60_000)));
        let (callbacks, events) = recording_callbacks();

        let sdk = CollectorSdk::start(
            start_config().with_callbacks(callbacks),
            "sess-1",
            host.tokio_host(),
        )
        .expect("started");
        advance(50).await;

        assert_eq!(event_names(&events), vec![COLLECT_BEGIN, COLLECT_END]);
        let (_, params) = &events.borrow()[1];
        assert_eq!(params.get("SessionID"), Some(&serde_json::json!("sess-1")));
        assert_eq!(params.get("KountClientID"), Some(&serde_json::json!(CLIENT_ID)));
        assert!(host.page.mounts().is_empty());
        assert!(host.transport.requests_to("/cs/generatecookie").is_empty());
        assert_eq!(
            sdk.orchestration().next_delay,
            Some(Duration::from_millis(60_000))
        );
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn malformed_configuration_is_recorded_and_defaults_apply() {
    local(async {
        let host = happy_host("fp-1");
        host.transport.route("/cs/config", Reply::status(200, "{\"ttlms\":\"soon\"}"));
        // The happy config reply is queued first; consume it with a first iteration.
        let sdk = CollectorSdk::start(start_config(), "sess-1", host.tokio_host()).expect("started");
        advance(50).await;
        assert_eq!(
            sdk.orchestration().next_delay,
            Some(Duration::from_millis(60_000))
        );

        advance(60_000).await;
        assert_eq!(sdk.orchestration().iterations, 2);
        assert_eq!(sdk.last_configuration(), Some(Configuration::default()));
        assert!(
            sdk.errors()
                .iter()
                .any(|error| error.contains("collection section missing"))
        );
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn identity_wait_is_part_of_iteration_latency() {
    local(async {
        let host = TestHost::default();
        host.transport.route("/session", Reply::status(201, ""));
        host.transport
            .route("/cs/config", Reply::json(&config_payload(true, 60_000)));
        host.transport
            .route("/cs/generatecookie", Reply::json(&identifier_payload("")));

        let sdk = CollectorSdk::start(start_config(), "sess-1", host.tokio_host()).expect("started");

        advance(1_000).await;
        assert_eq!(sdk.orchestration().reschedules, 0);

        advance(1_100).await;
        assert_eq!(sdk.orchestration().reschedules, 1);
        assert!(host.page.mounts().is_empty());
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn invalid_start_activates_nothing() {
    local(async {
        let host = happy_host("fp-1");
        let result = CollectorSdk::start(
            collector_core::StartConfig::new("").with_environment("TEST"),
            "sess-1",
            host.tokio_host(),
        );
        assert_eq!(result.err(), Some(collector_core::StartError::MissingClientId));

        advance(5_000).await;
        assert!(host.transport.requests().is_empty());
        assert!(host.session_storage.item("KountSessionID").is_none());
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn dropping_the_sdk_stops_the_loop() {
    local(async {
        let host = happy_host("fp-1");
        let sdk = CollectorSdk::start(start_config(), "sess-1", host.tokio_host()).expect("started");
        advance(50).await;
        let config_requests = host.transport.requests_to("/cs/config").len();
        drop(sdk);

        advance(120_000).await;
        assert_eq!(host.transport.requests_to("/cs/config").len(), config_requests);
    })
    .await;
}
