mod support;

use collector_core::stores::SESSION_ID_KEY;
use collector_core::testing::{RecordingPage, Reply, TestHost};
use collector_core::{AttachOptions, CollectorSdk, HttpResponse, MemoryStorage, SessionTransition};
use support::{
    advance, config_payload, identifier_payload, local, route_happy, start_config,
};

fn host_with_stored_session(stored: &str) -> TestHost {
    let host = TestHost::default()
        .with_session_storage(MemoryStorage::new().with_item(SESSION_ID_KEY, stored));
    route_happy(&host, "fp-1");
    host
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn changed_session_is_announced_once_with_its_predecessor() {
    local(async {
        let host = host_with_stored_session("S1");
        let _sdk = CollectorSdk::start(start_config(), "S2", host.tokio_host()).expect("started");
        advance(50).await;

        let announcements = host.transport.requests_to("/session");
        assert_eq!(announcements.len(), 1);
        assert!(announcements[0].url.ends_with("/session/S2?previousSessionID=S1"));
        assert_eq!(host.session_storage.item(SESSION_ID_KEY).as_deref(), Some("S2"));
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn blank_stored_session_is_announced_as_a_change() {
    local(async {
        let host = host_with_stored_session("");
        let _sdk = CollectorSdk::start(start_config(), "S2", host.tokio_host()).expect("started");
        advance(50).await;

        let announcements = host.transport.requests_to("/session");
        assert_eq!(announcements.len(), 1);
        assert!(announcements[0].url.ends_with("/session/S2?previousSessionID="));
        assert_eq!(host.session_storage.item(SESSION_ID_KEY).as_deref(), Some("S2"));
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn unchanged_session_is_not_announced() {
    local(async {
        let host = host_with_stored_session("S1");
        let _sdk = CollectorSdk::start(start_config(), "S1", host.tokio_host()).expect("started");
        advance(50).await;

        assert!(host.transport.requests_to("/session").is_empty());
        assert_eq!(host.session_storage.item(SESSION_ID_KEY).as_deref(), Some("S1"));
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn failed_announcement_is_recorded() {
    local(async {
        let host = TestHost::default();
        route_happy(&host, "fp-1");
        host.transport.route("/session", Reply::status(503, ""));

        let sdk = CollectorSdk::start(start_config(), "S1", host.tokio_host()).expect("started");
        advance(50).await;
        assert!(sdk.errors().iter().all(|error| !error.starts_with("post session")));

        sdk.new_session("S2");
        advance(50).await;
        assert!(
            sdk.errors()
                .iter()
                .any(|error| error.starts_with("post session: collector_http_503"))
        );
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn new_session_rotates_and_reruns_collection() {
    local(async {
        let host = TestHost::default().with_session_storage(
            MemoryStorage::new()
                .with_item(SESSION_ID_KEY, "S1")
                .with_item("cx", "stale"),
        );
        route_happy(&host, "fp-1");
        let sdk = CollectorSdk::start(start_config(), "S1", host.tokio_host()).expect("started");
        advance(50).await;
        assert_eq!(host.page.mounts().len(), 1);

        let transition = sdk.new_session("S2");
        assert_eq!(
            transition,
            Some(SessionTransition::Changed {
                previous: "S1".to_string()
            })
        );
        assert_eq!(sdk.session_id(), "S2");
        assert!(host.session_storage.item("cx").is_none());
        advance(50).await;

        let announcements = host.transport.requests_to("/session");
        assert_eq!(announcements.len(), 1);
        assert!(announcements[0].url.ends_with("/session/S2?previousSessionID=S1"));
        assert_eq!(host.session_storage.item(SESSION_ID_KEY).as_deref(), Some("S2"));

        let mounts = host.page.mounts();
        assert_eq!(mounts.len(), 2);
        assert!(mounts[1].1.contains("s=S2"));
        assert_eq!(host.page.live_surface("ibody"), Some(mounts[1].1.clone()));
        assert_eq!(sdk.orchestration().iterations, 2);
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn rotation_during_identity_wait_mounts_the_new_session() {
    local(async {
        let host = TestHost::default();
        host.transport.route("/session", Reply::status(201, ""));
        host.transport
            .route("/cs/config", Reply::json(&config_payload(true, 60_000)));
        host.transport.route("/cs/storecookie", Reply::status(200, ""));
        let release = host.transport.defer("/cs/generatecookie");

        let sdk = CollectorSdk::start(start_config(), "S1", host.tokio_host()).expect("started");
        advance(10).await;
        assert!(host.page.mounts().is_empty());

        sdk.new_session("S2");
        advance(10).await;
        assert_eq!(sdk.orchestration().skipped, 1);

        let _ = release.send(HttpResponse::new(200, identifier_payload("fp-1").to_string()));
        advance(50).await;

        let mounts = host.page.mounts();
        assert_eq!(mounts.len(), 1);
        assert!(mounts[0].1.contains("s=S2"), "mounted {}", mounts[0].1);
        assert_eq!(host.page.live_surface("ibody"), Some(mounts[0].1.clone()));
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn empty_new_session_is_rejected() {
    local(async {
        let host = host_with_stored_session("S1");
        let sdk = CollectorSdk::start(start_config(), "S1", host.tokio_host()).expect("started");
        advance(50).await;
        let requests = host.transport.requests().len();

        assert_eq!(sdk.new_session("  "), None);
        assert_eq!(sdk.session_id(), "S1");
        assert!(
            sdk.errors()
                .iter()
                .any(|error| error.starts_with("new session: invalid session id"))
        );
        advance(50).await;
        assert_eq!(host.transport.requests().len(), requests);
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn attach_to_form_writes_session_into_hidden_field() {
    local(async {
        let host = TestHost::new(RecordingPage::new().with_form("checkout"));
        route_happy(&host, "fp-1");
        let sdk = CollectorSdk::start(start_config(), "sess-1", host.tokio_host()).expect("started");

        sdk.attach_to_form("checkout", &AttachOptions::default());
        assert_eq!(
            host.page.form_field("checkout", "kountDecisionPointUUID").as_deref(),
            Some("sess-1")
        );

        sdk.attach_to_form("checkout", &AttachOptions::with_custom_field_name("riskSession"));
        assert_eq!(
            host.page.form_field("checkout", "riskSession").as_deref(),
            Some("sess-1")
        );
        assert!(sdk.errors().is_empty());
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn attach_to_missing_form_records_error() {
    local(async {
        let host = TestHost::default();
        route_happy(&host, "fp-1");
        let sdk = CollectorSdk::start(start_config(), "sess-1", host.tokio_host()).expect("started");

        sdk.attach_to_form("nope", &AttachOptions::with_custom_field_name(""));
        assert!(
            sdk.errors()
                .iter()
                .any(|error| error.starts_with("attach to form: form nope is not valid"))
        );
        assert!(host.page.form_field("nope", "kountDecisionPointUUID").is_none());
    })
    .await;
}
