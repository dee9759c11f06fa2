#![allow(clippy::unwrap_used)]
// Integration tests for `SyncEngine` using wiremock for the REST
// surface and a local WebSocket listener for the push channel.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use synthetix_core::{
    Command, DeviceId, DeviceState, EngineConfig, EngineError, PushState, Session, SyncEngine,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn patch(value: serde_json::Value) -> DeviceState {
    serde_json::from_value(value).unwrap()
}

fn devices_body() -> serde_json::Value {
    json!([
        {
            "id": "dev-1",
            "name": "Living Room Light",
            "device_type": "light",
            "state": { "on": false, "brightness": 50 },
            "user_id": "user-1"
        },
        {
            "id": "dev-2",
            "name": "Kitchen Socket",
            "device_type": "socket",
            "state": { "on": true },
            "user_id": "user-1"
        }
    ])
}

/// Build an engine in polling-disabled mode: HTTP only, no push
/// channel, poll interval long enough to never fire during a test.
async fn setup() -> (MockServer, SyncEngine, Session) {
    let server = MockServer::start().await;

    let mut config = EngineConfig::new(Url::parse(&server.uri()).unwrap());
    config.push_enabled = false;
    config.poll_interval = Duration::from_secs(3600);

    let session = Session::with_credential("test-token".to_string().into());
    let engine = SyncEngine::new(config, session.clone());
    (server, engine, session)
}

async fn mount_device_list(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(devices_body()))
        .mount(server)
        .await;
}

/// Poll until `pred` holds, failing the test after five seconds.
async fn wait_until(pred: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !pred() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn on_value(engine: &SyncEngine, id: &str) -> Option<bool> {
    engine
        .device(&DeviceId::from(id))
        .and_then(|d| d.state.get("on").and_then(|v| v.as_on()))
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_start_seeds_replica_in_hub_order() {
    let (server, engine, _session) = setup().await;

    Mock::given(method("GET"))
        .and(path("/devices"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(devices_body()))
        .mount(&server)
        .await;

    engine.start().await.unwrap();

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].id.as_str(), "dev-1");
    assert_eq!(snapshot[1].id.as_str(), "dev-2");
    assert!(engine.is_running().await);
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let (server, engine, _session) = setup().await;

    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(devices_body()))
        .expect(1)
        .mount(&server)
        .await;

    engine.start().await.unwrap();
    engine.start().await.unwrap();

    assert_eq!(engine.snapshot().len(), 2);
}

#[tokio::test]
async fn test_start_without_credential_fails() {
    let (_server, engine, session) = setup().await;
    session.log_out();

    let err = engine.start().await.unwrap_err();
    assert!(matches!(err, EngineError::PreconditionFailed(_)));
}

#[tokio::test]
async fn test_start_with_unresolvable_push_url_fails_cleanly() {
    // Hostless base URL: no push endpoint can be derived from it.
    let config = EngineConfig::new(Url::parse("file:///hub").unwrap());
    let session = Session::with_credential("test-token".to_string().into());
    let engine = SyncEngine::new(config, session);

    let err = engine.start().await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidConfig(_)));
    assert!(!engine.is_running().await);
    assert!(engine.snapshot().is_empty());
}

#[tokio::test]
async fn test_start_survives_failed_initial_refresh() {
    let (server, engine, _session) = setup().await;

    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    engine.start().await.unwrap();
    assert!(engine.is_running().await);
    assert!(engine.snapshot().is_empty());
}

#[tokio::test]
async fn test_stop_clears_replica() {
    let (server, engine, _session) = setup().await;
    mount_device_list(&server).await;

    engine.start().await.unwrap();
    assert_eq!(engine.snapshot().len(), 2);

    engine.stop().await;
    assert!(!engine.is_running().await);
    assert!(engine.snapshot().is_empty());
}

#[tokio::test]
async fn test_logout_stops_engine() {
    let (server, engine, session) = setup().await;
    mount_device_list(&server).await;

    engine.start().await.unwrap();
    session.log_out();

    tokio::time::timeout(Duration::from_secs(5), async {
        while engine.is_running().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("engine did not stop on logout");
    assert!(engine.snapshot().is_empty());
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_command_merges_authoritative_response() {
    let (server, engine, _session) = setup().await;
    mount_device_list(&server).await;

    Mock::given(method("POST"))
        .and(path("/devices/dev-1/command"))
        .and(body_partial_json(json!({
            "command": "set_state",
            "params": { "on": true }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "dev-1",
            "name": "Living Room Light",
            "device_type": "light",
            "state": { "on": true, "brightness": 100 },
            "user_id": "user-1"
        })))
        .mount(&server)
        .await;

    engine.start().await.unwrap();

    let command = Command::set_state(patch(json!({ "on": true })));
    engine
        .run_command(&DeviceId::from("dev-1"), command)
        .await
        .unwrap();

    let device = engine.device(&DeviceId::from("dev-1")).unwrap();
    assert_eq!(device.state.get("on").unwrap().as_on(), Some(true));
    // The response carried the hub's side effect on brightness.
    assert_eq!(
        device.state.get("brightness").unwrap().as_brightness(),
        Some(100)
    );
}

#[tokio::test]
async fn test_command_applies_optimistically_then_reverts_on_rejection() {
    let (server, engine, _session) = setup().await;
    mount_device_list(&server).await;

    Mock::given(method("POST"))
        .and(path("/devices/dev-1/command"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_string("device offline")
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    engine.start().await.unwrap();
    assert_eq!(on_value(&engine, "dev-1"), Some(false));

    let task_engine = engine.clone();
    let handle = tokio::spawn(async move {
        task_engine
            .run_command(
                &DeviceId::from("dev-1"),
                Command::set_state(patch(json!({ "on": true }))),
            )
            .await
    });

    // Visible immediately, before the hub has answered.
    wait_until(|| on_value(&engine, "dev-1") == Some(true)).await;

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, EngineError::Rejected { status: 500 }));
    assert_eq!(on_value(&engine, "dev-1"), Some(false));
}

#[tokio::test]
async fn test_revert_keeps_concurrent_updates_to_other_keys() {
    let (server, engine, _session) = setup().await;
    mount_device_list(&server).await;

    Mock::given(method("POST"))
        .and(path("/devices/dev-1/command"))
        .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(200)))
        .mount(&server)
        .await;

    engine.start().await.unwrap();

    let task_engine = engine.clone();
    let handle = tokio::spawn(async move {
        task_engine
            .run_command(
                &DeviceId::from("dev-1"),
                Command::set_state(patch(json!({ "on": true }))),
            )
            .await
    });
    wait_until(|| on_value(&engine, "dev-1") == Some(true)).await;

    assert!(handle.await.unwrap().is_err());

    // `on` reverted; `brightness` was not part of the command and
    // keeps its value.
    let device = engine.device(&DeviceId::from("dev-1")).unwrap();
    assert_eq!(device.state.get("on").unwrap().as_on(), Some(false));
    assert_eq!(
        device.state.get("brightness").unwrap().as_brightness(),
        Some(50)
    );
}

#[tokio::test]
async fn test_command_requires_started_engine() {
    let (_server, engine, _session) = setup().await;

    let err = engine
        .run_command(
            &DeviceId::from("dev-1"),
            Command::set_state(patch(json!({ "on": true }))),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PreconditionFailed(_)));
}

#[tokio::test]
async fn test_command_for_unknown_device_fails() {
    let (server, engine, _session) = setup().await;
    mount_device_list(&server).await;

    engine.start().await.unwrap();

    let err = engine
        .run_command(
            &DeviceId::from("ghost"),
            Command::set_state(patch(json!({ "on": true }))),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PreconditionFailed(_)));
}

#[tokio::test]
async fn test_stop_discards_in_flight_command_settlement() {
    let (server, engine, _session) = setup().await;
    mount_device_list(&server).await;

    Mock::given(method("POST"))
        .and(path("/devices/dev-1/command"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "id": "dev-1",
                    "name": "Living Room Light",
                    "device_type": "light",
                    "state": { "on": true },
                    "user_id": "user-1"
                }))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    engine.start().await.unwrap();

    let task_engine = engine.clone();
    let handle = tokio::spawn(async move {
        task_engine
            .run_command(
                &DeviceId::from("dev-1"),
                Command::set_state(patch(json!({ "on": true }))),
            )
            .await
    });
    wait_until(|| on_value(&engine, "dev-1") == Some(true)).await;

    engine.stop().await;
    handle.await.unwrap().unwrap();

    // The settlement arrived after stop and must not repopulate the
    // replica.
    assert!(engine.snapshot().is_empty());
}

// ── Refresh ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_refresh_replaces_replica() {
    let (server, engine, _session) = setup().await;

    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(devices_body()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "dev-3",
                "name": "New Thermostat",
                "device_type": "thermostat",
                "state": { "temperature": 21.0 },
                "user_id": "user-1"
            }
        ])))
        .mount(&server)
        .await;

    engine.start().await.unwrap();
    assert_eq!(engine.snapshot().len(), 2);

    engine.refresh().await.unwrap();

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id.as_str(), "dev-3");
}

#[tokio::test]
async fn test_refresh_failure_preserves_replica() {
    let (server, engine, _session) = setup().await;

    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(devices_body()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    engine.start().await.unwrap();

    let err = engine.refresh().await.unwrap_err();
    assert!(matches!(err, EngineError::Rejected { status: 500 }));
    assert_eq!(engine.snapshot().len(), 2);
}

// ── Push channel ────────────────────────────────────────────────────

/// Accept one WebSocket connection from the engine.
async fn accept_ws(
    listener: &tokio::net::TcpListener,
) -> tokio_tungstenite::WebSocketStream<tokio::net::TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

fn update_frame(device_id: &str, state: serde_json::Value) -> tokio_tungstenite::tungstenite::Message {
    let text = json!({
        "event": "device_update",
        "device_id": device_id,
        "state": state
    })
    .to_string();
    tokio_tungstenite::tungstenite::Message::Text(text.into())
}

async fn setup_with_push(push_url: Url) -> (MockServer, SyncEngine) {
    let server = MockServer::start().await;
    mount_device_list(&server).await;

    let mut config = EngineConfig::new(Url::parse(&server.uri()).unwrap());
    config.push_url = Some(push_url);
    config.reconnect_delay = Duration::from_millis(100);

    let session = Session::with_credential("test-token".to_string().into());
    let engine = SyncEngine::new(config, session);
    (server, engine)
}

#[tokio::test]
async fn test_push_update_merges_into_replica() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        ws.send(update_frame("dev-1", json!({ "on": true }))).await.unwrap();
        // Hold the connection open until the engine goes away.
        while ws.next().await.is_some() {}
    });

    let push_url = Url::parse(&format!("ws://{addr}/ws/devices")).unwrap();
    let (_server, engine) = setup_with_push(push_url).await;

    engine.start().await.unwrap();
    wait_until(|| on_value(&engine, "dev-1") == Some(true)).await;

    // Only the named key changed.
    let device = engine.device(&DeviceId::from("dev-1")).unwrap();
    assert_eq!(
        device.state.get("brightness").unwrap().as_brightness(),
        Some(50)
    );

    engine.stop().await;
}

#[tokio::test]
async fn test_push_update_for_unknown_device_is_ignored() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        ws.send(update_frame("ghost", json!({ "on": true }))).await.unwrap();
        ws.send(update_frame("dev-2", json!({ "on": false }))).await.unwrap();
        while ws.next().await.is_some() {}
    });

    let push_url = Url::parse(&format!("ws://{addr}/ws/devices")).unwrap();
    let (_server, engine) = setup_with_push(push_url).await;

    engine.start().await.unwrap();
    // The second frame proves the first was processed and dropped.
    wait_until(|| on_value(&engine, "dev-2") == Some(false)).await;

    assert!(engine.device(&DeviceId::from("ghost")).is_none());
    assert_eq!(engine.snapshot().len(), 2);

    engine.stop().await;
}

#[tokio::test]
async fn test_push_reconnects_after_connection_drop() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        // First connection delivers one update, then drops.
        let mut ws = accept_ws(&listener).await;
        ws.send(update_frame("dev-1", json!({ "brightness": 75 }))).await.unwrap();
        ws.close(None).await.unwrap();
        drop(ws);

        // The engine comes back after the reconnect delay.
        let mut ws = accept_ws(&listener).await;
        ws.send(update_frame("dev-1", json!({ "on": true }))).await.unwrap();
        while ws.next().await.is_some() {}
    });

    let push_url = Url::parse(&format!("ws://{addr}/ws/devices")).unwrap();
    let (_server, engine) = setup_with_push(push_url).await;

    engine.start().await.unwrap();

    wait_until(|| {
        engine
            .device(&DeviceId::from("dev-1"))
            .and_then(|d| d.state.get("brightness").and_then(|v| v.as_brightness()))
            == Some(75)
    })
    .await;
    wait_until(|| on_value(&engine, "dev-1") == Some(true)).await;

    engine.stop().await;
}

/// Wait for the push channel to reach a state matching `pred`.
async fn wait_for_push_state(
    rx: &mut tokio::sync::watch::Receiver<PushState>,
    pred: impl FnMut(&PushState) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("push state not reached in time")
        .expect("engine dropped");
}

#[tokio::test]
async fn test_push_state_machine_reconnects_after_delay_and_stops_disconnected() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let push_url = Url::parse(&format!("ws://{addr}/ws/devices")).unwrap();
    let (_server, engine) = setup_with_push(push_url).await;
    let mut state_rx = engine.push_state();
    assert_eq!(*state_rx.borrow(), PushState::Disconnected);

    engine.start().await.unwrap();

    let ws = accept_ws(&listener).await;
    wait_for_push_state(&mut state_rx, |s| *s == PushState::Connected).await;

    // Drop the connection server-side and watch the machine schedule a
    // reconnect with the configured delay.
    let dropped_at = std::time::Instant::now();
    drop(ws);
    wait_for_push_state(&mut state_rx, |s| {
        matches!(s, PushState::Reconnecting { delay } if *delay == Duration::from_millis(100))
    })
    .await;

    // The next connection arrives only after the delay has elapsed.
    let _ws = accept_ws(&listener).await;
    assert!(dropped_at.elapsed() >= Duration::from_millis(100));
    wait_for_push_state(&mut state_rx, |s| *s == PushState::Connected).await;

    engine.stop().await;
    wait_for_push_state(&mut state_rx, |s| *s == PushState::Disconnected).await;

    // No reconnect attempts after stop, even past the delay.
    let further = tokio::time::timeout(Duration::from_millis(300), listener.accept()).await;
    assert!(further.is_err(), "push channel reconnected after stop");
}

// ── Streams ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stream_observes_replica_changes() {
    let (server, engine, _session) = setup().await;
    mount_device_list(&server).await;

    Mock::given(method("POST"))
        .and(path("/devices/dev-2/command"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let mut stream = engine.subscribe();
    engine.start().await.unwrap();

    assert!(stream.changed().await);
    assert_eq!(stream.current_and_mark().len(), 2);

    engine
        .run_command(
            &DeviceId::from("dev-2"),
            Command::set_state(patch(json!({ "on": false }))),
        )
        .await
        .unwrap();

    assert!(stream.changed().await);
    let snapshot = stream.current();
    assert_eq!(
        snapshot[1].state.get("on").unwrap().as_on(),
        Some(false)
    );
}
