// Integration tests for the bridge HTTP surface over a loopback channel

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use gatewatch::api::{create_bridge_router, BridgeState};
use gatewatch::channel::{ChannelEvent, ChannelPayload, InboundMessage, MemoryChannel};
use gatewatch::config::SessionConfig;
use gatewatch::dispatch::OutboundDispatcher;
use gatewatch::session::{InboundHandler, SessionManager, SessionState};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const NUMBER: &str = "919876543210@c.us";

struct DiscardReplies;

#[async_trait]
impl InboundHandler for DiscardReplies {
    async fn handle(&self, _message: InboundMessage) {}
}

fn create_test_app(channel: &MemoryChannel) -> (Router, Arc<SessionManager>) {
    create_test_app_with_origins(channel, &[])
}

fn create_test_app_with_origins(
    channel: &MemoryChannel,
    allowed_origins: &[String],
) -> (Router, Arc<SessionManager>) {
    let session = SessionManager::new(
        SessionConfig::default(),
        Arc::new(channel.clone()),
        Arc::new(DiscardReplies),
    );
    let dispatcher = Arc::new(OutboundDispatcher::new(
        Arc::clone(&session),
        Duration::from_secs(5),
    ));
    let router = create_bridge_router(
        BridgeState {
            session: Arc::clone(&session),
            dispatcher,
        },
        allowed_origins,
    );
    (router, session)
}

async fn wait_for_state(session: &SessionManager, state: SessionState) {
    let mut rx = session.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.state == state))
        .await
        .expect("timed out waiting for session state")
        .unwrap();
}

async fn ready_app(channel: &MemoryChannel) -> Router {
    let (app, session) = create_test_app(channel);
    session.initialize().await.unwrap();
    channel.emit(ChannelEvent::Authorized).await;
    wait_for_state(&session, SessionState::Ready).await;
    app
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    read_json(response).await
}

async fn post_json(app: &Router, uri: &str, body: String) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("Content-Type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    read_json(response).await
}

async fn post_empty(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    read_json(response).await
}

async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

/// GET /pairing exposes the artifact while awaiting authorization, /qr too.
#[tokio::test]
async fn test_pairing_status_flow() {
    let channel = MemoryChannel::new();
    let (app, session) = create_test_app(&channel);

    let (status, body) = get(&app, "/pairing").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"artifact": null, "ready": false, "state": "UNINITIALIZED"}));

    session.initialize().await.unwrap();
    channel
        .emit(ChannelEvent::Pairing { code: "2@XyZ".into() })
        .await;
    let mut rx = session.subscribe();
    rx.wait_for(|s| s.pending_artifact.is_some()).await.unwrap();

    let (_, body) = get(&app, "/qr").await;
    assert_eq!(body["qr"], "2@XyZ");
    assert_eq!(body["artifact"], "2@XyZ");
    assert_eq!(body["ready"], false);
    assert_eq!(body["state"], "AWAITING_AUTH");

    channel.emit(ChannelEvent::Authorized).await;
    wait_for_state(&session, SessionState::Ready).await;

    let (_, body) = get(&app, "/pairing").await;
    assert_eq!(body, json!({"artifact": null, "ready": true, "state": "READY"}));
    let (_, body) = get(&app, "/qr").await;
    assert_eq!(body["qr"], Value::Null);

    let (_, health) = get(&app, "/health").await;
    assert_eq!(health, json!({"state": "READY", "ready": true}));
}

/// POST /send before authorization is refused without touching the channel.
#[tokio::test]
async fn test_send_not_ready() {
    let channel = MemoryChannel::new();
    channel.register(NUMBER);
    let (app, session) = create_test_app(&channel);
    session.initialize().await.unwrap();

    let (status, body) = post_json(
        &app,
        "/send",
        json!({"number": "919876543210", "message": "hi"}).to_string(),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "NOT_READY");
    assert_eq!(channel.transport_calls(), 0);
}

/// POST /send delivers text to the normalized recipient.
#[tokio::test]
async fn test_send_text() {
    let channel = MemoryChannel::new();
    channel.register(NUMBER);
    let app = ready_app(&channel).await;

    let (status, body) = post_json(
        &app,
        "/send",
        json!({"number": "+91 (98765) 43210", "message": "Unregistered guest at Gate 2"})
            .to_string(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));
    let delivered = channel.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0.as_str(), NUMBER);
}

/// Unregistered numbers and missing media come back as 422 with a code.
#[tokio::test]
async fn test_send_rejections() {
    let channel = MemoryChannel::new();
    channel.register(NUMBER);
    let app = ready_app(&channel).await;

    let (status, body) = post_json(
        &app,
        "/send",
        json!({"number": "15550001111", "message": "hi"}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "UNREGISTERED_RECIPIENT");
    assert!(body["error"].as_str().unwrap().contains("15550001111@c.us"));

    let (status, body) = post_json(
        &app,
        "/send-media",
        json!({"number": NUMBER, "mediaPath": "/nonexistent/snapshot.jpg"}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "MEDIA_UNAVAILABLE");
    assert!(channel.delivered().is_empty());
}

/// POST /send-media hands the file bytes and caption over in one payload.
#[tokio::test]
async fn test_send_media() {
    let channel = MemoryChannel::new();
    channel.register(NUMBER);
    let app = ready_app(&channel).await;

    let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
    file.write_all(b"\x89PNG snapshot").unwrap();

    let (status, body) = post_json(
        &app,
        "/send-media",
        json!({
            "number": "919876543210",
            "mediaPath": file.path(),
            "caption": "Camera 1, 09:30"
        })
        .to_string(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    match &channel.delivered()[0].1 {
        ChannelPayload::Media(media) => {
            assert_eq!(media.mime_type, "image/png");
            assert_eq!(media.data, b"\x89PNG snapshot".to_vec());
            assert_eq!(media.caption.as_deref(), Some("Camera 1, 09:30"));
        }
        other => panic!("expected media, got {:?}", other),
    }
}

/// Malformed bodies are 400, never a transport call.
#[tokio::test]
async fn test_malformed_body() {
    let channel = MemoryChannel::new();
    let app = ready_app(&channel).await;

    let (status, body) = post_json(&app, "/send", r#"{"number": "1"}"#.to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let (status, _) = post_json(&app, "/send-media", "not json".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(channel.transport_calls(), 0);
}

/// POST /broadcast reports per recipient and keeps going past failures.
#[tokio::test]
async fn test_broadcast() {
    let channel = MemoryChannel::new();
    channel.register(NUMBER);
    channel.register("447700900123@c.us");
    let app = ready_app(&channel).await;

    let (status, body) = post_json(
        &app,
        "/broadcast",
        json!({
            "numbers": ["919876543210", "15550001111", "+44 7700 900123"],
            "message": "Evacuation drill at 15:00"
        })
        .to_string(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0], json!({"number": "919876543210", "success": true}));
    assert_eq!(results[1]["success"], false);
    assert_eq!(results[1]["code"], "UNREGISTERED_RECIPIENT");
    assert_eq!(results[2]["success"], true);
    assert_eq!(channel.delivered().len(), 2);

    let (status, _) = post_json(
        &app,
        "/broadcast",
        json!({"numbers": [NUMBER]}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// After the transport closes, POST /initialize opens a fresh session that
/// waits for pairing again.
#[tokio::test]
async fn test_initialize_after_connection_lost() {
    let channel = MemoryChannel::new();
    let (app, session) = create_test_app(&channel);
    session.initialize().await.unwrap();
    channel.emit(ChannelEvent::Authorized).await;
    wait_for_state(&session, SessionState::Ready).await;

    channel.emit(ChannelEvent::Closed { reason: None }).await;
    wait_for_state(&session, SessionState::Uninitialized).await;
    let (_, health) = get(&app, "/health").await;
    assert_eq!(health["state"], "UNINITIALIZED");

    let (status, body) = post_empty(&app, "/initialize").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "AWAITING_AUTH");
    assert_eq!(body["ready"], false);
    assert_eq!(channel.open_count(), 2);

    // Already live: a second call opens nothing new
    let (status, _) = post_empty(&app, "/initialize").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(channel.open_count(), 2);
}

/// A transport that cannot open comes back as 502 TRANSPORT_UNAVAILABLE.
#[tokio::test]
async fn test_initialize_open_failure() {
    let channel = MemoryChannel::new();
    channel.set_fail_open(true);
    let (app, _session) = create_test_app(&channel);

    let (status, body) = post_empty(&app, "/initialize").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "TRANSPORT_UNAVAILABLE");

    let (_, health) = get(&app, "/health").await;
    assert_eq!(health["state"], "UNINITIALIZED");
}

async fn preflight(app: &Router, origin: &str) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/send")
                .header("Origin", origin)
                .header("Access-Control-Request-Method", "POST")
                .header("Access-Control-Request-Headers", "content-type")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn get_with_origin(app: &Router, uri: &str, origin: &str) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header("Origin", origin)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

/// Without configured origins no page can read bridge responses cross-origin.
#[tokio::test]
async fn test_no_cors_by_default() {
    let channel = MemoryChannel::new();
    let (app, _session) = create_test_app(&channel);

    let response = get_with_origin(&app, "/pairing", "https://evil.example").await;
    assert!(response
        .headers()
        .get("access-control-allow-origin")
        .is_none());

    let response = preflight(&app, "https://evil.example").await;
    assert!(response
        .headers()
        .get("access-control-allow-origin")
        .is_none());
}

/// Configured origins are echoed back; anything else gets no grant.
#[tokio::test]
async fn test_cors_only_for_allowed_origin() {
    let channel = MemoryChannel::new();
    let (app, _session) =
        create_test_app_with_origins(&channel, &["http://localhost:5173".to_string()]);

    let response = preflight(&app, "http://localhost:5173").await;
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "http://localhost:5173"
    );

    let response = get_with_origin(&app, "/qr", "http://localhost:5173").await;
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "http://localhost:5173"
    );

    let response = get_with_origin(&app, "/qr", "https://evil.example").await;
    assert!(response
        .headers()
        .get("access-control-allow-origin")
        .is_none());

    let response = preflight(&app, "https://evil.example").await;
    assert!(response
        .headers()
        .get("access-control-allow-origin")
        .is_none());
}

/// Dry run: the session authorizes on its own and sends go to the loopback.
#[tokio::test]
async fn test_dry_run_bridge() {
    let channel = MemoryChannel::dry_run();
    let (app, session) = create_test_app(&channel);

    let (status, _) = post_empty(&app, "/initialize").await;
    assert_eq!(status, StatusCode::OK);
    wait_for_state(&session, SessionState::Ready).await;

    let (status, body) = post_json(
        &app,
        "/send",
        json!({"number": "+1 555 000 1111", "message": "Drill: Gate 2 open"}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(channel.delivered()[0].0.as_str(), "15550001111@c.us");
}
