use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header::AUTHORIZATION, Request, StatusCode},
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;

use crate::config::Config;
use crate::event::{EventBus, EventKind, Interest, LogClassifier, Payload, Subscription};
use crate::ingest::LogRouter;
use crate::middleware::auth::hash_token;
use crate::store::testing::MemoryStore;
use crate::store::ServerRecord;
use crate::{create_router, AppState};

const TOKEN: &str = "s3cret-log-token";

struct Harness {
    state: AppState,
    chat: Subscription,
    store: Arc<MemoryStore>,
}

fn server(id: i64, enabled: bool) -> ServerRecord {
    ServerRecord {
        server_id: id,
        short_name: format!("us-{id}"),
        address: "127.0.0.1".to_string(),
        port: 27015,
        rcon_password: "rcon".to_string(),
        is_enabled: enabled,
    }
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::default());
    store.servers.lock().push((hash_token(TOKEN), server(1, true)));
    store.servers.lock().push((hash_token("disabled-token"), server(2, false)));

    let bus = Arc::new(EventBus::new());
    let chat = bus
        .subscribe("chat", Interest::kinds(&[EventKind::Say]), 16)
        .unwrap();

    let router = LogRouter::new(
        Arc::new(LogClassifier::new()),
        Arc::clone(&bus),
        None,
        8,
        CancellationToken::new(),
        TaskTracker::new(),
    );

    let state = AppState {
        store: store.clone(),
        router,
        bus,
        config: Config::from_lookup(|_| None).unwrap(),
    };

    Harness { state, chat, store }
}

fn log_request(token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/log")
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_submit_accepts_and_publishes() {
    let mut h = harness();
    let app = create_router(h.state.clone());

    let line = r#"L 10/19/2026 - 20:00:00: "Player One<12><[U:1:1000]><Red>" say "gg""#;
    let response = app
        .oneshot(log_request(Some(TOKEN), json!({ "lines": [line] })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(json_body(response).await["accepted"], 1);

    let event = tokio::time::timeout(Duration::from_secs(2), h.chat.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.origin.id, 1);
    assert_eq!(event.origin.name, "us-1");
    assert_eq!(event.payload, Payload::Say { message: "gg".to_string() });
    assert_eq!(h.state.router.route_count(), 1);
}

#[tokio::test]
async fn test_submit_rejects_unknown_token() {
    let h = harness();
    let app = create_router(h.state.clone());

    let response = app
        .oneshot(log_request(Some("wrong"), json!({ "lines": ["x"] })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["status"], 401);
}

#[tokio::test]
async fn test_submit_requires_token() {
    let h = harness();
    let app = create_router(h.state.clone());

    let response = app
        .oneshot(log_request(None, json!({ "lines": ["x"] })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_submit_disabled_server_forbidden() {
    let h = harness();
    let app = create_router(h.state.clone());

    let response = app
        .oneshot(log_request(Some("disabled-token"), json!({ "lines": ["x"] })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(h.state.router.route_count(), 0);
}

#[tokio::test]
async fn test_submit_rejects_empty_batch() {
    let h = harness();
    let app = create_router(h.state.clone());

    let response = app
        .oneshot(log_request(Some(TOKEN), json!({ "lines": [] })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.state.router.route_count(), 0);
}

#[tokio::test]
async fn test_store_failure_is_server_error() {
    let h = harness();
    h.store.set_failing(true);
    let app = create_router(h.state.clone());

    let response = app
        .oneshot(log_request(Some(TOKEN), json!({ "lines": ["x"] })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_health() {
    let h = harness();
    let app = create_router(h.state.clone());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["servers"], 0);
    assert_eq!(body["subscribers"][0]["name"], "chat");
}
