// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tether_audit::{AuditEventType, AuditLog, read_events};
use tether_core::{InboundUpdate, UpdateContent};
use tether_gateway::auth::SECRET_HEADER;
use tether_gateway::server::{MAX_BODY_BYTES, WebhookState, router};
use tether_security::Redactor;
use tokio::sync::mpsc;
use tower::ServiceExt;

const PATH: &str = "/telegram/webhook";
const SECRET: &str = "a-long-enough-webhook-secret";

struct Fixture {
    dir: tempfile::TempDir,
    app: axum::Router,
    rx: mpsc::Receiver<InboundUpdate>,
}

fn fixture(secret: Option<&str>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(AuditLog::new(
        dir.path().join("audit.jsonl"),
        1 << 20,
        Redactor::new(),
    ));
    let (tx, rx) = mpsc::channel(8);
    let app = router(
        PATH,
        WebhookState {
            inbound_tx: tx,
            secret: secret.map(String::from),
            audit,
        },
    );
    Fixture { dir, app, rx }
}

fn update_body() -> String {
    json!({
        "update_id": 77,
        "message": {
            "message_id": 1,
            "date": 1700000000i64,
            "chat": {"id": 456, "type": "private", "first_name": "Op"},
            "from": {"id": 123, "is_bot": false, "first_name": "Op"},
            "text": "/status",
        }
    })
    .to_string()
}

fn post(path: &str, secret: Option<&str>, body: impl Into<Body>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header(SECRET_HEADER, secret);
    }
    builder.body(body.into()).unwrap()
}

fn webhook_errors(f: &Fixture) -> usize {
    read_events(f.dir.path().join("audit.jsonl"))
        .unwrap_or_default()
        .iter()
        .filter(|e| e.event_type == AuditEventType::WebhookError)
        .count()
}

#[tokio::test]
async fn valid_secret_queues_the_update() {
    let mut f = fixture(Some(SECRET));
    let resp = f
        .app
        .clone()
        .oneshot(post(PATH, Some(SECRET), update_body()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
    assert_eq!(serde_json::from_slice::<serde_json::Value>(&body).unwrap(), json!({"ok": true}));

    let update = f.rx.try_recv().unwrap();
    assert_eq!(update.update_id, 77);
    assert_eq!(update.content, UpdateContent::Text("/status".into()));
    assert_eq!(webhook_errors(&f), 0);
}

#[tokio::test]
async fn missing_or_wrong_secret_is_rejected_without_parsing() {
    let mut f = fixture(Some(SECRET));
    for secret in [None, Some("wrong-secret")] {
        let resp = f
            .app
            .clone()
            .oneshot(post(PATH, secret, update_body()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
    assert!(f.rx.try_recv().is_err());
    assert_eq!(webhook_errors(&f), 2);
}

#[tokio::test]
async fn unconfigured_secret_rejects_everything() {
    let mut f = fixture(None);
    let resp = f
        .app
        .clone()
        .oneshot(post(PATH, Some(SECRET), update_body()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(f.rx.try_recv().is_err());
}

#[tokio::test]
async fn malformed_body_is_a_bad_request() {
    let mut f = fixture(Some(SECRET));
    let resp = f
        .app
        .clone()
        .oneshot(post(PATH, Some(SECRET), "{not json"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(f.rx.try_recv().is_err());
    assert_eq!(webhook_errors(&f), 1);
}

#[tokio::test]
async fn oversized_body_is_refused() {
    let f = fixture(Some(SECRET));
    let resp = f
        .app
        .clone()
        .oneshot(post(PATH, Some(SECRET), "x".repeat(MAX_BODY_BYTES + 1)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn other_paths_are_not_found() {
    let f = fixture(Some(SECRET));
    let resp = f
        .app
        .clone()
        .oneshot(post("/elsewhere", Some(SECRET), update_body()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn closed_queue_answers_service_unavailable() {
    let f = fixture(Some(SECRET));
    let Fixture { dir, app, rx } = f;
    drop(rx);
    let resp = app
        .oneshot(post(PATH, Some(SECRET), update_body()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let events = read_events(dir.path().join("audit.jsonl")).unwrap();
    assert_eq!(events[0].event_type, AuditEventType::WebhookError);
}
