// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook update handler.

use std::time::Duration;

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use teloxide::types::Update;
use tether_audit::{AuditEvent, AuditEventType};
use tether_telegram::to_inbound;

use crate::server::WebhookState;

/// How long a request waits for room in the inbound queue.
pub const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// `POST {path}`: parse one update and queue it.
///
/// Malformed bodies are acknowledged with 400 so Telegram does not retry
/// them; a full queue answers 503 so it does.
pub async fn post_update(State(state): State<WebhookState>, body: Bytes) -> Response {
    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            tracing::warn!(error = %e, "invalid webhook payload");
            state
                .audit
                .record(
                    AuditEvent::new(AuditEventType::WebhookError)
                        .detail("reason", "invalid payload")
                        .detail("error", e.to_string()),
                )
                .await;
            return (StatusCode::BAD_REQUEST, Json(json!({"ok": false}))).into_response();
        }
    };

    let inbound = to_inbound(&update);
    let update_id = inbound.update_id;
    match tokio::time::timeout(ENQUEUE_TIMEOUT, state.inbound_tx.send(inbound)).await {
        Ok(Ok(())) => {
            tracing::debug!(update_id, "webhook update queued");
            Json(json!({"ok": true})).into_response()
        }
        Ok(Err(_)) | Err(_) => {
            tracing::warn!(update_id, "webhook update could not be queued");
            state
                .audit
                .record(
                    AuditEvent::new(AuditEventType::WebhookError)
                        .detail("reason", "queue unavailable")
                        .detail("update_id", update_id),
                )
                .await;
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"ok": false}))).into_response()
        }
    }
}
