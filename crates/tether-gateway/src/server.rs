// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook HTTP server built on axum.

use std::sync::Arc;

use axum::{Router, extract::DefaultBodyLimit, middleware as axum_middleware, routing::post};
use tether_audit::AuditLog;
use tether_core::{InboundUpdate, TetherError};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::auth::secret_middleware;
use crate::handlers;

/// Largest update body accepted.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Shared state for the webhook handlers.
#[derive(Clone)]
pub struct WebhookState {
    /// Feeds parsed updates to `Transport::receive`.
    pub inbound_tx: mpsc::Sender<InboundUpdate>,
    pub secret: Option<String>,
    pub audit: Arc<AuditLog>,
}

/// Routes: `POST {path}` behind the secret check. Everything else is 404.
pub fn router(path: &str, state: WebhookState) -> Router {
    Router::new()
        .route(path, post(handlers::post_update))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            secret_middleware,
        ))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn bind(host: &str, port: u16) -> Result<TcpListener, TetherError> {
    let addr = format!("{host}:{port}");
    TcpListener::bind(&addr).await.map_err(|e| {
        TetherError::transport(
            format!("failed to bind webhook listener to {addr}: {e}"),
            Some(Box::new(e)),
        )
    })
}

/// Serves until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    cancel: CancellationToken,
) -> Result<(), TetherError> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| {
            TetherError::transport(format!("webhook server error: {e}"), Some(Box::new(e)))
        })
}
