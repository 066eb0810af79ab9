// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook transport for Tether.
//!
//! Registers the webhook with the Bot API, then serves `POST {path}` with
//! axum. Requests must carry the pre-shared secret header; accepted updates
//! are queued for [`Transport::receive`]. Replies go out through the same
//! [`TelegramSender`] the long-poll transport uses.

pub mod auth;
pub mod handlers;
pub mod server;

use std::sync::Arc;

use async_trait::async_trait;
use teloxide::Bot;
use tether_audit::AuditLog;
use tether_config::model::WebhookConfig;
use tether_core::{
    AdapterType, HealthStatus, InboundUpdate, OutboundMessage, PluginAdapter, TetherError,
    Transport,
};
use tether_telegram::{TelegramSender, register_webhook};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::server::WebhookState;

/// [`Transport`] fed by Telegram webhook deliveries.
pub struct WebhookTransport {
    bot: Bot,
    config: WebhookConfig,
    sender: TelegramSender,
    audit: Arc<AuditLog>,
    inbound_tx: Option<mpsc::Sender<InboundUpdate>>,
    inbound_rx: Mutex<mpsc::Receiver<InboundUpdate>>,
    cancel: CancellationToken,
    server_handle: Option<JoinHandle<()>>,
}

impl WebhookTransport {
    pub fn new(
        bot: Bot,
        config: WebhookConfig,
        sender: TelegramSender,
        audit: Arc<AuditLog>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(100);
        Self {
            bot,
            config,
            sender,
            audit,
            inbound_tx: Some(tx),
            inbound_rx: Mutex::new(rx),
            cancel: CancellationToken::new(),
            server_handle: None,
        }
    }
}

#[async_trait]
impl PluginAdapter for WebhookTransport {
    fn name(&self) -> &str {
        "telegram-webhook"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Transport
    }

    async fn health_check(&self) -> Result<HealthStatus, TetherError> {
        match &self.server_handle {
            None => Ok(HealthStatus::Unhealthy("server not started".to_string())),
            Some(handle) if handle.is_finished() => {
                Ok(HealthStatus::Unhealthy("server stopped".to_string()))
            }
            Some(_) => Ok(HealthStatus::Healthy),
        }
    }

    async fn shutdown(&self) -> Result<(), TetherError> {
        self.cancel.cancel();
        Ok(())
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    async fn connect(&mut self) -> Result<(), TetherError> {
        let tx = self
            .inbound_tx
            .take()
            .ok_or_else(|| TetherError::Internal("webhook transport already connected".into()))?;

        // Bind before registering so Telegram never delivers to a closed port.
        let listener = server::bind(&self.config.listen_host, self.config.listen_port).await?;
        register_webhook(&self.bot, &self.config).await?;

        let app = server::router(
            &self.config.path,
            WebhookState {
                inbound_tx: tx,
                secret: self.config.secret_token.clone(),
                audit: self.audit.clone(),
            },
        );
        let cancel = self.cancel.clone();
        self.server_handle = Some(tokio::spawn(async move {
            if let Err(e) = server::serve(listener, app, cancel).await {
                tracing::error!(error = %e, "webhook server stopped");
            }
        }));

        tracing::info!(
            host = %self.config.listen_host,
            port = self.config.listen_port,
            path = %self.config.path,
            "webhook listener started"
        );
        Ok(())
    }

    async fn send(&self, msg: OutboundMessage) -> Result<(), TetherError> {
        self.sender.send(&msg).await
    }

    async fn receive(&self) -> Result<InboundUpdate, TetherError> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| TetherError::transport("webhook listener stopped", None))
    }
}
