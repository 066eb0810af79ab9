// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Long-poll transport over `getUpdates`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use tether_audit::{AuditEvent, AuditEventType, AuditLog};
use tether_config::model::TelegramConfig;
use tether_core::{
    AdapterType, HealthStatus, InboundUpdate, OutboundMessage, PluginAdapter, TetherError,
    Transport,
};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{TelegramSender, delete_webhook, request_error};
use crate::update::{allowed_updates, to_inbound};

/// Long-poll timing.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub timeout: Duration,
    pub retry_base: Duration,
    pub retry_max: Duration,
}

impl PollSettings {
    pub fn from_config(config: &TelegramConfig) -> Result<Self, TetherError> {
        let base = retry_delay("poll_retry_base_secs", config.poll_retry_base_secs)?;
        let max = retry_delay("poll_retry_max_secs", config.poll_retry_max_secs)?;
        Ok(Self {
            timeout: Duration::from_secs(config.poll_timeout_secs),
            retry_base: base,
            retry_max: max.max(base),
        })
    }
}

fn retry_delay(key: &str, secs: f64) -> Result<Duration, TetherError> {
    if secs.is_nan() {
        return Err(TetherError::Config(format!("telegram.{key} is not a number")));
    }
    Duration::try_from_secs_f64(secs.max(0.0))
        .map_err(|e| TetherError::Config(format!("telegram.{key} = {secs}: {e}")))
}

/// Exponential backoff, doubling from `base` up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    /// The delay to sleep now; the following one doubles.
    pub fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

/// [`Transport`] that long-polls the Bot API.
///
/// `connect` removes any webhook and starts a background loop that feeds a
/// channel; `receive` drains it. Failed polls are audited and retried with
/// [`Backoff`]; the loop only stops on shutdown.
pub struct PollingTransport {
    bot: Bot,
    settings: PollSettings,
    sender: TelegramSender,
    audit: Arc<AuditLog>,
    start_offset: Option<i64>,
    inbound_tx: Option<mpsc::Sender<InboundUpdate>>,
    inbound_rx: Mutex<mpsc::Receiver<InboundUpdate>>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PollingTransport {
    /// `start_offset` is the first update id still to be fetched, normally
    /// one past the highest id already claimed.
    pub fn new(
        bot: Bot,
        settings: PollSettings,
        sender: TelegramSender,
        audit: Arc<AuditLog>,
        start_offset: Option<i64>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(100);
        Self {
            bot,
            settings,
            sender,
            audit,
            start_offset,
            inbound_tx: Some(tx),
            inbound_rx: Mutex::new(rx),
            cancel: CancellationToken::new(),
            handle: None,
        }
    }
}

#[async_trait]
impl PluginAdapter for PollingTransport {
    fn name(&self) -> &str {
        "telegram-poll"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Transport
    }

    async fn health_check(&self) -> Result<HealthStatus, TetherError> {
        match &self.handle {
            Some(handle) if handle.is_finished() => {
                Ok(HealthStatus::Unhealthy("poll loop stopped".into()))
            }
            _ => Ok(HealthStatus::Healthy),
        }
    }

    async fn shutdown(&self) -> Result<(), TetherError> {
        self.cancel.cancel();
        Ok(())
    }
}

#[async_trait]
impl Transport for PollingTransport {
    async fn connect(&mut self) -> Result<(), TetherError> {
        let tx = self
            .inbound_tx
            .take()
            .ok_or_else(|| TetherError::Internal("poll transport already connected".into()))?;

        if let Err(e) = delete_webhook(&self.bot).await {
            warn!(error = %e, "deleteWebhook failed; polling anyway");
            self.audit
                .record(
                    AuditEvent::new(AuditEventType::PollError)
                        .detail("stage", "delete_webhook")
                        .detail("error", e.to_string()),
                )
                .await;
        }

        let poller = Poller {
            bot: self.bot.clone(),
            settings: self.settings,
            audit: self.audit.clone(),
            offset: self.start_offset,
            tx,
            cancel: self.cancel.clone(),
        };
        self.handle = Some(tokio::spawn(poller.run()));
        info!(offset = ?self.start_offset, "telegram long polling started");
        Ok(())
    }

    async fn send(&self, msg: OutboundMessage) -> Result<(), TetherError> {
        self.sender.send(&msg).await
    }

    async fn receive(&self) -> Result<InboundUpdate, TetherError> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| TetherError::transport("telegram poll loop stopped", None))
    }
}

struct Poller {
    bot: Bot,
    settings: PollSettings,
    audit: Arc<AuditLog>,
    offset: Option<i64>,
    tx: mpsc::Sender<InboundUpdate>,
    cancel: CancellationToken,
}

impl Poller {
    async fn run(mut self) {
        let mut backoff = Backoff::new(self.settings.retry_base, self.settings.retry_max);
        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.poll_once() => result,
            };
            match result {
                Ok(updates) => {
                    backoff.reset();
                    for update in updates {
                        if !self.deliver(update).await {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let delay = backoff.next();
                    warn!(error = %e, retry_in = ?delay, "getUpdates failed");
                    self.audit
                        .record(
                            AuditEvent::new(AuditEventType::PollError)
                                .detail("error", e.to_string())
                                .detail("retry_in_secs", delay.as_secs_f64()),
                        )
                        .await;
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        debug!("telegram poll loop stopped");
    }

    async fn poll_once(&self) -> Result<Vec<InboundUpdate>, TetherError> {
        let timeout = u32::try_from(self.settings.timeout.as_secs()).unwrap_or(u32::MAX);
        let mut request = self
            .bot
            .get_updates()
            .timeout(timeout)
            .allowed_updates(allowed_updates());
        if let Some(offset) = self.offset {
            request = request.offset(i32::try_from(offset).unwrap_or(i32::MAX));
        }
        let updates = request
            .send()
            .await
            .map_err(|e| request_error("getUpdates", e))?;
        Ok(updates.iter().map(to_inbound).collect())
    }

    /// Returns false once the receiving side is gone.
    async fn deliver(&mut self, update: InboundUpdate) -> bool {
        if self.offset.is_some_and(|next| update.update_id < next) {
            debug!(update_id = update.update_id, "skipping already-seen update");
            return true;
        }
        self.offset = Some(update.update_id + 1);
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(update) => sent.is_ok(),
        }
    }
}
