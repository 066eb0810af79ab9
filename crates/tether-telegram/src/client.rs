// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bot API client construction, outbound delivery and webhook registration.

use std::time::Duration;

use teloxide::RequestError;
use teloxide::prelude::*;
use tether_config::model::{TelegramConfig, WebhookConfig};
use tether_core::{OutboundMessage, TetherError};
use tether_security::Redactor;
use tracing::{debug, info};

use crate::chunk::chunk_text;
use crate::update::allowed_updates;

/// Slack added on top of the long-poll timeout for the HTTP client deadline.
const HTTP_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

/// Builds a [`Bot`] pointed at the configured API base.
///
/// The HTTP deadline outlives a full long poll so `getUpdates` is never cut
/// short by the client.
pub fn build_bot(config: &TelegramConfig) -> Result<Bot, TetherError> {
    let token = config
        .bot_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| TetherError::Config("telegram.bot_token is required".into()))?;

    let api_url = reqwest::Url::parse(&config.api_base).map_err(|e| {
        TetherError::Config(format!("telegram.api_base is not a valid URL: {e}"))
    })?;

    let client = teloxide::net::default_reqwest_settings()
        .timeout(Duration::from_secs(config.poll_timeout_secs) + HTTP_TIMEOUT_MARGIN)
        .build()
        .map_err(|e| TetherError::transport("failed to build HTTP client", Some(Box::new(e))))?;

    Ok(Bot::with_client(token, client).set_api_url(api_url))
}

pub(crate) fn request_error(method: &str, err: RequestError) -> TetherError {
    TetherError::transport(format!("{method} failed: {err}"), Some(Box::new(err)))
}

/// Delivers replies: redacts, chunks and sends each chunk as plain text.
#[derive(Clone)]
pub struct TelegramSender {
    bot: Bot,
    chunk_size: usize,
    redactor: Redactor,
}

impl TelegramSender {
    pub fn new(bot: Bot, chunk_size: usize, redactor: Redactor) -> Self {
        Self {
            bot,
            chunk_size,
            redactor,
        }
    }

    pub async fn send(&self, msg: &OutboundMessage) -> Result<(), TetherError> {
        let text = self.redactor.redact(&msg.text);
        let chunks = chunk_text(&text, self.chunk_size);
        debug!(chat_id = msg.chat_id, chunks = chunks.len(), "sending reply");
        for chunk in chunks {
            if chunk.trim().is_empty() {
                continue;
            }
            self.bot
                .send_message(ChatId(msg.chat_id), chunk)
                .send()
                .await
                .map_err(|e| request_error("sendMessage", e))?;
        }
        Ok(())
    }
}

/// Registers the webhook with the Bot API: message updates only, pending
/// updates kept, a single connection, and the pre-shared secret.
pub async fn register_webhook(bot: &Bot, config: &WebhookConfig) -> Result<(), TetherError> {
    let url = config
        .webhook_url()
        .ok_or_else(|| TetherError::Config("webhook.public_url is required".into()))?;
    let parsed = reqwest::Url::parse(&url)
        .map_err(|e| TetherError::Config(format!("webhook.public_url is not a valid URL: {e}")))?;

    let mut request = bot
        .set_webhook(parsed)
        .allowed_updates(allowed_updates())
        .drop_pending_updates(false)
        .max_connections(1);
    if let Some(secret) = config.secret_token.as_deref() {
        request = request.secret_token(secret.to_string());
    }
    request
        .send()
        .await
        .map_err(|e| request_error("setWebhook", e))?;
    info!(%url, "webhook registered");
    Ok(())
}

/// Removes any registered webhook so `getUpdates` is permitted.
pub async fn delete_webhook(bot: &Bot) -> Result<(), TetherError> {
    bot.delete_webhook()
        .drop_pending_updates(false)
        .send()
        .await
        .map_err(|e| request_error("deleteWebhook", e))?;
    Ok(())
}
