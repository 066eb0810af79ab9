// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversion from Bot API updates into transport-neutral [`InboundUpdate`]s.
//!
//! Shared by the long-poll loop and the webhook listener so both transports
//! hand the dispatcher exactly the same shape.

use teloxide::types::{AllowedUpdate, Message, Update, UpdateKind};
use tether_core::{InboundUpdate, UpdateContent};
use tracing::debug;

/// Update kinds requested from the Bot API.
pub fn allowed_updates() -> Vec<AllowedUpdate> {
    vec![AllowedUpdate::Message, AllowedUpdate::EditedMessage]
}

/// Maps a Bot API update. Kinds other than new or edited messages carry no
/// identity and are [`UpdateContent::Unsupported`].
pub fn to_inbound(update: &Update) -> InboundUpdate {
    let update_id = i64::from(update.id.0);
    match &update.kind {
        UpdateKind::Message(msg) | UpdateKind::EditedMessage(msg) => from_message(update_id, msg),
        _ => {
            debug!(update_id, "update carries no message");
            InboundUpdate {
                update_id,
                user_id: None,
                chat_id: None,
                content: UpdateContent::Unsupported,
            }
        }
    }
}

fn from_message(update_id: i64, msg: &Message) -> InboundUpdate {
    // User ids fit in 52 bits per Bot API documentation.
    let user_id = msg
        .from
        .as_ref()
        .and_then(|u| i64::try_from(u.id.0).ok());

    let content = if let Some(text) = msg.text() {
        UpdateContent::Text(text.to_string())
    } else if let Some(doc) = msg.document() {
        UpdateContent::Document {
            file_name: doc.file_name.clone(),
        }
    } else {
        UpdateContent::Unsupported
    };

    InboundUpdate {
        update_id,
        user_id,
        chat_id: Some(msg.chat.id.0),
        content,
    }
}
