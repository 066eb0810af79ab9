// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Telegram Bot API plumbing for Tether.
//!
//! Builds the teloxide [`Bot`](teloxide::Bot), converts Bot API updates into
//! [`InboundUpdate`](tether_core::InboundUpdate)s, delivers chunked plain-text
//! replies, and provides the long-poll [`PollingTransport`]. The webhook
//! listener lives in `tether-gateway` and reuses [`to_inbound`] and
//! [`TelegramSender`].

pub mod chunk;
pub mod client;
pub mod polling;
pub mod update;

pub use chunk::chunk_text;
pub use client::{TelegramSender, build_bot, delete_webhook, register_webhook};
pub use polling::{Backoff, PollSettings, PollingTransport};
pub use update::{allowed_updates, to_inbound};
