// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversational backend trait.

use async_trait::async_trait;

use crate::error::TetherError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{ChatReply, ChatRequest};

/// Runs one conversational turn against the external tool.
///
/// Implementations must be cancel-safe: dropping the returned future
/// terminates any subprocess it started.
#[async_trait]
pub trait ChatBackend: PluginAdapter {
    async fn turn(&self, request: ChatRequest) -> Result<ChatReply, TetherError>;
}
