// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the transport, dispatcher, runner and storage layers.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A (user, chat) pair: the unit of authorization and session scoping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: i64,
    pub chat_id: i64,
}

impl Identity {
    pub fn new(user_id: i64, chat_id: i64) -> Self {
        Self { user_id, chat_id }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user={} chat={}", self.user_id, self.chat_id)
    }
}

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter behind a [`PluginAdapter`](crate::PluginAdapter).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Transport,
    ChatBackend,
}

/// Payload carried by an inbound update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateContent {
    /// A text message (slash command or plain text).
    Text(String),
    /// A file attachment. Uploads are not handled; the dispatcher rejects them.
    Document { file_name: Option<String> },
    /// Anything else (stickers, service messages, non-message updates).
    Unsupported,
}

/// A transport-neutral inbound update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundUpdate {
    /// Monotonic transport-assigned id, used for offset claiming.
    pub update_id: i64,
    pub user_id: Option<i64>,
    pub chat_id: Option<i64>,
    pub content: UpdateContent,
}

impl InboundUpdate {
    /// Returns the identity when both halves are present on the update.
    pub fn identity(&self) -> Option<Identity> {
        match (self.user_id, self.chat_id) {
            (Some(user_id), Some(chat_id)) => Some(Identity::new(user_id, chat_id)),
            _ => None,
        }
    }

    /// Returns the trimmed text, if this is a non-empty text update.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            UpdateContent::Text(text) if !text.trim().is_empty() => Some(text.trim()),
            _ => None,
        }
    }
}

/// An outbound reply. The transport chunks oversized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub chat_id: i64,
    pub text: String,
}

impl OutboundMessage {
    pub fn new(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
        }
    }
}

/// A confirmable action. Persisted as the payload of a pending confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    RunPrompt { prompt: String },
    Autopilot { task: String },
    RawCodexInvocation { args: String },
    SkillInvocation { name: String, task: String },
    PromptInvocation { name: String, task: String },
    Report { topic: String, report_path: String },
}

impl Action {
    /// The command name this action is authorized under.
    pub fn command_name(&self) -> &'static str {
        match self {
            Action::RunPrompt { .. } => "/run",
            Action::Autopilot { .. } => "/autopilot",
            Action::RawCodexInvocation { .. } => "/codex",
            Action::SkillInvocation { .. } => "/skill",
            Action::PromptInvocation { .. } => "/prompt",
            Action::Report { .. } => "/report",
        }
    }

    /// Short label used in job records and notifications.
    pub fn label(&self) -> &'static str {
        self.command_name().trim_start_matches('/')
    }
}

/// Database id of a job row.
pub type JobId = i64;

/// Lifecycle status of a job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
    /// Found active after a restart; the owning process is gone.
    InterruptedRecovered,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

/// A request for one conversational turn against the external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub identity: Identity,
    pub prompt: String,
    /// Thread to resume; `None` starts a new conversation.
    pub thread_id: Option<String>,
}

/// The outcome of a conversational turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub thread_id: String,
    /// Assistant text; empty when the tool produced no answer.
    pub text: String,
}
