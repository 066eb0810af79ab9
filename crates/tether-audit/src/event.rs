// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Audit event types and the event builder.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};
use tether_core::{Identity, JobId};

/// Every kind of audit event the system records.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    CommandReceived,
    AuthDenied,
    PolicyDenied,
    ConfirmationIssued,
    ConfirmationConsumed,
    ConfirmationExpired,
    ConfirmationRejected,
    JobStarted,
    JobCompleted,
    JobFailed,
    JobTimedOut,
    JobCancelled,
    ChatTurn,
    ChatTurnFailed,
    ChatEmptyResponse,
    ChatSessionReset,
    PollError,
    WebhookError,
    UpdateIgnored,
    Recovery,
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// RFC 3339 UTC with millisecond precision.
    pub timestamp: String,
    pub event_type: AuditEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event_type,
            user_id: None,
            chat_id: None,
            job_id: None,
            details: Map::new(),
        }
    }

    pub fn identity(mut self, identity: Identity) -> Self {
        self.user_id = Some(identity.user_id);
        self.chat_id = Some(identity.chat_id);
        self
    }

    /// Partial identity, for updates missing a sender or chat.
    pub fn ids(mut self, user_id: Option<i64>, chat_id: Option<i64>) -> Self {
        self.user_id = user_id;
        self.chat_id = chat_id;
        self
    }

    pub fn job(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// One-line `key=value` rendering of the details, used for the job event ring.
    pub fn summary(&self) -> String {
        let mut parts = Vec::with_capacity(self.details.len() + 2);
        if let (Some(user), Some(chat)) = (self.user_id, self.chat_id) {
            parts.push(format!("user={user} chat={chat}"));
        }
        for (key, value) in &self.details {
            match value {
                Value::String(s) => parts.push(format!("{key}={s}")),
                other => parts.push(format!("{key}={other}")),
            }
        }
        parts.join(" ")
    }
}
