// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types returned by the query modules.

use serde::Serialize;
use tether_core::{Identity, JobId, JobStatus};

/// Fields needed to insert a job in the `QUEUED` state.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub identity: Identity,
    pub command: String,
    /// Redacted prompt or argument text.
    pub prompt: String,
    /// Redacted argv.
    pub argv: Vec<String>,
    pub cwd: String,
}

/// A persisted job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub identity: Identity,
    pub command: String,
    pub prompt: String,
    pub argv: Vec<String>,
    pub cwd: String,
    pub status: JobStatus,
    pub pid: Option<i64>,
    /// Process start time captured at spawn; see `mark_running`.
    pub pid_start_token: Option<String>,
    pub exit_code: Option<i32>,
    pub output: String,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
}

/// One row of the job event ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobEvent {
    pub id: i64,
    pub job_id: Option<JobId>,
    pub event_type: String,
    pub message: String,
    pub created_at: String,
}

/// A pending (or consumed) confirmation row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRecord {
    pub nonce: String,
    pub identity: Identity,
    /// JSON-encoded action.
    pub action: String,
    pub created_at: String,
    pub expires_at: String,
    pub consumed_at: Option<String>,
}

/// Chat session row plus its turn count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSessionRecord {
    pub identity: Identity,
    pub thread_id: Option<String>,
    pub turn_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurnRecord {
    pub role: ChatRole,
    pub text: String,
    pub created_at: String,
}

/// Outcome of restart reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    /// Jobs moved to `INTERRUPTED_RECOVERED`.
    pub recovered: Vec<JobId>,
    /// Jobs left `RUNNING` because their process is still alive. They keep
    /// the active slot until cancelled.
    pub live_pids: Vec<(JobId, i64)>,
}
