// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Tether control plane.

use std::fmt;

use thiserror::Error;

/// Why a `/confirm` could not be honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationFailure {
    /// Unknown nonce, or one that was already consumed.
    NotFound,
    /// The nonce exists but its TTL has elapsed.
    Expired,
    /// The nonce was issued to a different identity.
    IdentityMismatch,
}

impl fmt::Display for ConfirmationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmationFailure::NotFound => write!(f, "not found"),
            ConfirmationFailure::Expired => write!(f, "expired"),
            ConfirmationFailure::IdentityMismatch => write!(f, "issued to a different identity"),
        }
    }
}

/// The primary error type used across all Tether crates.
#[derive(Debug, Error)]
pub enum TetherError {
    /// Configuration errors (invalid TOML, missing required fields, bad policy file).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Transport errors (Bot API failure, listener bind failure, closed channel).
    #[error("transport error: {message}")]
    Transport {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Webhook request did not carry the pre-shared secret.
    #[error("transport authentication failed")]
    TransportAuthFailed,

    /// The sender is not a known identity at all.
    #[error("unauthorized identity (user={user_id:?}, chat={chat_id:?})")]
    AuthDenied {
        user_id: Option<i64>,
        chat_id: Option<i64>,
    },

    /// The sender is known but the rule set disallows the command.
    #[error("command denied by policy: {command}")]
    PolicyDenied { command: String },

    /// A confirmation nonce could not be consumed.
    #[error("confirmation {0}")]
    Confirmation(ConfirmationFailure),

    /// Another job already holds the single running slot.
    #[error("a job is already running")]
    JobAlreadyRunning,

    /// The job exceeded its timeout and was terminated.
    #[error("job timed out after {duration:?}")]
    JobTimedOut { duration: std::time::Duration },

    /// The job could not be started or exited unsuccessfully.
    #[error("job execution failed (exit={exit_code:?}): {output}")]
    JobExecutionFailed {
        exit_code: Option<i32>,
        output: String,
    },

    /// A path resolved outside of the workspace root.
    #[error("path escapes workspace root: {path}")]
    WorkspaceViolation { path: String },

    /// A chat turn failed in the tool or while persisting its result.
    #[error("chat turn failed: {0}")]
    ChatTurnFailed(String),

    /// Malformed operator input (bad arguments, invalid names).
    #[error("{0}")]
    InvalidInput(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TetherError {
    /// Builds a [`TetherError::Storage`] from any error source.
    pub fn storage(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        TetherError::Storage {
            source: Box::new(source),
        }
    }

    /// Builds a [`TetherError::Transport`] with an optional source.
    pub fn transport(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        TetherError::Transport {
            message: message.into(),
            source,
        }
    }

    /// Transient failures that the transport layer retries locally.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TetherError::Transport { .. } | TetherError::Timeout { .. }
        )
    }

    /// Errors that carry an operator-actionable message and are replied verbatim.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            TetherError::PolicyDenied { .. }
                | TetherError::Confirmation(_)
                | TetherError::JobAlreadyRunning
                | TetherError::JobTimedOut { .. }
                | TetherError::JobExecutionFailed { .. }
                | TetherError::WorkspaceViolation { .. }
                | TetherError::ChatTurnFailed(_)
                | TetherError::InvalidInput(_)
        )
    }
}
