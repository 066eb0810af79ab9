// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Codex-backed conversational turns.

use async_trait::async_trait;
use tether_core::{
    AdapterType, ChatBackend, ChatReply, ChatRequest, HealthStatus, PluginAdapter, TetherError,
};
use tether_security::{EnvAllowlist, Redactor, WorkspaceRoot};
use tracing::debug;

use crate::argv::chat_argv;
use crate::jsonl::{extract_assistant_text, extract_thread_id};
use crate::process::{self, ProcessGroupGuard};

/// Runs `codex exec --json` (or `exec resume`) for each chat turn.
///
/// Dropping a turn's future kills the whole process group, so an outer
/// timeout cancels cleanly.
pub struct CodexChatBackend {
    codex_command: String,
    workspace: WorkspaceRoot,
    env: EnvAllowlist,
    redactor: Redactor,
}

impl CodexChatBackend {
    pub fn new(
        codex_command: impl Into<String>,
        workspace: WorkspaceRoot,
        env: EnvAllowlist,
        redactor: Redactor,
    ) -> Self {
        Self {
            codex_command: codex_command.into(),
            workspace,
            env,
            redactor,
        }
    }
}

#[async_trait]
impl PluginAdapter for CodexChatBackend {
    fn name(&self) -> &str {
        "codex-chat"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::ChatBackend
    }

    async fn health_check(&self) -> Result<HealthStatus, TetherError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), TetherError> {
        Ok(())
    }
}

#[async_trait]
impl ChatBackend for CodexChatBackend {
    async fn turn(&self, request: ChatRequest) -> Result<ChatReply, TetherError> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(TetherError::InvalidInput(
                "chat prompt must not be empty".to_string(),
            ));
        }
        let thread_id = request
            .thread_id
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        // Fresh threads write their final message to a file as a fallback.
        let output_file = match thread_id {
            Some(_) => None,
            None => Some(
                tempfile::Builder::new()
                    .prefix("tether-chat-")
                    .suffix(".txt")
                    .tempfile()
                    .map_err(|e| TetherError::ChatTurnFailed(format!("temp file: {e}")))?,
            ),
        };

        let argv = chat_argv(
            &self.codex_command,
            prompt,
            thread_id,
            output_file.as_ref().map(|f| f.path()),
        )?;
        let child = process::spawn(&argv, self.workspace.path(), &self.env.collect())
            .map_err(|e| TetherError::ChatTurnFailed(self.redactor.redact(&e.to_string())))?;
        let mut guard = ProcessGroupGuard::new(child.id());

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| TetherError::ChatTurnFailed(e.to_string()))?;
        guard.disarm();

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let detail = [stderr.trim(), stdout.trim()]
                .into_iter()
                .find(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("exit={:?}", output.status.code()));
            return Err(TetherError::ChatTurnFailed(self.redactor.redact(&detail)));
        }

        let combined = format!("{stdout}\n{stderr}");
        let thread_id = extract_thread_id(&combined)
            .or_else(|| thread_id.map(str::to_string))
            .ok_or_else(|| {
                TetherError::ChatTurnFailed("missing thread.started thread_id".to_string())
            })?;

        let mut text = extract_assistant_text(&combined);
        if text.is_empty() {
            if let Some(file) = &output_file {
                text = std::fs::read_to_string(file.path())
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default();
            }
        }
        debug!(%thread_id, chars = text.len(), "chat turn finished");

        Ok(ChatReply {
            thread_id,
            text: self.redactor.redact(&text),
        })
    }
}
