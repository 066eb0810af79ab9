// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles the full dispatch stack against a temp SQLite
//! database, a temp workspace, a fake Codex script and a mock chat backend.
//! `send()` drives one update through the dispatcher the way the agent loop
//! would.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::{Mutex, mpsc};

use tether_agent::{Browser, ChatSessionStore, ConfirmationManager, Dispatcher, ManualClock};
use tether_audit::{AuditEvent, AuditEventType, AuditLog, read_events};
use tether_core::{Identity, InboundUpdate, OutboundMessage, TetherError, UpdateContent};
use tether_policy::{PolicyEngine, RuleSet};
use tether_runner::{JobRunner, RunnerConfig};
use tether_security::{EnvAllowlist, Redactor, WorkspaceRoot};
use tether_storage::Database;

use crate::mock_chat::MockChatBackend;

/// The administrator identity every harness is configured with.
pub const OWNER: Identity = Identity {
    user_id: 123,
    chat_id: 456,
};

const DEFAULT_CODEX_SCRIPT: &str = "echo \"codex $*\"\n";

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    policy_json: Option<String>,
    codex_script: String,
    chat: Option<MockChatBackend>,
    chat_timeout: Duration,
    job_timeout: Duration,
    interactive: bool,
    unauthorized_interval: Option<Duration>,
    secrets: Vec<String>,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            policy_json: None,
            codex_script: DEFAULT_CODEX_SCRIPT.to_string(),
            chat: None,
            chat_timeout: Duration::from_secs(5),
            job_timeout: Duration::from_secs(30),
            interactive: true,
            unauthorized_interval: None,
            secrets: Vec::new(),
        }
    }

    /// Load the policy from a JSON document instead of the owner-only default.
    pub fn with_policy_json(mut self, json: &str) -> Self {
        self.policy_json = Some(json.to_string());
        self
    }

    /// Body of the `/bin/sh` script standing in for the Codex CLI.
    pub fn with_codex_script(mut self, body: &str) -> Self {
        self.codex_script = body.to_string();
        self
    }

    pub fn with_chat_backend(mut self, backend: MockChatBackend) -> Self {
        self.chat = Some(backend);
        self
    }

    pub fn with_chat_timeout(mut self, timeout: Duration) -> Self {
        self.chat_timeout = timeout;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_interactive_mode(mut self, enabled: bool) -> Self {
        self.interactive = enabled;
        self
    }

    pub fn with_unauthorized_interval(mut self, interval: Duration) -> Self {
        self.unauthorized_interval = Some(interval);
        self
    }

    /// Values the redactor masks everywhere.
    pub fn with_secret(mut self, secret: &str) -> Self {
        self.secrets.push(secret.to_string());
        self
    }

    /// Build the test harness, creating all required subsystems.
    pub async fn build(self) -> Result<TestHarness, TetherError> {
        let temp_dir = tempfile::TempDir::new().map_err(TetherError::storage)?;
        let workspace_dir = temp_dir.path().join("workspace");
        std::fs::create_dir_all(&workspace_dir).map_err(TetherError::storage)?;
        let workspace = WorkspaceRoot::new(&workspace_dir)?;

        let codex_path = temp_dir.path().join("fake-codex");
        write_script(&codex_path, &self.codex_script)?;

        let db = Database::open(temp_dir.path().join("tether.db")).await?;
        let redactor = Redactor::with_secrets(self.secrets);
        let audit_path = temp_dir.path().join("audit.jsonl");
        let audit = Arc::new(
            AuditLog::new(&audit_path, 1024 * 1024, redactor.clone()).with_mirror(db.clone(), 5000),
        );

        let rules = match &self.policy_json {
            Some(json) => RuleSet::from_json_str(OWNER, json)?,
            None => RuleSet::owner_only(OWNER),
        };
        let policy = Arc::new(PolicyEngine::new(rules));

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0)
                .single()
                .ok_or_else(|| TetherError::Internal("invalid start time".to_string()))?,
        ));
        let confirmations = ConfirmationManager::new(db.clone(), Duration::from_secs(300))
            .with_clock(clock.clone());

        let (tx, rx) = mpsc::channel(64);
        let runner = JobRunner::new(
            RunnerConfig {
                codex_command: codex_path.display().to_string(),
                job_timeout: self.job_timeout,
                max_event_rows: 5000,
            },
            workspace.clone(),
            EnvAllowlist::new(vec!["PATH".to_string()], Vec::new(), None),
            db.clone(),
            audit.clone(),
            redactor.clone(),
        )
        .with_notifier(tx);

        let chat_backend = Arc::new(
            self.chat.unwrap_or_else(|| MockChatBackend::new("thread-test")),
        );
        let chat = ChatSessionStore::new(db.clone(), chat_backend.clone(), self.chat_timeout);
        let browser = Browser::new(workspace.clone(), None);

        let harness = TestHarness {
            db,
            audit,
            audit_path,
            policy,
            confirmations,
            clock,
            runner,
            chat,
            chat_backend,
            browser,
            redactor,
            workspace,
            interactive: self.interactive,
            unauthorized_interval: self.unauthorized_interval,
            notifications: Mutex::new(rx),
            next_update_id: AtomicI64::new(1),
            dispatcher: None,
            _temp_dir: temp_dir,
        };
        let dispatcher = harness.build_dispatcher();
        Ok(TestHarness {
            dispatcher: Some(dispatcher),
            ..harness
        })
    }
}

#[cfg(unix)]
fn write_script(path: &Path, body: &str) -> Result<(), TetherError> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, format!("#!/bin/sh\n{body}")).map_err(TetherError::storage)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(TetherError::storage)
}

#[cfg(not(unix))]
fn write_script(path: &Path, body: &str) -> Result<(), TetherError> {
    std::fs::write(path, body).map_err(TetherError::storage)
}

/// A complete test environment with mock adapters and temp storage.
pub struct TestHarness {
    pub db: Database,
    pub audit: Arc<AuditLog>,
    pub audit_path: PathBuf,
    pub policy: Arc<PolicyEngine>,
    pub confirmations: ConfirmationManager,
    /// Drives confirmation expiry.
    pub clock: Arc<ManualClock>,
    pub runner: JobRunner,
    pub chat: ChatSessionStore,
    pub chat_backend: Arc<MockChatBackend>,
    pub browser: Browser,
    pub redactor: Redactor,
    pub workspace: WorkspaceRoot,
    interactive: bool,
    unauthorized_interval: Option<Duration>,
    notifications: Mutex<mpsc::Receiver<OutboundMessage>>,
    next_update_id: AtomicI64,
    dispatcher: Option<Dispatcher>,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// A fresh dispatcher over the harness's shared components, for handing
    /// to an agent loop.
    pub fn build_dispatcher(&self) -> Dispatcher {
        let dispatcher = Dispatcher::new(
            self.policy.clone(),
            self.confirmations.clone(),
            self.runner.clone(),
            self.chat.clone(),
            self.browser.clone(),
            self.db.clone(),
            self.audit.clone(),
            self.redactor.clone(),
        )
        .with_interactive_mode(self.interactive);
        match self.unauthorized_interval {
            Some(interval) => dispatcher.with_unauthorized_reply_interval(interval),
            None => dispatcher,
        }
    }

    pub fn workspace_path(&self) -> &Path {
        self.workspace.path()
    }

    /// Dispatch `update` and return the reply text.
    pub async fn dispatch(&self, update: InboundUpdate) -> Option<String> {
        let dispatcher = self.dispatcher.as_ref()?;
        dispatcher.handle(&update).await.map(|m| m.text)
    }

    /// Send `text` as the owner.
    pub async fn send(&self, text: &str) -> Option<String> {
        self.send_as(OWNER, text).await
    }

    /// Send `text` from `identity`, with a fresh update id.
    pub async fn send_as(&self, identity: Identity, text: &str) -> Option<String> {
        let update = InboundUpdate {
            update_id: self.next_update_id.fetch_add(1, Ordering::SeqCst),
            user_id: Some(identity.user_id),
            chat_id: Some(identity.chat_id),
            content: UpdateContent::Text(text.to_string()),
        };
        self.dispatch(update).await
    }

    /// Issue `command` and confirm it, returning the confirmation reply.
    pub async fn send_confirmed(&self, command: &str) -> Option<String> {
        let reply = self.send(command).await?;
        let nonce = nonce_from(&reply)?;
        self.send(&format!("/confirm {nonce}")).await
    }

    /// Every audit event written so far.
    pub fn audit_events(&self) -> Vec<AuditEvent> {
        read_events(&self.audit_path).unwrap_or_default()
    }

    pub fn audit_types(&self) -> Vec<AuditEventType> {
        self.audit_events().into_iter().map(|e| e.event_type).collect()
    }

    /// Wait for the next job notification.
    pub async fn next_notification(&self, timeout: Duration) -> Option<OutboundMessage> {
        let mut rx = self.notifications.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    /// Collect notifications until one contains `needle` or `timeout` passes.
    pub async fn wait_for_notification(
        &self,
        needle: &str,
        timeout: Duration,
    ) -> Vec<OutboundMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut seen = Vec::new();
        let mut rx = self.notifications.lock().await;
        while let Ok(Some(msg)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            let done = msg.text.contains(needle);
            seen.push(msg);
            if done {
                break;
            }
        }
        seen
    }
}

/// The nonce from a "Confirmation required" reply.
pub fn nonce_from(reply: &str) -> Option<String> {
    reply
        .lines()
        .find_map(|line| line.strip_prefix("Run: /confirm "))
        .map(|nonce| nonce.trim().to_string())
}
