// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tether serve` command implementation.
//!
//! Opens storage and the audit log, reconciles jobs left over from a previous
//! run, wires the policy engine, confirmations, job runner, chat sessions and
//! workspace browser into a dispatcher, then runs the agent loop over the
//! configured Telegram transport until a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use tether_agent::{
    AgentLoop, Browser, ChatSessionStore, ConfirmationManager, Dispatcher, shutdown,
};
use tether_audit::AuditLog;
use tether_config::{TetherConfig, TransportMode};
use tether_core::{PluginAdapter, TetherError, Transport};
use tether_gateway::WebhookTransport;
use tether_policy::PolicyEngine;
use tether_runner::{CodexChatBackend, JobRunner, RunnerConfig};
use tether_security::{EnvAllowlist, Redactor, WorkspaceRoot};
use tether_storage::{Database, queries};
use tether_telegram::{PollSettings, PollingTransport, TelegramSender, build_bot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::check::{config_secrets, owner_identity};

/// Queue depth for job notifications waiting on the transport.
const NOTIFY_QUEUE: usize = 256;

/// Runs the `tether serve` command.
pub async fn run_serve(config: TetherConfig) -> Result<i32, TetherError> {
    let redactor = Redactor::with_secrets(config_secrets(&config));
    init_tracing(&config.logging.level, redactor.clone());

    info!(version = env!("CARGO_PKG_VERSION"), "starting tether serve");

    let owner = owner_identity(&config)?;
    let workspace = WorkspaceRoot::new(&config.workspace.root)?;
    info!(root = %workspace.path().display(), "workspace root confined");

    let db = Database::open(&config.storage.database_path).await?;
    let audit = Arc::new(
        AuditLog::new(
            &config.storage.audit_log_path,
            config.storage.audit_max_bytes,
            redactor.clone(),
        )
        .with_mirror(db.clone(), config.storage.max_event_rows),
    );

    let policy = Arc::new(PolicyEngine::load(
        owner,
        config.safety.policy_path.as_deref(),
    )?);
    let env = EnvAllowlist::from_config(&config.codex.env);

    let (notify_tx, notify_rx) = tokio::sync::mpsc::channel(NOTIFY_QUEUE);
    let runner = JobRunner::new(
        RunnerConfig::from_config(&config),
        workspace.clone(),
        env.clone(),
        db.clone(),
        audit.clone(),
        redactor.clone(),
    )
    .with_notifier(notify_tx);

    // Crash recovery: jobs left active by a previous process. A live orphan
    // keeps the job slot until /cancel.
    let summary = runner.recover().await?;
    if !summary.live_pids.is_empty() {
        warn!(
            orphans = summary.live_pids.len(),
            "orphaned jobs still running; use /cancel to terminate them"
        );
    }

    let backend = Arc::new(CodexChatBackend::new(
        config.codex.command.clone(),
        workspace.clone(),
        env,
        redactor.clone(),
    ));
    let chat = ChatSessionStore::new(
        db.clone(),
        backend,
        Duration::from_secs(config.codex.chat_turn_timeout_secs),
    );
    let confirmations = ConfirmationManager::new(
        db.clone(),
        Duration::from_secs(config.safety.confirmation_ttl_secs),
    );
    let home = config.codex.env.home.clone().or_else(dirs::home_dir);
    let browser = Browser::new(workspace, home);

    let dispatcher = Dispatcher::new(
        policy.clone(),
        confirmations.clone(),
        runner,
        chat,
        browser,
        db.clone(),
        audit.clone(),
        redactor.clone(),
    )
    .with_interactive_mode(config.telegram.interactive_mode);

    let transport = build_transport(&config, &db, audit.clone(), redactor).await?;
    info!(
        transport = transport.name(),
        interactive = config.telegram.interactive_mode,
        "transport configured"
    );

    let cancel = shutdown::install_signal_handler();
    spawn_policy_reloader(policy, cancel.clone());

    AgentLoop::new(transport, dispatcher, confirmations, db)
        .with_notifications(notify_rx, config.storage.max_event_rows)
        .run(cancel)
        .await?;

    info!("tether serve shutdown complete");
    Ok(0)
}

async fn build_transport(
    config: &TetherConfig,
    db: &Database,
    audit: Arc<AuditLog>,
    redactor: Redactor,
) -> Result<Box<dyn Transport>, TetherError> {
    let bot = build_bot(&config.telegram)?;
    let sender = TelegramSender::new(
        bot.clone(),
        config.telegram.effective_chunk_size(),
        redactor,
    );
    let transport: Box<dyn Transport> = match config.telegram.transport {
        TransportMode::Polling => {
            let last = queries::offsets::last_update_id(db).await?;
            let start_offset = (last >= 0).then_some(last + 1);
            Box::new(PollingTransport::new(
                bot,
                PollSettings::from_config(&config.telegram)?,
                sender,
                audit,
                start_offset,
            ))
        }
        TransportMode::Webhook => Box::new(WebhookTransport::new(
            bot,
            config.webhook.clone(),
            sender,
            audit,
        )),
    };
    Ok(transport)
}

/// Re-reads the policy file on SIGHUP. A broken file keeps the current rules.
#[cfg(unix)]
fn spawn_policy_reloader(policy: Arc<PolicyEngine>, cancel: CancellationToken) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!(error = %e, "failed to install SIGHUP handler; policy reload disabled");
            return;
        }
    };
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    match policy.reload_from_disk() {
                        Ok(()) => info!("policy reloaded on SIGHUP"),
                        Err(e) => warn!(error = %e, "policy reload failed; keeping current rules"),
                    }
                }
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_policy_reloader(_policy: Arc<PolicyEngine>, _cancel: CancellationToken) {}

/// Initializes the tracing subscriber with the given log level. Everything
/// written to stderr passes through the redactor.
fn init_tracing(log_level: &str, redactor: Redactor) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tether={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(move || redactor.writer(std::io::stderr()))
        .init();
}
