// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-update routing: authorization, policy, then the command itself.
//!
//! Each update produces at most one reply and records exactly one audit
//! event. The one exception is a confirmed job that fails to start: the
//! runner has already recorded its `job_failed` event.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use tether_audit::{AuditEvent, AuditEventType, AuditLog};
use tether_core::{
    Action, ConfirmationFailure, Identity, InboundUpdate, OutboundMessage, TetherError,
    UpdateContent,
};
use tether_policy::PolicyEngine;
use tether_runner::argv::{is_valid_invocation_name, plan_report_path, split_shell_words};
use tether_runner::{ActiveJob, JobRunner, JobSpec};
use tether_security::Redactor;
use tether_storage::{Database, JobEvent, queries};
use tracing::{debug, error, info, warn};

use crate::browse::{Browser, truncate_chars};
use crate::chat::ChatSessionStore;
use crate::command::{COMMAND_LIST, Command, requires_autopilot};
use crate::confirm::ConfirmationManager;

/// Minimum spacing between "Unauthorized." replies, across all senders.
pub const UNAUTHORIZED_REPLY_INTERVAL: Duration = Duration::from_secs(10);

const LOG_LIMIT: u32 = 100;
const LOG_MESSAGE_CHARS: usize = 280;
const PREVIEW_CHARS: usize = 220;

const INTERNAL_ERROR: &str = "Internal error while handling command.";
const JOB_BUSY: &str = "A job is already running. Wait for it to finish or use /cancel.";
const EMPTY_CHAT_REPLY: &str = "No response from Codex. Please retry, or run /chat reset.";
const CHAT_DISABLED: &str =
    "Interactive chat is disabled. Use slash commands or set telegram.interactive_mode = true.";

/// Render the `/status` reply.
pub fn format_status(uptime: Duration, active: Option<&ActiveJob>) -> String {
    let mut lines = vec![
        "health: ok".to_string(),
        format!("uptime_seconds: {}", uptime.as_secs()),
    ];
    match active {
        None => lines.push("active_job: none".to_string()),
        Some(job) => {
            lines.push(format!("active_job.id: {}", job.id));
            lines.push(format!("active_job.command: {}", job.command));
            lines.push(format!("active_job.status: {}", job.status));
        }
    }
    lines.join("\n")
}

/// One `/logs` line. Process output never leaves the event ring.
fn format_log_line(event: &JobEvent, redactor: &Redactor) -> String {
    let job = event
        .job_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    let message = if event.event_type.starts_with("process_") {
        "[process output omitted]".to_string()
    } else {
        truncate_chars(&redactor.redact(&event.message), LOG_MESSAGE_CHARS)
    };
    format!("{} job={job} {} {message}", event.created_at, event.event_type)
}

fn format_expiry(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// `<name> <task>` for `/skill` and `/prompt`.
fn parse_named_invocation(arg: &str) -> Option<(String, String)> {
    let (name, task) = arg.trim().split_once(char::is_whitespace)?;
    let task = task.trim();
    (is_valid_invocation_name(name) && !task.is_empty())
        .then(|| (name.to_string(), task.to_string()))
}

fn accepted_message(action: &Action, id: i64) -> String {
    let kind = match action {
        Action::RunPrompt { .. } => "Run",
        Action::Autopilot { .. } => "Autopilot",
        Action::RawCodexInvocation { .. } => "Codex",
        Action::SkillInvocation { .. } => "Skill",
        Action::PromptInvocation { .. } => "Prompt",
        Action::Report { .. } => "Report",
    };
    match action {
        Action::Report { report_path, .. } => {
            format!("{kind} job #{id} accepted. Planned path: {report_path}")
        }
        _ => format!("{kind} job #{id} accepted."),
    }
}

/// What a handler decided: the reply and the audit record for this update.
struct Outcome {
    reply: Option<String>,
    event: Option<AuditEvent>,
}

impl Outcome {
    fn new(reply: impl Into<String>, event: AuditEvent) -> Self {
        Self {
            reply: Some(reply.into()),
            event: Some(event),
        }
    }
}

/// Routes inbound updates to the policy engine, confirmations, the job
/// runner, chat sessions and the workspace browser.
pub struct Dispatcher {
    policy: Arc<PolicyEngine>,
    confirmations: ConfirmationManager,
    runner: JobRunner,
    chat: ChatSessionStore,
    browser: Browser,
    db: Database,
    audit: Arc<AuditLog>,
    redactor: Redactor,
    interactive: bool,
    unauthorized_interval: Duration,
    last_unauthorized_reply: Mutex<Option<Instant>>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        policy: Arc<PolicyEngine>,
        confirmations: ConfirmationManager,
        runner: JobRunner,
        chat: ChatSessionStore,
        browser: Browser,
        db: Database,
        audit: Arc<AuditLog>,
        redactor: Redactor,
    ) -> Self {
        Self {
            policy,
            confirmations,
            runner,
            chat,
            browser,
            db,
            audit,
            redactor,
            interactive: true,
            unauthorized_interval: UNAUTHORIZED_REPLY_INTERVAL,
            last_unauthorized_reply: Mutex::new(None),
        }
    }

    /// Whether plain text is treated as a chat turn.
    pub fn with_interactive_mode(mut self, enabled: bool) -> Self {
        self.interactive = enabled;
        self
    }

    pub fn with_unauthorized_reply_interval(mut self, interval: Duration) -> Self {
        self.unauthorized_interval = interval;
        self
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    /// Handle one update, returning the reply to send, if any.
    pub async fn handle(&self, update: &InboundUpdate) -> Option<OutboundMessage> {
        let outcome = self.route(update).await;
        if let Some(event) = outcome.event {
            self.audit
                .record(event.detail("update_id", update.update_id))
                .await;
        }
        let chat_id = update.chat_id?;
        let text = outcome.reply.filter(|t| !t.trim().is_empty())?;
        Some(OutboundMessage::new(chat_id, self.redactor.redact(&text)))
    }

    async fn route(&self, update: &InboundUpdate) -> Outcome {
        let partial = |t| AuditEvent::new(t).ids(update.user_id, update.chat_id);

        let text = match &update.content {
            UpdateContent::Unsupported => {
                let reason = if update.user_id.is_none() && update.chat_id.is_none() {
                    "missing_message"
                } else {
                    "missing_text"
                };
                debug!(update_id = update.update_id, reason, "update ignored");
                return Outcome {
                    reply: None,
                    event: Some(partial(AuditEventType::UpdateIgnored).detail("reason", reason)),
                };
            }
            UpdateContent::Text(t) if t.trim().is_empty() => {
                return Outcome {
                    reply: None,
                    event: Some(
                        partial(AuditEventType::UpdateIgnored).detail("reason", "empty_text"),
                    ),
                };
            }
            UpdateContent::Text(t) => Some(t.trim()),
            UpdateContent::Document { .. } => None,
        };

        let Some(identity) = update.identity().filter(|id| self.policy.recognizes(*id)) else {
            let command = text
                .map(|t| Command::parse(t, true).policy_name().to_string())
                .unwrap_or_else(|| "/upload".to_string());
            let denied = TetherError::AuthDenied {
                user_id: update.user_id,
                chat_id: update.chat_id,
            };
            warn!(error = %denied, %command, "unauthorized update");
            let reply = (update.chat_id.is_some() && self.should_reply_unauthorized())
                .then(|| "Unauthorized.".to_string());
            return Outcome {
                reply,
                event: Some(partial(AuditEventType::AuthDenied).detail("command", command)),
            };
        };

        let Some(text) = text else {
            return Outcome::new(
                "File uploads are not supported.",
                AuditEvent::new(AuditEventType::UpdateIgnored)
                    .identity(identity)
                    .detail("reason", "upload_unsupported"),
            );
        };

        let command = Command::parse(text, self.interactive);
        let name = command.policy_name().to_string();
        if !self.policy.decide(identity, &name).is_allowed() {
            info!(%identity, command = %name, "command denied by policy");
            return Outcome::new(
                TetherError::PolicyDenied {
                    command: name.clone(),
                }
                .to_string(),
                AuditEvent::new(AuditEventType::PolicyDenied)
                    .identity(identity)
                    .detail("command", name),
            );
        }

        let received = AuditEvent::new(AuditEventType::CommandReceived)
            .identity(identity)
            .detail("command", name.clone())
            .detail("arg_len", command.arg_len());
        match self.execute(identity, command, received.clone()).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_user_facing() => {
                Outcome::new(e.to_string(), received.detail("error", e.to_string()))
            }
            Err(e) => {
                error!(%identity, command = %name, error = %e, "command failed");
                Outcome::new(INTERNAL_ERROR, received.detail("error", e.to_string()))
            }
        }
    }

    async fn execute(
        &self,
        identity: Identity,
        command: Command,
        received: AuditEvent,
    ) -> Result<Outcome, TetherError> {
        match command {
            Command::Help => Ok(Outcome::new(format!("Commands: {COMMAND_LIST}"), received)),
            Command::Status => {
                let active = self.runner.active_job().await;
                Ok(Outcome::new(
                    format_status(self.runner.uptime(), active.as_ref()),
                    received,
                ))
            }
            Command::Chat(arg) => self.chat_command(identity, &arg, received).await,
            Command::PlainText(_) => Ok(Outcome::new(CHAT_DISABLED, received)),
            Command::Run(prompt) => {
                if prompt.is_empty() {
                    return Ok(Outcome::new("Usage: /run <prompt>", received));
                }
                if requires_autopilot(&prompt) {
                    return Ok(Outcome::new(
                        "Autopilot-like prompts are blocked on /run. Use /autopilot <task> and /confirm <nonce>.",
                        received.detail("outcome", "autopilot_guard"),
                    ));
                }
                let details = vec![format!("Prompt length: {}", prompt.chars().count())];
                self.request_confirmation(identity, Action::RunPrompt { prompt }, details)
                    .await
            }
            Command::Autopilot(task) => {
                if task.is_empty() {
                    return Ok(Outcome::new("Usage: /autopilot <task>", received));
                }
                let details = vec![format!("Task: {}", truncate_chars(&task, PREVIEW_CHARS))];
                self.request_confirmation(identity, Action::Autopilot { task }, details)
                    .await
            }
            Command::Codex(args) => {
                match split_shell_words(&args) {
                    Ok(words) if !words.is_empty() => {}
                    Ok(_) => return Ok(Outcome::new("Usage: /codex <raw codex args>", received)),
                    Err(e) => {
                        return Ok(Outcome::new(
                            format!("Invalid /codex arguments: {e}"),
                            received.detail("outcome", "invalid_arguments"),
                        ));
                    }
                }
                let details = vec![format!("Args length: {}", args.chars().count())];
                self.request_confirmation(identity, Action::RawCodexInvocation { args }, details)
                    .await
            }
            Command::Skill(arg) => {
                let Some((name, task)) = parse_named_invocation(&arg) else {
                    return Ok(Outcome::new("Usage: /skill <name> <task>", received));
                };
                let details = vec![
                    format!("Skill: {name}"),
                    format!("Task: {}", truncate_chars(&task, PREVIEW_CHARS)),
                ];
                self.request_confirmation(identity, Action::SkillInvocation { name, task }, details)
                    .await
            }
            Command::Prompt(arg) => {
                let Some((name, task)) = parse_named_invocation(&arg) else {
                    return Ok(Outcome::new("Usage: /prompt <name> <task>", received));
                };
                let details = vec![
                    format!("Prompt: {name}"),
                    format!("Task: {}", truncate_chars(&task, PREVIEW_CHARS)),
                ];
                self.request_confirmation(
                    identity,
                    Action::PromptInvocation { name, task },
                    details,
                )
                .await
            }
            Command::Report(topic) => {
                if topic.is_empty() {
                    return Ok(Outcome::new("Usage: /report <topic>", received));
                }
                let report_path = plan_report_path(&topic, Utc::now());
                let details = vec![
                    format!("Topic: {}", truncate_chars(&topic, PREVIEW_CHARS)),
                    format!("Planned path: {report_path}"),
                ];
                self.request_confirmation(identity, Action::Report { topic, report_path }, details)
                    .await
            }
            Command::Skills(filter) => {
                Ok(Outcome::new(self.browser.skills(&filter).await?, received))
            }
            Command::Prompts(filter) => {
                Ok(Outcome::new(self.browser.prompts(&filter).await?, received))
            }
            Command::Files(arg) => Ok(Outcome::new(self.browser.files(&arg).await?, received)),
            Command::Read(arg) => Ok(Outcome::new(self.browser.read(&arg).await?, received)),
            Command::Confirm(nonce) => self.confirm(identity, &nonce, received).await,
            Command::Cancel => self.cancel(identity, received).await,
            Command::Logs => {
                let events = queries::events::recent(&self.db, LOG_LIMIT).await?;
                if events.is_empty() {
                    return Ok(Outcome::new("No logs available.", received));
                }
                let lines: Vec<String> = events
                    .iter()
                    .map(|e| format_log_line(e, &self.redactor))
                    .collect();
                Ok(Outcome::new(lines.join("\n"), received))
            }
            Command::Unknown(_) => Ok(Outcome::new(
                format!("Unknown command. Available: {COMMAND_LIST}"),
                received.detail("outcome", "unknown_command"),
            )),
        }
    }

    async fn request_confirmation(
        &self,
        identity: Identity,
        action: Action,
        details: Vec<String>,
    ) -> Result<Outcome, TetherError> {
        let issued = self.confirmations.issue(identity, &action).await?;
        let command = action.command_name();
        let mut lines = vec![
            format!("Confirmation required for {command}."),
            format!("Run: /confirm {}", issued.nonce),
        ];
        lines.extend(details);
        lines.push(format!("Expires: {}", format_expiry(issued.expires_at)));

        Ok(Outcome::new(
            lines.join("\n"),
            AuditEvent::new(AuditEventType::ConfirmationIssued)
                .identity(identity)
                .detail("command", command)
                .detail("expires_at", format_expiry(issued.expires_at)),
        ))
    }

    /// Consume first, then submit. A consumed nonce is never reusable, even
    /// when the job cannot start.
    async fn confirm(
        &self,
        identity: Identity,
        nonce: &str,
        received: AuditEvent,
    ) -> Result<Outcome, TetherError> {
        if nonce.is_empty() {
            return Ok(Outcome::new("Usage: /confirm <nonce>", received));
        }

        let action = match self.confirmations.consume(identity, nonce).await {
            Ok(action) => action,
            Err(TetherError::Confirmation(failure)) => {
                let (event_type, reply) = match failure {
                    ConfirmationFailure::NotFound => (
                        AuditEventType::ConfirmationRejected,
                        "Invalid or already used confirmation nonce.",
                    ),
                    ConfirmationFailure::Expired => (
                        AuditEventType::ConfirmationExpired,
                        "Confirmation expired. Send the command again for a new nonce.",
                    ),
                    ConfirmationFailure::IdentityMismatch => (
                        AuditEventType::ConfirmationRejected,
                        "This confirmation was issued to a different user or chat.",
                    ),
                };
                return Ok(Outcome::new(
                    reply,
                    AuditEvent::new(event_type)
                        .identity(identity)
                        .detail("reason", failure.to_string()),
                ));
            }
            Err(e) => return Err(e),
        };

        let command = action.command_name();
        let consumed = |reason: String| {
            AuditEvent::new(AuditEventType::ConfirmationConsumed)
                .identity(identity)
                .detail("command", command)
                .detail("reason", reason)
        };

        // The rule set may have been reloaded since the nonce was issued.
        if !self.policy.decide(identity, command).is_allowed() {
            return Ok(Outcome::new(
                TetherError::PolicyDenied {
                    command: command.to_string(),
                }
                .to_string(),
                AuditEvent::new(AuditEventType::PolicyDenied)
                    .identity(identity)
                    .detail("command", command)
                    .detail("stage", "confirm"),
            ));
        }

        match self.runner.submit(JobSpec::new(identity, action.clone())).await {
            Ok(id) => Ok(Outcome::new(
                accepted_message(&action, id),
                AuditEvent::new(AuditEventType::JobStarted)
                    .identity(identity)
                    .job(id)
                    .detail("command", command),
            )),
            Err(TetherError::JobAlreadyRunning) => Ok(Outcome::new(
                JOB_BUSY,
                consumed("job_already_running".to_string()),
            )),
            Err(e @ TetherError::JobExecutionFailed { .. }) => Ok(Outcome {
                reply: Some(format!("Failed to start confirmed job: {e}")),
                event: None,
            }),
            Err(e) if e.is_user_facing() => Ok(Outcome::new(
                format!("Failed to start confirmed job: {e}"),
                consumed(e.to_string()),
            )),
            Err(e) => Err(e),
        }
    }

    async fn cancel(&self, identity: Identity, received: AuditEvent) -> Result<Outcome, TetherError> {
        let Some(job) = self.runner.active_job().await else {
            return Ok(Outcome::new("No active job.", received));
        };
        if job.identity != identity && !self.policy.is_owner(identity) {
            return Ok(Outcome::new(
                "Only the job's requester or the owner can cancel it.",
                AuditEvent::new(AuditEventType::PolicyDenied)
                    .identity(identity)
                    .job(job.id)
                    .detail("command", "/cancel"),
            ));
        }
        match self.runner.cancel().await {
            Some(id) => Ok(Outcome::new(
                "Cancellation request sent.",
                received.job(id).detail("outcome", "cancel_requested"),
            )),
            None => Ok(Outcome::new("No active job.", received)),
        }
    }

    async fn chat_command(
        &self,
        identity: Identity,
        arg: &str,
        received: AuditEvent,
    ) -> Result<Outcome, TetherError> {
        if arg.is_empty() {
            let thread = self.chat.thread(identity).await?;
            let mode = if self.interactive { "enabled" } else { "disabled" };
            return Ok(Outcome::new(
                format!(
                    "Interactive chat: {mode}\nSession: {}\nUsage: send plain text or /chat <message>\nReset session: /chat reset",
                    thread.as_deref().unwrap_or("none")
                ),
                received,
            ));
        }
        if arg.eq_ignore_ascii_case("reset") {
            let cleared = self.chat.reset(identity).await?;
            return Ok(Outcome::new(
                if cleared {
                    "Chat session reset."
                } else {
                    "No chat session to reset."
                },
                AuditEvent::new(AuditEventType::ChatSessionReset)
                    .identity(identity)
                    .detail("cleared", cleared),
            ));
        }
        if !self.interactive {
            return Ok(Outcome::new(CHAT_DISABLED, received));
        }

        let failed = |reason: &str| {
            AuditEvent::new(AuditEventType::ChatTurnFailed)
                .identity(identity)
                .detail("reason", reason.to_string())
        };
        if self.runner.is_busy().await {
            return Ok(Outcome::new(
                "A job is already running. Chat resumes when it finishes, or use /cancel.",
                failed("job_running"),
            ));
        }

        match self.chat.turn(identity, arg).await {
            Ok(outcome) if outcome.text.trim().is_empty() => Ok(Outcome::new(
                EMPTY_CHAT_REPLY,
                AuditEvent::new(AuditEventType::ChatEmptyResponse)
                    .identity(identity)
                    .detail("thread_id", outcome.thread_id),
            )),
            Ok(outcome) => {
                let event = AuditEvent::new(AuditEventType::ChatTurn)
                    .identity(identity)
                    .detail("resumed", outcome.resumed)
                    .detail("thread_id", outcome.thread_id)
                    .detail("assistant_len", outcome.text.chars().count());
                Ok(Outcome::new(outcome.text.trim(), event))
            }
            Err(e) => {
                warn!(%identity, error = %e, "chat turn failed");
                Ok(Outcome::new(e.to_string(), failed(&e.to_string())))
            }
        }
    }

    fn should_reply_unauthorized(&self) -> bool {
        let Ok(mut last) = self.last_unauthorized_reply.lock() else {
            return false;
        };
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) < self.unauthorized_interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::JobStatus;

    #[test]
    fn status_without_job() {
        assert_eq!(
            format_status(Duration::from_secs(42), None),
            "health: ok\nuptime_seconds: 42\nactive_job: none"
        );
    }

    #[test]
    fn status_with_job() {
        let job = ActiveJob {
            id: 7,
            identity: Identity::new(1, 2),
            command: "run".into(),
            status: JobStatus::Running,
        };
        assert_eq!(
            format_status(Duration::from_millis(1500), Some(&job)),
            "health: ok\nuptime_seconds: 1\nactive_job.id: 7\nactive_job.command: run\nactive_job.status: RUNNING"
        );
    }

    #[test]
    fn log_lines_hide_process_output_and_truncate() {
        let redactor = Redactor::new();
        let output = JobEvent {
            id: 1,
            job_id: Some(3),
            event_type: "process_stdout".into(),
            message: "secret build output".into(),
            created_at: "2026-01-01T00:00:00.000Z".into(),
        };
        assert_eq!(
            format_log_line(&output, &redactor),
            "2026-01-01T00:00:00.000Z job=3 process_stdout [process output omitted]"
        );

        let long = JobEvent {
            job_id: None,
            event_type: "command_received".into(),
            message: "m".repeat(400),
            ..output
        };
        let line = format_log_line(&long, &redactor);
        assert!(line.contains(" job=- command_received "));
        assert!(line.ends_with("..."));
        assert_eq!(line.split(' ').last().unwrap().chars().count(), LOG_MESSAGE_CHARS);
    }

    #[test]
    fn named_invocations_need_valid_name_and_task() {
        assert_eq!(
            parse_named_invocation("lint  fix the warnings"),
            Some(("lint".into(), "fix the warnings".into()))
        );
        assert_eq!(parse_named_invocation("lint"), None);
        assert_eq!(parse_named_invocation("../x task"), None);
    }

    #[test]
    fn accepted_messages_name_the_job_kind() {
        let report = Action::Report {
            topic: "q3".into(),
            report_path: "reports/x.md".into(),
        };
        assert_eq!(
            accepted_message(&report, 4),
            "Report job #4 accepted. Planned path: reports/x.md"
        );
        let codex = Action::RawCodexInvocation { args: "exec".into() };
        assert_eq!(accepted_message(&codex, 5), "Codex job #5 accepted.");
    }
}
