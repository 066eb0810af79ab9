// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The single-slot job runner.
//!
//! Admission is serialized by the `active` mutex and backed by the storage
//! layer's partial unique index, so at most one job is ever `RUNNING`. A job
//! left running by a previous process keeps its row `RUNNING` and therefore
//! the slot, until `/cancel` stops its process group.

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tether_audit::{AuditEvent, AuditEventType, AuditLog};
use tether_config::TetherConfig;
use tether_core::{Action, Identity, JobId, JobStatus, OutboundMessage, TetherError};
use tether_security::{EnvAllowlist, Redactor, WorkspaceRoot};
use tether_storage::{Database, JobRecord, NewJob, RecoverySummary, queries};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{argv, process};

/// Captured output kept per stream; older text is dropped first.
const MAX_CAPTURED_BYTES: usize = 64 * 1024;
/// How long output readers may linger after the process has exited.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const PREVIEW_CHARS: usize = 80;
/// Backoff between attempts to persist a job's terminal state.
const FINISH_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(500),
    Duration::from_secs(2),
];

/// Runner settings derived from the configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub codex_command: String,
    pub job_timeout: Duration,
    pub max_event_rows: u32,
}

impl RunnerConfig {
    pub fn from_config(config: &TetherConfig) -> Self {
        Self {
            codex_command: config.codex.command.clone(),
            job_timeout: Duration::from_secs(config.codex.job_timeout_secs),
            max_event_rows: config.storage.max_event_rows,
        }
    }
}

/// A job to run, as approved by a confirmation.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub identity: Identity,
    pub action: Action,
    /// Workspace-relative working directory; the workspace root when `None`.
    pub cwd: Option<String>,
}

impl JobSpec {
    pub fn new(identity: Identity, action: Action) -> Self {
        Self {
            identity,
            action,
            cwd: None,
        }
    }
}

/// Snapshot of the job holding the slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveJob {
    pub id: JobId,
    pub identity: Identity,
    pub command: String,
    pub status: JobStatus,
}

struct Slot {
    job: ActiveJob,
    cancel: CancellationToken,
    done: CancellationToken,
    /// Set when the job ended but its terminal state could not be stored.
    /// The slot stays taken until a later attempt succeeds.
    unsaved: Option<Outcome>,
}

/// Terminal state of a job, as written by `queries::jobs::finish`.
#[derive(Debug, Clone)]
struct Outcome {
    status: JobStatus,
    exit_code: Option<i32>,
    output: String,
    error: Option<String>,
}

enum Stop {
    Exited(Option<ExitStatus>),
    TimedOut,
    Cancelled,
}

struct Inner {
    config: RunnerConfig,
    workspace: WorkspaceRoot,
    env: EnvAllowlist,
    db: Database,
    audit: Arc<AuditLog>,
    redactor: Redactor,
    notifier: Option<mpsc::Sender<OutboundMessage>>,
    active: Mutex<Option<Slot>>,
    started: Instant,
}

/// Runs confirmed actions as Codex subprocesses, one at a time.
#[derive(Clone)]
pub struct JobRunner {
    inner: Arc<Inner>,
}

impl JobRunner {
    pub fn new(
        config: RunnerConfig,
        workspace: WorkspaceRoot,
        env: EnvAllowlist,
        db: Database,
        audit: Arc<AuditLog>,
        redactor: Redactor,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                workspace,
                env,
                db,
                audit,
                redactor,
                notifier: None,
                active: Mutex::new(None),
                started: Instant::now(),
            }),
        }
    }

    /// Route start, output and completion notices into `tx`.
    ///
    /// Must be called before the runner is cloned.
    pub fn with_notifier(mut self, tx: mpsc::Sender<OutboundMessage>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.notifier = Some(tx);
        } else {
            warn!("notifier attached after the runner was shared; ignoring");
        }
        self
    }

    pub fn uptime(&self) -> Duration {
        self.inner.started.elapsed()
    }

    /// Start a job if the slot is free.
    ///
    /// Fails with [`TetherError::JobAlreadyRunning`] when another job holds
    /// the slot, [`TetherError::WorkspaceViolation`] when the working
    /// directory escapes the workspace, and
    /// [`TetherError::JobExecutionFailed`] when the process cannot start.
    /// A start failure records the job as `FAILED` with a `job_failed`
    /// audit event.
    pub async fn submit(&self, spec: JobSpec) -> Result<JobId, TetherError> {
        let inner = &self.inner;
        let argv = argv::job_argv(&inner.config.codex_command, &spec.action)?;
        let cwd = match spec.cwd.as_deref() {
            Some(rel) => inner.workspace.resolve(rel)?,
            None => inner.workspace.confine(inner.workspace.path())?,
        };

        let mut slot = inner.active.lock().await;
        if let Some(held) = slot.as_mut() {
            let Some(outcome) = held.unsaved.clone() else {
                return Err(TetherError::JobAlreadyRunning);
            };
            let held_id = held.job.id;
            inner.persist_outcome(held_id, outcome).await?;
            info!(job_id = held_id, "stored deferred job result; slot released");
            *slot = None;
        }

        let label = spec.action.label().to_string();
        let prompt = match &spec.action {
            Action::RawCodexInvocation { args } => args.clone(),
            other => argv::action_prompt(other).unwrap_or_default(),
        };
        let new_job = NewJob {
            identity: spec.identity,
            command: label.clone(),
            prompt: inner.redactor.redact(&prompt),
            argv: argv.iter().map(|a| inner.redactor.redact(a)).collect(),
            cwd: inner.workspace.relative(&cwd),
        };
        let Some(id) = queries::jobs::insert_queued(&inner.db, new_job).await? else {
            return Err(TetherError::JobAlreadyRunning);
        };

        let mut child = match process::spawn(&argv, &cwd, &inner.env.collect()) {
            Ok(child) => child,
            Err(e) => {
                let message = inner.redactor.redact(&e.to_string());
                self.record_start_failure(id, spec.identity, &label, &message)
                    .await;
                return Err(e);
            }
        };

        let pid = child.id();
        let start_token = pid.and_then(|p| process::pid_start_token(i64::from(p)));
        if let Err(e) =
            queries::jobs::mark_running(&inner.db, id, pid.map(i64::from), start_token).await
        {
            process::terminate(&mut child).await;
            let message = inner.redactor.redact(&e.to_string());
            self.record_start_failure(id, spec.identity, &label, &message)
                .await;
            return Err(e);
        }
        inner
            .event(Some(id), "job_started", &format!("command={label} pid={pid:?}"))
            .await;

        let job = ActiveJob {
            id,
            identity: spec.identity,
            command: label.clone(),
            status: JobStatus::Running,
        };
        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        *slot = Some(Slot {
            job: job.clone(),
            cancel: cancel.clone(),
            done: done.clone(),
            unsaved: None,
        });
        drop(slot);

        info!(job_id = id, command = %label, ?pid, "job started");
        inner
            .notify(
                id,
                spec.identity.chat_id,
                format!("Started job #{id}: {label} {}", preview(&prompt)).trim_end(),
            )
            .await;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.monitor(job, child, cancel, done).await;
        });
        Ok(id)
    }

    async fn record_start_failure(&self, id: JobId, identity: Identity, label: &str, message: &str) {
        let inner = &self.inner;
        if let Err(e) = queries::jobs::finish(
            &inner.db,
            id,
            JobStatus::Failed,
            None,
            String::new(),
            Some(message.to_string()),
        )
        .await
        {
            error!(job_id = id, error = %e, "failed to record job start failure");
        }
        inner.event(Some(id), "spawn_failed", message).await;
        inner
            .audit
            .record(
                AuditEvent::new(AuditEventType::JobFailed)
                    .identity(identity)
                    .job(id)
                    .detail("command", label)
                    .detail("status", JobStatus::Failed.to_string())
                    .detail("error", message),
            )
            .await;
    }

    /// The job currently holding the slot, including an orphan left
    /// running by a previous process.
    pub async fn active_job(&self) -> Option<ActiveJob> {
        let slot = self.inner.active.lock().await;
        if let Some(held) = slot.as_ref() {
            return Some(held.job.clone());
        }
        drop(slot);
        self.inner.orphan().await.map(|record| ActiveJob {
            id: record.id,
            identity: record.identity,
            command: record.command,
            status: record.status,
        })
    }

    pub async fn is_busy(&self) -> bool {
        self.active_job().await.is_some()
    }

    /// Request cancellation of the active job through the standard
    /// termination path. Returns the job id, or `None` when idle.
    ///
    /// An orphan from a previous run has no in-process handle; its process
    /// group is signalled directly once its start token is confirmed, and
    /// this call returns after it has stopped.
    pub async fn cancel(&self) -> Option<JobId> {
        let slot = self.inner.active.lock().await;
        if slot.is_some() {
            drop(slot);
            return self.cancel_owned().await;
        }
        // The slot stays locked so no job is admitted while the orphan is
        // being stopped.
        let record = self.inner.orphan().await?;
        let id = self.inner.cancel_orphan(record).await;
        drop(slot);
        id
    }

    async fn cancel_owned(&self) -> Option<JobId> {
        let id = {
            let slot = self.inner.active.lock().await;
            let slot = slot.as_ref()?;
            if slot.unsaved.is_some() {
                return None;
            }
            slot.cancel.cancel();
            slot.job.id
        };
        self.inner
            .event(Some(id), "cancel_requested", "Cancellation requested")
            .await;
        Some(id)
    }

    /// Wait until the active job (if any) has reached a terminal state.
    pub async fn wait_current(&self) {
        let done = self
            .inner
            .active
            .lock()
            .await
            .as_ref()
            .map(|s| s.done.clone());
        if let Some(done) = done {
            done.cancelled().await;
        }
    }

    /// Cancel the active job and wait up to `timeout` for it to finish.
    pub async fn shutdown(&self, timeout: Duration) {
        if let Some(id) = self.cancel_owned().await {
            info!(job_id = id, "cancelling active job for shutdown");
            if tokio::time::timeout(timeout, self.wait_current()).await.is_err() {
                warn!(job_id = id, "active job did not stop before shutdown deadline");
            }
        }
    }

    /// Reconcile jobs left active by a previous process.
    ///
    /// Jobs whose process is gone become `INTERRUPTED_RECOVERED`. A live
    /// orphan that still matches its start token stays `RUNNING` and holds
    /// the slot; nothing is signalled until `/cancel`.
    pub async fn recover(&self) -> Result<RecoverySummary, TetherError> {
        let summary = queries::jobs::reconcile(&self.inner.db, process::is_live_orphan).await?;
        if summary == RecoverySummary::default() {
            return Ok(summary);
        }
        for (job_id, pid) in &summary.live_pids {
            warn!(
                job_id,
                pid, "orphaned job process is still running; use /cancel to terminate it"
            );
        }
        let recovered: Vec<JobId> = summary.recovered.clone();
        let live: Vec<String> = summary
            .live_pids
            .iter()
            .map(|(job, pid)| format!("{job}:{pid}"))
            .collect();
        self.inner
            .audit
            .record(
                AuditEvent::new(AuditEventType::Recovery)
                    .detail("recovered_jobs", recovered)
                    .detail("live_pids", live),
            )
            .await;
        if !summary.live_pids.is_empty() {
            self.inner
                .event(
                    None,
                    "recovery_orphan",
                    &format!(
                        "Detected {} orphan RUNNING jobs with live PIDs; use /cancel to terminate them",
                        summary.live_pids.len()
                    ),
                )
                .await;
        }
        info!(
            recovered = summary.recovered.len(),
            orphans = summary.live_pids.len(),
            "reconciled interrupted jobs"
        );
        Ok(summary)
    }
}

impl Inner {
    async fn monitor(
        self: Arc<Self>,
        job: ActiveJob,
        mut child: Child,
        cancel: CancellationToken,
        done: CancellationToken,
    ) {
        let id = job.id;
        let readers = [
            child.stdout.take().map(|s| self.spawn_reader(&job, "stdout", s)),
            child.stderr.take().map(|s| self.spawn_reader(&job, "stderr", s)),
        ];

        let stop = tokio::select! {
            status = child.wait() => Stop::Exited(status.ok()),
            _ = tokio::time::sleep(self.config.job_timeout) => Stop::TimedOut,
            _ = cancel.cancelled() => Stop::Cancelled,
        };
        let (status, exit) = match stop {
            Stop::Exited(exit) => {
                let status = match exit {
                    Some(s) if s.success() => JobStatus::Completed,
                    _ => JobStatus::Failed,
                };
                (status, exit)
            }
            Stop::TimedOut => {
                self.event(Some(id), "job_timeout", "Job timed out").await;
                (JobStatus::TimedOut, process::terminate(&mut child).await)
            }
            Stop::Cancelled => (JobStatus::Cancelled, process::terminate(&mut child).await),
        };
        let exit_code = exit.and_then(|s| s.code());

        let mut captured = Vec::with_capacity(2);
        for reader in readers.into_iter().flatten() {
            let abort = reader.abort_handle();
            match tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await {
                Ok(Ok(text)) => captured.push(text),
                Ok(Err(e)) => warn!(job_id = id, error = %e, "output reader failed"),
                Err(_) => {
                    abort.abort();
                    warn!(job_id = id, "output reader did not drain; abandoning it");
                }
            }
        }
        let output = captured
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        let error = match status {
            JobStatus::TimedOut => Some(
                TetherError::JobTimedOut {
                    duration: self.config.job_timeout,
                }
                .to_string(),
            ),
            JobStatus::Cancelled => Some("cancelled".to_string()),
            _ => None,
        };
        let outcome = Outcome {
            status,
            exit_code,
            output,
            error,
        };
        let unsaved = match self.persist_with_retry(id, &outcome).await {
            Ok(()) => None,
            Err(e) => {
                error!(
                    job_id = id,
                    error = %e,
                    "failed to persist job result; holding the slot until it is stored"
                );
                Some(outcome)
            }
        };

        let exit_text = exit_code.map_or_else(|| "none".to_string(), |c| c.to_string());
        self.event(
            Some(id),
            "job_finished",
            &format!("status={status} exit_code={exit_text}"),
        )
        .await;

        let event_type = match status {
            JobStatus::Completed => AuditEventType::JobCompleted,
            JobStatus::TimedOut => AuditEventType::JobTimedOut,
            JobStatus::Cancelled => AuditEventType::JobCancelled,
            _ => AuditEventType::JobFailed,
        };
        let mut event = AuditEvent::new(event_type)
            .identity(job.identity)
            .job(id)
            .detail("command", job.command.as_str())
            .detail("status", status.to_string());
        if let Some(code) = exit_code {
            event = event.detail("exit_code", code);
        }
        self.audit.record(event).await;

        info!(job_id = id, %status, exit_code = ?exit_code, "job finished");
        self.notify(
            id,
            job.identity.chat_id,
            &format!("Job #{id} finished: {status} (exit={exit_text})"),
        )
        .await;

        let mut slot = self.active.lock().await;
        let release = unsaved.is_none();
        if let Some(held) = slot.as_mut().filter(|s| s.job.id == id) {
            held.job.status = status;
            held.unsaved = unsaved;
        }
        if release && slot.as_ref().is_some_and(|s| s.job.id == id) {
            *slot = None;
        }
        drop(slot);
        done.cancel();
    }

    async fn persist_outcome(&self, id: JobId, outcome: Outcome) -> Result<(), TetherError> {
        queries::jobs::finish(
            &self.db,
            id,
            outcome.status,
            outcome.exit_code,
            outcome.output,
            outcome.error,
        )
        .await
    }

    async fn persist_with_retry(&self, id: JobId, outcome: &Outcome) -> Result<(), TetherError> {
        let mut delays = FINISH_RETRY_DELAYS.iter();
        loop {
            match self.persist_outcome(id, outcome.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => match delays.next() {
                    Some(delay) => {
                        warn!(job_id = id, error = %e, "retrying job result write");
                        tokio::time::sleep(*delay).await;
                    }
                    None => return Err(e),
                },
            }
        }
    }

    /// The `RUNNING` row of a job this process does not own.
    async fn orphan(&self) -> Option<JobRecord> {
        match queries::jobs::active(&self.db).await {
            Ok(record) => record.filter(|r| r.status == JobStatus::Running),
            Err(e) => {
                warn!(error = %e, "failed to look up orphaned job");
                None
            }
        }
    }

    async fn cancel_orphan(&self, record: JobRecord) -> Option<JobId> {
        let id = record.id;
        let chat_id = record.identity.chat_id;
        let Some(pid) = record.pid.filter(|p| *p > 0) else {
            self.settle_orphan(&record, "orphan has no recorded pid").await;
            return Some(id);
        };

        if !process::pid_is_alive(pid) {
            self.settle_orphan(&record, &format!("orphan pid={pid} was already not alive"))
                .await;
            self.event(Some(id), "orphan_already_not_alive", &format!("pid={pid}"))
                .await;
            self.notify(
                id,
                chat_id,
                &format!("Job #{id} recovered: orphan pid={pid} was already stopped"),
            )
            .await;
            return Some(id);
        }

        if !process::pid_matches_token(pid, record.pid_start_token.as_deref()) {
            self.settle_orphan(
                &record,
                &format!("orphan pid identity mismatch for pid={pid}; did not signal unknown process"),
            )
            .await;
            self.event(
                Some(id),
                "cancel_blocked_identity_mismatch",
                &format!("pid={pid} start_token={:?}", record.pid_start_token),
            )
            .await;
            self.notify(
                id,
                chat_id,
                &format!("Job #{id} cancellation blocked: pid identity mismatch for pid={pid}"),
            )
            .await;
            return Some(id);
        }

        self.event(Some(id), "cancel_requested", &format!("orphan pid={pid}"))
            .await;
        if !process::terminate_group(pid).await {
            warn!(job_id = id, pid, "orphan process group survived SIGKILL");
            self.event(
                Some(id),
                "cancel_sla_miss",
                &format!("Unable to terminate orphan pid={pid}"),
            )
            .await;
            self.notify(
                id,
                chat_id,
                &format!("Job #{id} cancellation failed; orphan pid={pid} may still be running"),
            )
            .await;
            return Some(id);
        }

        let outcome = Outcome {
            status: JobStatus::Cancelled,
            exit_code: None,
            output: record.output.clone(),
            error: Some("cancelled after restart".to_string()),
        };
        if let Err(e) = self.persist_with_retry(id, &outcome).await {
            error!(job_id = id, error = %e, "failed to persist orphan cancellation");
        }
        self.event(
            Some(id),
            "job_finished",
            "status=CANCELLED exit_code=none recovered_orphan=true",
        )
        .await;
        self.audit
            .record(
                AuditEvent::new(AuditEventType::JobCancelled)
                    .identity(record.identity)
                    .job(id)
                    .detail("command", record.command.as_str())
                    .detail("status", JobStatus::Cancelled.to_string())
                    .detail("orphan_pid", pid),
            )
            .await;
        info!(job_id = id, pid, "orphaned job cancelled");
        self.notify(
            id,
            chat_id,
            &format!("Job #{id} finished: CANCELLED (orphan pid={pid})"),
        )
        .await;
        Some(id)
    }

    /// Release an orphan's slot without signalling anything.
    async fn settle_orphan(&self, record: &JobRecord, reason: &str) {
        let outcome = Outcome {
            status: JobStatus::InterruptedRecovered,
            exit_code: None,
            output: record.output.clone(),
            error: Some(reason.to_string()),
        };
        if let Err(e) = self.persist_with_retry(record.id, &outcome).await {
            error!(job_id = record.id, error = %e, "failed to release orphaned job");
        }
        self.audit
            .record(
                AuditEvent::new(AuditEventType::Recovery)
                    .identity(record.identity)
                    .job(record.id)
                    .detail("reason", reason),
            )
            .await;
        info!(job_id = record.id, reason, "orphaned job released");
    }

    fn spawn_reader<R>(self: &Arc<Self>, job: &ActiveJob, stream: &'static str, reader: R) -> JoinHandle<String>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let inner = Arc::clone(self);
        let job_id = job.id;
        let chat_id = job.identity.chat_id;
        tokio::spawn(async move {
            let mut captured = String::new();
            let mut lines = BufReader::new(reader).lines();
            let event_type = format!("process_{stream}");
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(job_id, stream, error = %e, "output stream closed");
                        break;
                    }
                };
                let text = inner.redactor.redact(line.trim_end());
                if text.is_empty() {
                    continue;
                }
                inner.event(Some(job_id), &event_type, &text).await;
                inner
                    .notify(job_id, chat_id, &format!("[{stream}] {text}"))
                    .await;
                push_capped(&mut captured, &text);
            }
            captured
        })
    }

    async fn event(&self, job_id: Option<JobId>, event_type: &str, message: &str) {
        if let Err(e) = queries::events::append(
            &self.db,
            job_id,
            event_type,
            message,
            self.config.max_event_rows,
        )
        .await
        {
            warn!(?job_id, event_type, error = %e, "failed to append job event");
        }
    }

    /// Best effort: a full or closed channel is recorded and ignored.
    async fn notify(&self, job_id: JobId, chat_id: i64, text: &str) {
        let Some(tx) = &self.notifier else {
            return;
        };
        let text = self.redactor.redact(text);
        if let Err(e) = tx.try_send(OutboundMessage::new(chat_id, text)) {
            self.event(Some(job_id), "notify_error", &e.to_string()).await;
        }
    }
}

fn push_capped(buf: &mut String, line: &str) {
    if !buf.is_empty() {
        buf.push('\n');
    }
    buf.push_str(line);
    if buf.len() > MAX_CAPTURED_BYTES {
        let mut cut = buf.len() - MAX_CAPTURED_BYTES;
        while !buf.is_char_boundary(cut) {
            cut += 1;
        }
        buf.drain(..cut);
    }
}

fn preview(text: &str) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= PREVIEW_CHARS {
        flat
    } else {
        flat.chars().take(PREVIEW_CHARS).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capped_buffer_keeps_the_tail() {
        let mut buf = String::new();
        for i in 0..10_000 {
            push_capped(&mut buf, &format!("line {i}"));
        }
        assert!(buf.len() <= MAX_CAPTURED_BYTES);
        assert!(buf.ends_with("line 9999"));
    }

    #[test]
    fn preview_flattens_and_truncates() {
        assert_eq!(preview("a\nb"), "a b");
        assert_eq!(preview(&"x".repeat(200)).len(), PREVIEW_CHARS);
    }
}
