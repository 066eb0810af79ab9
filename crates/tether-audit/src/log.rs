// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! JSONL audit writer with size-based rotation.

use std::fs::OpenOptions;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tether_security::Redactor;
use tether_storage::Database;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::event::AuditEvent;

/// Job event ring that audit events are mirrored into for `/logs`.
#[derive(Clone)]
struct Mirror {
    db: Database,
    max_rows: u32,
}

/// Append-only audit sink.
///
/// Writes are serialized by an async mutex so lines land in completion
/// order. Failures are logged and swallowed: auditing never aborts the
/// operation being audited.
pub struct AuditLog {
    path: PathBuf,
    max_bytes: u64,
    redactor: Redactor,
    mirror: Option<Mirror>,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64, redactor: Redactor) -> Self {
        Self {
            path: path.into(),
            max_bytes,
            redactor,
            mirror: None,
            lock: Mutex::new(()),
        }
    }

    /// Also copy each event into the storage job event ring.
    pub fn with_mirror(mut self, db: Database, max_rows: u32) -> Self {
        self.mirror = Some(Mirror { db, max_rows });
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Redact, append and (optionally) mirror one event.
    pub async fn record(&self, mut event: AuditEvent) {
        for value in event.details.values_mut() {
            if let Value::String(s) = value {
                *s = self.redactor.redact(s);
            }
        }

        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to serialize audit event");
                return;
            }
        };

        let _guard = self.lock.lock().await;
        if let Err(e) = self.append_line(&line) {
            warn!(error = %e, path = %self.path.display(), "failed to write audit event");
        }
        if let Some(mirror) = &self.mirror {
            let message = event.summary();
            if let Err(e) = tether_storage::queries::events::append(
                &mirror.db,
                event.job_id,
                &event.event_type.to_string(),
                &message,
                mirror.max_rows,
            )
            .await
            {
                warn!(error = %e, "failed to mirror audit event");
            }
        }
        debug!(event_type = %event.event_type, "audit event recorded");
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        self.rotate_if_needed(line.len() as u64 + 1)?;

        let mut opts = OpenOptions::new();
        opts.create(true).append(true);
        #[cfg(unix)]
        opts.mode(0o600);
        let mut file = opts.open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()
    }

    /// Move the current file to `<path>.1` when the next line would exceed
    /// the size limit. One generation is kept.
    fn rotate_if_needed(&self, incoming: u64) -> std::io::Result<()> {
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return Ok(());
        };
        if meta.len() == 0 || meta.len() + incoming <= self.max_bytes {
            return Ok(());
        }
        let mut rotated = self.path.clone().into_os_string();
        rotated.push(".1");
        std::fs::rename(&self.path, PathBuf::from(rotated))
    }
}

/// Parse every event in a JSONL audit file. Malformed lines are skipped.
pub fn read_events(path: impl AsRef<Path>) -> std::io::Result<Vec<AuditEvent>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AuditEventType;
    use tether_core::Identity;

    #[tokio::test]
    async fn appends_redacted_jsonl_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/audit.jsonl");
        let log = AuditLog::new(&path, 1024 * 1024, Redactor::with_secrets(["s3cret-hook"]));

        log.record(
            AuditEvent::new(AuditEventType::WebhookError)
                .detail("reason", "bad token s3cret-hook")
                .detail("status", 401),
        )
        .await;
        log.record(AuditEvent::new(AuditEventType::CommandReceived).identity(Identity::new(1, 2)))
            .await;

        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, AuditEventType::WebhookError);
        assert_eq!(events[0].details["reason"], "bad token [REDACTED]");
        assert_eq!(events[0].details["status"], 401);
        assert_eq!(events[1].user_id, Some(1));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn rotates_past_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::new(&path, 200, Redactor::new());

        for i in 0..6 {
            log.record(AuditEvent::new(AuditEventType::PollError).detail("attempt", i))
                .await;
        }

        let rotated = dir.path().join("audit.jsonl.1");
        assert!(rotated.exists());
        assert!(std::fs::metadata(&path).unwrap().len() <= 200);
        let total = read_events(&path).unwrap().len() + read_events(&rotated).unwrap().len();
        assert!(total >= 2 && total <= 6);
    }

    #[tokio::test]
    async fn mirrors_into_job_event_ring() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().await.unwrap();
        let log = AuditLog::new(dir.path().join("a.jsonl"), 1 << 20, Redactor::new())
            .with_mirror(db.clone(), 100);

        log.record(
            AuditEvent::new(AuditEventType::ConfirmationIssued)
                .identity(Identity::new(123, 456))
                .detail("command", "/run"),
        )
        .await;

        let events = tether_storage::queries::events::recent(&db, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "confirmation_issued");
        assert_eq!(events[0].message, "user=123 chat=456 command=/run");
    }

    #[tokio::test]
    async fn unwritable_path_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let log = AuditLog::new(blocker.join("audit.jsonl"), 1024, Redactor::new());
        log.record(AuditEvent::new(AuditEventType::Recovery)).await;
    }
}
