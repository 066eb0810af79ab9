// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tether_audit::{AuditEventType, AuditLog, read_events};
use tether_core::{Action, Identity, JobId, JobStatus, OutboundMessage, TetherError};
use tether_runner::{JobRunner, JobSpec, RunnerConfig, process};
use tether_security::{EnvAllowlist, Redactor, WorkspaceRoot};
use tether_storage::{Database, queries};
use tokio::sync::mpsc;

const OWNER: Identity = Identity {
    user_id: 123,
    chat_id: 456,
};

/// A stand-in for the Codex CLI. Behaviour is chosen by the prompt, which
/// is always the last argument.
const FAKE_CODEX: &str = r#"#!/bin/sh
for last; do :; done
case "$last" in
  sleep*) sleep 30 ;;
  fail*) echo "bad things" >&2; exit 4 ;;
  env*) env ;;
  *) echo "working on: $last"; echo "api_key=hunter2hunter2" ;;
esac
"#;

struct Fixture {
    _dir: tempfile::TempDir,
    runner: JobRunner,
    db: Database,
    audit_path: std::path::PathBuf,
    rx: mpsc::Receiver<OutboundMessage>,
}

async fn fixture_with(codex: Option<&str>, timeout: Duration) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let workspace = dir.path().join("ws");
    std::fs::create_dir(&workspace).unwrap();
    let codex_path = match codex {
        Some(cmd) => cmd.to_string(),
        None => write_fake_codex(dir.path()),
    };

    let db = Database::open_in_memory().await.unwrap();
    let audit_path = dir.path().join("audit.jsonl");
    let audit = Arc::new(AuditLog::new(&audit_path, 1 << 20, Redactor::new()));
    let (tx, rx) = mpsc::channel(256);
    let runner = JobRunner::new(
        RunnerConfig {
            codex_command: codex_path,
            job_timeout: timeout,
            max_event_rows: 1000,
        },
        WorkspaceRoot::new(&workspace).unwrap(),
        EnvAllowlist::new(vec!["PATH".into()], vec![], None),
        db.clone(),
        audit,
        Redactor::new(),
    )
    .with_notifier(tx);

    Fixture {
        _dir: dir,
        runner,
        db,
        audit_path,
        rx,
    }
}

async fn fixture() -> Fixture {
    fixture_with(None, Duration::from_secs(30)).await
}

fn write_fake_codex(dir: &Path) -> String {
    let path = dir.join("codex");
    std::fs::write(&path, FAKE_CODEX).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.display().to_string()
}

fn run(prompt: &str) -> JobSpec {
    JobSpec::new(
        OWNER,
        Action::RunPrompt {
            prompt: prompt.into(),
        },
    )
}

fn drain(rx: &mut mpsc::Receiver<OutboundMessage>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg.text);
    }
    out
}

#[tokio::test]
async fn completed_job_is_recorded_and_redacted() {
    let mut f = fixture().await;
    let id = f.runner.submit(run("hello")).await.unwrap();
    f.runner.wait_current().await;

    let job = queries::jobs::get(&f.db, id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.exit_code, Some(0));
    assert!(job.output.contains("working on: hello"));
    assert!(!job.output.contains("hunter2"));
    assert!(f.runner.active_job().await.is_none());

    let notes = drain(&mut f.rx);
    assert!(notes[0].starts_with(&format!("Started job #{id}: run hello")));
    assert!(notes.iter().any(|n| n == "[stdout] working on: hello"));
    assert_eq!(
        notes.last().unwrap(),
        &format!("Job #{id} finished: COMPLETED (exit=0)")
    );

    let events = read_events(&f.audit_path).unwrap();
    let terminal: Vec<_> = events
        .iter()
        .filter(|e| e.job_id == Some(id))
        .collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].event_type, AuditEventType::JobCompleted);
}

#[tokio::test]
async fn concurrent_submits_admit_exactly_one() {
    let f = fixture().await;
    let mut handles = Vec::new();
    for _ in 0..8 {
        let runner = f.runner.clone();
        handles.push(tokio::spawn(async move { runner.submit(run("sleep")).await }));
    }
    let mut ok = 0;
    let mut busy = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(TetherError::JobAlreadyRunning) => busy += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!((ok, busy), (1, 7));

    f.runner.cancel().await.unwrap();
    f.runner.wait_current().await;
    f.runner.submit(run("hello")).await.unwrap();
    f.runner.wait_current().await;
}

#[tokio::test]
async fn cancel_uses_termination_path() {
    let f = fixture().await;
    let id = f.runner.submit(run("sleep")).await.unwrap();
    assert_eq!(f.runner.active_job().await.unwrap().id, id);
    assert_eq!(f.runner.cancel().await, Some(id));
    f.runner.wait_current().await;

    let job = queries::jobs::get(&f.db, id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    let events = read_events(&f.audit_path).unwrap();
    assert!(
        events
            .iter()
            .any(|e| e.event_type == AuditEventType::JobCancelled && e.job_id == Some(id))
    );
    assert!(f.runner.cancel().await.is_none());
}

#[tokio::test]
async fn timeout_marks_job_timed_out() {
    let f = fixture_with(None, Duration::from_millis(300)).await;
    let id = f.runner.submit(run("sleep")).await.unwrap();
    f.runner.wait_current().await;

    let job = queries::jobs::get(&f.db, id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::TimedOut);
    assert_eq!(job.error.as_deref(), Some("job timed out after 300ms"));
    let events = read_events(&f.audit_path).unwrap();
    assert!(events.iter().any(|e| e.event_type == AuditEventType::JobTimedOut));
}

#[tokio::test]
async fn nonzero_exit_is_failed() {
    let mut f = fixture().await;
    let id = f.runner.submit(run("fail now")).await.unwrap();
    f.runner.wait_current().await;
    let job = queries::jobs::get(&f.db, id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.exit_code, Some(4));
    assert!(drain(&mut f.rx).iter().any(|n| n == "[stderr] bad things"));
}

#[tokio::test]
async fn child_environment_is_filtered() {
    let f = fixture().await;
    let id = f.runner.submit(run("env")).await.unwrap();
    f.runner.wait_current().await;
    let job = queries::jobs::get(&f.db, id).await.unwrap().unwrap();
    assert!(job.output.contains("PATH="));
    // cargo exports these to every test process; none may reach the child.
    assert!(!job.output.contains("CARGO_PKG_NAME"));
}

#[tokio::test]
async fn spawn_failure_fails_the_job() {
    let f = fixture_with(Some("/nonexistent/codex-binary"), Duration::from_secs(5)).await;
    let err = f.runner.submit(run("hello")).await.unwrap_err();
    assert!(matches!(err, TetherError::JobExecutionFailed { .. }));
    assert!(!f.runner.is_busy().await);

    let events = read_events(&f.audit_path).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, AuditEventType::JobFailed);

    // The slot was released: the retry fails the same way, not as busy.
    let err = f.runner.submit(run("hello")).await.unwrap_err();
    assert!(matches!(err, TetherError::JobExecutionFailed { .. }));
}

#[tokio::test]
async fn working_directory_must_stay_in_workspace() {
    let f = fixture().await;
    let mut spec = run("hello");
    spec.cwd = Some("../".into());
    let err = f.runner.submit(spec).await.unwrap_err();
    assert!(matches!(err, TetherError::WorkspaceViolation { .. }));
}

/// A job row as a previous process would have left it.
async fn stale_row(db: &Database) -> JobId {
    queries::jobs::insert_queued(
        db,
        tether_storage::NewJob {
            identity: OWNER,
            command: "run".into(),
            prompt: "x".into(),
            argv: vec!["codex".into()],
            cwd: ".".into(),
        },
    )
    .await
    .unwrap()
    .unwrap()
}

/// A process group leader that outlives the runner that started it.
fn detached_sleep() -> std::process::Child {
    std::process::Command::new("sleep")
        .arg("30")
        .process_group(0)
        .spawn()
        .unwrap()
}

#[tokio::test]
async fn recover_marks_stale_rows() {
    let f = fixture().await;
    let id = stale_row(&f.db).await;

    let summary = f.runner.recover().await.unwrap();
    assert_eq!(summary.recovered, vec![id]);
    let job = queries::jobs::get(&f.db, id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::InterruptedRecovered);

    let events = read_events(&f.audit_path).unwrap();
    assert_eq!(events[0].event_type, AuditEventType::Recovery);
}

#[tokio::test]
async fn live_orphan_holds_the_slot_until_cancelled() {
    let mut f = fixture().await;
    let mut orphan = detached_sleep();
    let pid = i64::from(orphan.id());
    // Reap on exit so the pid does not linger as a zombie.
    let reaper = std::thread::spawn(move || orphan.wait());

    let id = stale_row(&f.db).await;
    queries::jobs::mark_running(&f.db, id, Some(pid), process::pid_start_token(pid))
        .await
        .unwrap();

    let summary = f.runner.recover().await.unwrap();
    assert!(summary.recovered.is_empty());
    assert_eq!(summary.live_pids, vec![(id, pid)]);
    assert_eq!(f.runner.active_job().await.unwrap().id, id);
    assert!(f.runner.is_busy().await);
    assert!(matches!(
        f.runner.submit(run("hello")).await,
        Err(TetherError::JobAlreadyRunning)
    ));

    assert_eq!(f.runner.cancel().await, Some(id));
    assert!(reaper.join().unwrap().is_ok());
    assert!(!process::pid_is_alive(pid));

    let job = queries::jobs::get(&f.db, id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(
        drain(&mut f.rx).contains(&format!("Job #{id} finished: CANCELLED (orphan pid={pid})"))
    );
    let events = read_events(&f.audit_path).unwrap();
    assert!(
        events
            .iter()
            .any(|e| e.event_type == AuditEventType::JobCancelled && e.job_id == Some(id))
    );

    let next = f.runner.submit(run("hello")).await.unwrap();
    assert_ne!(next, id);
    f.runner.wait_current().await;
}

#[tokio::test]
async fn reused_pid_is_released_without_signalling() {
    let f = fixture().await;
    let mut stranger = detached_sleep();
    let pid = i64::from(stranger.id());

    let id = stale_row(&f.db).await;
    queries::jobs::mark_running(&f.db, id, Some(pid), Some("a different process".into()))
        .await
        .unwrap();

    let summary = f.runner.recover().await.unwrap();
    assert_eq!(summary.recovered, vec![id]);
    assert!(summary.live_pids.is_empty());
    assert!(f.runner.active_job().await.is_none());
    assert!(process::pid_is_alive(pid));

    stranger.kill().unwrap();
    stranger.wait().unwrap();
}

#[tokio::test]
async fn unsaved_result_holds_the_slot_until_stored() {
    let f = fixture().await;
    f.db.connection()
        .call(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_terminal BEFORE UPDATE OF status ON jobs
                 WHEN NEW.status NOT IN ('QUEUED', 'RUNNING')
                 BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
            )
        })
        .await
        .unwrap();

    let id = f.runner.submit(run("hello")).await.unwrap();
    f.runner.wait_current().await;

    let job = queries::jobs::get(&f.db, id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Running);
    let held = f.runner.active_job().await.unwrap();
    assert_eq!((held.id, held.status), (id, JobStatus::Completed));
    assert!(f.runner.cancel().await.is_none());
    assert!(matches!(
        f.runner.submit(run("hello")).await,
        Err(TetherError::Storage { .. })
    ));

    f.db.connection()
        .call(|conn| conn.execute_batch("DROP TRIGGER reject_terminal"))
        .await
        .unwrap();
    let next = f.runner.submit(run("hello")).await.unwrap();
    assert_ne!(next, id);
    f.runner.wait_current().await;

    let first = queries::jobs::get(&f.db, id).await.unwrap().unwrap();
    assert_eq!(first.status, JobStatus::Completed);
    assert_eq!(first.exit_code, Some(0));
    let second = queries::jobs::get(&f.db, next).await.unwrap().unwrap();
    assert_eq!(second.status, JobStatus::Completed);
}
