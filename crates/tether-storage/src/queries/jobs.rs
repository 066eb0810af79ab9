// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Job rows and the single-active-job index.

use std::str::FromStr;

use rusqlite::{ErrorCode, OptionalExtension, params};
use tether_core::{Identity, JobId, JobStatus, TetherError};

use crate::database::{Database, map_tr_err};
use crate::models::{JobRecord, NewJob, RecoverySummary};

const JOB_COLUMNS: &str = "id, user_id, chat_id, command, prompt, argv, cwd, status, pid, \
     exit_code, output, error, created_at, updated_at, started_at, ended_at, pid_start_token";

const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRecord> {
    let argv: String = row.get(5)?;
    let status: String = row.get(7)?;
    Ok(JobRecord {
        id: row.get(0)?,
        identity: Identity::new(row.get(1)?, row.get(2)?),
        command: row.get(3)?,
        prompt: row.get(4)?,
        argv: serde_json::from_str(&argv).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?,
        cwd: row.get(6)?,
        status: JobStatus::from_str(&status).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?,
        pid: row.get(8)?,
        exit_code: row.get(9)?,
        output: row.get(10)?,
        error: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
        started_at: row.get(14)?,
        ended_at: row.get(15)?,
        pid_start_token: row.get(16)?,
    })
}

/// Insert a job in `QUEUED` state.
///
/// Returns `None` when another job already holds the active slot (the
/// partial unique index rejected the row).
pub async fn insert_queued(db: &Database, job: NewJob) -> Result<Option<JobId>, TetherError> {
    let argv = serde_json::to_string(&job.argv).map_err(TetherError::storage)?;
    db.connection()
        .call(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO jobs (user_id, chat_id, command, prompt, argv, cwd, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'QUEUED')",
                params![
                    job.identity.user_id,
                    job.identity.chat_id,
                    job.command,
                    job.prompt,
                    argv,
                    job.cwd
                ],
            );
            match inserted {
                Ok(_) => Ok(Some(conn.last_insert_rowid())),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Transition a queued job to `RUNNING` with its process id and the
/// process start token used to recognize it after a restart.
pub async fn mark_running(
    db: &Database,
    id: JobId,
    pid: Option<i64>,
    start_token: Option<String>,
) -> Result<(), TetherError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                &format!(
                    "UPDATE jobs SET status = 'RUNNING', pid = ?2, pid_start_token = ?3,
                            started_at = {NOW}, updated_at = {NOW}
                     WHERE id = ?1 AND status = 'QUEUED'"
                ),
                params![id, pid, start_token],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Record the terminal state of a job. Only non-terminal rows are updated.
pub async fn finish(
    db: &Database,
    id: JobId,
    status: JobStatus,
    exit_code: Option<i32>,
    output: String,
    error: Option<String>,
) -> Result<(), TetherError> {
    let status = status.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                &format!(
                    "UPDATE jobs SET status = ?2, exit_code = ?3, output = ?4, error = ?5,
                            ended_at = {NOW}, updated_at = {NOW}
                     WHERE id = ?1 AND status IN ('QUEUED', 'RUNNING')"
                ),
                params![id, status, exit_code, output, error],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get(db: &Database, id: JobId) -> Result<Option<JobRecord>, TetherError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                row_to_job,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// The job currently holding the active slot, if any.
pub async fn active(db: &Database) -> Result<Option<JobRecord>, TetherError> {
    db.connection()
        .call(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status IN ('QUEUED', 'RUNNING')
                     ORDER BY id DESC LIMIT 1"
                ),
                [],
                row_to_job,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Reconcile jobs left active by a previous process.
///
/// A `RUNNING` row whose process is alive and still matches its start token
/// is an orphan: it stays `RUNNING` and keeps the active slot so a second job
/// cannot start beside it. Every other active row becomes
/// `INTERRUPTED_RECOVERED`. Nothing is signalled here.
pub async fn reconcile<F>(db: &Database, is_orphan: F) -> Result<RecoverySummary, TetherError>
where
    F: Fn(i64, Option<&str>) -> bool + Send + 'static,
{
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let stale: Vec<(JobId, String, Option<i64>, Option<String>)> = {
                let mut stmt = tx.prepare(
                    "SELECT id, status, pid, pid_start_token FROM jobs
                     WHERE status IN ('QUEUED', 'RUNNING') ORDER BY id",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?;
                rows.collect::<Result<_, _>>()?
            };

            let mut summary = RecoverySummary::default();
            for (id, status, pid, token) in stale {
                let orphan = pid
                    .filter(|p| *p > 0)
                    .filter(|p| status == "RUNNING" && is_orphan(*p, token.as_deref()));
                if let Some(pid) = orphan {
                    tx.execute(
                        &format!(
                            "UPDATE jobs SET updated_at = {NOW},
                                    error = COALESCE(error, 'Recovered after restart; process still alive')
                             WHERE id = ?1"
                        ),
                        params![id],
                    )?;
                    summary.live_pids.push((id, pid));
                    continue;
                }
                tx.execute(
                    &format!(
                        "UPDATE jobs SET status = 'INTERRUPTED_RECOVERED', ended_at = {NOW},
                                updated_at = {NOW},
                                error = COALESCE(error, 'Recovered after restart; process not alive')
                         WHERE id = ?1"
                    ),
                    params![id],
                )?;
                summary.recovered.push(id);
            }
            tx.commit()?;
            Ok(summary)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_job(prompt: &str) -> NewJob {
        NewJob {
            identity: Identity::new(123, 456),
            command: "run".into(),
            prompt: prompt.into(),
            argv: vec!["codex".into(), "--".into(), prompt.into()],
            cwd: "/tmp".into(),
        }
    }

    #[tokio::test]
    async fn unique_index_allows_one_active_job() {
        let db = Database::open_in_memory().await.unwrap();
        let first = insert_queued(&db, new_job("a")).await.unwrap();
        assert!(first.is_some());
        assert_eq!(insert_queued(&db, new_job("b")).await.unwrap(), None);

        let id = first.unwrap();
        mark_running(&db, id, Some(4242), None).await.unwrap();
        assert_eq!(insert_queued(&db, new_job("c")).await.unwrap(), None);

        finish(&db, id, JobStatus::Completed, Some(0), "done\n".into(), None)
            .await
            .unwrap();
        assert!(insert_queued(&db, new_job("d")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn job_round_trips_through_row() {
        let db = Database::open_in_memory().await.unwrap();
        let id = insert_queued(&db, new_job("hello")).await.unwrap().unwrap();
        mark_running(&db, id, Some(99), Some("tok-99".into()))
            .await
            .unwrap();

        let job = get(&db, id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.pid, Some(99));
        assert_eq!(job.pid_start_token.as_deref(), Some("tok-99"));
        assert_eq!(job.argv, vec!["codex", "--", "hello"]);
        assert!(job.started_at.is_some());
        assert_eq!(active(&db).await.unwrap().map(|j| j.id), Some(id));
    }

    #[tokio::test]
    async fn finish_does_not_overwrite_terminal_status() {
        let db = Database::open_in_memory().await.unwrap();
        let id = insert_queued(&db, new_job("x")).await.unwrap().unwrap();
        finish(&db, id, JobStatus::Cancelled, None, String::new(), None)
            .await
            .unwrap();
        finish(&db, id, JobStatus::Completed, Some(0), String::new(), None)
            .await
            .unwrap();
        assert_eq!(get(&db, id).await.unwrap().unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn reconcile_keeps_live_orphans_running() {
        let db = Database::open_in_memory().await.unwrap();
        let id = insert_queued(&db, new_job("x")).await.unwrap().unwrap();
        mark_running(&db, id, Some(777), Some("tok-777".into()))
            .await
            .unwrap();

        let summary = reconcile(&db, |pid, token| pid == 777 && token == Some("tok-777"))
            .await
            .unwrap();
        assert!(summary.recovered.is_empty());
        assert_eq!(summary.live_pids, vec![(id, 777)]);

        let job = get(&db, id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.error.unwrap().contains("still alive"));
        assert_eq!(active(&db).await.unwrap().map(|j| j.id), Some(id));
        assert_eq!(insert_queued(&db, new_job("y")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn reconcile_recovers_dead_or_mismatched_jobs() {
        let db = Database::open_in_memory().await.unwrap();
        let queued = insert_queued(&db, new_job("q")).await.unwrap().unwrap();
        let summary = reconcile(&db, |_, _| true).await.unwrap();
        assert_eq!(summary.recovered, vec![queued]);

        let running = insert_queued(&db, new_job("r")).await.unwrap().unwrap();
        mark_running(&db, running, Some(777), Some("old".into()))
            .await
            .unwrap();
        let summary = reconcile(&db, |_, token| token == Some("new")).await.unwrap();
        assert_eq!(summary.recovered, vec![running]);
        assert!(summary.live_pids.is_empty());

        let job = get(&db, running).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::InterruptedRecovered);
        assert!(job.error.unwrap().contains("not alive"));
        assert!(active(&db).await.unwrap().is_none());

        let again = reconcile(&db, |_, _| true).await.unwrap();
        assert_eq!(again, RecoverySummary::default());
    }
}
