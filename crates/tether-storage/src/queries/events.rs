// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Job event ring read by `/logs`.

use rusqlite::params;
use tether_core::{JobId, TetherError};

use crate::database::{Database, map_tr_err};
use crate::models::JobEvent;

/// Append an event and trim the table to the newest `max_rows` rows.
pub async fn append(
    db: &Database,
    job_id: Option<JobId>,
    event_type: &str,
    message: &str,
    max_rows: u32,
) -> Result<(), TetherError> {
    let event_type = event_type.to_string();
    let message = message.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO job_events (job_id, event_type, message) VALUES (?1, ?2, ?3)",
                params![job_id, event_type, message],
            )?;
            tx.execute(
                "DELETE FROM job_events WHERE id <= (
                     SELECT id FROM job_events ORDER BY id DESC LIMIT 1 OFFSET ?1
                 )",
                params![max_rows.max(1)],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// The newest `limit` events, oldest first.
pub async fn recent(db: &Database, limit: u32) -> Result<Vec<JobEvent>, TetherError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, job_id, event_type, message, created_at FROM job_events
                 ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |row| {
                Ok(JobEvent {
                    id: row.get(0)?,
                    job_id: row.get(1)?,
                    event_type: row.get(2)?,
                    message: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?;
            let mut events = rows.collect::<Result<Vec<_>, _>>()?;
            events.reverse();
            Ok(events)
        })
        .await
        .map_err(map_tr_err)
}
