// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pending confirmation rows.
//!
//! Times are passed in by the caller (already formatted with
//! [`crate::TIMESTAMP_FORMAT`]) so a test clock can drive expiry.

use rusqlite::{OptionalExtension, params};
use tether_core::{ConfirmationFailure, Identity, TetherError};

use crate::database::{Database, map_tr_err};
use crate::models::ConfirmationRecord;

/// Insert a confirmation, superseding any unconsumed one for the identity.
///
/// Returns the number of superseded rows.
pub async fn issue(db: &Database, record: ConfirmationRecord) -> Result<usize, TetherError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let superseded = tx.execute(
                "DELETE FROM pending_confirmations
                 WHERE user_id = ?1 AND chat_id = ?2 AND consumed_at IS NULL",
                params![record.identity.user_id, record.identity.chat_id],
            )?;
            tx.execute(
                "INSERT INTO pending_confirmations
                     (nonce, user_id, chat_id, action, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.nonce,
                    record.identity.user_id,
                    record.identity.chat_id,
                    record.action,
                    record.created_at,
                    record.expires_at
                ],
            )?;
            tx.commit()?;
            Ok(superseded)
        })
        .await
        .map_err(map_tr_err)
}

/// Atomically consume `nonce` on behalf of `identity` at time `now`.
///
/// The checks and the `consumed_at` update run in one closure on the writer
/// thread, so concurrent consumers of one nonce see exactly one success.
/// Failures leave the row untouched.
pub async fn consume(
    db: &Database,
    identity: Identity,
    nonce: &str,
    now: String,
) -> Result<Result<String, ConfirmationFailure>, TetherError> {
    let nonce = nonce.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let row: Option<(i64, i64, String, String, Option<String>)> = tx
                .query_row(
                    "SELECT user_id, chat_id, action, expires_at, consumed_at
                     FROM pending_confirmations WHERE nonce = ?1",
                    params![nonce],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                )
                .optional()?;

            let outcome = match row {
                None | Some((_, _, _, _, Some(_))) => Err(ConfirmationFailure::NotFound),
                Some((user_id, chat_id, _, _, None))
                    if Identity::new(user_id, chat_id) != identity =>
                {
                    Err(ConfirmationFailure::IdentityMismatch)
                }
                Some((_, _, _, expires_at, None)) if expires_at <= now => {
                    Err(ConfirmationFailure::Expired)
                }
                Some((_, _, action, _, None)) => {
                    let changed = tx.execute(
                        "UPDATE pending_confirmations SET consumed_at = ?2
                         WHERE nonce = ?1 AND consumed_at IS NULL",
                        params![nonce, now],
                    )?;
                    if changed == 1 {
                        Ok(action)
                    } else {
                        Err(ConfirmationFailure::NotFound)
                    }
                }
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get(db: &Database, nonce: &str) -> Result<Option<ConfirmationRecord>, TetherError> {
    let nonce = nonce.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT nonce, user_id, chat_id, action, created_at, expires_at, consumed_at
                 FROM pending_confirmations WHERE nonce = ?1",
                params![nonce],
                |row| {
                    Ok(ConfirmationRecord {
                        nonce: row.get(0)?,
                        identity: Identity::new(row.get(1)?, row.get(2)?),
                        action: row.get(3)?,
                        created_at: row.get(4)?,
                        expires_at: row.get(5)?,
                        consumed_at: row.get(6)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Delete consumed rows and rows that expired before `cutoff`.
pub async fn sweep(db: &Database, cutoff: String) -> Result<usize, TetherError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM pending_confirmations
                 WHERE consumed_at IS NOT NULL OR expires_at <= ?1",
                params![cutoff],
            )
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(nonce: &str, identity: Identity, expires_at: &str) -> ConfirmationRecord {
        ConfirmationRecord {
            nonce: nonce.into(),
            identity,
            action: r#"{"kind":"run_prompt","prompt":"hi"}"#.into(),
            created_at: "2026-01-01T00:00:00.000Z".into(),
            expires_at: expires_at.into(),
            consumed_at: None,
        }
    }

    const OWNER: Identity = Identity {
        user_id: 123,
        chat_id: 456,
    };

    #[tokio::test]
    async fn consume_succeeds_once() {
        let db = Database::open_in_memory().await.unwrap();
        issue(&db, record("n1", OWNER, "2026-01-01T00:05:00.000Z"))
            .await
            .unwrap();
        let now = "2026-01-01T00:01:00.000Z".to_string();
        let first = consume(&db, OWNER, "n1", now.clone()).await.unwrap();
        assert!(first.unwrap().contains("run_prompt"));
        let second = consume(&db, OWNER, "n1", now).await.unwrap();
        assert_eq!(second, Err(ConfirmationFailure::NotFound));
    }

    #[tokio::test]
    async fn consume_reports_mismatch_and_expiry_without_side_effects() {
        let db = Database::open_in_memory().await.unwrap();
        issue(&db, record("n1", OWNER, "2026-01-01T00:05:00.000Z"))
            .await
            .unwrap();

        let other = Identity::new(999, 456);
        let res = consume(&db, other, "n1", "2026-01-01T00:01:00.000Z".into())
            .await
            .unwrap();
        assert_eq!(res, Err(ConfirmationFailure::IdentityMismatch));

        let res = consume(&db, OWNER, "n1", "2026-01-01T00:05:01.000Z".into())
            .await
            .unwrap();
        assert_eq!(res, Err(ConfirmationFailure::Expired));

        let row = get(&db, "n1").await.unwrap().unwrap();
        assert!(row.consumed_at.is_none());
    }

    #[tokio::test]
    async fn newer_confirmation_supersedes_unconsumed_one() {
        let db = Database::open_in_memory().await.unwrap();
        issue(&db, record("old", OWNER, "2026-01-01T00:05:00.000Z"))
            .await
            .unwrap();
        let superseded = issue(&db, record("new", OWNER, "2026-01-01T00:06:00.000Z"))
            .await
            .unwrap();
        assert_eq!(superseded, 1);
        assert!(get(&db, "old").await.unwrap().is_none());
        let res = consume(&db, OWNER, "old", "2026-01-01T00:01:00.000Z".into())
            .await
            .unwrap();
        assert_eq!(res, Err(ConfirmationFailure::NotFound));
    }

    #[tokio::test]
    async fn sweep_removes_consumed_and_expired() {
        let db = Database::open_in_memory().await.unwrap();
        issue(&db, record("a", OWNER, "2026-01-01T00:05:00.000Z"))
            .await
            .unwrap();
        issue(
            &db,
            record("b", Identity::new(1, 1), "2026-01-01T09:00:00.000Z"),
        )
        .await
        .unwrap();
        let removed = sweep(&db, "2026-01-01T01:00:00.000Z".into()).await.unwrap();
        assert_eq!(removed, 1);
        assert!(get(&db, "a").await.unwrap().is_none());
        assert!(get(&db, "b").await.unwrap().is_some());
    }
}
