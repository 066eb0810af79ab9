// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chat sessions and their turn history.

use std::str::FromStr;

use rusqlite::{OptionalExtension, params};
use tether_core::{Identity, TetherError};

use crate::database::{Database, map_tr_err};
use crate::models::{ChatRole, ChatSessionRecord, ChatTurnRecord};

const UPSERT_SESSION: &str = "INSERT INTO chat_sessions (user_id, chat_id) VALUES (?1, ?2)
     ON CONFLICT (user_id, chat_id) DO NOTHING";

pub async fn get_session(
    db: &Database,
    identity: Identity,
) -> Result<Option<ChatSessionRecord>, TetherError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT s.thread_id, s.created_at, s.updated_at,
                        (SELECT COUNT(*) FROM chat_turns t
                          WHERE t.user_id = s.user_id AND t.chat_id = s.chat_id)
                 FROM chat_sessions s WHERE s.user_id = ?1 AND s.chat_id = ?2",
                params![identity.user_id, identity.chat_id],
                |row| {
                    Ok(ChatSessionRecord {
                        identity,
                        thread_id: row.get(0)?,
                        created_at: row.get(1)?,
                        updated_at: row.get(2)?,
                        turn_count: row.get(3)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Persist a finished turn: both texts and the thread id, in one transaction.
pub async fn record_turn(
    db: &Database,
    identity: Identity,
    user_text: String,
    assistant_text: String,
    thread_id: String,
) -> Result<(), TetherError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(UPSERT_SESSION, params![identity.user_id, identity.chat_id])?;
            tx.execute(
                "UPDATE chat_sessions
                 SET thread_id = ?3, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE user_id = ?1 AND chat_id = ?2",
                params![identity.user_id, identity.chat_id, thread_id],
            )?;
            for (role, text) in [(ChatRole::User, user_text), (ChatRole::Assistant, assistant_text)] {
                tx.execute(
                    "INSERT INTO chat_turns (user_id, chat_id, role, text) VALUES (?1, ?2, ?3, ?4)",
                    params![identity.user_id, identity.chat_id, role.to_string(), text],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Clear history and thread id but keep (or create) the session row.
///
/// Returns whether there was anything to clear.
pub async fn reset(db: &Database, identity: Identity) -> Result<bool, TetherError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(UPSERT_SESSION, params![identity.user_id, identity.chat_id])?;
            let had_thread = tx.execute(
                "UPDATE chat_sessions
                 SET thread_id = NULL, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE user_id = ?1 AND chat_id = ?2 AND thread_id IS NOT NULL",
                params![identity.user_id, identity.chat_id],
            )?;
            let cleared = tx.execute(
                "DELETE FROM chat_turns WHERE user_id = ?1 AND chat_id = ?2",
                params![identity.user_id, identity.chat_id],
            )?;
            tx.commit()?;
            Ok(had_thread > 0 || cleared > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// The newest `limit` turns, oldest first.
pub async fn history(
    db: &Database,
    identity: Identity,
    limit: u32,
) -> Result<Vec<ChatTurnRecord>, TetherError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT role, text, created_at FROM chat_turns
                 WHERE user_id = ?1 AND chat_id = ?2 ORDER BY id DESC LIMIT ?3",
            )?;
            let rows = stmt.query_map(
                params![identity.user_id, identity.chat_id, limit],
                |row| {
                    let role: String = row.get(0)?;
                    Ok(ChatTurnRecord {
                        role: ChatRole::from_str(&role).map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(
                                0,
                                rusqlite::types::Type::Text,
                                Box::new(e),
                            )
                        })?,
                        text: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )?;
            let mut turns = rows.collect::<Result<Vec<_>, _>>()?;
            turns.reverse();
            Ok(turns)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: Identity = Identity {
        user_id: 123,
        chat_id: 456,
    };

    #[tokio::test]
    async fn sessions_are_created_lazily() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(get_session(&db, ID).await.unwrap().is_none());

        record_turn(&db, ID, "hi".into(), "hello".into(), "thr-1".into())
            .await
            .unwrap();
        let session = get_session(&db, ID).await.unwrap().unwrap();
        assert_eq!(session.thread_id.as_deref(), Some("thr-1"));
        assert_eq!(session.turn_count, 2);

        let turns = history(&db, ID, 10).await.unwrap();
        assert_eq!(turns[0].role, ChatRole::User);
        assert_eq!(turns[0].text, "hi");
        assert_eq!(turns[1].role, ChatRole::Assistant);
    }

    #[tokio::test]
    async fn reset_keeps_row_and_clears_history() {
        let db = Database::open_in_memory().await.unwrap();
        record_turn(&db, ID, "a".into(), "b".into(), "thr".into())
            .await
            .unwrap();
        assert!(reset(&db, ID).await.unwrap());

        let session = get_session(&db, ID).await.unwrap().unwrap();
        assert!(session.thread_id.is_none());
        assert_eq!(session.turn_count, 0);
        assert!(history(&db, ID, 10).await.unwrap().is_empty());

        assert!(!reset(&db, ID).await.unwrap());
    }

    #[tokio::test]
    async fn reset_on_unknown_identity_creates_empty_row() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(!reset(&db, ID).await.unwrap());
        assert!(get_session(&db, ID).await.unwrap().is_some());
    }
}
