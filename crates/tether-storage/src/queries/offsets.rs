// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Update offset claiming.

use rusqlite::params;
use tether_core::TetherError;

use crate::database::{Database, map_tr_err};

/// Claim `update_id` for processing.
///
/// Returns `false` if an equal or newer id was already claimed, which covers
/// webhook redeliveries and replays after a restart.
pub async fn claim_update(db: &Database, update_id: i64) -> Result<bool, TetherError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE update_offsets SET last_update_id = ?1
                 WHERE id = 1 AND last_update_id < ?1",
                params![update_id],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// The newest claimed update id, `-1` when nothing was claimed yet.
pub async fn last_update_id(db: &Database) -> Result<i64, TetherError> {
    db.connection()
        .call(|conn| {
            conn.query_row(
                "SELECT last_update_id FROM update_offsets WHERE id = 1",
                [],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claims_are_monotonic() {
        let db = Database::open_in_memory().await.unwrap();
        assert_eq!(last_update_id(&db).await.unwrap(), -1);
        assert!(claim_update(&db, 10).await.unwrap());
        assert!(!claim_update(&db, 10).await.unwrap());
        assert!(!claim_update(&db, 9).await.unwrap());
        assert!(claim_update(&db, 11).await.unwrap());
        assert_eq!(last_update_id(&db).await.unwrap(), 11);
    }
}
