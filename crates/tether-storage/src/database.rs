// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All statements are serialized through tokio-rusqlite's single background
//! thread. Do NOT create additional Connection instances for writes.

use std::path::Path;

use tether_core::TetherError;
use tracing::debug;

use crate::migrations::run_migrations;

/// Convert a tokio-rusqlite error into [`TetherError::Storage`].
pub(crate) fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> TetherError {
    TetherError::storage(e)
}

/// Handle to the state database.
///
/// Cloning is cheap; every clone talks to the same background writer.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Open (or create) the database file, apply PRAGMAs and run migrations.
    ///
    /// The parent directory is created with mode 0700 and the file is
    /// restricted to 0600.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, TetherError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_private_dir(parent)?;
        }

        let conn = tokio_rusqlite::Connection::open(&path)
            .await
            .map_err(TetherError::storage)?;
        let db = Self { conn };
        db.initialize().await?;
        restrict_file(&path)?;
        debug!(path = %path.display(), "state database opened");
        Ok(db)
    }

    /// In-memory database with the full schema, for tests.
    pub async fn open_in_memory() -> Result<Self, TetherError> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(TetherError::storage)?;
        let db = Self { conn };
        db.initialize().await?;
        Ok(db)
    }

    async fn initialize(&self) -> Result<(), TetherError> {
        self.conn
            .call(|conn| -> Result<Result<(), TetherError>, rusqlite::Error> {
                conn.execute_batch(
                    "PRAGMA journal_mode = WAL;
                     PRAGMA synchronous = NORMAL;
                     PRAGMA foreign_keys = ON;
                     PRAGMA busy_timeout = 5000;",
                )?;
                Ok(run_migrations(conn))
            })
            .await
            .map_err(map_tr_err)?
    }

    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Checkpoint the WAL so the main file is self-contained.
    pub async fn checkpoint(&self) -> Result<(), TetherError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }
}

fn create_private_dir(dir: &Path) -> Result<(), TetherError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        if !dir.exists() {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(dir)
                .map_err(TetherError::storage)?;
        }
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir).map_err(TetherError::storage)?;
    }
    Ok(())
}

fn restrict_file(path: &Path) -> Result<(), TetherError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(TetherError::storage)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
