//! Pool setup for the steward database.
//!
//! Steward is the only writer, from the tick loop or a single CLI command,
//! so the pool stays small. WAL mode lets `history` and `lock status` read
//! while a run is recording its result.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const MAX_CONNECTIONS: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);
const MEMORY_DATABASE: &str = ":memory:";

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Failed to create database directory {}: {source}", .path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open database {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },
}

/// Open the database configured as `database.path`. The literal `:memory:`
/// selects a private in-memory database.
pub async fn open_configured_pool(path: &str) -> Result<SqlitePool, ConnectionError> {
    if path == MEMORY_DATABASE {
        open_memory_pool().await
    } else {
        open_pool(Path::new(path)).await
    }
}

/// Open (creating if needed) the database file at `path`, along with any
/// missing parent directories.
pub async fn open_pool(path: &Path) -> Result<SqlitePool, ConnectionError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| ConnectionError::CreateDirectory {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await
        .map_err(|source| ConnectionError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// In-memory database pinned to one connection. The data lives exactly as
/// long as the pool.
pub async fn open_memory_pool() -> Result<SqlitePool, ConnectionError> {
    let memory_error = |source: sqlx::Error| ConnectionError::Open {
        path: PathBuf::from(MEMORY_DATABASE),
        source,
    };
    let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(memory_error)?;

    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(memory_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_pool_creates_parent_directory_in_wal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("steward.db");

        let pool = open_pool(&path).await.unwrap();
        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();

        assert!(path.exists());
        assert_eq!(mode, "wal");
    }

    #[tokio::test]
    async fn test_memory_pool_keeps_data_on_its_connection() {
        let pool = open_configured_pool(":memory:").await.unwrap();
        sqlx::query("CREATE TABLE scratch_rows (id INTEGER)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO scratch_rows (id) VALUES (7)")
            .execute(&pool)
            .await
            .unwrap();

        let id: i64 = sqlx::query_scalar("SELECT id FROM scratch_rows")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(id, 7);
    }

    #[tokio::test]
    async fn test_unwritable_parent_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        let err = open_pool(&blocker.join("steward.db")).await.unwrap_err();
        assert!(matches!(err, ConnectionError::CreateDirectory { .. }));
    }
}
