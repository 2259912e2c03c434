//! SQLite persistence for Deskmate.
//!
//! One database file holds two tables:
//! - `agent_sessions` — conversation transcripts, one row per turn
//! - `user_memories` — distilled long-term facts about users
//!
//! Both stores share a single connection pool opened by [`open_pool`].

pub mod sessions;
pub mod memories;

pub use sessions::SqliteSessionStore;
pub use memories::SqliteMemoryStore;

use deskmate_core::error::StorageError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::{debug, info};

/// Open the Deskmate database at `path`, creating file and schema as needed.
///
/// Pass `"sqlite::memory:"` for an in-process ephemeral database (useful
/// for tests).
pub async fn open_pool(path: &str) -> Result<SqlitePool, StorageError> {
    // File-backed databases may live under a directory that does not exist
    // yet (the default is tmp/agent.db).
    if !path.starts_with("sqlite:") {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::ConnectionFailed(format!(
                        "create {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
    }

    let options = SqliteConnectOptions::from_str(path)
        .map_err(|e| StorageError::ConnectionFailed(format!("Invalid SQLite path: {e}")))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .pragma("foreign_keys", "ON");

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(|e| StorageError::ConnectionFailed(format!("Failed to open SQLite: {e}")))?;

    run_migrations(&pool).await?;
    info!("SQLite storage initialized at {path}");
    Ok(pool)
}

/// Run schema migrations — creates tables and indexes.
async fn run_migrations(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agent_sessions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     TEXT NOT NULL,
            session_id  TEXT NOT NULL,
            role        TEXT NOT NULL,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| StorageError::MigrationFailed(format!("agent_sessions table: {e}")))?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_agent_sessions_key \
         ON agent_sessions(user_id, session_id, id)",
    )
    .execute(pool)
    .await
    .map_err(|e| StorageError::MigrationFailed(format!("agent_sessions index: {e}")))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_memories (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL,
            memory      TEXT NOT NULL,
            created_at  TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| StorageError::MigrationFailed(format!("user_memories table: {e}")))?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_user_memories_user \
         ON user_memories(user_id, created_at DESC)",
    )
    .execute(pool)
    .await
    .map_err(|e| StorageError::MigrationFailed(format!("user_memories index: {e}")))?;

    debug!("SQLite migrations complete");
    Ok(())
}
