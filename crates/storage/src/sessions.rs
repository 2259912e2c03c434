//! SQLite-backed session transcripts.
//!
//! Each row in `agent_sessions` is one turn: (user_id, session_id) addresses
//! the conversation, `id` preserves insertion order.

use async_trait::async_trait;
use chrono::Utc;
use deskmate_core::error::StorageError;
use deskmate_core::message::{Message, Role, SessionKey};
use deskmate_core::session::SessionStore;
use sqlx::{Row, SqlitePool};
use tracing::debug;

pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn load(&self, key: &SessionKey) -> Result<Vec<Message>, StorageError> {
        let rows = sqlx::query(
            "SELECT role, content, created_at FROM agent_sessions \
             WHERE user_id = ?1 AND session_id = ?2 ORDER BY id",
        )
        .bind(&key.user_id)
        .bind(&key.session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("load transcript: {e}")))?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let role_str: String = row
                .try_get("role")
                .map_err(|e| StorageError::QueryFailed(format!("role column: {e}")))?;
            let content: String = row
                .try_get("content")
                .map_err(|e| StorageError::QueryFailed(format!("content column: {e}")))?;
            let created_at_str: String = row
                .try_get("created_at")
                .map_err(|e| StorageError::QueryFailed(format!("created_at column: {e}")))?;

            let timestamp = chrono::DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());

            messages.push(Message {
                role: Role::parse(&role_str).unwrap_or(Role::User),
                content,
                tool_calls: Vec::new(),
                tool_call_id: None,
                timestamp,
            });
        }

        Ok(messages)
    }

    async fn append(&self, key: &SessionKey, messages: &[Message]) -> Result<(), StorageError> {
        for message in messages {
            sqlx::query(
                "INSERT INTO agent_sessions (user_id, session_id, role, content, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&key.user_id)
            .bind(&key.session_id)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(message.timestamp.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("append turn: {e}")))?;
        }

        debug!(session = %key, count = messages.len(), "Appended transcript turns");
        Ok(())
    }

    async fn clear(&self, key: &SessionKey) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "DELETE FROM agent_sessions WHERE user_id = ?1 AND session_id = ?2",
        )
        .bind(&key.user_id)
        .bind(&key.session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("clear session: {e}")))?;

        Ok(result.rows_affected())
    }

    async fn session_ids(&self, user_id: &str) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query(
            "SELECT DISTINCT session_id FROM agent_sessions WHERE user_id = ?1 ORDER BY session_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("list sessions: {e}")))?;

        rows.iter()
            .map(|row| {
                row.try_get("session_id")
                    .map_err(|e| StorageError::QueryFailed(format!("session_id column: {e}")))
            })
            .collect()
    }
}
