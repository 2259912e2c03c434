//! SQLite-backed long-term memories.

use async_trait::async_trait;
use chrono::Utc;
use deskmate_core::error::StorageError;
use deskmate_core::memory::{MemoryItem, MemoryStore};
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

pub struct SqliteMemoryStore {
    pool: SqlitePool,
}

impl SqliteMemoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_item(row: &sqlx::sqlite::SqliteRow) -> Result<MemoryItem, StorageError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StorageError::QueryFailed(format!("id column: {e}")))?;
        let user_id: String = row
            .try_get("user_id")
            .map_err(|e| StorageError::QueryFailed(format!("user_id column: {e}")))?;
        let memory: String = row
            .try_get("memory")
            .map_err(|e| StorageError::QueryFailed(format!("memory column: {e}")))?;
        let created_at_str: String = row
            .try_get("created_at")
            .map_err(|e| StorageError::QueryFailed(format!("created_at column: {e}")))?;

        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(MemoryItem {
            id,
            user_id,
            memory,
            created_at,
        })
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn add(&self, user_id: &str, memory: &str) -> Result<String, StorageError> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO user_memories (id, user_id, memory, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(memory)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("insert memory: {e}")))?;

        debug!(user_id, memory_id = %id, "Stored memory");
        Ok(id)
    }

    async fn recall(&self, user_id: &str, limit: usize) -> Result<Vec<MemoryItem>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, user_id, memory, created_at FROM user_memories \
             WHERE user_id = ?1 ORDER BY created_at DESC, id LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("recall memories: {e}")))?;

        rows.iter().map(Self::row_to_item).collect()
    }

    async fn delete_for_user(&self, user_id: &str) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM user_memories WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("delete memories: {e}")))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteMemoryStore {
        let pool = crate::open_pool("sqlite::memory:").await.unwrap();
        SqliteMemoryStore::new(pool)
    }

    #[tokio::test]
    async fn add_and_recall() {
        let store = test_store().await;
        let id = store.add("alice", "Prefers metric units").await.unwrap();
        assert!(!id.is_empty());

        let items = store.recall("alice", 10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].memory, "Prefers metric units");
        assert_eq!(items[0].user_id, "alice");
    }

    #[tokio::test]
    async fn recall_is_scoped_by_user() {
        let store = test_store().await;
        store.add("alice", "Works at Acme").await.unwrap();
        store.add("bob", "Allergic to peanuts").await.unwrap();

        let items = store.recall("alice", 10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].memory, "Works at Acme");

        let items = store.recall("nobody", 10).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn recall_respects_limit() {
        let store = test_store().await;
        for i in 0..15 {
            store.add("alice", &format!("Fact number {i}")).await.unwrap();
        }

        let items = store.recall("alice", 10).await.unwrap();
        assert_eq!(items.len(), 10);
    }

    #[tokio::test]
    async fn delete_for_user_returns_count() {
        let store = test_store().await;
        store.add("alice", "one").await.unwrap();
        store.add("alice", "two").await.unwrap();
        store.add("bob", "three").await.unwrap();

        let removed = store.delete_for_user("alice").await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.recall("alice", 10).await.unwrap().is_empty());

        // Bob's memories untouched
        assert_eq!(store.recall("bob", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_for_unknown_user_returns_zero() {
        let store = test_store().await;
        let removed = store.delete_for_user("ghost").await.unwrap();
        assert_eq!(removed, 0);
    }
}
