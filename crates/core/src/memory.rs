//! Memory trait — long-term knowledge about a user.
//!
//! Memories are short distilled facts ("prefers metric units", "works at
//! Acme") scoped to a user, not to any single session. They are recalled
//! when building an agent and injected into the system prompt so context
//! survives across sessions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::StorageError;

/// A single remembered fact about a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique ID for this memory
    pub id: String,

    /// The user this memory belongs to
    pub user_id: String,

    /// The distilled fact
    pub memory: String,

    /// When this memory was created
    pub created_at: DateTime<Utc>,
}

/// The core MemoryStore trait.
///
/// Implementations: SQLite (file-backed, or `sqlite::memory:` in tests).
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The backend name (e.g., "sqlite").
    fn name(&self) -> &str;

    /// Store a new memory for a user. Returns the assigned ID.
    async fn add(&self, user_id: &str, memory: &str) -> std::result::Result<String, StorageError>;

    /// Recall the most recent memories for a user, newest first.
    async fn recall(&self, user_id: &str, limit: usize) -> std::result::Result<Vec<MemoryItem>, StorageError>;

    /// Delete every memory a user has. Returns the number removed.
    async fn delete_for_user(&self, user_id: &str) -> std::result::Result<u64, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_item_serialization() {
        let item = MemoryItem {
            id: "a3f1".into(),
            user_id: "alice".into(),
            memory: "Prefers answers in bullet points".into(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains("bullet points"));
        assert!(json.contains("alice"));
    }
}
