//! Session persistence trait.
//!
//! A session is the durable transcript of one conversation, addressed by
//! [`SessionKey`]. The gateway loads it to rebuild context for each turn and
//! appends to it once a turn has fully completed.

use async_trait::async_trait;
use crate::error::StorageError;
use crate::message::{Message, SessionKey};

/// The core SessionStore trait.
///
/// Implementations: SQLite (file-backed, or `sqlite::memory:` in tests).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The backend name (e.g., "sqlite").
    fn name(&self) -> &str;

    /// Load the full transcript for a session, oldest first.
    ///
    /// A session that has never been written to is an empty transcript,
    /// not an error.
    async fn load(&self, key: &SessionKey) -> std::result::Result<Vec<Message>, StorageError>;

    /// Append messages to a session transcript.
    async fn append(&self, key: &SessionKey, messages: &[Message]) -> std::result::Result<(), StorageError>;

    /// Delete one session's transcript. Returns the number of rows removed.
    async fn clear(&self, key: &SessionKey) -> std::result::Result<u64, StorageError>;

    /// List the distinct session IDs a user has transcripts for.
    async fn session_ids(&self, user_id: &str) -> std::result::Result<Vec<String>, StorageError>;
}
