//! Per-request agent context assembly.
//!
//! Every user message gets a freshly assembled context: the session
//! transcript from storage, the user's long-term memories folded into
//! the system prompt, and a tool registry matching what is currently
//! configured (including a per-request calendar credentials override).

use chrono::{DateTime, Utc};
use deskmate_config::AppConfig;
use deskmate_core::memory::{MemoryItem, MemoryStore};
use deskmate_core::session::SessionStore;
use deskmate_core::tool::ToolRegistry;
use deskmate_core::{Error, Message, Provider, SessionKey};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything the loop needs to answer one user message.
pub struct AgentContext {
    pub system_prompt: String,
    pub history: Vec<Message>,
    pub registry: ToolRegistry,
}

/// Assembles an [`AgentContext`] from configuration and storage.
#[derive(Clone)]
pub struct ContextBuilder {
    config: AppConfig,
    provider: Arc<dyn Provider>,
    sessions: Arc<dyn SessionStore>,
    memories: Arc<dyn MemoryStore>,
}

impl ContextBuilder {
    pub fn new(
        config: AppConfig,
        provider: Arc<dyn Provider>,
        sessions: Arc<dyn SessionStore>,
        memories: Arc<dyn MemoryStore>,
    ) -> Self {
        Self {
            config,
            provider,
            sessions,
            memories,
        }
    }

    /// Assemble the context for one turn of `key`'s conversation.
    ///
    /// `calendar_credentials` overrides the configured credentials path
    /// for this request only. A failed history load is an error; a failed
    /// memory recall just degrades to an empty memory section.
    pub async fn build(
        &self,
        key: &SessionKey,
        calendar_credentials: Option<&str>,
    ) -> Result<AgentContext, Error> {
        let history = self.sessions.load(key).await?;
        let recalled = self.recall_memories(&key.user_id).await;
        let system_prompt = build_system_prompt(Utc::now(), &recalled);

        let credentials = calendar_credentials
            .map(str::to_string)
            .or_else(|| self.config.calendar.credentials_path.clone());
        let registry = deskmate_tools::build_registry(
            &self.config,
            self.provider.clone(),
            credentials.as_deref().map(Path::new),
        );

        debug!(
            session = %key,
            history = history.len(),
            memories = recalled.len(),
            tools = registry.names().len(),
            "Assembled agent context"
        );

        Ok(AgentContext {
            system_prompt,
            history,
            registry,
        })
    }

    async fn recall_memories(&self, user_id: &str) -> Vec<MemoryItem> {
        match self
            .memories
            .recall(user_id, self.config.memory.recall_limit)
            .await
        {
            Ok(items) => {
                if !items.is_empty() {
                    debug!(count = items.len(), "Recalled memories for context");
                }
                items
            }
            Err(e) => {
                warn!("Memory recall failed: {e}");
                vec![]
            }
        }
    }
}

/// Build the system prompt for one turn.
///
/// Includes today's date so the model can resolve relative dates, and
/// the user's remembered facts when there are any.
pub fn build_system_prompt(now: DateTime<Utc>, memories: &[MemoryItem]) -> String {
    let mut prompt = format!(
        "You are Deskmate, a personal assistant.\n\
         You can answer questions about uploaded documents, search the web, \
         and read the user's calendar.\n\
         Keep answers concise and direct.\n\n\
         Today is {} (UTC).\n\
         Resolve relative dates like 'today' or 'next Friday' against today's \
         date before using them.",
        now.format("%A, %Y-%m-%d"),
    );
    prompt.push_str(&format_memory_context(memories));
    prompt
}

/// Format recalled memories into a block for the system prompt.
fn format_memory_context(memories: &[MemoryItem]) -> String {
    if memories.is_empty() {
        return String::new();
    }
    let mut ctx = String::from("\n\nWhat you know about this user:\n");
    for item in memories {
        ctx.push_str(&format!("- {}\n", item.memory));
    }
    ctx
}
