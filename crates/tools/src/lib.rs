//! Built-in tool implementations for Deskmate.
//!
//! Tools give the agent the ability to act for the user: answer
//! questions about uploaded PDF documents, search the web, and read
//! upcoming Google Calendar events.
//!
//! Which tools end up registered depends on what is configured: the
//! document tools are always available, web search needs a Tavily API
//! key, and the calendar needs a readable credentials file.

pub mod calendar;
pub mod documents;
pub mod search;

pub use calendar::GoogleCalendarTool;
pub use documents::{DocumentPathTool, DocumentQaTool, ListDocumentsTool, sanitize_filename};
pub use search::TavilySearchTool;

use deskmate_config::AppConfig;
use deskmate_core::tool::ToolRegistry;
use deskmate_core::Provider;
use std::path::Path;
use std::sync::Arc;

/// Build the tool registry for one agent run.
///
/// `calendar_credentials` is the already-resolved credentials path (the
/// per-request override, falling back to the configured default).
/// Capabilities whose prerequisites are missing are skipped without
/// error, so the agent simply never advertises them.
pub fn build_registry(
    config: &AppConfig,
    provider: Arc<dyn Provider>,
    calendar_credentials: Option<&Path>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    let uploads_dir = Path::new(&config.storage.uploads_dir);
    registry.register(Box::new(DocumentQaTool::new(
        provider,
        &config.model,
        uploads_dir,
    )));
    registry.register(Box::new(ListDocumentsTool::new(uploads_dir)));
    registry.register(Box::new(DocumentPathTool::new(uploads_dir)));

    if let Some(api_key) = config.search.api_key.as_deref().filter(|k| !k.is_empty()) {
        registry.register(Box::new(TavilySearchTool::new(
            api_key,
            config.search.max_results,
        )));
    }

    match calendar_credentials {
        Some(path) if path.exists() => {
            registry.register(Box::new(GoogleCalendarTool::new(path)));
        }
        Some(path) => {
            tracing::debug!(
                path = %path.display(),
                "Calendar credentials file not found, calendar tool disabled"
            );
        }
        None => {}
    }

    registry
}
