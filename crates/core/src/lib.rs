//! # Deskmate Core
//!
//! Domain types, traits, and errors shared by every Deskmate crate.
//!
//! The seams of the system live here as traits: [`Provider`] for LLM
//! backends, [`Tool`] for agent capabilities, [`SessionStore`] and
//! [`MemoryStore`] for persistence. Implementations live in the outer
//! crates and depend inward on this one, which keeps the dependency
//! graph acyclic and lets tests swap in doubles for any subsystem.

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;
pub mod session;
pub mod memory;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{Message, MessageToolCall, Role, SessionKey};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk};
pub use tool::{Tool, ToolCall, ToolResult, ToolRegistry};
pub use session::SessionStore;
pub use memory::{MemoryItem, MemoryStore};
