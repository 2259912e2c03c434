//! The core agent loop — the heart of Deskmate.
//!
//! Answering one user message follows a fixed cycle:
//!
//! 1. **Assemble context** — session transcript, remembered user facts,
//!    and the tools that are currently available
//! 2. **Stream from the LLM** — content deltas are forwarded to the
//!    client as they arrive
//! 3. **If tool calls**: execute tools, append results, loop back to step 2
//! 4. **If text only**: the turn is complete — persist it, then distill a
//!    long-term memory from the exchange
//!
//! The loop continues until the model responds with text only or the
//! iteration limit is reached. Nothing is persisted for a turn that
//! fails or is abandoned mid-stream.

pub mod builder;
pub mod loop_runner;
pub mod stream_event;

pub use builder::{build_system_prompt, AgentContext, ContextBuilder};
pub use loop_runner::AgentLoop;
pub use stream_event::AgentStreamEvent;
