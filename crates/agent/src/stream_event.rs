//! Agent-level streaming events.
//!
//! `AgentStreamEvent` wraps provider-level stream chunks into higher-level
//! events that consumers forward to clients: the HTTP gateway turns `Chunk`
//! events into response bytes, the terminal client prints tool activity.

use deskmate_core::provider::Usage;
use serde::{Deserialize, Serialize};

/// Events emitted by the agent while answering one user message.
///
/// - `chunk`       — partial assistant text, in provider order (may be empty)
/// - `tool_call`   — the agent is invoking a tool
/// - `tool_result` — tool execution completed
/// - `done`        — the turn is complete and has been persisted
/// - `error`       — the turn failed; no further events follow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial assistant text from the model.
    Chunk { content: String },

    /// The agent is calling a tool.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool execution completed.
    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// The turn is complete — final metadata.
    Done {
        session: String,
        usage: Option<Usage>,
        iterations: usize,
        tool_calls_made: usize,
    },

    /// The turn failed.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_chunk() {
        let event = AgentStreamEvent::Chunk {
            content: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"chunk""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn empty_chunk_round_trips() {
        let event = AgentStreamEvent::Chunk {
            content: String::new(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: AgentStreamEvent = serde_json::from_str(&json).unwrap();
        match back {
            AgentStreamEvent::Chunk { content } => assert_eq!(content, ""),
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn event_serialization_tool_call() {
        let event = AgentStreamEvent::ToolCall {
            id: "call_1".into(),
            name: "web_search".into(),
            input: serde_json::json!({"query": "rust"}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_call""#));
        assert!(json.contains(r#""name":"web_search""#));
    }

    #[test]
    fn event_serialization_done() {
        let event = AgentStreamEvent::Done {
            session: "alice/work".into(),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
            }),
            iterations: 2,
            tool_calls_made: 1,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains(r#""iterations":2"#));
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"error","message":"boom"}"#;
        let event: AgentStreamEvent = serde_json::from_str(json).unwrap();
        match event {
            AgentStreamEvent::Error { message } => assert_eq!(message, "boom"),
            _ => panic!("Wrong variant"),
        }
    }
}
