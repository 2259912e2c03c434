//! The agent reasoning loop implementation.

use std::sync::Arc;
use std::time::Duration;

use deskmate_config::AppConfig;
use deskmate_core::error::ToolError;
use deskmate_core::memory::MemoryStore;
use deskmate_core::provider::{Provider, ProviderRequest, Usage};
use deskmate_core::session::SessionStore;
use deskmate_core::tool::ToolCall;
use deskmate_core::{Message, SessionKey};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::builder::{AgentContext, ContextBuilder};
use crate::stream_event::AgentStreamEvent;

/// Buffered events between the producer task and the consumer.
const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Hard cap on a single tool execution.
const TOOL_TIMEOUT_SECS: u64 = 60;

/// What the user sees when the model keeps calling tools past the limit.
const ITERATION_LIMIT_NOTICE: &str = "I've reached the maximum number of tool steps for this \
     request. Please try rephrasing or splitting it into smaller questions.";

/// The agent loop that orchestrates streaming LLM calls and tool execution.
///
/// One [`run`](AgentLoop::run) call answers one user message: it assembles
/// the context, streams model output while executing requested tools, and
/// only after the answer is complete persists the turn and distills a
/// long-term memory from it.
#[derive(Clone)]
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    sessions: Arc<dyn SessionStore>,
    memories: Arc<dyn MemoryStore>,
    builder: ContextBuilder,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_iterations: usize,
    auto_save: bool,
    memory_model: String,
}

impl AgentLoop {
    pub fn new(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        sessions: Arc<dyn SessionStore>,
        memories: Arc<dyn MemoryStore>,
    ) -> Self {
        let builder = ContextBuilder::new(
            config.clone(),
            provider.clone(),
            sessions.clone(),
            memories.clone(),
        );
        Self {
            provider,
            sessions,
            memories,
            builder,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_iterations: config.agent.max_iterations,
            auto_save: config.memory.auto_save,
            memory_model: config.memory.model.clone(),
        }
    }

    /// Answer one user message, streaming events as they happen.
    ///
    /// Returns immediately; the generation runs in a background task and
    /// pushes [`AgentStreamEvent`]s into the returned channel. Dropping
    /// the receiver abandons the turn: nothing is persisted for it.
    pub fn run(
        &self,
        key: SessionKey,
        user_message: String,
        calendar_credentials: Option<String>,
    ) -> mpsc::Receiver<AgentStreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let agent = self.clone();
        tokio::spawn(async move {
            agent
                .run_inner(tx, key, user_message, calendar_credentials)
                .await;
        });
        rx
    }

    async fn run_inner(
        &self,
        tx: mpsc::Sender<AgentStreamEvent>,
        key: SessionKey,
        user_message: String,
        calendar_credentials: Option<String>,
    ) {
        info!(
            session = %key,
            chars = user_message.len(),
            "Processing user message"
        );

        let context = match self.builder.build(&key, calendar_credentials.as_deref()).await {
            Ok(context) => context,
            Err(e) => {
                let _ = tx
                    .send(AgentStreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        let mut messages = Vec::with_capacity(context.history.len() + 2);
        messages.push(Message::system(&context.system_prompt));
        messages.extend(context.history.iter().cloned());
        messages.push(Message::user(&user_message));

        let definitions = context.registry.definitions();

        let mut answer = String::new();
        let mut rounds = 0usize;
        let mut tool_calls_made = 0usize;
        let mut usage_total: Option<Usage> = None;

        loop {
            if rounds >= self.max_iterations {
                warn!(session = %key, rounds, "Iteration limit reached, ending turn");
                if tx
                    .send(AgentStreamEvent::Chunk {
                        content: ITERATION_LIMIT_NOTICE.into(),
                    })
                    .await
                    .is_err()
                {
                    return;
                }
                if !answer.is_empty() {
                    answer.push('\n');
                }
                answer.push_str(ITERATION_LIMIT_NOTICE);
                break;
            }

            debug!(session = %key, round = rounds + 1, "Agent loop iteration");

            let request = ProviderRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: definitions.clone(),
                stream: true,
            };

            let mut chunks = match self.provider.stream(request).await {
                Ok(chunks) => chunks,
                Err(e) => {
                    warn!(session = %key, error = %e, "Provider request failed");
                    let _ = tx
                        .send(AgentStreamEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                    return;
                }
            };

            // Drain one model round, forwarding every content delta
            // exactly as the provider produced it (empty ones included).
            let mut round_text = String::new();
            let mut tool_calls = Vec::new();
            let mut stream_failure = None;
            while let Some(chunk) = chunks.recv().await {
                match chunk {
                    Ok(chunk) => {
                        if let Some(content) = chunk.content {
                            round_text.push_str(&content);
                            if tx.send(AgentStreamEvent::Chunk { content }).await.is_err() {
                                debug!(session = %key, "Client disconnected, abandoning turn");
                                return;
                            }
                        }
                        if chunk.done {
                            tool_calls = chunk.tool_calls;
                            if let Some(usage) = chunk.usage {
                                usage_total = Some(match usage_total.take() {
                                    Some(total) => Usage {
                                        prompt_tokens: total.prompt_tokens + usage.prompt_tokens,
                                        completion_tokens: total.completion_tokens
                                            + usage.completion_tokens,
                                        total_tokens: total.total_tokens + usage.total_tokens,
                                    },
                                    None => usage,
                                });
                            }
                            break;
                        }
                    }
                    Err(e) => {
                        stream_failure = Some(e);
                        break;
                    }
                }
            }
            if let Some(e) = stream_failure {
                warn!(session = %key, error = %e, "Model stream failed");
                let _ = tx
                    .send(AgentStreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }

            rounds += 1;
            answer.push_str(&round_text);

            if tool_calls.is_empty() {
                break;
            }

            debug!(
                session = %key,
                tool_count = tool_calls.len(),
                "Executing tool calls"
            );
            messages.push(Message::assistant_with_tools(
                round_text.clone(),
                tool_calls.clone(),
            ));

            for tc in &tool_calls {
                tool_calls_made += 1;
                let call = ToolCall {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    arguments: serde_json::from_str(&tc.arguments).unwrap_or_default(),
                };

                if tx
                    .send(AgentStreamEvent::ToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.arguments.clone(),
                    })
                    .await
                    .is_err()
                {
                    return;
                }

                let result = match tokio::time::timeout(
                    Duration::from_secs(TOOL_TIMEOUT_SECS),
                    context.registry.execute(&call),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ToolError::Timeout {
                        tool_name: call.name.clone(),
                        timeout_secs: TOOL_TIMEOUT_SECS,
                    }),
                };

                match result {
                    Ok(tool_result) => {
                        if tx
                            .send(AgentStreamEvent::ToolResult {
                                id: tc.id.clone(),
                                name: tc.name.clone(),
                                output: tool_result.output.clone(),
                                success: tool_result.success,
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                        messages.push(Message::tool_result(&tc.id, &tool_result.output));
                    }
                    Err(e) => {
                        warn!(tool = %tc.name, error = %e, "Tool execution failed");
                        if tx
                            .send(AgentStreamEvent::ToolResult {
                                id: tc.id.clone(),
                                name: tc.name.clone(),
                                output: format!("Error: {e}"),
                                success: false,
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                        // Report the failure to the model so it can recover.
                        messages.push(Message::tool_result(&tc.id, format!("Error: {e}")));
                    }
                }
            }
            // Loop back so the model can see the tool results.
        }

        // The answer is complete. Persist the turn before reporting done,
        // so a client that saw `done` can rely on the transcript.
        let turn = [Message::user(&user_message), Message::assistant(&answer)];
        if let Err(e) = self.sessions.append(&key, &turn).await {
            warn!(session = %key, error = %e, "Failed to persist conversation turn");
        }

        self.distill_memory(&key, &user_message, &answer).await;

        let _ = tx
            .send(AgentStreamEvent::Done {
                session: key.to_string(),
                usage: usage_total,
                iterations: rounds,
                tool_calls_made,
            })
            .await;
    }

    /// Distill a long-term memory from the completed turn.
    ///
    /// Runs a small extraction model over the exchange and stores the
    /// returned fact. A `NONE` reply, trivial inputs, and any failure all
    /// result in nothing being stored; the turn itself is never affected.
    async fn distill_memory(&self, key: &SessionKey, user_message: &str, answer: &str) {
        if !self.auto_save {
            return;
        }
        if user_message.trim().len() < 10 || answer.trim().is_empty() {
            return;
        }

        let prompt = format!(
            "Extract one concise fact about the user from this exchange, if any.\n\
             User: {user_message}\n\
             Assistant: {answer}\n\
             Reply with only the fact, or NONE if nothing is worth remembering."
        );
        let mut request = ProviderRequest::new(&self.memory_model, vec![Message::user(prompt)]);
        request.temperature = 0.2;

        let reply = match self.provider.complete(request).await {
            Ok(response) => response.message.content,
            Err(e) => {
                warn!("Memory distillation failed: {e}");
                return;
            }
        };

        let fact = reply.trim();
        if fact.is_empty() || fact.trim_end_matches('.').eq_ignore_ascii_case("none") {
            return;
        }

        match self.memories.add(&key.user_id, fact).await {
            Ok(id) => debug!(user_id = %key.user_id, memory_id = %id, "Distilled memory saved"),
            Err(e) => warn!("Failed to save distilled memory: {e}"),
        }
    }

    /// Assemble the context for one turn without running it.
    ///
    /// Exposed so callers can inspect what the agent would see (the CLI
    /// uses it to report which tools are active).
    pub async fn context(
        &self,
        key: &SessionKey,
        calendar_credentials: Option<&str>,
    ) -> Result<AgentContext, deskmate_core::Error> {
        self.builder.build(key, calendar_credentials).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskmate_core::error::ProviderError;
    use deskmate_core::provider::{ProviderResponse, StreamChunk};
    use deskmate_core::MessageToolCall;
    use deskmate_storage::{open_pool, SqliteMemoryStore, SqliteSessionStore};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Provider double that pops one scripted response per `complete` call.
    struct ScriptedProvider {
        responses: Mutex<VecDeque<ProviderResponse>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<ProviderResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
            })
        }

        fn text(content: &str) -> ProviderResponse {
            ProviderResponse {
                message: Message::assistant(content),
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                }),
                model: "mock-model".into(),
            }
        }

        fn tool_call(name: &str, arguments: &str) -> ProviderResponse {
            ProviderResponse {
                message: Message::assistant_with_tools(
                    "",
                    vec![MessageToolCall {
                        id: "call_1".into(),
                        name: name.into(),
                        arguments: arguments.into(),
                    }],
                ),
                usage: None,
                model: "mock-model".into(),
            }
        }
    }

    #[async_trait::async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            self.responses.lock().unwrap().pop_front().ok_or_else(|| {
                ProviderError::ApiError {
                    status_code: 500,
                    message: "script exhausted".into(),
                }
            })
        }
    }

    /// Provider double that emits a fixed chunk sequence, including an
    /// empty delta, with a short delay before the first chunk.
    struct PacedProvider;

    #[async_trait::async_trait]
    impl Provider for PacedProvider {
        fn name(&self) -> &str {
            "paced"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::Network("paced provider only streams".into()))
        }

        async fn stream(
            &self,
            _request: ProviderRequest,
        ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
            let (tx, rx) = mpsc::channel(8);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                for content in ["Hel", "", "lo"] {
                    let chunk = StreamChunk {
                        content: Some(content.into()),
                        ..Default::default()
                    };
                    if tx.send(Ok(chunk)).await.is_err() {
                        return;
                    }
                }
                let _ = tx
                    .send(Ok(StreamChunk {
                        done: true,
                        ..Default::default()
                    }))
                    .await;
            });
            Ok(rx)
        }
    }

    async fn stores() -> (Arc<SqliteSessionStore>, Arc<SqliteMemoryStore>) {
        let pool = open_pool("sqlite::memory:").await.unwrap();
        (
            Arc::new(SqliteSessionStore::new(pool.clone())),
            Arc::new(SqliteMemoryStore::new(pool)),
        )
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.model = "mock-model".into();
        config.memory.auto_save = false;
        config.storage.uploads_dir = "/nonexistent/uploads".into();
        config
    }

    async fn collect(mut rx: mpsc::Receiver<AgentStreamEvent>) -> Vec<AgentStreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn key() -> SessionKey {
        SessionKey::new("alice", "work")
    }

    #[tokio::test]
    async fn simple_text_response() {
        let provider = ScriptedProvider::new(vec![ScriptedProvider::text("Hello! How can I help?")]);
        let (sessions, memories) = stores().await;
        let agent = AgentLoop::new(&test_config(), provider, sessions.clone(), memories);

        let events = collect(agent.run(key(), "Hello!".into(), None)).await;

        assert_eq!(events.len(), 2);
        match &events[0] {
            AgentStreamEvent::Chunk { content } => assert_eq!(content, "Hello! How can I help?"),
            other => panic!("Expected chunk, got {other:?}"),
        }
        match &events[1] {
            AgentStreamEvent::Done {
                iterations,
                tool_calls_made,
                usage,
                ..
            } => {
                assert_eq!(*iterations, 1);
                assert_eq!(*tool_calls_made, 0);
                assert_eq!(usage.as_ref().unwrap().total_tokens, 15);
            }
            other => panic!("Expected done, got {other:?}"),
        }

        let transcript = sessions.load(&key()).await.unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].content, "Hello!");
        assert_eq!(transcript[1].content, "Hello! How can I help?");
    }

    #[tokio::test]
    async fn forwards_empty_chunks_unchanged() {
        let (sessions, memories) = stores().await;
        let agent = AgentLoop::new(
            &test_config(),
            Arc::new(PacedProvider),
            sessions.clone(),
            memories,
        );

        let events = collect(agent.run(key(), "Say hello".into(), None)).await;

        let contents: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                AgentStreamEvent::Chunk { content } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(contents, vec!["Hel", "", "lo"]);

        let transcript = sessions.load(&key()).await.unwrap();
        assert_eq!(transcript[1].content, "Hello");
    }

    #[tokio::test]
    async fn executes_tools_then_answers() {
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::tool_call("list_documents", "{}"),
            ScriptedProvider::text("You have no documents yet."),
        ]);
        let (sessions, memories) = stores().await;
        let agent = AgentLoop::new(&test_config(), provider, sessions.clone(), memories);

        let events = collect(agent.run(key(), "What documents do I have?".into(), None)).await;

        match &events[0] {
            AgentStreamEvent::ToolCall { name, .. } => assert_eq!(name, "list_documents"),
            other => panic!("Expected tool call, got {other:?}"),
        }
        match &events[1] {
            AgentStreamEvent::ToolResult {
                name,
                success,
                output,
                ..
            } => {
                assert_eq!(name, "list_documents");
                assert!(success);
                assert_eq!(output, "No uploads folder found.");
            }
            other => panic!("Expected tool result, got {other:?}"),
        }
        match events.last().unwrap() {
            AgentStreamEvent::Done {
                iterations,
                tool_calls_made,
                ..
            } => {
                assert_eq!(*iterations, 2);
                assert_eq!(*tool_calls_made, 1);
            }
            other => panic!("Expected done, got {other:?}"),
        }

        let transcript = sessions.load(&key()).await.unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1].content, "You have no documents yet.");
    }

    #[tokio::test]
    async fn unknown_tool_reported_to_model_as_error() {
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::tool_call("teleport", "{}"),
            ScriptedProvider::text("I can't do that."),
        ]);
        let (sessions, memories) = stores().await;
        let agent = AgentLoop::new(&test_config(), provider, sessions, memories);

        let events = collect(agent.run(key(), "Teleport me home".into(), None)).await;

        let result = events
            .iter()
            .find_map(|e| match e {
                AgentStreamEvent::ToolResult {
                    success, output, ..
                } => Some((*success, output.clone())),
                _ => None,
            })
            .unwrap();
        assert!(!result.0);
        assert!(result.1.starts_with("Error:"));
        assert!(matches!(
            events.last().unwrap(),
            AgentStreamEvent::Done { .. }
        ));
    }

    #[tokio::test]
    async fn iteration_limit_sends_notice() {
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::tool_call("list_documents", "{}"),
            ScriptedProvider::tool_call("list_documents", "{}"),
        ]);
        let mut config = test_config();
        config.agent.max_iterations = 2;
        let (sessions, memories) = stores().await;
        let agent = AgentLoop::new(&config, provider, sessions.clone(), memories);

        let events = collect(agent.run(key(), "Loop forever".into(), None)).await;

        let notice = events
            .iter()
            .find_map(|e| match e {
                AgentStreamEvent::Chunk { content } => Some(content.clone()),
                _ => None,
            })
            .unwrap();
        assert!(notice.contains("maximum number of tool steps"));
        match events.last().unwrap() {
            AgentStreamEvent::Done { iterations, .. } => assert_eq!(*iterations, 2),
            other => panic!("Expected done, got {other:?}"),
        }

        let transcript = sessions.load(&key()).await.unwrap();
        assert!(transcript[1].content.contains("maximum number of tool steps"));
    }

    #[tokio::test]
    async fn provider_failure_emits_error_and_persists_nothing() {
        let provider = ScriptedProvider::new(vec![]);
        let (sessions, memories) = stores().await;
        let agent = AgentLoop::new(&test_config(), provider, sessions.clone(), memories);

        let events = collect(agent.run(key(), "Hello!".into(), None)).await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            AgentStreamEvent::Error { message } => assert!(message.contains("script exhausted")),
            other => panic!("Expected error, got {other:?}"),
        }
        assert!(sessions.load(&key()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn distills_memory_after_turn() {
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::text("Nice to meet you, Omar!"),
            ScriptedProvider::text("The user's name is Omar."),
        ]);
        let mut config = test_config();
        config.memory.auto_save = true;
        let (sessions, memories) = stores().await;
        let agent = AgentLoop::new(&config, provider, sessions, memories.clone());

        let events = collect(
            agent.run(key(), "Hi, my name is Omar and I love sailing.".into(), None),
        )
        .await;
        assert!(matches!(
            events.last().unwrap(),
            AgentStreamEvent::Done { .. }
        ));

        let recalled = memories.recall("alice", 10).await.unwrap();
        assert_eq!(recalled.len(), 1);
        assert!(recalled[0].memory.contains("Omar"));
    }

    #[tokio::test]
    async fn none_reply_stores_no_memory() {
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::text("Sure, 2 + 2 = 4."),
            ScriptedProvider::text("NONE"),
        ]);
        let mut config = test_config();
        config.memory.auto_save = true;
        let (sessions, memories) = stores().await;
        let agent = AgentLoop::new(&config, provider, sessions, memories.clone());

        let _ = collect(agent.run(key(), "What is two plus two?".into(), None)).await;

        assert!(memories.recall("alice", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn short_messages_skip_distillation() {
        // One scripted response only: a distillation call would error and
        // surface as a stored-memory difference, so its absence is enough.
        let provider = ScriptedProvider::new(vec![ScriptedProvider::text("Hello!")]);
        let mut config = test_config();
        config.memory.auto_save = true;
        let (sessions, memories) = stores().await;
        let agent = AgentLoop::new(&config, provider, sessions, memories.clone());

        let _ = collect(agent.run(key(), "Hi".into(), None)).await;

        assert!(memories.recall("alice", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_receiver_abandons_turn() {
        let (sessions, memories) = stores().await;
        let agent = AgentLoop::new(
            &test_config(),
            Arc::new(PacedProvider),
            sessions.clone(),
            memories,
        );

        let rx = agent.run(key(), "Say hello".into(), None);
        drop(rx);
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(sessions.load(&key()).await.unwrap().is_empty());
    }
}
