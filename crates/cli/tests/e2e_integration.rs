//! End-to-end integration tests for the Deskmate runtime.
//!
//! These drive the HTTP surface with a scripted provider and verify the
//! whole pipeline underneath: context assembly, tool execution against a
//! real uploads directory, and durable transcript writes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use deskmate_agent::AgentLoop;
use deskmate_config::AppConfig;
use deskmate_core::error::ProviderError;
use deskmate_core::memory::MemoryStore;
use deskmate_core::message::{Message, MessageToolCall, SessionKey};
use deskmate_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use deskmate_core::session::SessionStore;
use deskmate_gateway::{build_router, GatewayState};
use deskmate_storage::{open_pool, SqliteMemoryStore, SqliteSessionStore};

/// Scripted provider that pops canned responses in order and records
/// every request it sees.
struct ScriptedProvider {
    responses: Mutex<VecDeque<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
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
                    id: format!("call_{name}"),
                    name: name.into(),
                    arguments: arguments.into(),
                }],
            ),
            usage: None,
            model: "mock-model".into(),
        }
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 500,
                message: "script exhausted".into(),
            })
    }
}

async fn test_state(provider: Arc<ScriptedProvider>) -> (Arc<GatewayState>, tempfile::TempDir) {
    let uploads = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.model = "mock-model".into();
    config.memory.auto_save = false;
    config.storage.uploads_dir = uploads.path().display().to_string();

    let pool = open_pool("sqlite::memory:").await.unwrap();
    let sessions: Arc<dyn SessionStore> = Arc::new(SqliteSessionStore::new(pool.clone()));
    let memories: Arc<dyn MemoryStore> = Arc::new(SqliteMemoryStore::new(pool));
    let agent = AgentLoop::new(&config, provider, sessions.clone(), memories.clone());

    let state = Arc::new(GatewayState {
        config,
        agent,
        sessions,
        memories,
    });
    (state, uploads)
}

fn chat_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn upload_request(filename: &str, content: &[u8]) -> Request<Body> {
    let boundary = "e2e-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\ncontent-disposition: form-data; name=\"file\"; \
             filename=\"{filename}\"\r\ncontent-type: application/pdf\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn e2e_upload_then_ask_about_documents() {
    // Scenario: the user uploads a PDF, then asks what documents exist.
    // The scripted model calls list_documents, then answers from it.
    let provider = ScriptedProvider::new(vec![
        ScriptedProvider::tool_call("list_documents", "{}"),
        ScriptedProvider::text("You have one document: report.pdf."),
    ]);
    let (state, _uploads) = test_state(provider.clone()).await;
    let app = build_router(state.clone());

    let response = app
        .clone()
        .oneshot(upload_request("report.pdf", b"%PDF-1.4 stub"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(chat_request(
            r#"{"user_query":"What documents do I have available?","user_id":"u1","session_id":"s1"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "You have one document: report.pdf.");

    // The second model call carried the real tool output, proving the
    // tool ran against the uploads directory.
    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    let tool_reply = requests[1]
        .messages
        .iter()
        .find(|m| m.tool_call_id.is_some())
        .expect("tool result message in follow-up request");
    assert!(tool_reply.content.contains("report.pdf"));

    // And the turn is durably recorded.
    let transcript = state
        .sessions
        .load(&SessionKey::new("u1", "s1"))
        .await
        .unwrap();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[1].content, "You have one document: report.pdf.");
}

#[tokio::test]
async fn e2e_missing_calendar_credentials_omits_the_tool() {
    // No calendar credentials and no search key are configured, so the
    // model must only be offered the document tools.
    let provider = ScriptedProvider::new(vec![ScriptedProvider::text(
        "I can't see your calendar right now.",
    )]);
    let (state, _uploads) = test_state(provider.clone()).await;
    let app = build_router(state.clone());

    let response = app
        .oneshot(chat_request(
            r#"{"user_query":"What's on my calendar this week?","user_id":"u1","session_id":"s1"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "I can't see your calendar right now.");

    let requests = provider.requests();
    let tools: Vec<&str> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
    assert!(tools.contains(&"list_documents"));
    assert!(tools.contains(&"document_qa"));
    assert!(!tools.contains(&"calendar_events"));
    assert!(!tools.contains(&"web_search"));

    // The degraded answer still counts as a full turn.
    let transcript = state
        .sessions
        .load(&SessionKey::new("u1", "s1"))
        .await
        .unwrap();
    assert_eq!(transcript.len(), 2);
}

#[tokio::test]
async fn e2e_clear_history_wipes_the_conversation() {
    let provider = ScriptedProvider::new(vec![ScriptedProvider::text("Nice to meet you, Priya.")]);
    let (state, _uploads) = test_state(provider).await;
    let app = build_router(state.clone());

    let response = app
        .clone()
        .oneshot(chat_request(
            r#"{"user_query":"Hello, my name is Priya!","user_id":"u7","session_id":"main"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let _ = body_text(response).await;

    let key = SessionKey::new("u7", "main");
    assert_eq!(state.sessions.load(&key).await.unwrap().len(), 2);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/clear-history")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"user_id":"u7","session_id":"main"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value =
        serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["message"], "History cleared for session main");

    assert!(state.sessions.load(&key).await.unwrap().is_empty());
}
