//! REST endpoint handlers.
//!
//! `/chat` streams the agent's answer as plain text; the remaining
//! endpoints are ordinary JSON request/response handlers over the
//! shared stores.

use std::io;
use std::path::Path;

use axum::body::{Body, Bytes};
use axum::extract::{Multipart, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use deskmate_agent::AgentStreamEvent;
use deskmate_core::error::StorageError;
use deskmate_core::memory::MemoryStore;
use deskmate_core::session::SessionStore;
use deskmate_core::SessionKey;
use deskmate_tools::calendar::DEFAULT_EVENT_LIMIT;
use deskmate_tools::{sanitize_filename, GoogleCalendarTool};

use crate::SharedState;

/// Error payload for non-streamed failures.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn internal_error(message: impl Into<String>) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

// --- POST /chat ---

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_query: String,
    pub user_id: String,
    pub session_id: String,
    #[serde(default)]
    pub credentials_path: Option<String>,
}

/// `POST /chat` — run one agent turn, streaming the answer as plain text.
///
/// The first event is awaited before committing to a streamed response,
/// so setup failures (bad provider config, a broken store) surface as a
/// proper JSON error instead of an empty 200 body. Once bytes are on
/// the wire, a fault terminates the stream abruptly rather than
/// appending error text to a half-delivered answer.
pub async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Response {
    let user_id = payload.user_id.trim().to_string();
    let session_id = payload.session_id.trim().to_string();
    if user_id.is_empty() || session_id.is_empty() {
        return bad_request("ID cannot be empty").into_response();
    }

    let key = SessionKey::new(user_id, session_id);
    let mut rx = state
        .agent
        .run(key, payload.user_query, payload.credentials_path);

    match rx.recv().await {
        Some(AgentStreamEvent::Error { message }) => internal_error(message).into_response(),
        None => internal_error("Agent produced no output").into_response(),
        Some(first) => {
            let body = Body::from_stream(
                tokio_stream::once(first)
                    .chain(ReceiverStream::new(rx))
                    .filter_map(event_bytes),
            );
            (
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                body,
            )
                .into_response()
        }
    }
}

/// Map one agent event to its place in the response body.
///
/// Tool progress and completion events have no plain-text
/// representation and are skipped. A mid-stream error becomes an I/O
/// error, which closes the connection without a clean terminator.
fn event_bytes(event: AgentStreamEvent) -> Option<Result<Bytes, io::Error>> {
    match event {
        // Zero-length fragments have no wire representation in a plain body.
        AgentStreamEvent::Chunk { content } if content.is_empty() => None,
        AgentStreamEvent::Chunk { content } => Some(Ok(Bytes::from(content))),
        AgentStreamEvent::Error { message } => Some(Err(io::Error::other(message))),
        AgentStreamEvent::ToolCall { .. }
        | AgentStreamEvent::ToolResult { .. }
        | AgentStreamEvent::Done { .. } => None,
    }
}

// --- GET /calendar/events ---

fn default_limit() -> usize {
    DEFAULT_EVENT_LIMIT
}

fn default_user_id() -> String {
    "default_user".to_string()
}

fn default_session_id() -> String {
    "default_session".to_string()
}

#[derive(Debug, Deserialize)]
pub struct CalendarEventsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub date_from: Option<String>,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_session_id")]
    pub session_id: String,
    #[serde(default)]
    pub credentials_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CalendarEventsResponse {
    pub events: String,
}

/// `GET /calendar/events` — direct calendar query, no agent involved.
///
/// Unlike chat, a missing credentials file is a hard error here: the
/// caller asked for calendar data specifically, so there is nothing
/// sensible to degrade to.
pub async fn calendar_events_handler(
    State(state): State<SharedState>,
    Query(query): Query<CalendarEventsQuery>,
) -> Result<Json<CalendarEventsResponse>, ApiError> {
    let credentials = query
        .credentials_path
        .clone()
        .or_else(|| state.config.calendar.credentials_path.clone());
    let credentials = match credentials {
        Some(path) if Path::new(&path).exists() => path,
        _ => {
            return Err(bad_request(
                "Valid Google Calendar credentials path not provided",
            ));
        }
    };

    info!(
        user = %query.user_id,
        session = %query.session_id,
        limit = query.limit,
        "Calendar events query"
    );

    let tool = GoogleCalendarTool::new(&credentials);
    match tool
        .list_events(query.limit.min(50), query.date_from.as_deref())
        .await
    {
        Ok(events) => Ok(Json(CalendarEventsResponse { events })),
        Err(e) => Err(internal_error(format!(
            "Error fetching calendar events: {e}"
        ))),
    }
}

// --- POST /clear-history ---

#[derive(Debug, Deserialize)]
pub struct ClearHistoryRequest {
    pub user_id: String,
    pub session_id: String,
    #[serde(default)]
    pub clear_all_user_data: bool,
}

#[derive(Debug, Serialize)]
pub struct ClearHistoryResponse {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared_sessions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared_memories: Option<u64>,
}

/// `POST /clear-history` — drop one session transcript, or with
/// `clear_all_user_data`, every transcript and memory the user owns.
pub async fn clear_history_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ClearHistoryRequest>,
) -> Result<Json<ClearHistoryResponse>, ApiError> {
    let user_id = payload.user_id.trim();
    let session_id = payload.session_id.trim();
    if user_id.is_empty() || session_id.is_empty() {
        return Err(bad_request("ID cannot be empty"));
    }

    if payload.clear_all_user_data {
        // Best-effort across the two stores: a failure in one phase must
        // not stop the other, and the counts reflect what was actually
        // removed, not what was attempted.
        let mut first_error: Option<StorageError> = None;

        let cleared_memories = match state.memories.delete_for_user(user_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(user = %user_id, error = %e, "Memory sweep failed");
                first_error = Some(e);
                0
            }
        };

        let mut cleared_sessions = 0usize;
        match state.sessions.session_ids(user_id).await {
            Ok(session_ids) => {
                for sid in &session_ids {
                    let key = SessionKey::new(user_id, sid.as_str());
                    match state.sessions.clear(&key).await {
                        Ok(_) => cleared_sessions += 1,
                        Err(e) => {
                            warn!(session = %key, error = %e, "Session sweep failed");
                            first_error.get_or_insert(e);
                        }
                    }
                }
            }
            Err(e) => {
                warn!(user = %user_id, error = %e, "Session enumeration failed");
                first_error.get_or_insert(e);
            }
        }

        if let Some(e) = first_error {
            return Err(internal_error(format!("Error clearing history: {e}")));
        }

        info!(
            user = %user_id,
            sessions = cleared_sessions,
            memories = cleared_memories,
            "Cleared all user data"
        );
        Ok(Json(ClearHistoryResponse {
            status: "success",
            message: format!("All history cleared for user {user_id}"),
            cleared_sessions: Some(cleared_sessions),
            cleared_memories: Some(cleared_memories),
        }))
    } else {
        let key = SessionKey::new(user_id, session_id);
        state
            .sessions
            .clear(&key)
            .await
            .map_err(|e| internal_error(format!("Error clearing history: {e}")))?;

        info!(session = %key, "Cleared session history");
        Ok(Json(ClearHistoryResponse {
            status: "success",
            message: format!("History cleared for session {session_id}"),
            cleared_sessions: None,
            cleared_memories: None,
        }))
    }
}

// --- POST /upload ---

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub status: &'static str,
    pub filename: String,
    pub message: &'static str,
    pub file_path: String,
}

/// `POST /upload` — store a PDF in the uploads directory.
///
/// Uploading an existing filename overwrites it, so the document tools
/// always see exactly one file per name.
pub async fn upload_handler(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Invalid multipart request: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let raw_name = field.file_name().unwrap_or_default().to_string();
        let Some(filename) = sanitize_filename(&raw_name).map(str::to_string) else {
            return Err(bad_request("Invalid filename"));
        };
        if !filename.to_lowercase().ends_with(".pdf") {
            return Err(bad_request("Only PDF files are allowed"));
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("Failed to read uploaded file: {e}")))?;

        let uploads_dir = Path::new(&state.config.storage.uploads_dir);
        tokio::fs::create_dir_all(uploads_dir)
            .await
            .map_err(|e| internal_error(format!("Error uploading file: {e}")))?;
        let file_path = uploads_dir.join(&filename);
        tokio::fs::write(&file_path, &data)
            .await
            .map_err(|e| internal_error(format!("Error uploading file: {e}")))?;

        info!(filename = %filename, bytes = data.len(), "Document uploaded");
        return Ok(Json(UploadResponse {
            status: "success",
            filename,
            message: "File uploaded successfully",
            file_path: file_path.display().to_string(),
        }));
    }

    Err(bad_request("No file field in upload"))
}
