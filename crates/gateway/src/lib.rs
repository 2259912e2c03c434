//! HTTP API gateway for Deskmate.
//!
//! Exposes the agent over REST: streaming chat, document upload,
//! direct calendar queries, and history management. Axum under the
//! hood, with one shared state built at startup.

pub mod routes;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::info;

use deskmate_agent::AgentLoop;
use deskmate_config::AppConfig;
use deskmate_core::memory::MemoryStore;
use deskmate_core::session::SessionStore;
use deskmate_storage::{SqliteMemoryStore, SqliteSessionStore};

/// Largest accepted request body. Sized for PDF uploads rather than
/// chat payloads.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: AppConfig,
    pub agent: AgentLoop,
    pub sessions: Arc<dyn SessionStore>,
    pub memories: Arc<dyn MemoryStore>,
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    // CORS is permissive: the desktop frontend runs on its own origin.
    Router::new()
        .route("/chat", post(routes::chat_handler))
        .route("/calendar/events", get(routes::calendar_events_handler))
        .route("/clear-history", post(routes::clear_history_handler))
        .route("/upload", post(routes::upload_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
///
/// Builds the provider, the connection pool, and the agent loop once;
/// every request shares them through [`GatewayState`].
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let provider = deskmate_providers::build_from_config(&config)?;
    let pool = deskmate_storage::open_pool(&config.storage.db_path).await?;
    let sessions: Arc<dyn SessionStore> = Arc::new(SqliteSessionStore::new(pool.clone()));
    let memories: Arc<dyn MemoryStore> = Arc::new(SqliteMemoryStore::new(pool));
    let agent = AgentLoop::new(&config, provider, sessions.clone(), memories.clone());

    let state = Arc::new(GatewayState {
        config,
        agent,
        sessions,
        memories,
    });
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
