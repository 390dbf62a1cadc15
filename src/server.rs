//! JSON HTTP API.
//!
//! Each client creates a session, then posts questions to it. A session
//! owns its connection settings, a search pipeline built with the client's
//! API key, and its chat log. The vector store is shared by all sessions.
//! Idle sessions expire after `[server].session_idle_secs`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/connection/defaults` | Configured connection and advisory |
//! | `POST` | `/api/sessions` | Create a session |
//! | `GET`  | `/api/sessions/{id}` | Session chat log |
//! | `DELETE` | `/api/sessions/{id}` | Drop a session |
//! | `POST` | `/api/sessions/{id}/messages` | Ask a question |
//! | `POST` | `/api/sessions/{id}/clear` | Reset the chat log |
//! | `POST` | `/api/sessions/{id}/sql` | Run an operator statement (when enabled) |
//! | `POST` | `/api/embeddings/refresh` | Run the ingestion job |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "content must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `forbidden` (403), `not_found` (404),
//! `internal` (500).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::connection::ConnectionConfig;
use crate::embedding::{check_startup_token, create_embedder, Embedder};
use crate::ingest::{populate_vector_store, IngestOptions, IngestReport};
use crate::models::ConversationTurn;
use crate::relational::execute_outcome;
use crate::search::SearchFactory;
use crate::session::{ConversationSession, SessionHandle, SessionRegistry, SessionState};
use crate::vector_store::create_vector_store;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub factory: Arc<SearchFactory>,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(config: Config, factory: SearchFactory) -> Self {
        let idle = Duration::from_secs(config.server.session_idle_secs);
        Self {
            config: Arc::new(config),
            factory: Arc::new(factory),
            sessions: Arc::new(SessionRegistry::new(idle)),
        }
    }
}

/// Starts the HTTP server on `[server].bind`. Runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    check_startup_token(&config.embedding)?;
    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);
    let store = create_vector_store(&config.vector_store, embedder).await?;
    let factory = SearchFactory::from_config(config, store);

    let bind_addr = config.server.bind.clone();
    let app = build_router(AppState::new(config.clone(), factory));

    tracing::info!(addr = %bind_addr, "server listening");
    println!("hsql server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/connection/defaults", get(handle_connection_defaults))
        .route("/api/sessions", post(handle_create_session))
        .route(
            "/api/sessions/{id}",
            get(handle_get_session).delete(handle_delete_session),
        )
        .route("/api/sessions/{id}/messages", post(handle_message))
        .route("/api/sessions/{id}/clear", post(handle_clear))
        .route("/api/sessions/{id}/sql", post(handle_sql))
        .route("/api/embeddings/refresh", post(handle_refresh))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Error type that converts into an `{ "error": { code, message } }` response.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    fn internal(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{:#}", err), "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", format!("{:#}", err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

async fn lookup(state: &AppState, id: &str) -> Result<(Uuid, SessionHandle), AppError> {
    let uuid = Uuid::parse_str(id).map_err(|_| AppError::bad_request(format!("invalid session id: {}", id)))?;
    let handle = state
        .sessions
        .get(&uuid)
        .await
        .ok_or_else(|| AppError::not_found(format!("session not found: {}", id)))?;
    Ok((uuid, handle))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/connection/defaults ============

#[derive(Serialize)]
struct ConnectionDefaultsResponse {
    connection: ConnectionConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    advisory: Option<&'static str>,
}

async fn handle_connection_defaults(State(state): State<AppState>) -> Json<ConnectionDefaultsResponse> {
    let connection = state.config.db.connection.clone();
    let advisory = connection.advisory();
    Json(ConnectionDefaultsResponse {
        connection,
        advisory,
    })
}

// ============ Sessions ============

#[derive(Deserialize, Default)]
struct CreateSessionRequest {
    #[serde(default)]
    connection: Option<ConnectionConfig>,
    #[serde(default)]
    api_key: Option<String>,
}

#[derive(Serialize)]
struct SessionResponse {
    id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    advisory: Option<&'static str>,
    turns: Vec<ConversationTurn>,
}

async fn handle_create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    let connection = req
        .connection
        .unwrap_or_else(|| state.config.db.connection.clone());
    let advisory = connection.advisory();
    if advisory.is_some() {
        tracing::info!(missing = ?connection.missing_fields(), "session created with incomplete connection");
    }

    let search = state
        .factory
        .build(&connection, req.api_key.as_deref())
        .map_err(AppError::internal)?;
    let conversation = ConversationSession::new();
    let turns = conversation.turns().to_vec();

    let id = state
        .sessions
        .insert(SessionState {
            connection,
            search,
            conversation,
        })
        .await;

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            id,
            advisory,
            turns,
        }),
    ))
}

async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let (uuid, handle) = lookup(&state, &id).await?;
    let session = handle.lock().await;
    Ok(Json(SessionResponse {
        id: uuid,
        advisory: session.connection.advisory(),
        turns: session.conversation.turns().to_vec(),
    }))
}

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let (uuid, _) = lookup(&state, &id).await?;
    state.sessions.remove(&uuid).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct MessageRequest {
    content: String,
}

#[derive(Serialize)]
struct MessageResponse {
    turn: ConversationTurn,
}

async fn handle_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    if req.content.trim().is_empty() {
        return Err(AppError::bad_request("content must not be empty"));
    }
    let (_, handle) = lookup(&state, &id).await?;

    let mut session = handle.lock().await;
    let search = session.search.clone();
    let turn = session.conversation.ask(&req.content, &search).await;
    Ok(Json(MessageResponse { turn }))
}

async fn handle_clear(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let (uuid, handle) = lookup(&state, &id).await?;
    let mut session = handle.lock().await;
    session.conversation.clear();
    Ok(Json(SessionResponse {
        id: uuid,
        advisory: session.connection.advisory(),
        turns: session.conversation.turns().to_vec(),
    }))
}

// ============ POST /api/sessions/{id}/sql ============

#[derive(Deserialize)]
struct SqlRequest {
    sql: String,
}

#[derive(Serialize)]
struct SqlResponse {
    ok: bool,
    message: String,
}

async fn handle_sql(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SqlRequest>,
) -> Result<Json<SqlResponse>, AppError> {
    if !state.config.server.enable_sql_editor {
        return Err(AppError::forbidden("SQL editor is disabled"));
    }
    let (_, handle) = lookup(&state, &id).await?;
    let connection = handle.lock().await.connection.clone();

    let adapter = state.factory.adapter(&connection);
    let outcome = execute_outcome(adapter.as_ref(), &req.sql).await;
    Ok(Json(SqlResponse {
        ok: outcome.is_ok(),
        message: outcome.message(),
    }))
}

// ============ POST /api/embeddings/refresh ============

#[derive(Deserialize, Default)]
struct RefreshRequest {
    #[serde(default)]
    tables: Option<Vec<String>>,
    #[serde(default)]
    dry_run: bool,
    /// Source database; the configured one when absent.
    #[serde(default)]
    connection: Option<ConnectionConfig>,
}

#[derive(Serialize)]
struct RefreshResponse {
    #[serde(flatten)]
    report: IngestReport,
    message: String,
}

async fn handle_refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AppError> {
    let connection = req
        .connection
        .unwrap_or_else(|| state.config.db.connection.clone());
    let tables = req
        .tables
        .unwrap_or_else(|| state.config.ingest.tables.clone());
    let options = IngestOptions {
        probe_k: state.config.retrieval.probe_k,
        duplicate_max_distance: state.config.ingest.duplicate_max_distance,
        dry_run: req.dry_run,
    };

    let adapter = state.factory.adapter(&connection);
    let store = state.factory.store();
    let report = populate_vector_store(adapter.as_ref(), store.as_ref(), &tables, &options)
        .await
        .map_err(AppError::internal)?;

    let message = report.message();
    Ok(Json(RefreshResponse { report, message }))
}
