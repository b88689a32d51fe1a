//! HTTP API over the case-file tools and the agent pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/status` | Archive download status |
//! | `GET`  | `/tools/list` | List all registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call a tool by name |
//! | `POST` | `/chat` | Run one chat turn over a message history |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "missing required parameter: id" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `tool_error` (500),
//! `recursion_limit` (422), `model_error` (502).
//!
//! Lookup failures inside a tool (unknown case, malformed id) are not HTTP
//! errors: the tool result carries them as an `error` object.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::chat::{ChatSession, Runtime, TurnOutcome};
use crate::config::Config;
use crate::messages::{ChatTurn, DisplayRole};
use crate::status::DownloadStatus;
use crate::traits::ToolCallError;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    runtime: Arc<Runtime>,
}

impl AppState {
    pub fn new(config: Config, runtime: Runtime) -> Self {
        Self {
            config: Arc::new(config),
            runtime: Arc::new(runtime),
        }
    }
}

/// Starts the HTTP server on `[server].bind`. Runs until the process ends.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let runtime = Runtime::start(config).await?;
    let bind_addr = config.server.bind.clone();

    for t in runtime.tools.tools() {
        info!(tool = t.name(), "registered tool");
    }

    let app = router(AppState::new(config.clone(), runtime));

    println!("SEI server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router. Exposed for embedding and tests.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/chat", post(handle_chat))
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

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

impl From<ToolCallError> for AppError {
    fn from(err: ToolCallError) -> Self {
        match err {
            ToolCallError::UnknownTool(name) => {
                not_found(format!("no tool registered with name: {}", name))
            }
            ToolCallError::InvalidParams(e) => bad_request(e.to_string()),
            ToolCallError::Failed(e) => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "tool_error", e.to_string())
            }
        }
    }
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

// ============ GET /status ============

#[derive(Serialize)]
struct StatusResponse {
    download: DownloadStatus,
    archive_root: String,
}

async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        download: state.runtime.status.status(),
        archive_root: state.config.archive.root.display().to_string(),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolInfo {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state
        .runtime
        .tools
        .tools()
        .iter()
        .map(|t| ToolInfo {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        })
        .collect();
    Json(ToolListResponse { tools })
}

// ============ POST /tools/{name} ============

/// Validate and execute a tool. `404` for unknown tools, `400` for schema
/// violations, `500` for execution failures.
async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let runtime = &state.runtime;
    let result = runtime.tools.call(&name, params, &runtime.ctx).await?;
    Ok(Json(serde_json::json!({ "result": result })))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    messages: Vec<ChatTurn>,
}

#[derive(Serialize)]
struct ChatResponse {
    reply: String,
    messages: Vec<ChatTurn>,
}

/// Run one turn. The last message must come from the user; the reply is
/// appended to the returned history.
async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let mut history = request.messages;
    let prompt = match history.pop() {
        Some(turn) if turn.role == DisplayRole::User && !turn.content.trim().is_empty() => {
            turn.content
        }
        _ => return Err(bad_request("last message must be a non-empty user message")),
    };

    let runtime = &state.runtime;
    let complete = runtime.status.status().is_complete();
    let mut session = ChatSession::new(
        Arc::clone(&runtime.pipeline),
        state.config.pipeline.recursion_limit,
        std::io::sink(),
    )
    .with_history(history);

    match session.handle_turn(&prompt, complete).await {
        TurnOutcome::Answered(reply) => Ok(Json(ChatResponse {
            reply,
            messages: session.history().to_vec(),
        })),
        TurnOutcome::NoContent => Ok(Json(ChatResponse {
            reply: String::new(),
            messages: session.history().to_vec(),
        })),
        TurnOutcome::Failed { code, message } => {
            let status = match code {
                "recursion_limit" => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::BAD_GATEWAY,
            };
            Err(AppError::new(status, code, message))
        }
    }
}
