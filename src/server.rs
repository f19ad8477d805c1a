//! HTTP service shell.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Answer a message given the conversation so far |
//! | `GET`  | `/health` | Readiness and retrieval mode |
//!
//! # Startup
//!
//! The listener is bound first; backends are initialized on a background
//! task and published exactly once into [`Backends`]. Until then `/health`
//! reports `"initializing"` and `/chat` answers 503. If initialization ends
//! with no backend at all, `/chat` keeps answering 503 for the life of the
//! process. Otherwise every `/chat` request gets a 200 with a reply.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unavailable", "message": "no backend configured" } }
//! ```
//!
//! Error codes: `unavailable` (503), `bad_request` (400/415/422, malformed body).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the site's frontend
//! can call the agent from the browser.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::models::{ChatReply, ChatRequest};
use crate::orchestrator::{Orchestrator, APOLOGY_REPLY};
use crate::startup;

/// Write-once slot for the orchestrator built at startup.
///
/// `None` inside the slot means initialization finished without any backend.
#[derive(Clone, Default)]
pub struct Backends {
    slot: Arc<OnceLock<Option<Arc<Orchestrator>>>>,
}

impl Backends {
    /// An empty slot; [`publish`](Backends::publish) fills it later.
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot that is already published.
    pub fn ready(orchestrator: Option<Orchestrator>) -> Self {
        let backends = Self::new();
        backends.publish(orchestrator);
        backends
    }

    /// Publish the initialization outcome. Returns `false` if already published.
    pub fn publish(&self, orchestrator: Option<Orchestrator>) -> bool {
        self.slot.set(orchestrator.map(Arc::new)).is_ok()
    }

    fn get(&self) -> Option<&Option<Arc<Orchestrator>>> {
        self.slot.get()
    }
}

#[derive(Clone)]
struct AppState {
    backends: Backends,
    service: Arc<str>,
}

/// Build the router. Exposed so tests and embedders can serve it on their own listener.
pub fn router(backends: Backends, service_name: &str) -> Router {
    let state = AppState {
        backends,
        service: Arc::from(service_name),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Bind `[server].bind`, start backend initialization in the background and serve.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let backends = Backends::new();

    let init_slot = backends.clone();
    let init_config = config.clone();
    tokio::spawn(async move {
        let orchestrator = tokio::spawn(async move { startup::initialize(&init_config).await })
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "backend initialization panicked");
                None
            });
        init_slot.publish(orchestrator);
    });

    run_server_with_backends(config, backends).await
}

/// Serve with a caller-provided [`Backends`] slot. Does not initialize anything.
pub async fn run_server_with_backends(config: &Config, backends: Backends) -> anyhow::Result<()> {
    let bind_addr = &config.server.bind;
    let app = router(backends, &config.server.service_name);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(
        "{} listening on http://{}",
        config.server.service_name,
        listener.local_addr()?
    );
    axum::serve(listener, app).await?;

    Ok(())
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

fn unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "unavailable".to_string(),
        message: message.into(),
    }
}

/// Body rejections keep axum's status (400, 415 or 422) but use the JSON error shape.
fn bad_request(rejection: JsonRejection) -> AppError {
    AppError {
        status: rejection.status(),
        code: "bad_request".to_string(),
        message: rejection.body_text(),
    }
}

// ============ POST /chat ============

/// Handler for `POST /chat`.
///
/// The orchestrator runs on its own task so that a panic inside it still
/// yields a 200 with [`APOLOGY_REPLY`].
async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, AppError> {
    let Json(request) = payload.map_err(bad_request)?;
    let orchestrator = match state.backends.get() {
        None => return Err(unavailable("backends are still initializing")),
        Some(None) => return Err(unavailable("no backend configured")),
        Some(Some(orchestrator)) => orchestrator.clone(),
    };

    let history = request.turns();
    let message = request.message;
    tracing::debug!(
        message_chars = message.chars().count(),
        history_turns = history.len(),
        "chat request"
    );

    let reply = tokio::spawn(async move { orchestrator.respond(&message, &history).await })
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "chat task failed");
            ChatReply::text(APOLOGY_REPLY)
        });

    Ok(Json(reply))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// `"ok"` once initialization finished, `"initializing"` before.
    status: &'static str,
    /// `"rag"` when retrieval is available, `"llm-only"` otherwise.
    mode: &'static str,
    service: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (status, mode) = match state.backends.get() {
        None => ("initializing", "llm-only"),
        Some(None) => ("ok", "llm-only"),
        Some(Some(orchestrator)) => ("ok", orchestrator.state().mode()),
    };

    Json(HealthResponse {
        status,
        mode,
        service: state.service.to_string(),
    })
}
