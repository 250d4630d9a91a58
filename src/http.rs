//! Optional HTTP agent service.
//!
//! - `POST /agent/chat` — run one request through the agent graph.
//!   `execute=false` forces dry-run tool execution (planning preview).
//! - `GET /health` — liveness.
//! - `GET /metrics` — Prometheus text format.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::agent::{AgentError, AgentExecutor, ExecuteRequest};

/// Process-wide service metrics.
pub struct Metrics {
    registry: Registry,
    /// Requests accepted by `POST /agent/chat`.
    pub chat_requests: IntCounter,
    /// Requests that ended in an error status.
    pub chat_failures: IntCounter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create and register the metric families.
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (duplicate names).
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let chat_requests =
            IntCounter::new("kira_chat_requests_total", "Agent chat requests accepted")?;
        let chat_failures =
            IntCounter::new("kira_chat_failures_total", "Agent chat requests that failed")?;
        registry.register(Box::new(chat_requests.clone()))?;
        registry.register(Box::new(chat_failures.clone()))?;
        Ok(Self {
            registry,
            chat_requests,
            chat_failures,
        })
    }

    /// Render the registry in Prometheus text format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            error!(error = %e, "failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Shared state for the HTTP handlers.
pub struct AppState {
    executor: Arc<AgentExecutor>,
    metrics: Arc<Metrics>,
}

/// Request body for `POST /agent/chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequestBody {
    /// The user's message.
    pub message: String,
    /// Session to attach to; a fresh anonymous session when absent.
    pub session_id: Option<String>,
    /// `false` runs planning in dry-run mode. Defaults to `true`.
    pub execute: Option<bool>,
}

/// Build the service router.
pub fn router(executor: Arc<AgentExecutor>, metrics: Arc<Metrics>) -> Router {
    let state = Arc::new(AppState { executor, metrics });
    Router::new()
        .route("/agent/chat", post(agent_chat))
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .with_state(state)
}

/// Serve until the process stops.
///
/// # Errors
///
/// Returns an error if the listener cannot bind.
pub async fn serve(
    bind_addr: &str,
    executor: Arc<AgentExecutor>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = bind_addr, "HTTP agent service listening");
    axum::serve(listener, router(executor, metrics)).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics_text(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

async fn agent_chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatRequestBody>,
) -> impl IntoResponse {
    state.metrics.chat_requests.inc();

    let session_id = body
        .session_id
        .clone()
        .unwrap_or_else(|| format!("http:{}", uuid::Uuid::new_v4().simple()));
    let trace_id = format!("http-{session_id}-{}", uuid::Uuid::new_v4().simple());
    let dry_run = !body.execute.unwrap_or(true);

    let request = ExecuteRequest {
        message: body.message,
        session_id,
        trace_id: trace_id.clone(),
        user: "http".to_owned(),
        progress: None,
        dry_run,
    };

    match state.executor.execute(request).await {
        Ok(result) => {
            if result.status == "error" {
                state.metrics.chat_failures.inc();
            }
            (
                StatusCode::OK,
                Json(json!({
                    "status": result.status,
                    "response": result.response,
                    "results": result.results,
                    "trace_id": result.trace_id,
                })),
            )
        }
        Err(AgentError::SessionBusy(session)) => {
            state.metrics.chat_failures.inc();
            (
                StatusCode::CONFLICT,
                Json(json!({
                    "status": "busy",
                    "response": format!("session {session} is busy"),
                    "results": [],
                    "trace_id": trace_id,
                })),
            )
        }
        Err(e) => {
            state.metrics.chat_failures.inc();
            error!(trace_id = %trace_id, error = %e, "chat request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "error",
                    "response": "internal error",
                    "results": [],
                    "trace_id": trace_id,
                })),
            )
        }
    }
}
