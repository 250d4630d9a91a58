//! Agent executor: per-request orchestration around the graph.
//!
//! The executor serializes concurrent requests per session (queueing behind
//! a per-session lock with a bounded wait), loads conversation history and
//! pending-confirmation state, drives the graph under a wall-clock timeout
//! with a cancellation token, and persists the turn on exit.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::KiraConfig;
use crate::providers::router::LlmRouter;
use crate::providers::ChatMessage;
use crate::tools::{ToolRegistry, ToolResult};

use super::budget::Budget;
use super::graph::{self, GraphCtx, ProgressCallback};
use super::session::SessionStore;
use super::state::{AgentState, AgentStatus};

/// Bounded wait for the per-session lock before reporting busy.
const SESSION_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Reply used when a request times out mid-graph.
const TIMEOUT_REPLY: &str =
    "The request timed out before completing. Partial results may exist; please check and retry.";

/// Errors from the executor that precede any graph run.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Another request for the same session is still running.
    #[error("session {0} is busy with another request")]
    SessionBusy(String),
    /// The session store failed.
    #[error("session store error: {0}")]
    Store(#[from] sqlx::Error),
}

/// One request into the agent.
pub struct ExecuteRequest {
    /// The user's message text.
    pub message: String,
    /// Conversation key (`<source>:<chat_id>`).
    pub session_id: String,
    /// Correlation ID.
    pub trace_id: String,
    /// Requesting user identifier.
    pub user: String,
    /// Optional progress indicator hook.
    pub progress: Option<ProgressCallback>,
    /// Plan and execute tools in dry-run mode.
    pub dry_run: bool,
}

impl std::fmt::Debug for ExecuteRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteRequest")
            .field("session_id", &self.session_id)
            .field("trace_id", &self.trace_id)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

/// The outcome handed back to the ingress layer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecuteResult {
    /// Final status (`completed` or `error`).
    pub status: String,
    /// The user-visible reply (never empty).
    pub response: String,
    /// Tool execution results.
    pub results: Vec<ToolResult>,
    /// Correlation ID.
    pub trace_id: String,
}

/// Per-session advisory locks, created lazily.
#[derive(Default)]
struct SessionLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    fn handle(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(
            map.entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

/// Drives graph executions for all sessions.
pub struct AgentExecutor {
    router: Arc<LlmRouter>,
    registry: Arc<ToolRegistry>,
    sessions: SessionStore,
    config: Arc<KiraConfig>,
    locks: SessionLocks,
}

impl std::fmt::Debug for AgentExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentExecutor").finish_non_exhaustive()
    }
}

impl AgentExecutor {
    /// Create an executor over shared components.
    pub fn new(
        router: Arc<LlmRouter>,
        registry: Arc<ToolRegistry>,
        sessions: SessionStore,
        config: Arc<KiraConfig>,
    ) -> Self {
        Self {
            router,
            registry,
            sessions,
            config,
            locks: SessionLocks::default(),
        }
    }

    /// The session store (for sweep jobs).
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Execute one request end to end.
    ///
    /// Conversation turns are strictly sequential per session: a concurrent
    /// request queues behind the session lock and gives up after a bounded
    /// wait.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::SessionBusy`] on lock timeout and
    /// [`AgentError::Store`] when session persistence fails before the graph
    /// runs. Failures inside the graph become honest replies, not errors.
    pub async fn execute(&self, req: ExecuteRequest) -> Result<ExecuteResult, AgentError> {
        let lock = self.locks.handle(&req.session_id);
        let _guard = tokio::time::timeout(SESSION_LOCK_TIMEOUT, lock.lock())
            .await
            .map_err(|_| AgentError::SessionBusy(req.session_id.clone()))?;

        // Load history and pending state.
        let max_messages = self.config.memory.max_exchanges.saturating_mul(2);
        let mut messages = self
            .sessions
            .load_history(&req.session_id, max_messages)
            .await?;
        let pending = self.sessions.load_pending(&req.session_id).await?;
        messages.push(ChatMessage::user(req.message.clone()));

        let budget = Budget::new(
            self.config.agent.max_tool_calls,
            u64::from(self.config.agent.max_tokens).saturating_mul(16),
        );
        let mut state = AgentState::new(
            req.trace_id.clone(),
            req.session_id.clone(),
            req.user.clone(),
            messages,
            budget,
        );
        if let Some(pending) = pending {
            state.pending_confirmation = true;
            state.pending_plan = pending.plan;
            state.confirmation_question = pending.question;
        }

        let cancel = CancellationToken::new();
        let ctx = GraphCtx {
            router: Arc::clone(&self.router),
            registry: Arc::clone(&self.registry),
            agent_config: self.config.agent.clone(),
            progress: req.progress,
            cancel: cancel.clone(),
            dry_run: req.dry_run,
            clarifications: self.config.features.clarifications,
        };

        let graph_timeout = Duration::from_secs(self.config.agent.timeout_secs);
        let timed_out = tokio::time::timeout(graph_timeout, graph::run(&ctx, &mut state))
            .await
            .is_err();
        if timed_out {
            cancel.cancel();
            warn!(trace_id = %req.trace_id, "graph execution timed out");
            state.status = AgentStatus::Error;
            state.response = Some(TIMEOUT_REPLY.to_owned());
            // A timed-out request abandons any newly pending confirmation.
            state.pending_confirmation = false;
        }

        // The graph guarantees a response; belt and braces for the timeout
        // path above.
        let response = state
            .response
            .clone()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| TIMEOUT_REPLY.to_owned());

        // Persist the exchange.
        self.sessions
            .append_turn(&req.session_id, "user", &req.message)
            .await?;
        self.sessions
            .append_turn(&req.session_id, "assistant", &response)
            .await?;
        self.sessions
            .prune_history(&req.session_id, max_messages)
            .await?;

        if state.pending_confirmation && !state.pending_plan.is_empty() {
            self.sessions
                .save_pending(
                    &req.session_id,
                    &state.pending_plan,
                    &state.confirmation_question,
                )
                .await?;
        } else {
            self.sessions.clear_pending(&req.session_id).await?;
        }

        let status = match state.status {
            AgentStatus::Error => "error",
            _ => "completed",
        };
        info!(
            trace_id = %req.trace_id,
            session_id = %req.session_id,
            status,
            steps = state.tool_results.len(),
            "request complete"
        );

        Ok(ExecuteResult {
            status: status.to_owned(),
            response,
            results: state.tool_results,
            trace_id: req.trace_id,
        })
    }
}
