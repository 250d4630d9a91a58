//! The agent graph: plan → reflect → tool → verify → respond.
//!
//! Routing reads the state after each node's update is applied. Every
//! terminal path goes through `respond`, so the user always gets a reply.
//!
//! Edges:
//! - plan: error/empty plan → respond; destructive plan → reflect; else tool.
//! - reflect: error or confirmation question → respond; else tool.
//! - tool: budget gone → respond; error with replans left → plan; error
//!   otherwise → respond; steps remaining → tool; plan finished → verify.
//! - verify: always → plan (follow-up work or termination with empty plan).
//! - respond: terminal.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::config::AgentConfig;
use crate::providers::router::LlmRouter;
use crate::tools::ToolRegistry;

use super::state::{AgentState, AgentStatus};
use super::{plan, reflect, respond, tool_step, verify};

/// Replans allowed after tool failures before giving up.
const MAX_REPLANS: u32 = 2;

/// Callback invoked before each tool step with a human-readable status line.
pub type ProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Shared, read-only context for one graph execution.
pub struct GraphCtx {
    /// LLM router.
    pub router: Arc<LlmRouter>,
    /// Tool catalog.
    pub registry: Arc<ToolRegistry>,
    /// Agent caps (tokens, temperature, timeouts).
    pub agent_config: AgentConfig,
    /// Optional progress indicator hook.
    pub progress: Option<ProgressCallback>,
    /// Request cancellation token.
    pub cancel: CancellationToken,
    /// Force dry-run on every planned tool call.
    pub dry_run: bool,
    /// Let the planner ask clarifying questions on ambiguous requests.
    pub clarifications: bool,
}

impl std::fmt::Debug for GraphCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphCtx")
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

/// Graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphNode {
    /// LLM planning (and confirmation arbitration).
    Plan,
    /// Destructive-plan review.
    Reflect,
    /// One tool step.
    Tool,
    /// Post-execution sanity checks.
    Verify,
    /// Reply synthesis (terminal).
    Respond,
}

/// Drive the graph to completion, mutating `state` in place.
///
/// On return, `state.response` is always set (the respond node guarantees
/// it, with fallback text when the LLM is unavailable).
#[instrument(skip_all, fields(trace_id = %state.trace_id, session_id = %state.session_id))]
pub async fn run(ctx: &GraphCtx, state: &mut AgentState) {
    let mut node = GraphNode::Plan;
    loop {
        debug!(node = ?node, status = ?state.status, "entering node");
        let update = match node {
            GraphNode::Plan => plan::run(ctx, state).await,
            GraphNode::Reflect => reflect::run(ctx, state).await,
            GraphNode::Tool => tool_step::run(ctx, state).await,
            GraphNode::Verify => verify::run(state),
            GraphNode::Respond => respond::run(ctx, state).await,
        };
        let leaving_respond = node == GraphNode::Respond;
        update.apply(state);
        if leaving_respond {
            break;
        }
        node = route_after(node, state, ctx);
    }
}

/// Pick the next node from the state left by `prev`.
fn route_after(prev: GraphNode, state: &AgentState, ctx: &GraphCtx) -> GraphNode {
    // Cancellation always terminates through respond.
    if ctx.cancel.is_cancelled() {
        return GraphNode::Respond;
    }

    match prev {
        GraphNode::Plan => {
            if state.status == AgentStatus::Error || state.error.is_some() {
                return GraphNode::Respond;
            }
            if state.status == AgentStatus::Completed || state.plan.is_empty() {
                return GraphNode::Respond;
            }
            if state.budget.exhausted() {
                return GraphNode::Respond;
            }
            // A plan restored by an explicit user approval skips reflection;
            // re-reviewing it would ask for confirmation forever.
            let approved = state
                .memory
                .get("confirmation")
                .and_then(serde_json::Value::as_str)
                == Some("approved");
            if !approved && reflect::requires_reflection(&state.plan, &ctx.registry) {
                return GraphNode::Reflect;
            }
            GraphNode::Tool
        }
        GraphNode::Reflect => {
            if state.status == AgentStatus::Error
                || state.status == AgentStatus::Completed
                || state.error.is_some()
            {
                // Either unsafe (error) or asking for confirmation.
                return GraphNode::Respond;
            }
            GraphNode::Tool
        }
        GraphNode::Tool => {
            if state.budget.exhausted() {
                return GraphNode::Respond;
            }
            if state.error.is_some() {
                if state.retry_count < MAX_REPLANS {
                    return GraphNode::Plan;
                }
                return GraphNode::Respond;
            }
            if state.steps_remaining() {
                return GraphNode::Tool;
            }
            GraphNode::Verify
        }
        GraphNode::Verify => GraphNode::Plan,
        GraphNode::Respond => GraphNode::Respond,
    }
}
