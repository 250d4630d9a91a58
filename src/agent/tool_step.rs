//! Tool node: executes one step of the plan.
//!
//! Arguments are validated against the tool's JSON schema before execution;
//! the progress callback fires first (its failures are swallowed); execution
//! runs under the per-tool timeout and observes the request's cancellation
//! token. Failures become `ToolResult` errors — they are never raised past
//! this node.

use serde_json::Value;
use tracing::{debug, warn};

use crate::tools::ToolResult;

use super::graph::GraphCtx;
use super::state::{AgentState, AgentStatus, StateUpdate};

/// Human-readable progress line for a step.
pub fn status_text(tool: &str, args: &Value) -> String {
    let detail = args
        .get("title")
        .or_else(|| args.get("id"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    if detail.is_empty() {
        format!("Running {tool}…")
    } else {
        format!("Running {tool} ({detail})…")
    }
}

/// Run the tool node on the step at `current_step`.
pub async fn run(ctx: &GraphCtx, state: &AgentState) -> StateUpdate {
    let Some(step) = state.plan.get(state.current_step) else {
        // The router only enters this node with steps remaining; reaching
        // here means the plan shrank underneath us.
        return StateUpdate::new()
            .with_status(AgentStatus::Error)
            .with_error("internal: tool node entered with no remaining steps");
    };

    if let Some(progress) = &ctx.progress {
        progress(status_text(&step.tool, &step.args));
    }

    let result = execute_step(ctx, state, &step.tool, &step.args, step.dry_run).await;
    let next_step = state.current_step.saturating_add(1);

    let mut update = StateUpdate::new()
        .with_current_step(next_step)
        .with_status(AgentStatus::Executing)
        .consume_budget(1, 0);

    if result.is_error() {
        let message = result
            .error
            .clone()
            .unwrap_or_else(|| "tool failed".to_owned());
        warn!(
            trace_id = %state.trace_id,
            tool = %result.tool,
            error = %message,
            "tool step failed"
        );
        update = update
            .with_error(format!("{}: {message}", result.tool))
            .with_retry_count(state.retry_count.saturating_add(1));
    } else {
        debug!(trace_id = %state.trace_id, tool = %result.tool, "tool step succeeded");
    }

    update.push_tool_result(result)
}

async fn execute_step(
    ctx: &GraphCtx,
    state: &AgentState,
    tool_name: &str,
    args: &Value,
    dry_run: bool,
) -> ToolResult {
    if ctx.cancel.is_cancelled() {
        return ToolResult::error(tool_name, "request cancelled");
    }

    let Some(tool) = ctx.registry.get(tool_name) else {
        return ToolResult::error(tool_name, format!("unknown tool: {tool_name}"));
    };

    let violations = ctx.registry.validate_args(tool_name, args);
    if !violations.is_empty() {
        return ToolResult::error(
            tool_name,
            format!("invalid arguments: {}", violations.join("; ")),
        );
    }

    let timeout = std::time::Duration::from_secs(ctx.agent_config.tool_timeout_secs);
    let dry_run = dry_run || ctx.dry_run;

    tokio::select! {
        () = ctx.cancel.cancelled() => ToolResult::error(tool_name, "request cancelled"),
        outcome = tokio::time::timeout(timeout, tool.execute(args, dry_run)) => {
            match outcome {
                Ok(result) => result,
                Err(_) => ToolResult::error(
                    tool_name,
                    format!("tool timed out after {}s", timeout.as_secs()),
                ),
            }
        }
    }
}
