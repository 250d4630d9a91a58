//! Respond node: produces the user-visible reply. Always terminal, never
//! silent.
//!
//! Three paths:
//! 1. A pending confirmation returns its question verbatim — and re-emits
//!    the confirmation trio so it survives the graph exit (see
//!    [`StateUpdate::preserve_pending`]).
//! 2. The planner answered a conversational request directly (no tools, no
//!    error): its reply is used as-is.
//! 3. Otherwise the reply is synthesized by the LLM from the execution
//!    results under a strict honesty contract; when no tools ran and no
//!    error exists, an error is forced first — an LLM must never "fill in
//!    the blanks" from conversation history.

use serde_json::Value;
use tracing::warn;

use crate::providers::router::TaskType;
use crate::providers::{ChatMessage, ChatOptions};
use crate::tools::ToolResult;

use super::graph::GraphCtx;
use super::state::{AgentState, AgentStatus, StateUpdate};

/// Honesty contract injected into every synthesis call.
const HONESTY_SYSTEM_PROMPT: &str = "\
You are Kira, a personal knowledge and task assistant. Write the reply to the \
user based ONLY on the execution results below.\n\
Hard rules:\n\
- If any tool result has status=error, you MUST NOT claim success; state \
plainly what failed and why.\n\
- Never fabricate data that is not present in the execution results.\n\
- Conversation history is for context, not facts.\n\
- Answer in the user's language, concisely.";

/// Fallback reply when even the synthesis LLM call fails.
const FALLBACK_REPLY: &str =
    "I could not produce a full reply, and no changes beyond the listed results were made.";

/// Run the respond node.
pub async fn run(ctx: &GraphCtx, state: &AgentState) -> StateUpdate {
    // Path 1: pending confirmation — return the question verbatim and carry
    // the trio across the graph exit.
    if state.pending_confirmation && !state.confirmation_question.is_empty() {
        return StateUpdate::new()
            .with_response(state.confirmation_question.clone())
            .with_status(AgentStatus::Completed)
            .preserve_pending(state);
    }

    // Path 2: the planner already answered a conversational request.
    if state.tool_results.is_empty() && state.error.is_none() {
        if let Some(reply) = state
            .memory
            .get("planner_reply")
            .and_then(Value::as_str)
            .filter(|r| !r.trim().is_empty())
        {
            return StateUpdate::new()
                .with_response(reply.to_owned())
                .with_status(AgentStatus::Completed);
        }
    }

    // Hallucination guard: nothing ran and nothing failed, yet we are asked
    // to reply about an operation. Force an honest error.
    let effective_error = if state.tool_results.is_empty() && state.error.is_none() {
        Some("no operation was performed".to_owned())
    } else {
        state.error.clone()
    };

    let results_block = render_results(&state.tool_results, effective_error.as_deref());
    let user_request = state.last_user_message().unwrap_or_default();

    let messages = vec![
        ChatMessage::system(HONESTY_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "User request:\n{user_request}\n\nExecution results:\n{results_block}"
        )),
    ];

    let opts = ChatOptions {
        max_tokens: ctx.agent_config.max_tokens,
        temperature: ctx.agent_config.temperature,
        timeout: std::time::Duration::from_secs(30),
        trace_id: Some(state.trace_id.clone()),
        ..ChatOptions::default()
    };

    let (reply, tokens) = match ctx.router.chat(TaskType::Default, &messages, &opts).await {
        Ok(response) if !response.content.trim().is_empty() => {
            let tokens = response.usage.map(|u| u.total()).unwrap_or(0);
            (response.content, tokens)
        }
        Ok(response) => {
            let tokens = response.usage.map(|u| u.total()).unwrap_or(0);
            (fallback_reply(&state.tool_results, effective_error.as_deref()), tokens)
        }
        Err(e) => {
            warn!(trace_id = %state.trace_id, error = %e, "reply synthesis failed, using fallback");
            (fallback_reply(&state.tool_results, effective_error.as_deref()), 0)
        }
    };

    let status = if effective_error.is_some() {
        AgentStatus::Error
    } else {
        AgentStatus::Completed
    };

    StateUpdate::new()
        .with_response(reply)
        .with_status(status)
        .consume_budget(0, tokens)
}

/// Render execution results with explicit success/failure markers.
fn render_results(results: &[ToolResult], error: Option<&str>) -> String {
    let mut out = String::new();
    for result in results {
        if result.is_error() {
            out.push_str(&format!(
                "❌ {} — {}\n",
                result.tool,
                result.error.as_deref().unwrap_or("failed")
            ));
        } else {
            out.push_str(&format!("✅ {} — {}\n", result.tool, result.data));
        }
    }
    if let Some(error) = error {
        out.push_str(&format!("❌ error — {error}\n"));
    }
    if out.is_empty() {
        out.push_str("(no tools were executed)\n");
    }
    out
}

/// Deterministic reply used when the synthesis LLM is unavailable.
fn fallback_reply(results: &[ToolResult], error: Option<&str>) -> String {
    if let Some(error) = error {
        return format!("The request could not be completed: {error}.");
    }
    let ok = results.iter().filter(|r| !r.is_error()).count();
    let failed = results.len().saturating_sub(ok);
    if failed > 0 {
        format!(
            "{ok} operation(s) succeeded and {failed} failed. {FALLBACK_REPLY}"
        )
    } else if ok > 0 {
        format!("{ok} operation(s) completed. {FALLBACK_REPLY}")
    } else {
        FALLBACK_REPLY.to_owned()
    }
}
