//! Plan node: turns the user request into tool calls via native function
//! calling, and arbitrates the multi-turn confirmation protocol.
//!
//! When a confirmation is pending, the latest user message is matched
//! against affirmative/negative patterns before any LLM call: approval
//! restores the saved plan, refusal abandons it, and anything else is
//! treated as a brand-new request (the pending state is explicitly cleared).

use std::sync::OnceLock;

use regex::Regex;
use serde_json::json;
use tracing::{debug, warn};

use crate::providers::{ChatMessage, ChatOptions, FinishReason};
use crate::providers::router::TaskType;
use crate::tools::ToolCall;

use super::graph::GraphCtx;
use super::state::{AgentState, AgentStatus, StateUpdate};

/// System prompt for the planner LLM call.
const PLANNER_SYSTEM_PROMPT: &str = "\
You are the planning module of Kira, a personal knowledge and task assistant.\n\
Decide which tools to call to fulfil the user's latest request.\n\
Rules:\n\
- Always call tools to retrieve data. Never answer from conversation history: \
it is context, not a source of facts.\n\
- When operations are independent, request them as parallel tool calls in one turn.\n\
- If the user is making casual conversation and no vault operation is needed, \
call no tools and reply naturally.\n\
- Use exactly the argument fields each tool schema declares.";

fn affirmative_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(да|ага|yes|yep|yeah|подтверждаю|confirm|confirmed|ok|okay|окей|давай|sure|go ahead|do it)[\s!.]*$",
        )
        .expect("static affirmative pattern is valid")
    })
}

fn negative_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*(нет|не надо|no|nope|отмена|отменить|cancel|stop|abort)[\s!.]*$")
            .expect("static negative pattern is valid")
    })
}

/// Whether a message approves the pending plan.
pub fn is_affirmative(text: &str) -> bool {
    affirmative_pattern().is_match(text)
}

/// Whether a message rejects the pending plan.
pub fn is_negative(text: &str) -> bool {
    negative_pattern().is_match(text)
}

/// Run the plan node.
pub async fn run(ctx: &GraphCtx, state: &AgentState) -> StateUpdate {
    // Confirmation short-circuit.
    if state.pending_confirmation && !state.pending_plan.is_empty() {
        let last = state.last_user_message().unwrap_or_default().to_owned();
        if is_affirmative(&last) {
            debug!(session = %state.session_id, "confirmation approved, restoring plan");
            return StateUpdate::new()
                .with_plan(state.pending_plan.clone())
                .with_current_step(0)
                .with_status(AgentStatus::Planned)
                .with_memory("confirmation", json!("approved"))
                .clear_pending();
        }
        if is_negative(&last) {
            debug!(session = %state.session_id, "confirmation declined, abandoning plan");
            // The acknowledgement doubles as the reply; declining is a
            // legitimate no-op, not a hallucination risk.
            return StateUpdate::new()
                .with_plan(Vec::new())
                .with_status(AgentStatus::Completed)
                .with_memory("confirmation", json!("declined"))
                .with_memory("planner_reply", json!("Отменил — ничего не изменено."))
                .clear_pending();
        }
        // Anything else: a new request. The pending state must be cleared
        // explicitly so it does not leak into this execution.
        debug!(session = %state.session_id, "pending confirmation superseded by new request");
    }

    plan_with_llm(ctx, state).await.clear_pending()
}

/// Ordinary planning via the LLM's native function calling.
async fn plan_with_llm(ctx: &GraphCtx, state: &AgentState) -> StateUpdate {
    let mut messages = vec![ChatMessage::system(PLANNER_SYSTEM_PROMPT)];
    if ctx.clarifications {
        messages.push(ChatMessage::system(
            "If the request is ambiguous, do not guess: call no tools and ask \
             one short clarifying question instead.",
        ));
    }

    // Surface verification or tool failures from the previous cycle so the
    // model can replan around them.
    if let Some(ref error) = state.error {
        messages.push(ChatMessage::system(format!(
            "The previous step failed: {error}. Adjust the plan or finish with no tool calls."
        )));
    }
    if !state.tool_results.is_empty() {
        let summary = state
            .tool_results
            .iter()
            .map(|r| {
                let marker = if r.is_error() { "error" } else { "ok" };
                format!(
                    "- {} [{marker}] {}",
                    r.tool,
                    r.error.as_deref().unwrap_or("")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        messages.push(ChatMessage::system(format!(
            "Tools already executed this request:\n{summary}\n\
             Plan only the remaining work; finish with no tool calls if done."
        )));
    }
    messages.extend(state.messages.iter().cloned());

    let tools = ctx.registry.to_api_format();
    let opts = ChatOptions {
        max_tokens: ctx.agent_config.max_tokens,
        temperature: ctx.agent_config.temperature,
        timeout: std::time::Duration::from_secs(60),
        trace_id: Some(state.trace_id.clone()),
        ..ChatOptions::default()
    };

    let response = match ctx
        .router
        .tool_call(TaskType::Planning, &messages, &tools, &opts)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            warn!(trace_id = %state.trace_id, error = %e, "planner LLM call failed");
            return StateUpdate::new()
                .with_status(AgentStatus::Error)
                .with_error(format!("planning failed: {e}"));
        }
    };

    let tokens = response.usage.map(|u| u.total()).unwrap_or(0);

    if response.tool_calls.is_empty() {
        // Casual conversation or nothing left to do.
        let mut update = StateUpdate::new()
            .with_plan(Vec::new())
            .with_status(AgentStatus::Completed)
            .with_memory("confirmation", json!("none"))
            .consume_budget(0, tokens);
        if !response.content.trim().is_empty() {
            update = update.with_memory("planner_reply", json!(response.content));
        }
        return update;
    }

    if response.finish_reason == FinishReason::MaxTokens {
        warn!(trace_id = %state.trace_id, "planner response truncated at token limit");
    }

    let plan: Vec<ToolCall> = response
        .tool_calls
        .into_iter()
        .map(|call| ToolCall {
            tool: call.name,
            args: call.arguments,
            dry_run: ctx.dry_run,
        })
        .collect();

    debug!(
        trace_id = %state.trace_id,
        steps = plan.len(),
        "plan produced"
    );

    // A freshly planned set of calls is never pre-approved, even when an
    // approval happened earlier in this same execution.
    let mut update = StateUpdate::new()
        .with_plan(plan)
        .with_current_step(0)
        .with_status(AgentStatus::Planned)
        .with_memory("confirmation", json!("none"))
        .consume_budget(0, tokens);
    if !response.content.trim().is_empty() {
        update = update.with_memory("reasoning", json!(response.content));
    }
    update
}
