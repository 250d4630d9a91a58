//! Reflect node: LLM review of destructive or mass-mutation plans.
//!
//! A plan needs reflection when any step uses a tool flagged destructive in
//! its manifest, or when `task_update` targets several distinct entities in
//! one request. The review itself is a forced function call (structured
//! verdicts, no JSON-in-prose); if the review cannot be obtained, the plan
//! is conservatively sent to the user for confirmation.

use std::collections::BTreeSet;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::providers::router::TaskType;
use crate::providers::{ChatMessage, ChatOptions, ToolSpec};
use crate::tools::{ToolCall, ToolRegistry};

use super::graph::GraphCtx;
use super::state::{AgentState, AgentStatus, StateUpdate};

/// Distinct `task_update` targets in one plan that count as a mass mutation.
pub const MASS_UPDATE_THRESHOLD: usize = 3;

/// Whether a plan must route through reflection before execution.
pub fn requires_reflection(plan: &[ToolCall], registry: &ToolRegistry) -> bool {
    if plan.iter().any(|call| registry.is_destructive(&call.tool)) {
        return true;
    }
    let distinct_updates: BTreeSet<&str> = plan
        .iter()
        .filter(|call| call.tool == "task_update")
        .filter_map(|call| call.args.get("id").and_then(Value::as_str))
        .collect();
    distinct_updates.len() >= MASS_UPDATE_THRESHOLD
}

/// Entity IDs a plan touches, for the confirmation question.
fn affected_ids(plan: &[ToolCall]) -> Vec<String> {
    plan.iter()
        .filter_map(|call| call.args.get("id").and_then(Value::as_str))
        .map(ToOwned::to_owned)
        .collect()
}

fn review_tool_spec() -> ToolSpec {
    ToolSpec {
        name: "review_plan".to_owned(),
        description: "Record the safety verdict for the proposed plan.".to_owned(),
        parameters: json!({
            "type": "object",
            "properties": {
                "verdict": {
                    "type": "string",
                    "enum": ["safe", "unsafe", "needs_confirmation"],
                    "description": "safe: execute as-is; unsafe: fundamentally broken; \
                                    needs_confirmation: destructive, ask the user first."
                },
                "reason": {"type": "string", "description": "Why, in one sentence."},
                "question": {
                    "type": "string",
                    "description": "For needs_confirmation: the exact question to show the user, \
                                    listing every affected entity."
                }
            },
            "required": ["verdict"],
            "additionalProperties": false
        }),
    }
}

/// Build the default confirmation question listing affected entities.
fn default_question(plan: &[ToolCall]) -> String {
    let ids = affected_ids(plan);
    let verbs: BTreeSet<&str> = plan.iter().map(|c| c.tool.as_str()).collect();
    let action = if verbs.contains("task_delete") {
        "Подтверди удаление"
    } else {
        "Подтверди изменение"
    };
    if ids.is_empty() {
        format!("{action} ({} операций)? Ответь 'да' или 'нет'.", plan.len())
    } else {
        format!(
            "{action} {} объектов: {}? Ответь 'да' или 'нет'.",
            ids.len(),
            ids.join(", ")
        )
    }
}

/// Run the reflect node.
pub async fn run(ctx: &GraphCtx, state: &AgentState) -> StateUpdate {
    let plan_text = state
        .plan
        .iter()
        .enumerate()
        .map(|(i, call)| format!("{}. {} {}", i.saturating_add(1), call.tool, call.args))
        .collect::<Vec<_>>()
        .join("\n");

    let messages = vec![
        ChatMessage::system(
            "You review plans produced by an assistant before they touch the user's vault. \
             Mark a plan 'unsafe' only when it is fundamentally broken (missing required \
             arguments, nonsensical targets). Mark it 'needs_confirmation' when it deletes \
             or mass-mutates data. Otherwise mark it 'safe'. Respond via the review_plan tool.",
        ),
        ChatMessage::user(format!(
            "User request: {}\n\nProposed plan:\n{plan_text}",
            state.last_user_message().unwrap_or_default()
        )),
    ];

    let opts = ChatOptions {
        max_tokens: 1024,
        temperature: 0.0,
        timeout: std::time::Duration::from_secs(60),
        trace_id: Some(state.trace_id.clone()),
        ..ChatOptions::default()
    };

    let review = ctx
        .router
        .tool_call(
            TaskType::Structuring,
            &messages,
            &[review_tool_spec()],
            &opts,
        )
        .await;

    let (verdict, reason, question, tokens) = match review {
        Ok(response) => {
            let tokens = response.usage.map(|u| u.total()).unwrap_or(0);
            match response
                .tool_calls
                .iter()
                .find(|call| call.name == "review_plan")
            {
                Some(call) => (
                    call.arguments
                        .get("verdict")
                        .and_then(Value::as_str)
                        .unwrap_or("needs_confirmation")
                        .to_owned(),
                    call.arguments
                        .get("reason")
                        .and_then(Value::as_str)
                        .map(ToOwned::to_owned),
                    call.arguments
                        .get("question")
                        .and_then(Value::as_str)
                        .map(ToOwned::to_owned),
                    tokens,
                ),
                None => {
                    warn!(trace_id = %state.trace_id, "review returned no verdict, treating as needs_confirmation");
                    ("needs_confirmation".to_owned(), None, None, tokens)
                }
            }
        }
        Err(e) => {
            warn!(trace_id = %state.trace_id, error = %e, "reflection LLM call failed, treating as needs_confirmation");
            ("needs_confirmation".to_owned(), None, None, 0)
        }
    };

    debug!(trace_id = %state.trace_id, verdict = %verdict, "plan reviewed");

    match verdict.as_str() {
        "safe" => StateUpdate::new()
            .with_status(AgentStatus::Planned)
            .consume_budget(0, tokens),
        "unsafe" => StateUpdate::new()
            .with_plan(Vec::new())
            .with_status(AgentStatus::Error)
            .with_error(
                reason.unwrap_or_else(|| "the proposed plan was rejected as unsafe".to_owned()),
            )
            .consume_budget(0, tokens),
        _ => {
            let question = question
                .filter(|q| !q.trim().is_empty())
                .unwrap_or_else(|| default_question(&state.plan));
            StateUpdate::new()
                .with_plan(Vec::new())
                .with_status(AgentStatus::Completed)
                .with_pending(true, state.plan.clone(), question)
                .consume_budget(0, tokens)
        }
    }
}
