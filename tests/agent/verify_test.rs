//! Verify-node sanity checks and reflection-policy tests.

use serde_json::json;

use kira::agent::budget::Budget;
use kira::agent::reflect::{requires_reflection, MASS_UPDATE_THRESHOLD};
use kira::agent::{verify, AgentState};
use kira::providers::ChatMessage;
use kira::tools::{ToolCall, ToolRegistry, ToolResult};

use crate::support::{host_fixture, registry_for};

fn state_with_results(results: Vec<ToolResult>) -> AgentState {
    let mut state = AgentState::new(
        "trace-v",
        "cli:v",
        "tester",
        vec![ChatMessage::user("go")],
        Budget::new(10, 100_000),
    );
    state.tool_results = results;
    state
}

fn call(tool: &str, args: serde_json::Value) -> ToolCall {
    ToolCall {
        tool: tool.to_owned(),
        args,
        dry_run: false,
    }
}

// -- verify node -----------------------------------------------------------

#[test]
fn clean_results_pass_verification() {
    let state = state_with_results(vec![
        ToolResult::ok("task_create", json!({"id": "task-20250301-0910-a"})),
        ToolResult::ok("task_list", json!({"count": 2})),
    ]);
    let mut verified = state.clone();
    verify::run(&state).apply(&mut verified);
    assert!(verified.error.is_none());
}

#[test]
fn malformed_id_in_results_sets_error() {
    let state = state_with_results(vec![ToolResult::ok(
        "task_create",
        json!({"id": "not-a-valid-id"}),
    )]);
    let mut verified = state.clone();
    verify::run(&state).apply(&mut verified);
    let error = verified.error.expect("violation");
    assert!(error.contains("malformed entity id"));
}

#[test]
fn duplicate_created_id_sets_error() {
    let state = state_with_results(vec![
        ToolResult::ok("task_create", json!({"id": "task-20250301-0910-a"})),
        ToolResult::ok("task_create", json!({"id": "task-20250301-0910-a"})),
    ]);
    let mut verified = state.clone();
    verify::run(&state).apply(&mut verified);
    let error = verified.error.expect("violation");
    assert!(error.contains("created twice"));
}

#[test]
fn error_results_are_not_id_checked() {
    // A failed tool reports no usable data; verification must not flag it.
    let state = state_with_results(vec![ToolResult::error("task_create", "boom")]);
    let mut verified = state.clone();
    verify::run(&state).apply(&mut verified);
    assert!(verified.error.is_none());
}

// -- reflection policy -----------------------------------------------------

async fn real_registry() -> std::sync::Arc<ToolRegistry> {
    let fixture = host_fixture().await;
    registry_for(&fixture.host, &fixture.bus)
}

#[tokio::test]
async fn any_task_delete_requires_reflection() {
    let registry = real_registry().await;
    let plan = vec![call("task_delete", json!({"id": "task-20250301-0910-a"}))];
    assert!(requires_reflection(&plan, &registry));
}

#[tokio::test]
async fn single_update_does_not_require_reflection() {
    let registry = real_registry().await;
    let plan = vec![call(
        "task_update",
        json!({"id": "task-20250301-0910-a", "status": "done"}),
    )];
    assert!(!requires_reflection(&plan, &registry));
}

#[tokio::test]
async fn mass_update_requires_reflection() {
    let registry = real_registry().await;
    let plan: Vec<ToolCall> = (0..MASS_UPDATE_THRESHOLD)
        .map(|n| {
            call(
                "task_update",
                json!({"id": format!("task-20250301-091{n}-t{n}"), "status": "done"}),
            )
        })
        .collect();
    assert!(requires_reflection(&plan, &registry));
}

#[tokio::test]
async fn repeated_updates_to_one_entity_do_not_count_as_mass() {
    let registry = real_registry().await;
    let plan: Vec<ToolCall> = (0..5)
        .map(|_| call("task_update", json!({"id": "task-20250301-0910-same"})))
        .collect();
    assert!(!requires_reflection(&plan, &registry));
}

#[tokio::test]
async fn read_only_plans_never_require_reflection() {
    let registry = real_registry().await;
    let plan = vec![
        call("task_list", json!({})),
        call("task_get", json!({"id": "task-20250301-0910-a"})),
    ];
    assert!(!requires_reflection(&plan, &registry));
}
