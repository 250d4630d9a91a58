//! Graph routing tests driven through the executor with a scripted LLM.

use serde_json::json;

use kira::agent::ExecuteRequest;
use kira::host::{EntityFilter, EntityKind};
use kira::providers::ProviderError;

use crate::support::{agent_fixture, Scripted};

fn request(message: &str, session: &str) -> ExecuteRequest {
    ExecuteRequest {
        message: message.to_owned(),
        session_id: session.to_owned(),
        trace_id: format!("test-{session}"),
        user: "tester".to_owned(),
        progress: None,
        dry_run: false,
    }
}

#[tokio::test]
async fn zero_tool_calls_terminates_with_conversational_reply() {
    let fixture = agent_fixture(vec![Scripted::Text("Привет! Чем помочь?")]).await;

    let result = fixture
        .executor
        .execute(request("привет", "s-chat"))
        .await
        .expect("execute");

    assert_eq!(result.status, "completed");
    assert_eq!(result.response, "Привет! Чем помочь?");
    assert!(result.results.is_empty());
}

#[tokio::test]
async fn single_tool_plan_executes_and_synthesizes() {
    let fixture = agent_fixture(vec![
        // plan: create one task
        Scripted::ToolCalls(vec![("task_create", json!({"title": "Buy milk"}))]),
        // follow-up plan after verify: nothing left
        Scripted::Text(""),
        // respond synthesis
        Scripted::Text("Создал задачу Buy milk."),
    ])
    .await;

    let result = fixture
        .executor
        .execute(request("Create task 'Buy milk'", "s-create"))
        .await
        .expect("execute");

    assert_eq!(result.status, "completed");
    assert_eq!(result.results.len(), 1);
    assert!(!result.results[0].is_error());

    let tasks: Vec<_> = fixture
        .host
        .list_entities(&EntityKind::Task, &EntityFilter::default())
        .collect();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title(), "Buy milk");
}

#[tokio::test]
async fn destructive_plan_routes_through_reflection() {
    let fixture = agent_fixture(vec![
        // plan: delete a task -> requires reflection
        Scripted::ToolCalls(vec![(
            "task_delete",
            json!({"id": "task-20250301-0910-doomed"}),
        )]),
        // reflect verdict: needs confirmation
        Scripted::ToolCalls(vec![(
            "review_plan",
            json!({
                "verdict": "needs_confirmation",
                "question": "Подтверди удаление task-20250301-0910-doomed?"
            }),
        )]),
        // respond: returns the question verbatim without an LLM call,
        // so no further script entries are needed.
    ])
    .await;

    let result = fixture
        .executor
        .execute(request("delete the doomed task", "s-destroy"))
        .await
        .expect("execute");

    assert_eq!(result.status, "completed");
    assert!(result.response.contains("Подтверди удаление"));
    // Nothing was executed.
    assert!(result.results.is_empty());
}

#[tokio::test]
async fn unsafe_verdict_yields_error_reply() {
    let fixture = agent_fixture(vec![
        Scripted::ToolCalls(vec![("task_delete", json!({}))]),
        Scripted::ToolCalls(vec![(
            "review_plan",
            json!({"verdict": "unsafe", "reason": "missing required id"}),
        )]),
        // respond synthesis over the error
        Scripted::Text("Не могу выполнить: в плане нет id."),
    ])
    .await;

    let result = fixture
        .executor
        .execute(request("delete something", "s-unsafe"))
        .await
        .expect("execute");

    assert_eq!(result.status, "error");
    assert!(!result.response.is_empty());
    assert!(result.results.is_empty());
}

#[tokio::test]
async fn tool_failure_replans_then_reports_honestly() {
    let fixture = agent_fixture(vec![
        // plan: get a task that does not exist
        Scripted::ToolCalls(vec![("task_get", json!({"id": "task-20250101-0000-ghost"}))]),
        // replan after the failure: try again with the same ghost id
        Scripted::ToolCalls(vec![("task_get", json!({"id": "task-20250101-0000-ghost"}))]),
        // replan after second failure is not consulted: retries exhausted,
        // so this entry feeds the respond synthesis instead.
        Scripted::Text("Не нашёл такую задачу."),
    ])
    .await;

    let result = fixture
        .executor
        .execute(request("show the ghost task", "s-ghost"))
        .await
        .expect("execute");

    assert_eq!(result.status, "error");
    assert_eq!(result.results.len(), 2);
    assert!(result.results.iter().all(|r| r.is_error()));
    assert_eq!(result.response, "Не нашёл такую задачу.");
}

#[tokio::test]
async fn planner_llm_failure_produces_error_reply() {
    let fixture = agent_fixture(vec![
        Scripted::Fail(ProviderError::InvalidRequest("schema rejected".to_owned())),
        // respond synthesis also fails: the deterministic fallback is used.
        Scripted::Fail(ProviderError::InvalidRequest("schema rejected".to_owned())),
    ])
    .await;

    let result = fixture
        .executor
        .execute(request("do something", "s-llmfail"))
        .await
        .expect("execute");

    assert_eq!(result.status, "error");
    assert!(result.response.contains("could not be completed"));
}

#[tokio::test]
async fn unknown_tool_in_plan_fails_validation() {
    let fixture = agent_fixture(vec![
        Scripted::ToolCalls(vec![("task_teleport", json!({"id": "x"}))]),
        // replan gives up
        Scripted::ToolCalls(vec![("task_teleport", json!({"id": "x"}))]),
        Scripted::Text("Такой операции нет."),
    ])
    .await;

    let result = fixture
        .executor
        .execute(request("teleport the task", "s-unknown"))
        .await
        .expect("execute");

    assert_eq!(result.status, "error");
    assert!(result.results.iter().all(|r| r.is_error()));
}

#[tokio::test]
async fn invalid_arguments_are_rejected_before_execution() {
    let fixture = agent_fixture(vec![
        // title is required by task_create's schema
        Scripted::ToolCalls(vec![("task_create", json!({"status": "todo"}))]),
        Scripted::ToolCalls(vec![]),
        Scripted::Text("Не хватает названия задачи."),
    ])
    .await;

    let result = fixture
        .executor
        .execute(request("create an untitled task", "s-badargs"))
        .await
        .expect("execute");

    assert_eq!(result.results.len(), 1);
    assert!(result.results[0].is_error());
    assert!(result.results[0]
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("invalid arguments"));
}

#[tokio::test]
async fn concurrent_requests_to_same_session_serialize() {
    let fixture = agent_fixture(vec![
        Scripted::Text("first done"),
        Scripted::Text("second done"),
    ])
    .await;

    let executor_a = std::sync::Arc::clone(&fixture.executor);
    let executor_b = std::sync::Arc::clone(&fixture.executor);
    let a = tokio::spawn(async move { executor_a.execute(request("one", "s-serial")).await });
    let b = tokio::spawn(async move { executor_b.execute(request("two", "s-serial")).await });

    let ra = a.await.expect("join a").expect("a runs");
    let rb = b.await.expect("join b").expect("b runs");
    // Both complete; the per-session lock queues rather than rejects.
    assert_eq!(ra.status, "completed");
    assert_eq!(rb.status, "completed");
}
