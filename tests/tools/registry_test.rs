//! Tool registry and schema export tests.

use serde_json::json;

use crate::support::{host_fixture, registry_for};

#[tokio::test]
async fn canonical_tool_set_is_registered() {
    let fixture = host_fixture().await;
    let registry = registry_for(&fixture.host, &fixture.bus);

    assert_eq!(
        registry.names(),
        vec![
            "inbox_normalize".to_owned(),
            "note_create".to_owned(),
            "rollup_daily".to_owned(),
            "task_create".to_owned(),
            "task_delete".to_owned(),
            "task_get".to_owned(),
            "task_list".to_owned(),
            "task_update".to_owned(),
        ]
    );
}

#[tokio::test]
async fn only_task_delete_is_destructive() {
    let fixture = host_fixture().await;
    let registry = registry_for(&fixture.host, &fixture.bus);

    assert!(registry.is_destructive("task_delete"));
    for name in [
        "task_list",
        "task_get",
        "task_create",
        "task_update",
        "note_create",
        "rollup_daily",
        "inbox_normalize",
    ] {
        assert!(!registry.is_destructive(name), "{name} must not be destructive");
    }
    assert!(!registry.is_destructive("no_such_tool"));
}

#[tokio::test]
async fn to_api_format_exports_every_tool_schema() {
    let fixture = host_fixture().await;
    let registry = registry_for(&fixture.host, &fixture.bus);

    let specs = registry.to_api_format();
    assert_eq!(specs.len(), registry.len());
    for spec in &specs {
        assert!(!spec.description.is_empty());
        assert_eq!(
            spec.parameters.get("type"),
            Some(&json!("object")),
            "{} schema must be an object schema",
            spec.name
        );
    }
}

#[tokio::test]
async fn validate_args_reports_schema_violations() {
    let fixture = host_fixture().await;
    let registry = registry_for(&fixture.host, &fixture.bus);

    assert!(registry
        .validate_args("task_create", &json!({"title": "ok"}))
        .is_empty());
    assert!(!registry
        .validate_args("task_create", &json!({}))
        .is_empty());
    assert!(!registry
        .validate_args("task_create", &json!({"title": "x", "bogus": 1}))
        .is_empty());
    assert!(!registry
        .validate_args("task_update", &json!({"id": "x", "status": "paused"}))
        .is_empty());
    assert_eq!(
        registry.validate_args("nonexistent", &json!({})),
        vec!["unknown tool: nonexistent".to_owned()]
    );
}
