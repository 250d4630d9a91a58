//! Host API write-pipeline tests over a real temp vault.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use kira::bus::SubscribeOptions;
use kira::config::FeatureFlags;
use kira::host::fsm::TaskState;
use kira::host::{EntityFilter, EntityKind, EntityPatch, HostError};

use crate::support::{host_fixture, host_fixture_with_features, HostFixture};

fn task_data(title: &str) -> BTreeMap<String, Value> {
    let mut data = BTreeMap::new();
    data.insert("title".to_owned(), json!(title));
    data
}

/// Collect event types delivered on the bus.
fn collect_events(fixture: &HostFixture) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    fixture.bus.subscribe(
        "entity",
        Arc::new(move |envelope| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().expect("events lock").push(envelope.event_type);
                Ok(())
            })
        }),
        SubscribeOptions::default(),
    );
    seen
}

#[tokio::test]
async fn create_assigns_id_defaults_and_emits_event() {
    let fixture = host_fixture().await;
    let events = collect_events(&fixture);

    let entity = fixture
        .host
        .create_entity(&EntityKind::Task, task_data("Buy milk"), "body\n", Some("t1"))
        .await
        .expect("create");

    assert!(entity.id.starts_with("task-"));
    assert!(entity.id.ends_with("-buy-milk"));
    assert_eq!(entity.metadata.get("status"), Some(&json!("todo")));
    assert_eq!(entity.metadata.get("tags"), Some(&json!([])));
    assert!(entity.metadata.contains_key("created_ts"));
    assert!(entity.metadata.contains_key("updated_ts"));
    assert!(entity.path.ends_with(format!("tasks/{}.md", entity.id)));
    assert!(entity.path.is_file());

    assert_eq!(
        *events.lock().expect("events lock"),
        vec!["entity.created".to_owned()]
    );
}

#[tokio::test]
async fn create_rejects_missing_title() {
    let fixture = host_fixture().await;
    let err = fixture
        .host
        .create_entity(&EntityKind::Task, BTreeMap::new(), "", None)
        .await
        .expect_err("must fail");
    assert!(matches!(err, HostError::Validation { .. }));
}

#[tokio::test]
async fn create_with_explicit_duplicate_id_fails() {
    let fixture = host_fixture().await;
    let first = fixture
        .host
        .create_entity(&EntityKind::Task, task_data("One"), "", None)
        .await
        .expect("create");

    let mut data = task_data("Two");
    data.insert("id".to_owned(), json!(first.id));
    let err = fixture
        .host
        .create_entity(&EntityKind::Task, data, "", None)
        .await
        .expect_err("duplicate id must fail");
    assert!(matches!(err, HostError::DuplicateId { .. }));
}

#[tokio::test]
async fn same_minute_same_title_gets_suffix() {
    let fixture = host_fixture().await;
    let a = fixture
        .host
        .create_entity(&EntityKind::Task, task_data("Same"), "", None)
        .await
        .expect("create a");
    let b = fixture
        .host
        .create_entity(&EntityKind::Task, task_data("Same"), "", None)
        .await
        .expect("create b");
    assert_ne!(a.id, b.id);
    assert!(fixture.host.read_entity(&a.id).is_ok());
    assert!(fixture.host.read_entity(&b.id).is_ok());
}

#[tokio::test]
async fn read_round_trips_create() {
    let fixture = host_fixture().await;
    let created = fixture
        .host
        .create_entity(&EntityKind::Task, task_data("Read me"), "the body\n", None)
        .await
        .expect("create");

    let read = fixture.host.read_entity(&created.id).expect("read");
    assert_eq!(read, created);
}

#[tokio::test]
async fn update_respects_fsm_guard() {
    let fixture = host_fixture().await;
    let events = collect_events(&fixture);
    let task = fixture
        .host
        .create_entity(&EntityKind::Task, task_data("Guarded"), "", None)
        .await
        .expect("create");

    // todo -> doing without assignee/start_ts is rejected; file unchanged.
    let mut patch = EntityPatch::default();
    patch.metadata.insert("status".to_owned(), json!("doing"));
    let err = fixture
        .host
        .update_entity(&task.id, patch, None)
        .await
        .expect_err("guard must fire");
    assert!(matches!(err, HostError::FsmGuard(_)));
    let unchanged = fixture.host.read_entity(&task.id).expect("read");
    assert_eq!(unchanged.task_state(), Some(TaskState::Todo));

    // With an assignee the transition commits and emits task.enter_doing.
    let mut patch = EntityPatch::default();
    patch.metadata.insert("status".to_owned(), json!("doing"));
    patch.metadata.insert("assignee".to_owned(), json!("irene"));
    fixture
        .host
        .update_entity(&task.id, patch, None)
        .await
        .expect("guarded transition");

    // Subscribe to the task prefix too late for enter_doing; assert through
    // a full listing instead.
    let doing: Vec<_> = fixture
        .host
        .list_entities(
            &EntityKind::Task,
            &EntityFilter {
                state: Some(TaskState::Doing),
                ..EntityFilter::default()
            },
        )
        .collect();
    assert_eq!(doing.len(), 1);
    assert!(events
        .lock()
        .expect("events lock")
        .contains(&"entity.updated".to_owned()));
}

#[tokio::test]
async fn doing_to_done_stamps_done_ts_and_freezes_estimate() {
    let fixture = host_fixture().await;
    let mut data = task_data("Finish");
    data.insert("status".to_owned(), json!("doing"));
    data.insert("estimate".to_owned(), json!("2h"));
    let task = fixture
        .host
        .create_entity(&EntityKind::Task, data, "", None)
        .await
        .expect("create");

    let mut patch = EntityPatch::default();
    patch.metadata.insert("status".to_owned(), json!("done"));
    let done = fixture
        .host
        .update_entity(&task.id, patch, None)
        .await
        .expect("finish");
    assert!(done.metadata.contains_key("done_ts"));
    assert_eq!(done.metadata.get("estimate_frozen"), Some(&json!(true)));

    // Frozen estimate rejects further edits.
    let mut patch = EntityPatch::default();
    patch.metadata.insert("estimate".to_owned(), json!("4h"));
    let err = fixture
        .host
        .update_entity(&task.id, patch, None)
        .await
        .expect_err("frozen estimate");
    assert!(matches!(err, HostError::Validation { .. }));
}

#[tokio::test]
async fn update_maintains_link_graph() {
    let fixture = host_fixture().await;
    let target = fixture
        .host
        .create_entity(&EntityKind::Note, task_data("Target"), "", None)
        .await
        .expect("create target");
    let source = fixture
        .host
        .create_entity(&EntityKind::Note, task_data("Source"), "", None)
        .await
        .expect("create source");

    let mut patch = EntityPatch {
        content: Some(format!("see [[{}]]\n", target.id)),
        ..EntityPatch::default()
    };
    patch.metadata.insert("links".to_owned(), json!([target.id]));
    fixture
        .host
        .update_entity(&source.id, patch, None)
        .await
        .expect("link update");

    assert_eq!(fixture.host.links().backlinks(&target.id), vec![source.id.clone()]);

    // Dropping the links clears the backlink.
    let mut patch = EntityPatch {
        content: Some("no links\n".to_owned()),
        ..EntityPatch::default()
    };
    patch.metadata.insert("links".to_owned(), json!([]));
    fixture
        .host
        .update_entity(&source.id, patch, None)
        .await
        .expect("unlink update");
    assert!(fixture.host.links().backlinks(&target.id).is_empty());
}

#[tokio::test]
async fn delete_removes_file_links_and_emits_event() {
    let fixture = host_fixture().await;
    let events = collect_events(&fixture);
    let task = fixture
        .host
        .create_entity(&EntityKind::Task, task_data("Doomed"), "", None)
        .await
        .expect("create");
    let path = task.path.clone();

    fixture
        .host
        .delete_entity(&task.id, None)
        .await
        .expect("delete");

    assert!(!path.exists());
    assert!(matches!(
        fixture.host.read_entity(&task.id),
        Err(HostError::NotFound { .. })
    ));
    assert_eq!(
        *events.lock().expect("events lock"),
        vec!["entity.created".to_owned(), "entity.deleted".to_owned()]
    );
}

#[tokio::test]
async fn upsert_with_idempotency_key_returns_existing() {
    let fixture = host_fixture().await;

    let (first, created_first) = fixture
        .host
        .upsert_entity(
            None,
            &EntityKind::Note,
            task_data("Once"),
            "body\n",
            Some("key-1"),
            None,
        )
        .await
        .expect("first upsert");
    assert!(created_first);

    let (second, created_second) = fixture
        .host
        .upsert_entity(
            None,
            &EntityKind::Note,
            task_data("Once again"),
            "other body\n",
            Some("key-1"),
            None,
        )
        .await
        .expect("second upsert");
    assert!(!created_second);
    assert_eq!(second.id, first.id);
    // The second call did not rewrite the entity.
    assert_eq!(second.title(), "Once");
}

#[tokio::test]
async fn upsert_updates_existing_id() {
    let fixture = host_fixture().await;
    let original = fixture
        .host
        .create_entity(&EntityKind::Note, task_data("v1"), "", None)
        .await
        .expect("create");

    let (updated, created) = fixture
        .host
        .upsert_entity(
            Some(&original.id),
            &EntityKind::Note,
            task_data("v2"),
            "new body\n",
            None,
            None,
        )
        .await
        .expect("upsert over existing");
    assert!(!created);
    assert_eq!(updated.id, original.id);
    assert_eq!(updated.title(), "v2");
}

#[tokio::test]
async fn alias_resolves_after_direct_miss() {
    let fixture = host_fixture().await;
    let real = fixture
        .host
        .create_entity(&EntityKind::Task, task_data("Aliased"), "", None)
        .await
        .expect("create");

    // Write the alias file and rebuild the host over the same vault so the
    // alias map is loaded.
    let kira_dir = fixture.host.vault_root().join(".kira");
    std::fs::create_dir_all(&kira_dir).expect("mkdir .kira");
    std::fs::write(
        kira_dir.join("aliases.json"),
        serde_json::to_string(&json!({"task-20200101-0000-old": real.id})).expect("aliases"),
    )
    .expect("write aliases");

    let rebuilt = crate::support::host_fixture_at(fixture.host.vault_root()).await;
    let via_alias = rebuilt
        .host
        .read_entity("task-20200101-0000-old")
        .expect("alias resolves");
    assert_eq!(via_alias.id, real.id);
}

#[tokio::test]
async fn timeboxing_creates_event_on_enter_doing() {
    let fixture = host_fixture_with_features(FeatureFlags {
        timeboxing: true,
        ..FeatureFlags::default()
    })
    .await;

    let task = fixture
        .host
        .create_entity(&EntityKind::Task, task_data("Boxed"), "", None)
        .await
        .expect("create");
    let mut patch = EntityPatch::default();
    patch.metadata.insert("status".to_owned(), json!("doing"));
    patch.metadata.insert("assignee".to_owned(), json!("me"));
    fixture
        .host
        .update_entity(&task.id, patch, None)
        .await
        .expect("enter doing");

    let events: Vec<_> = fixture
        .host
        .list_entities(&EntityKind::Event, &EntityFilter::default())
        .collect();
    assert_eq!(events.len(), 1);
    assert!(events[0].title().contains("Boxed"));
    assert_eq!(events[0].metadata.get("source_task"), Some(&json!(task.id)));
}

#[tokio::test]
async fn list_filters_by_state_tag_and_title() {
    let fixture = host_fixture().await;
    let mut data = task_data("Tagged errand");
    data.insert("tags".to_owned(), json!(["errand"]));
    fixture
        .host
        .create_entity(&EntityKind::Task, data, "", None)
        .await
        .expect("create tagged");
    fixture
        .host
        .create_entity(&EntityKind::Task, task_data("Plain"), "", None)
        .await
        .expect("create plain");

    let by_tag: Vec<_> = fixture
        .host
        .list_entities(
            &EntityKind::Task,
            &EntityFilter {
                tag: Some("errand".to_owned()),
                ..EntityFilter::default()
            },
        )
        .collect();
    assert_eq!(by_tag.len(), 1);

    let by_title: Vec<_> = fixture
        .host
        .list_entities(
            &EntityKind::Task,
            &EntityFilter {
                title_contains: Some("plain".to_owned()),
                ..EntityFilter::default()
            },
        )
        .collect();
    assert_eq!(by_title.len(), 1);
}
