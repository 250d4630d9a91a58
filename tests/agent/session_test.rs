//! Session store persistence, eviction, and invariant tests.

use serde_json::json;

use kira::agent::SessionStore;
use kira::providers::ChatRole;
use kira::tools::ToolCall;

use crate::support::memory_pool;

fn plan() -> Vec<ToolCall> {
    vec![ToolCall {
        tool: "task_delete".to_owned(),
        args: json!({"id": "task-20250301-0910-x"}),
        dry_run: false,
    }]
}

#[tokio::test]
async fn turns_round_trip_in_order() {
    let store = SessionStore::new(memory_pool().await).await.expect("store");

    store.append_turn("s1", "user", "hi").await.expect("turn 1");
    store
        .append_turn("s1", "assistant", "hello")
        .await
        .expect("turn 2");
    store.append_turn("s1", "user", "bye").await.expect("turn 3");

    let history = store.load_history("s1", 10).await.expect("load");
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].role, ChatRole::User);
    assert_eq!(history[0].content, "hi");
    assert_eq!(history[1].role, ChatRole::Assistant);
    assert_eq!(history[2].content, "bye");
}

#[tokio::test]
async fn load_history_returns_newest_window() {
    let store = SessionStore::new(memory_pool().await).await.expect("store");
    for n in 0..10 {
        store
            .append_turn("s1", "user", &format!("msg-{n}"))
            .await
            .expect("turn");
    }

    let history = store.load_history("s1", 4).await.expect("load");
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].content, "msg-6");
    assert_eq!(history[3].content, "msg-9");
}

#[tokio::test]
async fn prune_caps_stored_turns() {
    let store = SessionStore::new(memory_pool().await).await.expect("store");
    for n in 0..10 {
        store
            .append_turn("s1", "user", &format!("msg-{n}"))
            .await
            .expect("turn");
    }

    let removed = store.prune_history("s1", 4).await.expect("prune");
    assert_eq!(removed, 6);
    let history = store.load_history("s1", 100).await.expect("load");
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].content, "msg-6");
}

#[tokio::test]
async fn sessions_are_isolated() {
    let store = SessionStore::new(memory_pool().await).await.expect("store");
    store.append_turn("a", "user", "for a").await.expect("a");
    store.append_turn("b", "user", "for b").await.expect("b");

    let history_a = store.load_history("a", 10).await.expect("load a");
    assert_eq!(history_a.len(), 1);
    assert_eq!(history_a[0].content, "for a");
}

#[tokio::test]
async fn pending_confirmation_round_trips() {
    let store = SessionStore::new(memory_pool().await).await.expect("store");

    store
        .save_pending("s1", &plan(), "Подтверди удаление?")
        .await
        .expect("save");

    let loaded = store.load_pending("s1").await.expect("load").expect("some");
    assert_eq!(loaded.plan, plan());
    assert_eq!(loaded.question, "Подтверди удаление?");

    store.clear_pending("s1").await.expect("clear");
    assert!(store.load_pending("s1").await.expect("load").is_none());
}

#[tokio::test]
async fn empty_pending_plan_violates_invariant_and_is_cleared() {
    let store = SessionStore::new(memory_pool().await).await.expect("store");
    // pending_confirmation = true with an empty plan breaks the invariant;
    // the store must self-heal on load.
    store.save_pending("s1", &[], "q?").await.expect("save");
    assert!(store.load_pending("s1").await.expect("load").is_none());
    // The broken row is gone.
    assert!(store.load_pending("s1").await.expect("reload").is_none());
}

#[tokio::test]
async fn sweep_enforces_the_lru_cap() {
    let store = SessionStore::new(memory_pool().await).await.expect("store");
    for n in 0..6 {
        store
            .append_turn(&format!("s{n}"), "user", "hello")
            .await
            .expect("turn");
    }
    assert_eq!(store.session_count().await.expect("count"), 6);

    // Generous TTL, cap of 3: the oldest sessions fall off.
    store.sweep(86_400, 3).await.expect("sweep");
    assert!(store.session_count().await.expect("count") <= 3);
}

#[tokio::test]
async fn sweep_with_zero_ttl_clears_everything() {
    let store = SessionStore::new(memory_pool().await).await.expect("store");
    store.append_turn("s1", "user", "hello").await.expect("turn");
    store
        .save_pending("s1", &plan(), "q?")
        .await
        .expect("pending");

    store.sweep(0, 100).await.expect("sweep");
    assert_eq!(store.session_count().await.expect("count"), 0);
    assert!(store.load_pending("s1").await.expect("load").is_none());
}
