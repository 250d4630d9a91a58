//! Event envelope and event-id derivation tests.

use serde_json::json;

use kira::bus::envelope::{compute_event_id, EventEnvelope};

#[test]
fn event_id_is_stable_for_identical_inputs() {
    let a = compute_event_id("telegram", "msg-1", &json!({"text": "hi"}));
    let b = compute_event_id("telegram", "msg-1", &json!({"text": "hi"}));
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn event_id_differs_per_source_external_id_and_payload() {
    let base = compute_event_id("telegram", "msg-1", &json!({"text": "hi"}));
    assert_ne!(base, compute_event_id("cli", "msg-1", &json!({"text": "hi"})));
    assert_ne!(
        base,
        compute_event_id("telegram", "msg-2", &json!({"text": "hi"}))
    );
    assert_ne!(
        base,
        compute_event_id("telegram", "msg-1", &json!({"text": "bye"}))
    );
}

#[test]
fn key_order_does_not_change_the_id() {
    // serde_json sorts object keys, so logically equal payloads hash equal.
    let a: serde_json::Value =
        serde_json::from_str(r#"{"a": 1, "b": 2}"#).expect("parse a");
    let b: serde_json::Value =
        serde_json::from_str(r#"{"b": 2, "a": 1}"#).expect("parse b");
    assert_eq!(
        compute_event_id("x", "1", &a),
        compute_event_id("x", "1", &b)
    );
}

#[test]
fn internal_envelopes_are_unique_per_occurrence() {
    let a = EventEnvelope::internal("entity.created", json!({"id": "x"}));
    let b = EventEnvelope::internal("entity.created", json!({"id": "x"}));
    assert_ne!(a.event_id, b.event_id);
    assert_eq!(a.source, "internal");
}

#[test]
fn builders_attach_correlation_fields() {
    let envelope = EventEnvelope::new("cli", "42", "message.received", json!({"text": "hi"}))
        .with_trace("trace-1")
        .with_session("cli:42")
        .with_seq(7);
    assert_eq!(envelope.trace_id.as_deref(), Some("trace-1"));
    assert_eq!(envelope.session_id.as_deref(), Some("cli:42"));
    assert_eq!(envelope.seq, Some(7));
    assert_eq!(envelope.event_type, "message.received");
}

#[test]
fn envelope_serializes_type_field_name() {
    let envelope = EventEnvelope::internal("sync.tick", json!({}));
    let wire = serde_json::to_value(&envelope).expect("serialize");
    assert_eq!(wire.get("type"), Some(&json!("sync.tick")));
    assert!(wire.get("event_type").is_none());
}
