//! Event envelope and deduplication key derivation.
//!
//! Every event on the bus carries a stable `event_id`: the hex SHA-256 of
//! `(source, external_id, canonical_payload)`. `serde_json` keeps object
//! keys sorted, so `Value::to_string()` is already canonical for payloads
//! built through the ordinary value model.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::timeutil;

/// An event traveling on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Deduplication key: SHA-256 over `(source, external_id, payload)`.
    pub event_id: String,
    /// UTC ISO-8601 timestamp.
    pub event_ts: String,
    /// Optional ordering hint within the same `event_ts`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Origin tag (`telegram`, `cli`, `internal`, …).
    pub source: String,
    /// Dotted event name (`message.received`, `entity.created`, …).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Opaque event data.
    pub payload: Value,
    /// Correlation ID propagated through logs and downstream events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Conversation this event belongs to, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl EventEnvelope {
    /// Build an envelope, deriving `event_id` from the identity triple.
    ///
    /// `external_id` is the origin's own message/object ID; internal
    /// publishers that have none should pass a fresh UUID so every
    /// occurrence is distinct.
    pub fn new(
        source: impl Into<String>,
        external_id: &str,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        let source = source.into();
        let event_id = compute_event_id(&source, external_id, &payload);
        Self {
            event_id,
            event_ts: timeutil::format_utc(Utc::now()),
            seq: None,
            source,
            event_type: event_type.into(),
            payload,
            trace_id: None,
            session_id: None,
        }
    }

    /// Envelope for an internally generated event (unique `external_id`).
    pub fn internal(event_type: impl Into<String>, payload: Value) -> Self {
        let external_id = uuid::Uuid::new_v4().simple().to_string();
        Self::new("internal", &external_id, event_type, payload)
    }

    /// Attach a trace ID.
    #[must_use]
    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Attach a session ID.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach an ordering hint.
    #[must_use]
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }
}

/// Hex SHA-256 over the identity triple.
pub fn compute_event_id(source: &str, external_id: &str, payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update([0u8]);
    hasher.update(external_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
