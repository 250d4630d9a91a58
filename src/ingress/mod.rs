//! Message handler: correlates inbound bus events to sessions and invokes
//! the agent graph.
//!
//! Subscribes to `message.received`; chat adapters (Telegram, CLI, HTTP
//! relays) publish onto that topic and register a [`ResponseSink`] to
//! receive replies and progress updates. The handler derives the session
//! and trace IDs, builds the progress callback, runs the executor, and
//! always delivers a reply — a fallback string when the graph produced
//! nothing usable.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::agent::{AgentError, AgentExecutor, ExecuteRequest};
use crate::bus::{EventBus, EventEnvelope, SubscribeOptions};

/// Reply shown when the graph produced an empty response.
const FALLBACK_RESPONSE: &str = "I could not process that request. Please try again.";

/// Reply shown when the session is already busy with another request.
const BUSY_RESPONSE: &str =
    "I am still working on your previous request. Please wait a moment and try again.";

/// Adapter-provided delivery hooks.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    /// Deliver the final reply to a chat.
    async fn deliver(&self, chat_id: &str, text: &str);

    /// Show a progress indicator in a chat. Default: ignored.
    fn progress(&self, _chat_id: &str, _text: &str) {}
}

/// A sink that only logs; used when no adapter is attached.
#[derive(Debug, Default)]
pub struct LoggingSink;

#[async_trait]
impl ResponseSink for LoggingSink {
    async fn deliver(&self, chat_id: &str, text: &str) {
        info!(chat_id, reply = %text, "reply (no adapter attached)");
    }
}

/// The `message.received` subscriber.
pub struct MessageHandler {
    executor: Arc<AgentExecutor>,
    sink: Arc<dyn ResponseSink>,
}

impl std::fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHandler").finish_non_exhaustive()
    }
}

impl MessageHandler {
    /// Create a handler delivering replies through `sink`.
    pub fn new(executor: Arc<AgentExecutor>, sink: Arc<dyn ResponseSink>) -> Arc<Self> {
        Arc::new(Self { executor, sink })
    }

    /// Subscribe this handler to `message.received` on the bus.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> u64 {
        let handler = Arc::clone(self);
        bus.subscribe(
            "message.received",
            Arc::new(move |envelope| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    handler.handle(envelope).await;
                    Ok(())
                })
            }),
            SubscribeOptions::default(),
        )
    }

    /// Process one inbound message event.
    pub async fn handle(&self, envelope: EventEnvelope) {
        let Some(chat_id) = envelope
            .payload
            .get("chat_id")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
        else {
            warn!(event_id = %envelope.event_id, "message.received without chat_id, dropping");
            return;
        };
        let Some(text) = envelope
            .payload
            .get("text")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
        else {
            warn!(event_id = %envelope.event_id, "message.received without text, dropping");
            return;
        };
        let user = envelope
            .payload
            .get("user")
            .and_then(Value::as_str)
            .unwrap_or(&chat_id)
            .to_owned();

        let session_id = envelope
            .session_id
            .clone()
            .unwrap_or_else(|| format!("{}:{chat_id}", envelope.source));
        let trace_id = envelope.trace_id.clone().unwrap_or_else(|| {
            format!(
                "{}-{chat_id}-{}",
                envelope.source,
                uuid::Uuid::new_v4().simple()
            )
        });

        // Progress updates go straight to the adapter; failures there must
        // never affect the request.
        let sink = Arc::clone(&self.sink);
        let progress_chat = chat_id.clone();
        let progress = Arc::new(move |text: String| {
            sink.progress(&progress_chat, &text);
        });

        let request = ExecuteRequest {
            message: text,
            session_id: session_id.clone(),
            trace_id: trace_id.clone(),
            user,
            progress: Some(progress),
            dry_run: false,
        };

        let reply = match self.executor.execute(request).await {
            Ok(result) if result.response.trim().is_empty() => FALLBACK_RESPONSE.to_owned(),
            Ok(result) => result.response,
            Err(AgentError::SessionBusy(_)) => BUSY_RESPONSE.to_owned(),
            Err(e) => {
                error!(trace_id = %trace_id, error = %e, "executor failed");
                FALLBACK_RESPONSE.to_owned()
            }
        };

        self.sink.deliver(&chat_id, &reply).await;
    }
}
