//! In-process event bus with at-least-once delivery.
//!
//! Synchronous [`publish`](EventBus::publish) invokes every matching
//! subscriber before returning, retrying failed handlers per their
//! [`RetryPolicy`] and preserving publish order within a topic via a
//! per-topic delivery lock. [`publish_async`](EventBus::publish_async)
//! enqueues onto a bounded per-topic FIFO drained by a worker task.
//!
//! Before dispatch, events are checked against the [`IdempotencyStore`]:
//! a previously seen `event_id` produces no side effects, only a log line.
//! Subscribers must themselves be idempotent — delivery is at-least-once.

pub mod envelope;
pub mod idempotency;
pub mod scheduler;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

pub use envelope::EventEnvelope;
pub use idempotency::IdempotencyStore;

/// Boxed handler future.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A subscriber callback. Receives an owned envelope clone.
pub type EventHandler = Arc<dyn Fn(EventEnvelope) -> HandlerFuture + Send + Sync>;

/// An optional per-subscription filter predicate.
pub type EventFilter = Arc<dyn Fn(&EventEnvelope) -> bool + Send + Sync>;

/// Capacity of each per-topic async delivery queue.
const ASYNC_QUEUE_CAPACITY: usize = 1024;

/// Errors from bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The async queue for a topic is full.
    #[error("async queue full for topic {topic}")]
    QueueFull {
        /// Saturated topic.
        topic: String,
    },
    /// The idempotency store failed.
    #[error("idempotency store error: {0}")]
    Store(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Handler retry policy for synchronous delivery.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Delay ceiling.
    pub max_delay: Duration,
    /// Jitter fraction applied to each delay (±).
    pub jitter: f64,
}

impl RetryPolicy {
    /// Backoff delay before attempt `attempt` (1-based; attempt 1 has none).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(2).min(16);
        let base = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay);
        apply_jitter(base, self.jitter)
    }
}

/// Apply ± `fraction` random jitter to a duration.
pub(crate) fn apply_jitter(base: Duration, fraction: f64) -> Duration {
    if fraction <= 0.0 {
        return base;
    }
    let factor = rand::thread_rng().gen_range(1.0 - fraction..=1.0 + fraction);
    base.mul_f64(factor.max(0.0))
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// Options for [`EventBus::subscribe`].
#[derive(Default, Clone)]
pub struct SubscribeOptions {
    /// Deliver only envelopes passing this predicate.
    pub filter: Option<EventFilter>,
    /// Remove the subscription after its first delivery.
    pub once: bool,
    /// Retry policy for handler failures.
    pub retry: RetryPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            jitter: 0.2,
        }
    }
}

struct Subscription {
    id: u64,
    pattern: String,
    handler: EventHandler,
    opts: SubscribeOptions,
}

/// Whether a subscription pattern matches an event type.
///
/// A pattern matches exactly or as a dotted prefix: `entity` matches
/// `entity.created` but not `entities.created`.
fn pattern_matches(pattern: &str, event_type: &str) -> bool {
    event_type == pattern
        || (event_type.len() > pattern.len()
            && event_type.starts_with(pattern)
            && event_type.as_bytes().get(pattern.len()) == Some(&b'.'))
}

// ---------------------------------------------------------------------------
// Event bus
// ---------------------------------------------------------------------------

/// In-process pub/sub hub.
pub struct EventBus {
    subs: StdMutex<Vec<Subscription>>,
    next_sub_id: AtomicU64,
    store: Option<IdempotencyStore>,
    /// Per-topic delivery locks: sync mode preserves publish order per topic.
    topic_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Per-topic async queues, created lazily.
    async_queues: Mutex<HashMap<String, mpsc::Sender<EventEnvelope>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.subs.lock().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("EventBus")
            .field("subscriptions", &count)
            .field("dedup", &self.store.is_some())
            .finish()
    }
}

impl EventBus {
    /// Create a bus without deduplication (tests, ephemeral usage).
    pub fn new() -> Self {
        Self {
            subs: StdMutex::new(Vec::new()),
            next_sub_id: AtomicU64::new(1),
            store: None,
            topic_locks: StdMutex::new(HashMap::new()),
            async_queues: Mutex::new(HashMap::new()),
        }
    }

    /// Create a bus backed by an idempotency store.
    pub fn with_store(store: IdempotencyStore) -> Self {
        let mut bus = Self::new();
        bus.store = Some(store);
        bus
    }

    /// Register a handler for an exact topic or dotted prefix pattern.
    ///
    /// Returns a subscription ID usable with [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe(
        &self,
        pattern: impl Into<String>,
        handler: EventHandler,
        opts: SubscribeOptions,
    ) -> u64 {
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let sub = Subscription {
            id,
            pattern: pattern.into(),
            handler,
            opts,
        };
        if let Ok(mut subs) = self.subs.lock() {
            subs.push(sub);
        }
        id
    }

    /// Remove a subscription; returns whether it existed.
    pub fn unsubscribe(&self, sub_id: u64) -> bool {
        let Ok(mut subs) = self.subs.lock() else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| s.id != sub_id);
        subs.len() != before
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subs.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Synchronously deliver an event to all matching subscribers.
    ///
    /// Returns the number of handlers invoked (0 for a deduplicated event).
    /// Handler failures are retried per subscription policy; exhaustion is
    /// logged with full context and does not fail the publish.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Store`] if the idempotency check itself fails.
    pub async fn publish(&self, envelope: EventEnvelope) -> Result<usize, BusError> {
        let topic_lock = self.topic_lock(&envelope.event_type);
        let _ordering_guard = topic_lock.lock().await;

        if let Some(store) = &self.store {
            if !store.check_and_record(&envelope.event_id).await? {
                info!(
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    "duplicate event, skipping delivery"
                );
                return Ok(0);
            }
        }

        self.deliver(&envelope).await
    }

    /// Enqueue an event for asynchronous delivery and return immediately.
    ///
    /// Delivery is FIFO per topic; no ordering holds across topics.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::QueueFull`] when the topic queue is saturated.
    pub async fn publish_async(
        self: &Arc<Self>,
        envelope: EventEnvelope,
    ) -> Result<(), BusError> {
        let topic = envelope.event_type.clone();
        let tx = {
            let mut queues = self.async_queues.lock().await;
            if let Some(tx) = queues.get(&topic) {
                tx.clone()
            } else {
                let (tx, rx) = mpsc::channel::<EventEnvelope>(ASYNC_QUEUE_CAPACITY);
                queues.insert(topic.clone(), tx.clone());
                let bus = Arc::clone(self);
                tokio::spawn(async move { bus.drain_async_queue(rx).await });
                tx
            }
        };

        tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(env) | mpsc::error::TrySendError::Closed(env) => {
                BusError::QueueFull {
                    topic: env.event_type,
                }
            }
        })
    }

    /// Worker loop for one topic's async queue.
    async fn drain_async_queue(self: Arc<Self>, mut rx: mpsc::Receiver<EventEnvelope>) {
        while let Some(envelope) = rx.recv().await {
            if let Err(e) = self.publish(envelope).await {
                error!(error = %e, "async delivery failed at the store layer");
            }
        }
    }

    /// Deliver to matching subscribers with per-subscription retry.
    async fn deliver(&self, envelope: &EventEnvelope) -> Result<usize, BusError> {
        let matching: Vec<(u64, EventHandler, SubscribeOptions)> = {
            let Ok(subs) = self.subs.lock() else {
                return Ok(0);
            };
            subs.iter()
                .filter(|s| pattern_matches(&s.pattern, &envelope.event_type))
                .filter(|s| {
                    s.opts
                        .filter
                        .as_ref()
                        .map(|f| f(envelope))
                        .unwrap_or(true)
                })
                .map(|s| (s.id, Arc::clone(&s.handler), s.opts.clone()))
                .collect()
        };

        let mut delivered = 0usize;
        let mut spent_once: Vec<u64> = Vec::new();

        for (sub_id, handler, opts) in matching {
            self.invoke_with_retry(&handler, &opts.retry, envelope).await;
            delivered = delivered.saturating_add(1);
            if opts.once {
                spent_once.push(sub_id);
            }
        }

        if !spent_once.is_empty() {
            if let Ok(mut subs) = self.subs.lock() {
                subs.retain(|s| !spent_once.contains(&s.id));
            }
        }

        debug!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            delivered,
            "event delivered"
        );
        Ok(delivered)
    }

    /// Run a single handler with backoff retries; log exhaustion.
    async fn invoke_with_retry(
        &self,
        handler: &EventHandler,
        policy: &RetryPolicy,
        envelope: &EventEnvelope,
    ) {
        for attempt in 1..=policy.max_attempts.max(1) {
            let delay = policy.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match handler(envelope.clone()).await {
                Ok(()) => return,
                Err(e) if attempt < policy.max_attempts => {
                    warn!(
                        event_type = %envelope.event_type,
                        event_id = %envelope.event_id,
                        attempt,
                        error = %e,
                        "handler failed, retrying"
                    );
                }
                Err(e) => {
                    error!(
                        event_type = %envelope.event_type,
                        event_id = %envelope.event_id,
                        trace_id = envelope.trace_id.as_deref().unwrap_or(""),
                        attempts = policy.max_attempts,
                        error = %e,
                        "handler retries exhausted"
                    );
                }
            }
        }
    }

    fn topic_lock(&self, topic: &str) -> Arc<Mutex<()>> {
        let mut locks = self.topic_locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(
            locks
                .entry(topic.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
