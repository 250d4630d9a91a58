//! Cron/interval/at job scheduling with stable IDs.
//!
//! Jobs run as independent Tokio tasks. Re-registering an ID with identical
//! parameters is a no-op; changed parameters replace the job. Every run
//! receives a child [`CancellationToken`]; an optional hard wall-clock
//! timeout terminates overlong runs.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::HandlerFuture;

/// A job callback. Receives a cancellation token it should observe.
pub type JobHandler = Arc<dyn Fn(CancellationToken) -> HandlerFuture + Send + Sync>;

/// The driver future of a spawned job task.
type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// What to do about runs missed while the process was busy or down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissedRunPolicy {
    /// Fire once to catch up (default).
    #[default]
    Coalesce,
    /// Fire once per missed occurrence.
    FireAll,
}

/// Per-job execution options.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Missed-run handling.
    pub missed_run: MissedRunPolicy,
    /// Hard wall-clock cap per run; unbounded when `None`.
    pub hard_timeout: Option<Duration>,
}

/// Errors from job registration.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A cron expression failed to parse.
    #[error("invalid cron expression {expr:?}: {reason}")]
    InvalidCron {
        /// Offending expression.
        expr: String,
        /// Parser message.
        reason: String,
    },
}

struct JobEntry {
    fingerprint: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// In-process job scheduler.
#[derive(Default)]
pub struct Scheduler {
    jobs: StdMutex<HashMap<String, JobEntry>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("jobs", &self.job_count())
            .finish()
    }
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fixed-interval job. Returns `false` when an identical
    /// registration already exists (idempotent no-op).
    pub fn schedule_interval(
        &self,
        id: &str,
        every: Duration,
        handler: JobHandler,
        opts: JobOptions,
    ) -> bool {
        let fingerprint = format!("interval:{}:{:?}", every.as_millis(), opts.missed_run);
        self.register(id, fingerprint, move |cancel| {
            let handler = Arc::clone(&handler);
            let opts = opts.clone();
            Box::pin(async move {
                let mut ticker = tokio::time::interval(every);
                ticker.set_missed_tick_behavior(match opts.missed_run {
                    MissedRunPolicy::Coalesce => tokio::time::MissedTickBehavior::Delay,
                    MissedRunPolicy::FireAll => tokio::time::MissedTickBehavior::Burst,
                });
                // The first tick of a Tokio interval completes immediately;
                // consume it so the first run happens after one period.
                ticker.tick().await;
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        _ = ticker.tick() => run_once(&handler, &cancel, opts.hard_timeout).await,
                    }
                }
            })
        })
    }

    /// Register a one-shot job at a UTC instant. Past instants fire
    /// immediately (coalesce semantics).
    pub fn schedule_at(
        &self,
        id: &str,
        when: DateTime<Utc>,
        handler: JobHandler,
        opts: JobOptions,
    ) -> bool {
        let fingerprint = format!("at:{}", when.to_rfc3339());
        self.register(id, fingerprint, move |cancel| {
            let handler = Arc::clone(&handler);
            let opts = opts.clone();
            Box::pin(async move {
                let wait = when
                    .signed_duration_since(Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(wait) => {}
                }
                run_once(&handler, &cancel, opts.hard_timeout).await;
            })
        })
    }

    /// Register a cron job. Fires within the matched minute.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidCron`] for unparseable expressions.
    pub fn schedule_cron(
        &self,
        id: &str,
        expr: &str,
        handler: JobHandler,
        opts: JobOptions,
    ) -> Result<bool, SchedulerError> {
        let schedule =
            cron::Schedule::from_str(expr).map_err(|e| SchedulerError::InvalidCron {
                expr: expr.to_owned(),
                reason: e.to_string(),
            })?;
        let fingerprint = format!("cron:{expr}:{:?}", opts.missed_run);
        Ok(self.register(id, fingerprint, move |cancel| {
            let handler = Arc::clone(&handler);
            let schedule = schedule.clone();
            let opts = opts.clone();
            Box::pin(async move {
                let mut last_fire = Utc::now();
                loop {
                    let now = Utc::now();

                    // Fire every occurrence missed since the last run when
                    // the policy demands it.
                    if opts.missed_run == MissedRunPolicy::FireAll {
                        let missed: Vec<DateTime<Utc>> = schedule
                            .after(&last_fire)
                            .take_while(|t| *t <= now)
                            .collect();
                        for t in missed {
                            run_once(&handler, &cancel, opts.hard_timeout).await;
                            last_fire = t;
                        }
                    }

                    let Some(next) = schedule.after(&now).next() else {
                        debug!("cron schedule has no future fire times, stopping");
                        break;
                    };
                    let wait = next
                        .signed_duration_since(now)
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(wait) => {
                            run_once(&handler, &cancel, opts.hard_timeout).await;
                            last_fire = next;
                        }
                    }
                }
            })
        }))
    }

    /// Cancel a job by ID; returns whether it existed.
    pub fn cancel(&self, id: &str) -> bool {
        let Ok(mut jobs) = self.jobs.lock() else {
            return false;
        };
        match jobs.remove(id) {
            Some(entry) => {
                entry.cancel.cancel();
                entry.handle.abort();
                info!(job = id, "job cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel all jobs (shutdown path).
    pub fn shutdown(&self) {
        let Ok(mut jobs) = self.jobs.lock() else {
            return;
        };
        for (id, entry) in jobs.drain() {
            entry.cancel.cancel();
            entry.handle.abort();
            debug!(job = %id, "job stopped");
        }
        info!("scheduler shut down");
    }

    /// Number of registered jobs.
    pub fn job_count(&self) -> usize {
        self.jobs.lock().map(|j| j.len()).unwrap_or(0)
    }

    /// Register or replace a job task. Same ID + same fingerprint is a no-op.
    fn register<F>(&self, id: &str, fingerprint: String, spawn_fn: F) -> bool
    where
        F: FnOnce(CancellationToken) -> JobFuture,
    {
        let Ok(mut jobs) = self.jobs.lock() else {
            return false;
        };

        if let Some(existing) = jobs.get(id) {
            if existing.fingerprint == fingerprint && !existing.handle.is_finished() {
                debug!(job = id, "identical job already registered, skipping");
                return false;
            }
            existing.cancel.cancel();
            existing.handle.abort();
            warn!(job = id, "replacing job with changed parameters");
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(spawn_fn(cancel.clone()));
        jobs.insert(
            id.to_owned(),
            JobEntry {
                fingerprint,
                cancel,
                handle,
            },
        );
        info!(job = id, "job registered");
        true
    }
}

/// Run one job occurrence under the hard timeout, logging failures.
async fn run_once(
    handler: &JobHandler,
    cancel: &CancellationToken,
    hard_timeout: Option<Duration>,
) {
    let run = handler(cancel.child_token());
    let outcome = match hard_timeout {
        Some(cap) => match tokio::time::timeout(cap, run).await {
            Ok(result) => result,
            Err(_) => {
                error!(timeout_ms = cap.as_millis(), "job hit hard timeout, terminated");
                return;
            }
        },
        None => run.await,
    };
    if let Err(e) = outcome {
        error!(error = %e, "scheduled job failed");
    }
}
