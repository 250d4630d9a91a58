//! Scheduler registration, idempotency, and cancellation tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use kira::bus::scheduler::{JobHandler, JobOptions, Scheduler};

fn counting_job(counter: Arc<AtomicU32>) -> JobHandler {
    Arc::new(move |_cancel| {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    })
}

#[tokio::test]
async fn interval_job_fires_repeatedly() {
    let scheduler = Scheduler::new();
    let count = Arc::new(AtomicU32::new(0));
    scheduler.schedule_interval(
        "tick",
        Duration::from_millis(20),
        counting_job(Arc::clone(&count)),
        JobOptions::default(),
    );

    tokio::time::sleep(Duration::from_millis(110)).await;
    scheduler.shutdown();
    let fired = count.load(Ordering::SeqCst);
    assert!(fired >= 2, "expected >= 2 fires, got {fired}");
}

#[tokio::test]
async fn reregistering_identical_job_is_a_no_op() {
    let scheduler = Scheduler::new();
    let count = Arc::new(AtomicU32::new(0));

    let first = scheduler.schedule_interval(
        "job",
        Duration::from_secs(60),
        counting_job(Arc::clone(&count)),
        JobOptions::default(),
    );
    let second = scheduler.schedule_interval(
        "job",
        Duration::from_secs(60),
        counting_job(Arc::clone(&count)),
        JobOptions::default(),
    );

    assert!(first);
    assert!(!second);
    assert_eq!(scheduler.job_count(), 1);
    scheduler.shutdown();
}

#[tokio::test]
async fn changed_parameters_replace_the_job() {
    let scheduler = Scheduler::new();
    let count = Arc::new(AtomicU32::new(0));

    scheduler.schedule_interval(
        "job",
        Duration::from_secs(60),
        counting_job(Arc::clone(&count)),
        JobOptions::default(),
    );
    let replaced = scheduler.schedule_interval(
        "job",
        Duration::from_secs(30),
        counting_job(Arc::clone(&count)),
        JobOptions::default(),
    );

    assert!(replaced);
    assert_eq!(scheduler.job_count(), 1);
    scheduler.shutdown();
}

#[tokio::test]
async fn at_job_in_the_past_fires_immediately() {
    let scheduler = Scheduler::new();
    let count = Arc::new(AtomicU32::new(0));
    let past = Utc::now()
        .checked_sub_signed(chrono::Duration::seconds(5))
        .expect("past timestamp");

    scheduler.schedule_at("once", past, counting_job(Arc::clone(&count)), JobOptions::default());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    scheduler.shutdown();
}

#[tokio::test]
async fn invalid_cron_expression_is_rejected() {
    let scheduler = Scheduler::new();
    let count = Arc::new(AtomicU32::new(0));
    let result = scheduler.schedule_cron(
        "bad",
        "not a cron expr",
        counting_job(Arc::clone(&count)),
        JobOptions::default(),
    );
    assert!(result.is_err());
    assert_eq!(scheduler.job_count(), 0);
}

#[tokio::test]
async fn valid_cron_registers_without_firing_early() {
    let scheduler = Scheduler::new();
    let count = Arc::new(AtomicU32::new(0));
    scheduler
        .schedule_cron(
            "hourly",
            "0 0 * * * *",
            counting_job(Arc::clone(&count)),
            JobOptions::default(),
        )
        .expect("register");

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.job_count(), 1);
    scheduler.shutdown();
}

#[tokio::test]
async fn cancel_stops_a_job() {
    let scheduler = Scheduler::new();
    let count = Arc::new(AtomicU32::new(0));
    scheduler.schedule_interval(
        "doomed",
        Duration::from_millis(10),
        counting_job(Arc::clone(&count)),
        JobOptions::default(),
    );

    assert!(scheduler.cancel("doomed"));
    assert!(!scheduler.cancel("doomed"));
    let after_cancel = count.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), after_cancel);
}

#[tokio::test]
async fn hard_timeout_terminates_runaway_jobs() {
    let scheduler = Scheduler::new();
    let started = Arc::new(AtomicU32::new(0));
    let finished = Arc::new(AtomicU32::new(0));
    let started_counter = Arc::clone(&started);
    let finished_counter = Arc::clone(&finished);

    scheduler.schedule_interval(
        "slow",
        Duration::from_millis(20),
        Arc::new(move |_cancel| {
            let started = Arc::clone(&started_counter);
            let finished = Arc::clone(&finished_counter);
            Box::pin(async move {
                started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(3600)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }),
        JobOptions {
            hard_timeout: Some(Duration::from_millis(10)),
            ..JobOptions::default()
        },
    );

    tokio::time::sleep(Duration::from_millis(120)).await;
    scheduler.shutdown();
    assert!(started.load(Ordering::SeqCst) >= 1);
    assert_eq!(finished.load(Ordering::SeqCst), 0);
}
