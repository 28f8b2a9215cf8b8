//! End-to-end scenario tests for [`Scheduler`] against a real Redis
//! coordination store and a mocked durable store. Requires Docker.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::TestCoordination;
use conveyor_config::SchedulerConfig;
use conveyor_core::{
    ConveyorResult, CreateOutcome, DurableStore, Job, JobCounts, JobFilter, JobHistoryEntry, JobId, JobStatus,
    NewJob, Page, PageRequest, Priority, WorkerHeartbeat, WorkerId,
};
use conveyor_engine::Scheduler;
use serde_json::{json, Value};

mockall::mock! {
    pub Store {}

    #[async_trait::async_trait]
    impl DurableStore for Store {
        async fn create_job(&self, new_job: NewJob) -> ConveyorResult<CreateOutcome>;
        async fn get_job(&self, id: JobId) -> ConveyorResult<Option<Job>>;
        async fn get_job_history(&self, id: JobId) -> ConveyorResult<Vec<JobHistoryEntry>>;
        async fn list_jobs(&self, filter: JobFilter, page: PageRequest) -> ConveyorResult<Page<Job>>;
        async fn claim_job(&self, id: JobId, worker_id: &WorkerId) -> ConveyorResult<Option<Job>>;
        async fn complete_job(&self, id: JobId, worker_id: &WorkerId, result: Option<Value>) -> ConveyorResult<bool>;
        async fn complete_job_external(&self, id: JobId) -> ConveyorResult<bool>;
        async fn retry_job(&self, id: JobId, error: &str, next_run_at: DateTime<Utc>) -> ConveyorResult<()>;
        async fn mark_dead(&self, id: JobId, error: &str) -> ConveyorResult<()>;
        async fn cancel_job(&self, id: JobId) -> ConveyorResult<bool>;
        async fn reopen_job(&self, id: JobId) -> ConveyorResult<Option<Job>>;
        async fn reclaim_timed_out(&self, id: JobId, observed_locked_at: DateTime<Utc>) -> ConveyorResult<bool>;
        async fn find_timed_out(&self, now: DateTime<Utc>) -> ConveyorResult<Vec<Job>>;
        async fn promote_due_delayed(&self, queue: &str, now: DateTime<Utc>) -> ConveyorResult<Vec<Job>>;
        async fn sweep_orphaned_pending(&self, older_than: DateTime<Utc>) -> ConveyorResult<Vec<Job>>;
        async fn upsert_heartbeat(&self, heartbeat: WorkerHeartbeat) -> ConveyorResult<()>;
        async fn stats(&self) -> ConveyorResult<JobCounts>;
    }
}

fn sample_job(id: JobId, status: JobStatus, locked_at: Option<DateTime<Utc>>) -> Job {
    let now = Utc::now();
    Job {
        id,
        job_type: "send_email".to_string(),
        payload: json!({}),
        priority: Priority::Medium,
        status,
        queue: "default".to_string(),
        attempt: 1,
        max_attempts: 5,
        idempotency_key: None,
        run_at: now,
        locked_by: locked_at.map(|_| "dead-worker".to_string()),
        locked_at,
        timeout_secs: 5,
        last_error: None,
        result: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
    }
}

fn test_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval_ms: 50,
        leader_lock_ttl_secs: 5,
        sweep_interval_ticks: 10,
    }
}

/// Scenario 4 (spec.md §8): a job scheduled for the future sits in
/// `delayed(Q)` until its run time, then the scheduler promotes it into
/// `waiting(Q)` for a worker to claim.
#[tokio::test]
async fn scheduler_promotes_due_delayed_jobs_into_waiting() {
    let redis = TestCoordination::new().await;
    let coordination = redis.store();

    let id = JobId::new();
    let run_at = Utc::now() - chrono::Duration::seconds(1); // already due
    coordination.insert_delayed("default", id, run_at).await.expect("insert_delayed failed");

    let promoted_job = sample_job(id, JobStatus::Pending, None);
    let mut mock = MockStore::new();
    mock.expect_promote_due_delayed().returning(move |_queue, _now| Ok(vec![promoted_job.clone()]));
    mock.expect_find_timed_out().returning(|_now| Ok(vec![]));
    mock.expect_sweep_orphaned_pending().returning(|_older_than| Ok(vec![]));

    let scheduler = Arc::new(Scheduler::new(
        redis.raw_pool(),
        Arc::new(mock),
        coordination.clone(),
        test_scheduler_config(),
        "conveyor-test",
        vec!["default".to_string()],
    ));

    let scheduler_clone = scheduler.clone();
    let handle = tokio::spawn(async move { scheduler_clone.start().await });

    tokio::time::sleep(Duration::from_millis(500)).await;
    scheduler.stop();
    let _ = handle.await;

    let depths = coordination.queue_depths("default").await.expect("queue_depths failed");
    assert_eq!(depths.delayed, 0, "the due job must leave delayed(Q)");
    assert_eq!(depths.waiting, 1, "and land in waiting(Q) for a worker to claim");
}

/// Scenario 5 (spec.md §8): a worker crashes mid-handler; once the
/// visibility timeout elapses the scheduler reclaims the job back to
/// `waiting(Q)`, conditioned on the `locked_at` it actually observed.
#[tokio::test]
async fn scheduler_reclaims_timed_out_jobs_conditionally() {
    let redis = TestCoordination::new().await;
    let coordination = redis.store();

    let id = JobId::new();
    let locked_at = Utc::now() - chrono::Duration::seconds(60);
    let stuck_job = sample_job(id, JobStatus::Processing, Some(locked_at));

    let mut mock = MockStore::new();
    mock.expect_promote_due_delayed().returning(|_queue, _now| Ok(vec![]));
    mock.expect_find_timed_out().returning(move |_now| Ok(vec![stuck_job.clone()]));
    mock.expect_reclaim_timed_out()
        .withf(move |reclaim_id, observed| *reclaim_id == id && *observed == locked_at)
        .returning(|_, _| Ok(true));
    mock.expect_sweep_orphaned_pending().returning(|_older_than| Ok(vec![]));

    let scheduler = Arc::new(Scheduler::new(
        redis.raw_pool(),
        Arc::new(mock),
        coordination.clone(),
        test_scheduler_config(),
        "conveyor-test",
        vec!["default".to_string()],
    ));

    let scheduler_clone = scheduler.clone();
    let handle = tokio::spawn(async move { scheduler_clone.start().await });

    tokio::time::sleep(Duration::from_millis(500)).await;
    scheduler.stop();
    let _ = handle.await;

    let depths = coordination.queue_depths("default").await.expect("queue_depths failed");
    assert_eq!(depths.waiting, 1, "a reclaimed job must be re-enqueued for redelivery");
}
