//! End-to-end scenario tests for [`WorkerPool`] against a real Redis
//! coordination store and a mocked durable store. Requires Docker.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::TestCoordination;
use conveyor_core::{
    ConveyorResult, CreateOutcome, DurableStore, Job, JobCounts, JobFilter, JobHistoryEntry, JobId, JobStatus,
    NewJob, Page, PageRequest, Priority, WorkerHeartbeat, WorkerId,
};
use conveyor_config::{RetryConfig, WorkerConfig};
use conveyor_engine::{HandlerRegistry, WorkerPool};
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

fn sample_job(id: JobId, job_type: &str, priority: Priority, attempt: i32, max_attempts: i32) -> Job {
    let now = Utc::now();
    Job {
        id,
        job_type: job_type.to_string(),
        payload: json!({}),
        priority,
        status: JobStatus::Processing,
        queue: "default".to_string(),
        attempt,
        max_attempts,
        idempotency_key: None,
        run_at: now,
        locked_by: Some("worker-test".to_string()),
        locked_at: Some(now),
        timeout_secs: 5,
        last_error: None,
        result: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
    }
}

/// Scenario 1 (spec.md §8): a HIGH-priority job submitted alongside a
/// LOW-priority one at the same instant is dequeued first.
#[tokio::test]
async fn high_priority_job_is_processed_before_low_priority_job() {
    let redis = TestCoordination::new().await;
    let coordination = redis.store();

    let high_id = JobId::new();
    let low_id = JobId::new();
    let now = Utc::now();
    coordination.enqueue("default", low_id, Priority::Low, now).await.expect("enqueue low failed");
    coordination.enqueue("default", high_id, Priority::High, now).await.expect("enqueue high failed");

    let claim_order: Arc<Mutex<Vec<JobId>>> = Arc::new(Mutex::new(Vec::new()));
    let order_for_mock = claim_order.clone();

    let mut mock = MockStore::new();
    mock.expect_claim_job().returning(move |id, _worker_id| {
        order_for_mock.lock().unwrap().push(id);
        let job_type = if id == high_id { "echo_high" } else { "echo_low" };
        Ok(Some(sample_job(id, job_type, Priority::Medium, 1, 5)))
    });
    mock.expect_complete_job().returning(|_, _, _| Ok(true));

    let mut handlers = HandlerRegistry::new();
    handlers.register("echo_high", |p: Value| async move { Ok(p) });
    handlers.register("echo_low", |p: Value| async move { Ok(p) });

    let worker_config = WorkerConfig {
        concurrency: 1,
        queues: vec!["default".to_string()],
        poll_interval_ms: 20,
        drain_timeout_secs: 2,
    };

    let pool = Arc::new(WorkerPool::new(Arc::new(mock), coordination, handlers, worker_config, RetryConfig::default()));
    let pool_clone = pool.clone();
    let handle = tokio::spawn(async move { pool_clone.start().await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    pool.stop();
    let _ = handle.await;

    let order = claim_order.lock().unwrap().clone();
    assert_eq!(order.len(), 2, "both jobs should have been claimed");
    assert_eq!(order[0], high_id, "the HIGH priority job must be dequeued first");
    assert_eq!(order[1], low_id);
}

/// Scenario 6 (spec.md §8): a job that fails repeatedly within the
/// poison window is dead-lettered regardless of remaining retries.
/// `poison_threshold: 1` makes a single failure decisive, keeping the
/// test deterministic without needing three real attempts.
#[tokio::test]
async fn poisoned_job_short_circuits_to_dead_letter_queue() {
    let redis = TestCoordination::new().await;
    let coordination = redis.store();

    let id = JobId::new();
    coordination.enqueue("default", id, Priority::Medium, Utc::now()).await.expect("enqueue failed");

    let mut mock = MockStore::new();
    mock.expect_claim_job()
        .times(1)
        .returning(move |id, _worker_id| Ok(Some(sample_job(id, "always_fail", Priority::Medium, 1, 10))));
    mock.expect_mark_dead().times(1).returning(|_, _| Ok(()));

    let mut handlers = HandlerRegistry::new();
    handlers.register("always_fail", |_: Value| async move {
        Err(conveyor_engine::EngineError::HandlerFailed("boom".to_string()))
    });

    let worker_config = WorkerConfig {
        concurrency: 1,
        queues: vec!["default".to_string()],
        poll_interval_ms: 20,
        drain_timeout_secs: 2,
    };
    let retry_config = RetryConfig {
        poison_threshold: 1,
        ..RetryConfig::default()
    };

    let pool = Arc::new(WorkerPool::new(Arc::new(mock), coordination.clone(), handlers, worker_config, retry_config));
    let pool_clone = pool.clone();
    let handle = tokio::spawn(async move { pool_clone.start().await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    pool.stop();
    let _ = handle.await;

    let dlq_ids = coordination.dlq_ids("default").await.expect("dlq_ids failed");
    assert!(dlq_ids.contains(&id), "poisoned job must land in the dead-letter queue");

    let depths = coordination.queue_depths("default").await.expect("queue_depths failed");
    assert_eq!(depths.processing, 0, "processing set must be acked even on the poison path");
}
