//! Integration tests for [`Intake`] against a real Redis coordination
//! store and a mocked durable store. Requires Docker to be available on
//! the system.

mod common;

use chrono::{DateTime, Utc};
use common::TestCoordination;
use conveyor_core::{
    ConveyorResult, CreateOutcome, DurableStore, Job, JobCounts, JobFilter, JobHistoryEntry, JobId, JobStatus,
    NewJob, Page, PageRequest, Priority, WorkerHeartbeat, WorkerId,
};
use conveyor_engine::Intake;
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

fn sample_job(id: JobId, queue: &str, status: JobStatus) -> Job {
    let now = Utc::now();
    Job {
        id,
        job_type: "send_email".to_string(),
        payload: json!({"to": "user@example.com"}),
        priority: Priority::Medium,
        status,
        queue: queue.to_string(),
        attempt: 0,
        max_attempts: 5,
        idempotency_key: None,
        run_at: now,
        locked_by: None,
        locked_at: None,
        timeout_secs: 30,
        last_error: None,
        result: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
    }
}

#[tokio::test]
async fn create_enqueues_immediately_runnable_jobs() {
    let redis = TestCoordination::new().await;

    let mut mock = MockStore::new();
    mock.expect_create_job().times(1).returning(|new_job| {
        Ok(CreateOutcome {
            job: sample_job(JobId::new(), &new_job.queue, JobStatus::Pending),
            created: true,
        })
    });

    let intake = Intake::new(std::sync::Arc::new(mock), redis.store());

    let new_job = NewJob {
        job_type: "send_email".to_string(),
        payload: json!({"to": "user@example.com"}),
        priority: Priority::High,
        queue: "default".to_string(),
        max_attempts: 5,
        idempotency_key: None,
        run_at: None,
        timeout_secs: 30,
    };

    let result = intake.create(new_job).await.expect("create failed");
    assert!(!result.idempotent);

    let depths = redis.store().queue_depths("default").await.expect("queue_depths failed");
    assert_eq!(depths.waiting, 1);
}

#[tokio::test]
async fn create_replays_idempotent_submission_without_enqueueing_again() {
    let redis = TestCoordination::new().await;

    let mut mock = MockStore::new();
    mock.expect_create_job().times(1).returning(|new_job| {
        Ok(CreateOutcome {
            job: sample_job(JobId::new(), &new_job.queue, JobStatus::Pending),
            created: false,
        })
    });

    let intake = Intake::new(std::sync::Arc::new(mock), redis.store());

    let new_job = NewJob {
        job_type: "send_email".to_string(),
        payload: json!({"to": "user@example.com"}),
        priority: Priority::Medium,
        queue: "default".to_string(),
        max_attempts: 5,
        idempotency_key: Some("order-1".to_string()),
        run_at: None,
        timeout_secs: 30,
    };

    let result = intake.create(new_job).await.expect("create failed");
    assert!(result.idempotent);

    // An idempotent replay must not touch the coordination store.
    let depths = redis.store().queue_depths("default").await.expect("queue_depths failed");
    assert_eq!(depths.waiting, 0);
}

#[tokio::test]
async fn cancel_clears_both_waiting_and_delayed_indexes() {
    let redis = TestCoordination::new().await;
    let id = JobId::new();
    let job = sample_job(id, "default", JobStatus::Scheduled);

    redis.store().insert_delayed("default", id, Utc::now() + chrono::Duration::minutes(5)).await.expect("insert_delayed failed");

    let mut mock = MockStore::new();
    let job_for_get = job.clone();
    mock.expect_get_job().returning(move |_| Ok(Some(job_for_get.clone())));
    mock.expect_cancel_job().times(1).returning(|_| Ok(true));

    let intake = Intake::new(std::sync::Arc::new(mock), redis.store());

    let outcome = intake.cancel(id).await.expect("cancel failed");
    assert!(matches!(outcome, conveyor_engine::TransitionResult::Applied(_)));

    let depths = redis.store().queue_depths("default").await.expect("queue_depths failed");
    assert_eq!(depths.delayed, 0);
    assert_eq!(depths.waiting, 0);
}

#[tokio::test]
async fn retry_removes_from_dlq_and_re_enqueues() {
    let redis = TestCoordination::new().await;
    let id = JobId::new();

    redis.store().move_to_dlq("default", id).await.expect("move_to_dlq failed");

    let mut mock = MockStore::new();
    let reopened = sample_job(id, "default", JobStatus::Pending);
    mock.expect_reopen_job().times(1).returning(move |_| Ok(Some(reopened.clone())));

    let intake = Intake::new(std::sync::Arc::new(mock), redis.store());

    let outcome = intake.retry(id).await.expect("retry failed");
    assert!(matches!(outcome, conveyor_engine::TransitionResult::Applied(_)));

    let dlq_ids = redis.store().dlq_ids("default").await.expect("dlq_ids failed");
    assert!(!dlq_ids.contains(&id));

    let depths = redis.store().queue_depths("default").await.expect("queue_depths failed");
    assert_eq!(depths.waiting, 1);
}
