//! The durable store contract.
//!
//! `conveyor-store` provides the Postgres-backed implementation;
//! `conveyor-engine` depends only on this trait, so the scheduler and
//! worker pool never reach for a concrete SQL type.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{ConveyorResult, Job, JobHistoryEntry, JobId, NewJob, Page, PageRequest, WorkerHeartbeat, WorkerId};

/// Optional filters for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub queue: Option<String>,
    pub job_type: Option<String>,
    pub status: Option<crate::JobStatus>,
}

/// Job counts by status, used for the stats/dashboard surface.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct JobCounts {
    pub pending: i64,
    pub scheduled: i64,
    pub processing: i64,
    pub completed: i64,
    pub dead: i64,
    pub cancelled: i64,
}

/// Result of [`DurableStore::create_job`]: the stored row, plus whether
/// this call actually inserted it or replayed an existing idempotent
/// submission.
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub job: Job,
    /// `false` when `idempotency_key` collided with an existing job and
    /// that job was returned instead of inserting a new one.
    pub created: bool,
}

/// The canonical, durable record of job state.
///
/// Every mutating method here is expected to also append a
/// [`JobHistoryEntry`] row as part of the same transaction, so the audit
/// trail never drifts from the job's current status.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Creates a new job. If `idempotency_key` collides with an
    /// existing job, returns that existing job with `created: false`
    /// instead of erroring.
    async fn create_job(&self, new_job: NewJob) -> ConveyorResult<CreateOutcome>;

    /// Looks up a single job by id.
    async fn get_job(&self, id: JobId) -> ConveyorResult<Option<Job>>;

    /// Returns a job's audit trail, oldest first.
    async fn get_job_history(&self, id: JobId) -> ConveyorResult<Vec<JobHistoryEntry>>;

    /// Lists jobs matching `filter`, newest first.
    async fn list_jobs(&self, filter: JobFilter, page: PageRequest) -> ConveyorResult<Page<Job>>;

    /// Conditionally claims a single `Pending` or `Failed` job on behalf
    /// of `worker_id`, transitioning it to `Processing`. Returns `None`
    /// if the job no longer exists or is no longer claimable — the
    /// caller (a worker lane acting on a coordination-store hint) treats
    /// that as the non-eligibility reconciliation path, not an error.
    async fn claim_job(&self, id: JobId, worker_id: &WorkerId) -> ConveyorResult<Option<Job>>;

    /// Marks a job as successfully completed by the worker holding its
    /// lock. Conditional on `status=Processing AND locked_by=worker_id`;
    /// returns `false` if the job had already been finalized elsewhere
    /// (e.g. reclaimed after a timeout race).
    async fn complete_job(&self, id: JobId, worker_id: &WorkerId, result: Option<Value>) -> ConveyorResult<bool>;

    /// External finalization path (`Intake.complete`): completes a job
    /// without presenting a worker identity. Conditional on
    /// `status=Processing` only.
    async fn complete_job_external(&self, id: JobId) -> ConveyorResult<bool>;

    /// Records a failed attempt and schedules its retry at `next_run_at`.
    /// Writes the job's resting status to `Failed`, inserting it into
    /// `delayed(Q)` under that status until the scheduler promotes it
    /// back to `Pending` once `next_run_at` passes.
    async fn retry_job(&self, id: JobId, error: &str, next_run_at: DateTime<Utc>) -> ConveyorResult<()>;

    /// Moves a job straight to `Dead` (retries exhausted, or a poison
    /// pill was detected).
    async fn mark_dead(&self, id: JobId, error: &str) -> ConveyorResult<()>;

    /// Cancels a job if it is not already in a terminal state. Returns
    /// `false` if the job was already terminal or did not exist.
    async fn cancel_job(&self, id: JobId) -> ConveyorResult<bool>;

    /// Re-opens a job for `Intake.retry`: resets `attempt` to zero,
    /// clears `last_error`/locks/`completed_at`, and returns it to
    /// `Pending`. Valid from `Failed`, `Dead`, or `Cancelled` only — a
    /// `Scheduled` job has never failed and is not a valid source state.
    /// Returns `None` if the job does not exist or is not in one of
    /// those states.
    async fn reopen_job(&self, id: JobId) -> ConveyorResult<Option<Job>>;

    /// Conditionally reclaims a single timed-out job back to `Pending`,
    /// but only if its `locked_at` still matches `observed_locked_at`.
    /// This guards against racing a worker that finalizes the job
    /// between the scheduler's scan and its reclaim write.
    async fn reclaim_timed_out(&self, id: JobId, observed_locked_at: DateTime<Utc>) -> ConveyorResult<bool>;

    /// Finds `Processing` jobs whose visibility timeout has elapsed.
    async fn find_timed_out(&self, now: DateTime<Utc>) -> ConveyorResult<Vec<Job>>;

    /// Promotes `queue`'s `Scheduled` and `Failed` jobs whose `run_at`
    /// has passed to `Pending`. Scoped to a single queue so a fleet with
    /// several configured queues can't have one queue's tick sweep up
    /// (and mis-route) every other queue's due jobs.
    async fn promote_due_delayed(&self, queue: &str, now: DateTime<Utc>) -> ConveyorResult<Vec<Job>>;

    /// Finds `Pending` jobs that have sat untouched since before
    /// `older_than`, implying they never made it into the coordination
    /// store's waiting queue.
    async fn sweep_orphaned_pending(&self, older_than: DateTime<Utc>) -> ConveyorResult<Vec<Job>>;

    /// Upserts a worker's liveness record.
    async fn upsert_heartbeat(&self, heartbeat: WorkerHeartbeat) -> ConveyorResult<()>;

    /// Returns job counts grouped by status.
    async fn stats(&self) -> ConveyorResult<JobCounts>;
}
