//! The Postgres-backed [`DurableStore`] implementation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conveyor_core::{
    ConveyorResult, CreateOutcome, DurableStore, Job, JobCounts, JobFilter, JobHistoryEntry, JobId, JobStatus,
    NewJob, Page, PageRequest, Priority, WorkerHeartbeat, WorkerId,
};
use serde_json::Value;
use sqlx::{FromRow, Row};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::pool::DatabasePool;

/// Row representation of a job, mirroring the `jobs` table.
#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    job_type: String,
    payload: Value,
    priority: Priority,
    status: JobStatus,
    queue: String,
    attempt: i32,
    max_attempts: i32,
    idempotency_key: Option<String>,
    run_at: DateTime<Utc>,
    locked_by: Option<String>,
    locked_at: Option<DateTime<Utc>>,
    timeout_secs: i64,
    last_error: Option<String>,
    result: Option<Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Self {
            id: JobId::from_uuid(row.id),
            job_type: row.job_type,
            payload: row.payload,
            priority: row.priority,
            status: row.status,
            queue: row.queue,
            attempt: row.attempt,
            max_attempts: row.max_attempts,
            idempotency_key: row.idempotency_key,
            run_at: row.run_at,
            locked_by: row.locked_by.map(WorkerId::new),
            locked_at: row.locked_at,
            timeout_secs: row.timeout_secs,
            last_error: row.last_error,
            result: row.result,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct JobHistoryRow {
    id: i64,
    job_id: Uuid,
    from_status: Option<JobStatus>,
    to_status: JobStatus,
    attempt: i32,
    error: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl From<JobHistoryRow> for JobHistoryEntry {
    fn from(row: JobHistoryRow) -> Self {
        Self {
            id: row.id,
            job_id: JobId::from_uuid(row.job_id),
            from_status: row.from_status,
            to_status: row.to_status,
            attempt: row.attempt,
            error: row.error,
            recorded_at: row.recorded_at,
        }
    }
}

const JOB_COLUMNS: &str = "id, job_type, payload, priority, status, queue, attempt, max_attempts, \
    idempotency_key, run_at, locked_by, locked_at, timeout_secs, last_error, result, \
    created_at, updated_at, completed_at";

/// Appends a `WHERE`/`AND`-joined clause for each filter field present.
fn push_filter(builder: &mut sqlx::QueryBuilder<'_, sqlx::Postgres>, filter: &JobFilter) {
    let mut pushed_where = false;
    let mut push_clause = |builder: &mut sqlx::QueryBuilder<'_, sqlx::Postgres>, pushed_where: &mut bool| {
        builder.push(if *pushed_where { " AND " } else { " WHERE " });
        *pushed_where = true;
    };

    if let Some(queue) = &filter.queue {
        push_clause(builder, &mut pushed_where);
        builder.push("queue = ").push_bind(queue.clone());
    }
    if let Some(job_type) = &filter.job_type {
        push_clause(builder, &mut pushed_where);
        builder.push("job_type = ").push_bind(job_type.clone());
    }
    if let Some(status) = filter.status {
        push_clause(builder, &mut pushed_where);
        builder.push("status = ").push_bind(status);
    }
}

/// Postgres implementation of [`DurableStore`].
///
/// Every mutating method appends a [`JobHistoryEntry`] row inside the
/// same transaction as the status write, so a job's history can never
/// drift from its current state even under a crash between the two.
pub struct PostgresStore {
    pool: Arc<DatabasePool>,
}

impl PostgresStore {
    /// Wraps an already-connected pool.
    #[must_use]
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }

    async fn record_history(
        executor: &mut sqlx::PgConnection,
        job_id: Uuid,
        from_status: Option<JobStatus>,
        to_status: JobStatus,
        attempt: i32,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO job_history (job_id, from_status, to_status, attempt, error) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(job_id)
        .bind(from_status)
        .bind(to_status)
        .bind(attempt)
        .bind(error)
        .execute(executor)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DurableStore for PostgresStore {
    #[instrument(skip(self, new_job), fields(queue = %new_job.queue, job_type = %new_job.job_type))]
    async fn create_job(&self, new_job: NewJob) -> ConveyorResult<CreateOutcome> {
        let mut tx = self.pool.inner().begin().await.map_err(StoreError::from)?;

        if let Some(key) = &new_job.idempotency_key {
            let existing = sqlx::query_as::<_, JobRow>(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE idempotency_key = $1"
            ))
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::from)?;

            if let Some(row) = existing {
                tx.commit().await.map_err(StoreError::from)?;
                return Ok(CreateOutcome {
                    job: row.into(),
                    created: false,
                });
            }
        }

        let id = Uuid::now_v7();
        let now = Utc::now();
        let run_at = new_job.run_at.unwrap_or(now);
        let status = if new_job.run_at.is_some_and(|t| t > now) {
            JobStatus::Scheduled
        } else {
            JobStatus::Pending
        };

        let row = sqlx::query_as::<_, JobRow>(&format!(
            "INSERT INTO jobs (id, job_type, payload, priority, status, queue, attempt, \
             max_attempts, idempotency_key, run_at, timeout_secs) \
             VALUES ($1, $2, $3, $4, $5, $6, 0, $7, $8, $9, $10) \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(id)
        .bind(&new_job.job_type)
        .bind(&new_job.payload)
        .bind(new_job.priority)
        .bind(status)
        .bind(&new_job.queue)
        .bind(new_job.max_attempts)
        .bind(&new_job.idempotency_key)
        .bind(run_at)
        .bind(new_job.timeout_secs)
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        Self::record_history(&mut tx, id, None, status, 0, None)
            .await
            .map_err(StoreError::from)?;

        tx.commit().await.map_err(StoreError::from)?;
        debug!(job_id = %id, "job created");

        Ok(CreateOutcome {
            job: row.into(),
            created: true,
        })
    }

    async fn get_job(&self, id: JobId) -> ConveyorResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id.into_inner())
            .fetch_optional(self.pool.inner())
            .await
            .map_err(StoreError::from)?;

        Ok(row.map(Into::into))
    }

    async fn get_job_history(&self, id: JobId) -> ConveyorResult<Vec<JobHistoryEntry>> {
        let rows = sqlx::query_as::<_, JobHistoryRow>(
            "SELECT id, job_id, from_status, to_status, attempt, error, recorded_at \
             FROM job_history WHERE job_id = $1 ORDER BY recorded_at ASC",
        )
        .bind(id.into_inner())
        .fetch_all(self.pool.inner())
        .await
        .map_err(StoreError::from)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_jobs(&self, filter: JobFilter, page: PageRequest) -> ConveyorResult<Page<Job>> {
        let mut count_builder = sqlx::QueryBuilder::new("SELECT COUNT(*) FROM jobs");
        push_filter(&mut count_builder, &filter);
        let total: i64 = count_builder
            .build()
            .fetch_one(self.pool.inner())
            .await
            .map_err(StoreError::from)?
            .get(0);

        let mut list_builder = sqlx::QueryBuilder::new(format!("SELECT {JOB_COLUMNS} FROM jobs"));
        push_filter(&mut list_builder, &filter);
        list_builder
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(page.limit() as i64)
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);

        let rows = list_builder
            .build_query_as::<JobRow>()
            .fetch_all(self.pool.inner())
            .await
            .map_err(StoreError::from)?;
        let jobs: Vec<Job> = rows.into_iter().map(Into::into).collect();

        Ok(Page::new(jobs, page.page, page.size, total.max(0) as u64))
    }

    #[instrument(skip(self), fields(job_id = %id, worker_id = %worker_id))]
    async fn claim_job(&self, id: JobId, worker_id: &WorkerId) -> ConveyorResult<Option<Job>> {
        let mut tx = self.pool.inner().begin().await.map_err(StoreError::from)?;
        let now = Utc::now();

        // Lock the row and capture its pre-claim status so the history
        // entry records whether this was a fresh dispatch or a retry
        // coming off its backoff delay; a plain `UPDATE ... RETURNING`
        // only exposes the post-update row.
        let from_status: Option<JobStatus> = sqlx::query_scalar(
            "SELECT status FROM jobs WHERE id = $1 AND status IN ('PENDING', 'FAILED') FOR UPDATE",
        )
        .bind(id.into_inner())
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        let Some(from_status) = from_status else {
            tx.rollback().await.map_err(StoreError::from)?;
            return Ok(None);
        };

        let row = sqlx::query_as::<_, JobRow>(&format!(
            "UPDATE jobs SET status = 'PROCESSING', locked_by = $1, locked_at = $2, \
             attempt = attempt + 1, updated_at = $2 \
             WHERE id = $3 \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(worker_id.as_str())
        .bind(now)
        .bind(id.into_inner())
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        let job: Job = row.into();
        Self::record_history(&mut tx, id.into_inner(), Some(from_status), JobStatus::Processing, job.attempt, None)
            .await
            .map_err(StoreError::from)?;

        tx.commit().await.map_err(StoreError::from)?;
        Ok(Some(job))
    }

    async fn complete_job(&self, id: JobId, worker_id: &WorkerId, result: Option<Value>) -> ConveyorResult<bool> {
        let mut tx = self.pool.inner().begin().await.map_err(StoreError::from)?;
        let now = Utc::now();

        let updated = sqlx::query(
            "UPDATE jobs SET status = 'COMPLETED', result = $1, locked_by = NULL, locked_at = NULL, \
             completed_at = $2, updated_at = $2 \
             WHERE id = $3 AND status = 'PROCESSING' AND locked_by = $4 \
             RETURNING attempt",
        )
        .bind(&result)
        .bind(now)
        .bind(id.into_inner())
        .bind(worker_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        let Some(row) = updated else {
            tx.rollback().await.map_err(StoreError::from)?;
            return Ok(false);
        };

        let attempt: i32 = row.get(0);
        Self::record_history(&mut tx, id.into_inner(), Some(JobStatus::Processing), JobStatus::Completed, attempt, None)
            .await
            .map_err(StoreError::from)?;

        tx.commit().await.map_err(StoreError::from)?;
        Ok(true)
    }

    async fn complete_job_external(&self, id: JobId) -> ConveyorResult<bool> {
        let mut tx = self.pool.inner().begin().await.map_err(StoreError::from)?;
        let now = Utc::now();

        let updated = sqlx::query(
            "UPDATE jobs SET status = 'COMPLETED', locked_by = NULL, locked_at = NULL, \
             completed_at = $1, updated_at = $1 \
             WHERE id = $2 AND status = 'PROCESSING' \
             RETURNING attempt",
        )
        .bind(now)
        .bind(id.into_inner())
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        let Some(row) = updated else {
            tx.rollback().await.map_err(StoreError::from)?;
            return Ok(false);
        };

        let attempt: i32 = row.get(0);
        Self::record_history(&mut tx, id.into_inner(), Some(JobStatus::Processing), JobStatus::Completed, attempt, None)
            .await
            .map_err(StoreError::from)?;

        tx.commit().await.map_err(StoreError::from)?;
        Ok(true)
    }

    #[instrument(skip(self, error), fields(job_id = %id))]
    async fn retry_job(&self, id: JobId, error: &str, next_run_at: DateTime<Utc>) -> ConveyorResult<()> {
        let mut tx = self.pool.inner().begin().await.map_err(StoreError::from)?;

        let row = sqlx::query(
            "UPDATE jobs SET status = 'FAILED', run_at = $1, last_error = $2, \
             locked_by = NULL, locked_at = NULL, updated_at = NOW() \
             WHERE id = $3 \
             RETURNING attempt",
        )
        .bind(next_run_at)
        .bind(error)
        .bind(id.into_inner())
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        let attempt: i32 = row.get(0);
        Self::record_history(
            &mut tx,
            id.into_inner(),
            Some(JobStatus::Processing),
            JobStatus::Failed,
            attempt,
            Some(error),
        )
        .await
        .map_err(StoreError::from)?;

        tx.commit().await.map_err(StoreError::from)?;
        Ok(())
    }

    #[instrument(skip(self, error), fields(job_id = %id))]
    async fn mark_dead(&self, id: JobId, error: &str) -> ConveyorResult<()> {
        let mut tx = self.pool.inner().begin().await.map_err(StoreError::from)?;
        let now = Utc::now();

        let row = sqlx::query(
            "UPDATE jobs SET status = 'DEAD', last_error = $1, locked_by = NULL, locked_at = NULL, \
             completed_at = $2, updated_at = $2 \
             WHERE id = $3 \
             RETURNING attempt",
        )
        .bind(error)
        .bind(now)
        .bind(id.into_inner())
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        let attempt: i32 = row.get(0);
        Self::record_history(&mut tx, id.into_inner(), Some(JobStatus::Processing), JobStatus::Dead, attempt, Some(error))
            .await
            .map_err(StoreError::from)?;

        tx.commit().await.map_err(StoreError::from)?;
        warn!(job_id = %id, "job moved to dead letter");
        Ok(())
    }

    async fn cancel_job(&self, id: JobId) -> ConveyorResult<bool> {
        let mut tx = self.pool.inner().begin().await.map_err(StoreError::from)?;
        let now = Utc::now();

        let row = sqlx::query(
            "UPDATE jobs SET status = 'CANCELLED', completed_at = $1, updated_at = $1 \
             WHERE id = $2 AND status IN ('PENDING', 'SCHEDULED') \
             RETURNING attempt",
        )
        .bind(now)
        .bind(id.into_inner())
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(StoreError::from)?;
            return Ok(false);
        };

        let attempt: i32 = row.get(0);
        Self::record_history(&mut tx, id.into_inner(), None, JobStatus::Cancelled, attempt, None)
            .await
            .map_err(StoreError::from)?;

        tx.commit().await.map_err(StoreError::from)?;
        Ok(true)
    }

    async fn reopen_job(&self, id: JobId) -> ConveyorResult<Option<Job>> {
        let mut tx = self.pool.inner().begin().await.map_err(StoreError::from)?;
        let now = Utc::now();

        let row = sqlx::query_as::<_, JobRow>(&format!(
            "UPDATE jobs SET status = 'PENDING', attempt = 0, last_error = NULL, \
             locked_by = NULL, locked_at = NULL, completed_at = NULL, run_at = $1, updated_at = $1 \
             WHERE id = $2 AND status IN ('FAILED', 'DEAD', 'CANCELLED') \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(now)
        .bind(id.into_inner())
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(StoreError::from)?;
            return Ok(None);
        };

        Self::record_history(&mut tx, id.into_inner(), None, JobStatus::Pending, 0, None)
            .await
            .map_err(StoreError::from)?;

        tx.commit().await.map_err(StoreError::from)?;
        Ok(Some(row.into()))
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn reclaim_timed_out(&self, id: JobId, observed_locked_at: DateTime<Utc>) -> ConveyorResult<bool> {
        let mut tx = self.pool.inner().begin().await.map_err(StoreError::from)?;

        let row = sqlx::query(
            "UPDATE jobs SET status = 'PENDING', locked_by = NULL, locked_at = NULL, updated_at = NOW() \
             WHERE id = $1 AND status = 'PROCESSING' AND locked_at = $2 \
             RETURNING attempt",
        )
        .bind(id.into_inner())
        .bind(observed_locked_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(StoreError::from)?;
            return Ok(false);
        };

        let attempt: i32 = row.get(0);
        Self::record_history(&mut tx, id.into_inner(), Some(JobStatus::Processing), JobStatus::Pending, attempt, Some("reclaimed after visibility timeout"))
            .await
            .map_err(StoreError::from)?;

        tx.commit().await.map_err(StoreError::from)?;
        Ok(true)
    }

    async fn find_timed_out(&self, now: DateTime<Utc>) -> ConveyorResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE status = 'PROCESSING' AND locked_at IS NOT NULL \
             AND locked_at + (timeout_secs * INTERVAL '1 second') < $1"
        ))
        .bind(now)
        .fetch_all(self.pool.inner())
        .await
        .map_err(StoreError::from)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn promote_due_delayed(&self, queue: &str, now: DateTime<Utc>) -> ConveyorResult<Vec<Job>> {
        let mut tx = self.pool.inner().begin().await.map_err(StoreError::from)?;

        // Jobs due for promotion can come from either `Scheduled` (a
        // future-dated job) or `Failed` (a retry waiting out its
        // backoff); lock the candidate rows first so each history entry
        // records the status it actually promoted from.
        let due: Vec<(Uuid, JobStatus)> = sqlx::query_as(
            "SELECT id, status FROM jobs \
             WHERE queue = $1 AND status IN ('SCHEDULED', 'FAILED') AND run_at <= $2 \
             FOR UPDATE",
        )
        .bind(queue)
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        let mut promoted = Vec::with_capacity(due.len());
        for (id, from_status) in due {
            let row = sqlx::query_as::<_, JobRow>(&format!(
                "UPDATE jobs SET status = 'PENDING', updated_at = $1 WHERE id = $2 RETURNING {JOB_COLUMNS}"
            ))
            .bind(now)
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(StoreError::from)?;

            Self::record_history(&mut tx, id, Some(from_status), JobStatus::Pending, row.attempt, None)
                .await
                .map_err(StoreError::from)?;
            promoted.push(row);
        }

        tx.commit().await.map_err(StoreError::from)?;
        Ok(promoted.into_iter().map(Into::into).collect())
    }

    async fn sweep_orphaned_pending(&self, older_than: DateTime<Utc>) -> ConveyorResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'PENDING' AND updated_at < $1"
        ))
        .bind(older_than)
        .fetch_all(self.pool.inner())
        .await
        .map_err(StoreError::from)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn upsert_heartbeat(&self, heartbeat: WorkerHeartbeat) -> ConveyorResult<()> {
        sqlx::query(
            "INSERT INTO worker_heartbeats (worker_id, hostname, queues, concurrency, active_jobs, started_at, last_heartbeat) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (worker_id) DO UPDATE SET \
             hostname = EXCLUDED.hostname, queues = EXCLUDED.queues, concurrency = EXCLUDED.concurrency, \
             active_jobs = EXCLUDED.active_jobs, last_heartbeat = EXCLUDED.last_heartbeat",
        )
        .bind(heartbeat.worker_id.as_str())
        .bind(&heartbeat.hostname)
        .bind(&heartbeat.queues)
        .bind(heartbeat.concurrency)
        .bind(heartbeat.active_jobs)
        .bind(heartbeat.started_at)
        .bind(heartbeat.last_heartbeat)
        .execute(self.pool.inner())
        .await
        .map_err(StoreError::from)?;

        Ok(())
    }

    async fn stats(&self) -> ConveyorResult<JobCounts> {
        let row = sqlx::query(
            "SELECT \
             COUNT(*) FILTER (WHERE status = 'PENDING') AS pending, \
             COUNT(*) FILTER (WHERE status = 'SCHEDULED') AS scheduled, \
             COUNT(*) FILTER (WHERE status = 'PROCESSING') AS processing, \
             COUNT(*) FILTER (WHERE status = 'COMPLETED') AS completed, \
             COUNT(*) FILTER (WHERE status = 'DEAD') AS dead, \
             COUNT(*) FILTER (WHERE status = 'CANCELLED') AS cancelled \
             FROM jobs",
        )
        .fetch_one(self.pool.inner())
        .await
        .map_err(StoreError::from)?;

        Ok(JobCounts {
            pending: row.get("pending"),
            scheduled: row.get("scheduled"),
            processing: row.get("processing"),
            completed: row.get("completed"),
            dead: row.get("dead"),
            cancelled: row.get("cancelled"),
        })
    }
}

/// Convenience constructor used by `conveyor-server` at startup.
#[must_use]
pub fn postgres_store(pool: Arc<DatabasePool>) -> Arc<dyn DurableStore> {
    Arc::new(PostgresStore::new(pool))
}
