//! Job intake (C8): the create/get/list/retry/cancel/complete
//! operations an HTTP or RPC surface would bind to. This module models
//! those operations and their outcomes directly; no transport is
//! implemented here.

use std::sync::Arc;

use conveyor_core::{ConveyorError, ConveyorResult, CreateOutcome, DurableStore, Job, JobFilter, JobHistoryEntry, JobId, NewJob, Page, PageRequest};
use validator::Validate;

use crate::coordination::CoordinationStore;
use crate::metrics::JobMetrics;

/// Outcome of [`Intake::create`], distinguishing a genuinely new row
/// from an idempotent replay so a caller can map the former to HTTP 201
/// and the latter to HTTP 200.
#[derive(Debug, Clone)]
pub struct CreateResult {
    pub job: Job,
    pub idempotent: bool,
}

/// Outcome of a conflict-checked transition ([`Intake::retry`],
/// [`Intake::cancel`], [`Intake::complete`]).
#[derive(Debug, Clone)]
pub enum TransitionResult {
    Applied(Job),
    NotFound,
    Conflict,
}

/// The intake surface: validates input, applies it to the durable
/// store, and keeps the coordination store's hints in sync.
pub struct Intake {
    store: Arc<dyn DurableStore>,
    coordination: CoordinationStore,
}

impl Intake {
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>, coordination: CoordinationStore) -> Self {
        Self { store, coordination }
    }

    /// Validates and submits a new job. Idempotent on `idempotency_key`:
    /// a second `create` with the same key returns the original job
    /// with `idempotent: true` instead of inserting a duplicate row.
    pub async fn create(&self, new_job: NewJob) -> ConveyorResult<CreateResult> {
        validate(&new_job)?;

        let outcome = self.store.create_job(new_job).await?;
        let CreateOutcome { job, created } = outcome;

        if created {
            match job.run_at.signed_duration_since(chrono::Utc::now()).num_milliseconds() {
                delay_ms if delay_ms > 0 => {
                    self.coordination
                        .insert_delayed(&job.queue, job.id, job.run_at)
                        .await
                        .map_err(crate::error::EngineError::from)?;
                }
                _ => {
                    self.coordination
                        .enqueue(&job.queue, job.id, job.priority, chrono::Utc::now())
                        .await
                        .map_err(crate::error::EngineError::from)?;
                }
            }
            JobMetrics::job_enqueued(&job.queue, &job.job_type, &job.priority.to_string());
        }

        Ok(CreateResult { job, idempotent: !created })
    }

    /// Fetches a job and its transition history.
    pub async fn get(&self, id: JobId) -> ConveyorResult<Option<(Job, Vec<JobHistoryEntry>)>> {
        let Some(job) = self.store.get_job(id).await? else {
            return Ok(None);
        };
        let history = self.store.get_job_history(id).await?;
        Ok(Some((job, history)))
    }

    /// Lists jobs matching an optional filter, paginated.
    pub async fn list(&self, filter: JobFilter, page: PageRequest) -> ConveyorResult<Page<Job>> {
        self.store.list_jobs(filter, page).await
    }

    /// Re-opens a job from `{Failed, Dead, Cancelled}` back to
    /// `Pending`, clearing attempt count and error, then re-enqueues it.
    /// A `Scheduled` job (never failed, just future-dated) is not a
    /// valid source state and returns `Conflict`.
    pub async fn retry(&self, id: JobId) -> ConveyorResult<TransitionResult> {
        let Some(job) = self.store.reopen_job(id).await? else {
            return Ok(match self.store.get_job(id).await? {
                Some(_) => TransitionResult::Conflict,
                None => TransitionResult::NotFound,
            });
        };

        self.coordination
            .remove_from_dlq(&job.queue, job.id)
            .await
            .map_err(crate::error::EngineError::from)?;
        self.coordination
            .enqueue(&job.queue, job.id, job.priority, chrono::Utc::now())
            .await
            .map_err(crate::error::EngineError::from)?;

        Ok(TransitionResult::Applied(job))
    }

    /// Cancels a job from `{Pending, Scheduled}`. Clears both the
    /// waiting and delayed coordination-store indexes unconditionally,
    /// since the caller has no way to know which one currently holds
    /// the id.
    pub async fn cancel(&self, id: JobId) -> ConveyorResult<TransitionResult> {
        let Some(job) = self.store.get_job(id).await? else {
            return Ok(TransitionResult::NotFound);
        };

        let cancelled = self.store.cancel_job(id).await?;
        if !cancelled {
            return Ok(TransitionResult::Conflict);
        }

        self.coordination
            .remove_waiting(&job.queue, id)
            .await
            .map_err(crate::error::EngineError::from)?;
        self.coordination
            .remove_delayed(&job.queue, id)
            .await
            .map_err(crate::error::EngineError::from)?;

        JobMetrics::job_cancelled(&job.queue, &job.job_type);

        let job = self.store.get_job(id).await?.ok_or_else(|| ConveyorError::JobNotFound(id.to_string()))?;
        Ok(TransitionResult::Applied(job))
    }

    /// External finalization path for handlers that hand off execution
    /// and report completion out-of-band, rather than returning from
    /// the worker's synchronous dispatch.
    pub async fn complete(&self, id: JobId) -> ConveyorResult<TransitionResult> {
        let Some(job) = self.store.get_job(id).await? else {
            return Ok(TransitionResult::NotFound);
        };

        let completed = self.store.complete_job_external(id).await?;
        if !completed {
            return Ok(TransitionResult::Conflict);
        }

        self.coordination.ack(&job.queue, id).await.map_err(crate::error::EngineError::from)?;

        let job = self.store.get_job(id).await?.ok_or_else(|| ConveyorError::JobNotFound(id.to_string()))?;
        Ok(TransitionResult::Applied(job))
    }
}

/// Validates a new job submission's shape before it ever reaches the
/// durable store. Field-level constraints (lengths, ranges) are
/// declared on [`NewJob`] itself; the payload-shape check can't be
/// expressed as a derive attribute so it's applied here.
fn validate(new_job: &NewJob) -> ConveyorResult<()> {
    new_job.validate().map_err(|e| ConveyorError::validation(e.to_string()))?;

    if !new_job.payload.is_object() && !new_job.payload.is_array() {
        return Err(ConveyorError::validation("payload must be a JSON object or array"));
    }

    Ok(())
}
