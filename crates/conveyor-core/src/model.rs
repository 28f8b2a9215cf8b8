//! Shared domain types: job priority, status, and the job record itself.
//!
//! These types are consumed by `conveyor-store` (which persists them to
//! Postgres) and `conveyor-engine` (which schedules and executes them),
//! so they live here rather than in either crate.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::id::{JobId, WorkerId};

/// Relative dispatch priority of a job.
///
/// Priority is encoded into the coordination store's sorted-set score as
/// a large weight plus the job's enqueue timestamp, so that within a
/// priority band jobs are still served oldest-first. See
/// [`Priority::weight`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "job_priority", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// The weight added to a job's enqueue timestamp to produce its
    /// coordination-store score. High-priority jobs get a weight of
    /// zero, so they always sort ahead of every medium- or low-priority
    /// job regardless of how long those have been waiting.
    #[must_use]
    pub const fn weight(self) -> f64 {
        match self {
            Self::High => 0.0,
            Self::Medium => 1e13,
            Self::Low => 2e13,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle state of a job.
///
/// Transitions follow a strict state diagram: `Pending`/`Failed` jobs
/// move to `Processing` when claimed; `Processing` resolves to
/// `Completed`, back to `Failed` (retry pending, resting in `delayed(Q)`
/// until its backoff elapses), or to `Dead` once retries are exhausted or
/// a poison pill is detected. `Scheduled` is the pre-dispatch resting
/// state for a job created with a future `run_at`; the scheduler promotes
/// both `Scheduled` and `Failed` jobs back to `Pending` once their
/// `delayed(Q)` entry comes due. `Cancelled` is reachable from `Pending`
/// or `Scheduled`. `Completed`, `Dead`, and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "job_status", rename_all = "UPPERCASE"))]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Scheduled,
    Processing,
    Completed,
    Failed,
    Dead,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses never transition again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Dead | Self::Cancelled)
    }

    /// Statuses a job may be claimed from by a worker.
    ///
    /// A job whose previous attempt failed rests as `Failed` (not
    /// `Pending`) while it waits out its backoff delay in `delayed(Q)`;
    /// once the scheduler promotes it back to `Pending` it is claimable
    /// again the same way a fresh job is.
    #[must_use]
    pub const fn is_claimable(self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Scheduled => "SCHEDULED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Dead => "DEAD",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// The canonical, durable record for a job.
///
/// This is the row shape stored by `conveyor-store` in Postgres. The
/// coordination store only ever holds a job id plus enough of this to
/// sort and dispatch it; the durable record here is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: String,
    pub payload: Value,
    pub priority: Priority,
    pub status: JobStatus,
    pub queue: String,
    pub attempt: i32,
    pub max_attempts: i32,
    pub idempotency_key: Option<String>,
    /// When a `Scheduled` job becomes eligible for dispatch, or when a
    /// `Processing` job's visibility timeout expires.
    pub run_at: DateTime<Utc>,
    pub locked_by: Option<WorkerId>,
    pub locked_at: Option<DateTime<Utc>>,
    pub timeout_secs: i64,
    pub last_error: Option<String>,
    /// Set only once the job reaches `Completed`; the handler's return
    /// value, serialized by the durable store's blob codec.
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Parameters for submitting a new job, before the store assigns
/// bookkeeping fields (attempt counter, timestamps, status).
///
/// Field-level constraints here cover everything `validator` can
/// express; the payload-shape check (must be a JSON object or array)
/// is applied separately by the intake layer.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewJob {
    #[validate(length(min = 1, max = 200))]
    pub job_type: String,
    pub payload: Value,
    #[serde(default)]
    pub priority: Priority,
    #[validate(length(min = 1, max = 100))]
    pub queue: String,
    #[validate(range(min = 1))]
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    pub idempotency_key: Option<String>,
    /// Defers the job until this instant; `None` means dispatch
    /// immediately.
    pub run_at: Option<DateTime<Utc>>,
    #[validate(range(min = 5, max = 3600))]
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: i64,
}

const fn default_max_attempts() -> i32 {
    5
}

const fn default_timeout_secs() -> i64 {
    30
}

/// One entry in a job's audit trail: every status transition, with the
/// error that caused it when applicable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHistoryEntry {
    pub id: i64,
    pub job_id: JobId,
    pub from_status: Option<JobStatus>,
    pub to_status: JobStatus,
    pub attempt: i32,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Liveness record for a worker process, persisted so the scheduler and
/// operators can tell a stalled worker from a dead one without relying
/// solely on the coordination store's in-memory view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: WorkerId,
    pub hostname: String,
    pub queues: Vec<String>,
    pub concurrency: i32,
    pub active_jobs: i32,
    pub last_heartbeat: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_weights_are_strictly_ordered() {
        assert!(Priority::High.weight() < Priority::Medium.weight());
        assert!(Priority::Medium.weight() < Priority::Low.weight());
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Dead.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(!JobStatus::Scheduled.is_terminal());
    }

    #[test]
    fn claimable_statuses() {
        assert!(JobStatus::Pending.is_claimable());
        assert!(JobStatus::Failed.is_claimable());
        assert!(!JobStatus::Processing.is_claimable());
        assert!(!JobStatus::Scheduled.is_claimable());
    }

    #[test]
    fn default_priority_is_medium() {
        assert_eq!(Priority::default(), Priority::Medium);
    }
}
