//! Distributed task queue runtime: coordination-store access, job
//! intake, handler dispatch, the worker pool, and the leader-elected
//! scheduler.
//!
//! `conveyor-core` defines the domain model and the
//! [`conveyor_core::DurableStore`] contract; this crate is where that
//! contract meets Redis-backed coordination and turns into running
//! queues.
//!
//! ```text
//! Intake ──create_job──> DurableStore (Postgres)
//!    │                        ▲
//!    └──enqueue──> CoordinationStore (Redis) <──dequeue── WorkerPool ──dispatch──> HandlerRegistry
//!                        ▲
//!                        └──tick── Scheduler (leader-elected)
//! ```

pub mod backoff;
pub mod coordination;
pub mod error;
pub mod handler;
pub mod intake;
pub mod metrics;
pub mod redis;
pub mod scheduler;
pub mod status;
pub mod worker;

pub use backoff::{delay_for_attempt, next_run_at};
pub use coordination::{CoordinationStore, QueueDepths};
pub use error::{EngineError, EngineResult};
pub use handler::{HandlerFuture, HandlerRegistry, JobHandler};
pub use intake::{CreateResult, Intake, TransitionResult};
pub use metrics::{register_metrics, CoordinationMetrics, JobMetrics, SchedulerMetrics, WorkerMetrics};
pub use redis::{create_pool, CoordinationKeys};
pub use scheduler::{Scheduler, SchedulerStats};
pub use status::{DashboardStats, HealthStatus, JobStatusTracker};
pub use worker::WorkerPool;
