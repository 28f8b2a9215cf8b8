//! Prometheus metrics for the job queue.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Metric names.
pub mod names {
    pub const JOBS_ENQUEUED_TOTAL: &str = "conveyor_jobs_enqueued_total";
    pub const JOBS_DEQUEUED_TOTAL: &str = "conveyor_jobs_dequeued_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "conveyor_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "conveyor_jobs_failed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "conveyor_jobs_retried_total";
    pub const JOBS_DEAD_LETTERED_TOTAL: &str = "conveyor_jobs_dead_lettered_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "conveyor_jobs_cancelled_total";
    pub const JOBS_TIMED_OUT_TOTAL: &str = "conveyor_jobs_timed_out_total";
    pub const JOBS_POISONED_TOTAL: &str = "conveyor_jobs_poisoned_total";

    pub const QUEUE_WAITING: &str = "conveyor_queue_waiting";
    pub const QUEUE_PROCESSING: &str = "conveyor_queue_processing";
    pub const QUEUE_DELAYED: &str = "conveyor_queue_delayed";
    pub const QUEUE_DLQ: &str = "conveyor_queue_dlq";

    pub const JOB_DURATION_SECONDS: &str = "conveyor_job_duration_seconds";
    pub const JOB_WAIT_TIME_SECONDS: &str = "conveyor_job_wait_time_seconds";

    pub const WORKERS_ACTIVE: &str = "conveyor_workers_active";
    pub const WORKERS_CONCURRENCY: &str = "conveyor_workers_concurrency";

    pub const SCHEDULER_IS_LEADER: &str = "conveyor_scheduler_is_leader";
    pub const SCHEDULER_TICKS_TOTAL: &str = "conveyor_scheduler_ticks_total";

    pub const COORDINATION_POOL_SIZE: &str = "conveyor_coordination_pool_size";
    pub const COORDINATION_POOL_AVAILABLE: &str = "conveyor_coordination_pool_available";
    pub const COORDINATION_OPERATION_DURATION: &str = "conveyor_coordination_operation_duration_seconds";
}

/// Registers every metric's description once at startup.
pub fn register_metrics() {
    describe_counter!(names::JOBS_ENQUEUED_TOTAL, "Total number of jobs enqueued");
    describe_counter!(names::JOBS_DEQUEUED_TOTAL, "Total number of jobs dequeued for processing");
    describe_counter!(names::JOBS_COMPLETED_TOTAL, "Total number of jobs completed successfully");
    describe_counter!(names::JOBS_FAILED_TOTAL, "Total number of jobs that failed an attempt");
    describe_counter!(names::JOBS_RETRIED_TOTAL, "Total number of job retries scheduled");
    describe_counter!(names::JOBS_DEAD_LETTERED_TOTAL, "Total number of jobs sent to the dead-letter queue");
    describe_counter!(names::JOBS_CANCELLED_TOTAL, "Total number of jobs cancelled");
    describe_counter!(names::JOBS_TIMED_OUT_TOTAL, "Total number of jobs whose handler invocation timed out");
    describe_counter!(names::JOBS_POISONED_TOTAL, "Total number of jobs short-circuited to DLQ by poison-pill detection");

    describe_gauge!(names::QUEUE_WAITING, "Current size of the waiting index per queue");
    describe_gauge!(names::QUEUE_PROCESSING, "Current size of the processing set per queue");
    describe_gauge!(names::QUEUE_DELAYED, "Current size of the delayed index per queue");
    describe_gauge!(names::QUEUE_DLQ, "Current size of the dead-letter queue per queue");

    describe_histogram!(names::JOB_DURATION_SECONDS, "Job execution duration in seconds");
    describe_histogram!(names::JOB_WAIT_TIME_SECONDS, "Job wait time (time in queue) in seconds");

    describe_gauge!(names::WORKERS_ACTIVE, "Number of active worker lanes");
    describe_gauge!(names::WORKERS_CONCURRENCY, "Configured worker pool concurrency");

    describe_gauge!(names::SCHEDULER_IS_LEADER, "Whether this scheduler instance holds leadership (1) or not (0)");
    describe_counter!(names::SCHEDULER_TICKS_TOTAL, "Total number of scheduler ticks run while leader");

    describe_gauge!(names::COORDINATION_POOL_SIZE, "Coordination store connection pool size");
    describe_gauge!(names::COORDINATION_POOL_AVAILABLE, "Available connections in the coordination store pool");
    describe_histogram!(names::COORDINATION_OPERATION_DURATION, "Coordination store operation duration in seconds");
}

/// Job-level metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    pub fn job_enqueued(queue: &str, job_type: &str, priority: &str) {
        counter!(
            names::JOBS_ENQUEUED_TOTAL,
            "queue" => queue.to_string(),
            "job_type" => job_type.to_string(),
            "priority" => priority.to_string()
        )
        .increment(1);
    }

    pub fn job_dequeued(queue: &str, job_type: &str) {
        counter!(names::JOBS_DEQUEUED_TOTAL, "queue" => queue.to_string(), "job_type" => job_type.to_string()).increment(1);
    }

    pub fn job_completed(queue: &str, job_type: &str, duration: Duration) {
        counter!(names::JOBS_COMPLETED_TOTAL, "queue" => queue.to_string(), "job_type" => job_type.to_string()).increment(1);
        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "job_type" => job_type.to_string(),
            "status" => "completed"
        )
        .record(duration.as_secs_f64());
    }

    pub fn job_failed(queue: &str, job_type: &str, reason: &str, duration: Duration) {
        counter!(
            names::JOBS_FAILED_TOTAL,
            "queue" => queue.to_string(),
            "job_type" => job_type.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "job_type" => job_type.to_string(),
            "status" => "failed"
        )
        .record(duration.as_secs_f64());
    }

    pub fn job_retried(queue: &str, job_type: &str, attempt: i32) {
        counter!(
            names::JOBS_RETRIED_TOTAL,
            "queue" => queue.to_string(),
            "job_type" => job_type.to_string(),
            "attempt" => attempt.to_string()
        )
        .increment(1);
    }

    pub fn job_dead_lettered(queue: &str, job_type: &str, poison: bool) {
        counter!(
            names::JOBS_DEAD_LETTERED_TOTAL,
            "queue" => queue.to_string(),
            "job_type" => job_type.to_string()
        )
        .increment(1);

        if poison {
            counter!(names::JOBS_POISONED_TOTAL, "queue" => queue.to_string(), "job_type" => job_type.to_string()).increment(1);
        }
    }

    pub fn job_cancelled(queue: &str, job_type: &str) {
        counter!(names::JOBS_CANCELLED_TOTAL, "queue" => queue.to_string(), "job_type" => job_type.to_string()).increment(1);
    }

    pub fn job_timed_out(queue: &str, job_type: &str) {
        counter!(names::JOBS_TIMED_OUT_TOTAL, "queue" => queue.to_string(), "job_type" => job_type.to_string()).increment(1);
    }

    pub fn job_wait_time(queue: &str, job_type: &str, wait_time: Duration) {
        histogram!(names::JOB_WAIT_TIME_SECONDS, "queue" => queue.to_string(), "job_type" => job_type.to_string()).record(wait_time.as_secs_f64());
    }

    pub fn update_queue_depths(queue: &str, waiting: u64, processing: u64, delayed: u64, dlq: u64) {
        gauge!(names::QUEUE_WAITING, "queue" => queue.to_string()).set(waiting as f64);
        gauge!(names::QUEUE_PROCESSING, "queue" => queue.to_string()).set(processing as f64);
        gauge!(names::QUEUE_DELAYED, "queue" => queue.to_string()).set(delayed as f64);
        gauge!(names::QUEUE_DLQ, "queue" => queue.to_string()).set(dlq as f64);
    }
}

/// Worker pool metrics recorder.
#[derive(Clone)]
pub struct WorkerMetrics;

impl WorkerMetrics {
    pub fn update_workers(worker_id: &str, active: u64, concurrency: usize) {
        gauge!(names::WORKERS_ACTIVE, "worker_id" => worker_id.to_string()).set(active as f64);
        gauge!(names::WORKERS_CONCURRENCY, "worker_id" => worker_id.to_string()).set(concurrency as f64);
    }
}

/// Scheduler metrics recorder.
#[derive(Clone)]
pub struct SchedulerMetrics;

impl SchedulerMetrics {
    pub fn update_leader_status(scheduler_id: &str, is_leader: bool) {
        gauge!(names::SCHEDULER_IS_LEADER, "scheduler_id" => scheduler_id.to_string()).set(if is_leader { 1.0 } else { 0.0 });
    }

    pub fn tick_completed(scheduler_id: &str) {
        counter!(names::SCHEDULER_TICKS_TOTAL, "scheduler_id" => scheduler_id.to_string()).increment(1);
    }
}

/// Coordination store (Redis) metrics recorder.
#[derive(Clone)]
pub struct CoordinationMetrics;

impl CoordinationMetrics {
    pub fn update_pool_status(pool_size: usize, available: usize) {
        gauge!(names::COORDINATION_POOL_SIZE).set(pool_size as f64);
        gauge!(names::COORDINATION_POOL_AVAILABLE).set(available as f64);
    }

    pub fn operation_duration(operation: &str, duration: Duration) {
        histogram!(names::COORDINATION_OPERATION_DURATION, "operation" => operation.to_string()).record(duration.as_secs_f64());
    }
}
