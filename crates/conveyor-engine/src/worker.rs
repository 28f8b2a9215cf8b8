//! Worker pool: concurrent polling lanes that claim, execute, and
//! finalize jobs against the coordination and durable stores.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use conveyor_config::{RetryConfig, WorkerConfig};
use conveyor_core::{ConveyorError, DurableStore, JobId, WorkerHeartbeat, WorkerId};
use tokio::sync::{broadcast, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::backoff;
use crate::coordination::CoordinationStore;
use crate::error::EngineResult;
use crate::handler::HandlerRegistry;
use crate::metrics::JobMetrics;

/// Interval between worker liveness reports to the durable store's
/// `WorkerHeartbeat` table. A stale heartbeat lets operators (or a
/// future reaper) distinguish a busy worker from a dead one
/// independent of the coordination store's in-memory view.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// A worker pool: `concurrency` independent lanes, each polling the
/// configured queues round-robin and running the per-job pipeline in
/// §4.7 of the job lifecycle to completion before polling again.
pub struct WorkerPool {
    id: WorkerId,
    store: Arc<dyn DurableStore>,
    coordination: CoordinationStore,
    handlers: HandlerRegistry,
    config: WorkerConfig,
    retry: RetryConfig,
    shutdown_tx: broadcast::Sender<()>,
    draining: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    in_flight: Arc<AtomicU64>,
    jobs_processed: Arc<AtomicU64>,
    jobs_failed: Arc<AtomicU64>,
    started_at: chrono::DateTime<Utc>,
}

impl WorkerPool {
    #[must_use]
    pub fn new(
        store: Arc<dyn DurableStore>,
        coordination: CoordinationStore,
        handlers: HandlerRegistry,
        config: WorkerConfig,
        retry: RetryConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            id: WorkerId::new(format!("worker-{}", Uuid::new_v4())),
            store,
            coordination,
            handlers,
            config,
            retry,
            shutdown_tx,
            draining: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicU64::new(0)),
            jobs_processed: Arc::new(AtomicU64::new(0)),
            jobs_failed: Arc::new(AtomicU64::new(0)),
            started_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Builds the heartbeat-reporting task: reports this worker's
    /// liveness to the durable store's `WorkerHeartbeat` table every
    /// [`HEARTBEAT_INTERVAL`] until a shutdown signal arrives. Takes
    /// owned clones rather than borrowing `self` so it can run as a
    /// `'static` spawned task alongside the lanes.
    fn heartbeat_task(&self) -> impl std::future::Future<Output = ()> {
        let store = self.store.clone();
        let worker_id = self.id.clone();
        let queues = self.config.queues.clone();
        let concurrency = self.config.concurrency;
        let started_at = self.started_at;
        let in_flight = self.in_flight.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());

        async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        let heartbeat = WorkerHeartbeat {
                            worker_id: worker_id.clone(),
                            hostname: hostname.clone(),
                            queues: queues.clone(),
                            concurrency: concurrency as i32,
                            active_jobs: in_flight.load(Ordering::SeqCst) as i32,
                            started_at,
                            last_heartbeat: Utc::now(),
                        };
                        if let Err(e) = store.upsert_heartbeat(heartbeat).await {
                            error!(worker_id = %worker_id, error = %e, "failed to report worker heartbeat");
                        }
                    }
                }
            }
        }
    }

    /// Runs every lane until a shutdown signal arrives, then drains
    /// in-flight jobs for up to `drain_timeout_secs` before returning.
    pub async fn start(&self) -> EngineResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(crate::error::EngineError::Internal("worker pool already running".to_string()));
        }

        info!(
            worker_id = %self.id,
            concurrency = self.config.concurrency,
            queues = ?self.config.queues,
            "starting worker pool"
        );

        let heartbeat_handle = tokio::spawn(self.heartbeat_task());

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut handles = Vec::with_capacity(self.config.concurrency);

        for lane in 0..self.config.concurrency {
            let store = self.store.clone();
            let coordination = self.coordination.clone();
            let handlers = self.handlers.clone();
            let worker_id = self.id.clone();
            let queues = self.config.queues.clone();
            let retry = self.retry.clone();
            let poll_interval = self.config.poll_interval();
            let draining = self.draining.clone();
            let in_flight = self.in_flight.clone();
            let jobs_processed = self.jobs_processed.clone();
            let jobs_failed = self.jobs_failed.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            let permit = semaphore.clone();

            let handle = tokio::spawn(
                async move {
                    let _permit = permit.acquire().await;
                    loop {
                        if draining.load(Ordering::SeqCst) {
                            break;
                        }

                        let mut claimed_any = false;
                        for queue in &queues {
                            if shutdown_rx.try_recv().is_ok() {
                                draining.store(true, Ordering::SeqCst);
                                break;
                            }

                            match coordination.dequeue(queue).await {
                                Ok(Some(id)) => {
                                    claimed_any = true;
                                    in_flight.fetch_add(1, Ordering::SeqCst);
                                    run_pipeline(
                                        &store,
                                        &coordination,
                                        &handlers,
                                        &worker_id,
                                        queue,
                                        id,
                                        &retry,
                                        &jobs_processed,
                                        &jobs_failed,
                                    )
                                    .await;
                                    in_flight.fetch_sub(1, Ordering::SeqCst);
                                }
                                Ok(None) => {}
                                Err(e) => error!(queue = %queue, error = %e, "failed to dequeue"),
                            }
                        }

                        if !claimed_any {
                            tokio::select! {
                                _ = shutdown_rx.recv() => { draining.store(true, Ordering::SeqCst); break; }
                                _ = tokio::time::sleep(poll_interval) => {}
                            }
                        }
                    }
                }
                .instrument(tracing::info_span!("worker_lane", lane)),
            );
            handles.push(handle);
        }

        for handle in handles {
            let _ = handle.await;
        }
        let _ = heartbeat_handle.await;

        info!(worker_id = %self.id, "waiting for in-flight jobs to drain");
        let in_flight = self.in_flight.clone();
        let drained = timeout(self.config.drain_timeout(), async {
            while in_flight.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                worker_id = %self.id,
                remaining = self.in_flight.load(Ordering::SeqCst),
                "drain timeout elapsed with jobs still in flight; exiting anyway, scheduler will reclaim them"
            );
        }

        self.running.store(false, Ordering::SeqCst);
        info!(
            worker_id = %self.id,
            processed = self.jobs_processed.load(Ordering::Relaxed),
            failed = self.jobs_failed.load(Ordering::Relaxed),
            "worker pool stopped"
        );

        Ok(())
    }

    /// Signals every lane to stop polling for new work once its current
    /// iteration completes.
    pub fn stop(&self) {
        info!(worker_id = %self.id, "stopping worker pool");
        let _ = self.shutdown_tx.send(());
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }
}

/// The per-job pipeline from §4.7: claim, dispatch, finalize. Runs to
/// completion on the lane that dequeued the id — never interleaved with
/// another job on the same lane.
#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    store: &Arc<dyn DurableStore>,
    coordination: &CoordinationStore,
    handlers: &HandlerRegistry,
    worker_id: &WorkerId,
    queue: &str,
    id: JobId,
    retry: &RetryConfig,
    jobs_processed: &Arc<AtomicU64>,
    jobs_failed: &Arc<AtomicU64>,
) {
    let job = match store.claim_job(id, worker_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            debug!(job_id = %id, "dequeued id was no longer claimable, acking");
            if let Err(e) = coordination.ack(queue, id).await {
                error!(job_id = %id, error = %e, "failed to ack non-eligible claim");
            }
            return;
        }
        Err(e) => {
            error!(job_id = %id, error = %e, "claim failed");
            let _ = coordination.ack(queue, id).await;
            return;
        }
    };

    debug!(job_id = %id, job_type = %job.job_type, attempt = job.attempt, "processing job");

    let started = std::time::Instant::now();
    let timeout_duration = Duration::from_secs(job.timeout_secs.max(0) as u64);
    let outcome = timeout(timeout_duration, handlers.dispatch(&job.job_type, job.payload.clone())).await;

    match outcome {
        Ok(Ok(result)) => {
            if let Err(e) = store.complete_job(id, worker_id, Some(result)).await {
                error!(job_id = %id, error = %e, "failed to mark job completed");
            }
            if let Err(e) = coordination.ack(queue, id).await {
                error!(job_id = %id, error = %e, "failed to ack completed job");
            }
            if let Err(e) = coordination.clear_failure_tracking(id).await {
                error!(job_id = %id, error = %e, "failed to clear failure tracking");
            }
            JobMetrics::job_completed(queue, &job.job_type, started.elapsed());
            jobs_processed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(e)) => {
            let job_type = job.job_type.clone();
            handle_failure(store, coordination, queue, id, job, &e.to_string(), retry, jobs_failed).await;
            JobMetrics::job_failed(queue, &job_type, "handler_failed", started.elapsed());
        }
        Err(_) => {
            let message = format!("job timed out after {}s", job.timeout_secs);
            let job_type = job.job_type.clone();
            handle_failure(store, coordination, queue, id, job, &message, retry, jobs_failed).await;
            JobMetrics::job_failed(queue, &job_type, "timeout", started.elapsed());
        }
    }
}

/// Implements §4.7.1: track the failure, decide dead-letter vs retry,
/// and always `ack` so the coordination store's processing set never
/// wedges even if this path itself errors.
async fn handle_failure(
    store: &Arc<dyn DurableStore>,
    coordination: &CoordinationStore,
    queue: &str,
    id: JobId,
    job: conveyor_core::Job,
    error_message: &str,
    retry: &RetryConfig,
    jobs_failed: &Arc<AtomicU64>,
) {
    let result: Result<(), ConveyorError> = async {
        let is_poison = coordination
            .track_failure(id, retry.poison_window_ms, retry.poison_threshold)
            .await
            .map_err(ConveyorError::from)?;

        if is_poison || job.attempt >= job.max_attempts {
            store.mark_dead(id, error_message).await?;
            coordination.move_to_dlq(queue, id).await.map_err(ConveyorError::from)?;
            warn!(job_id = %id, poison = is_poison, attempt = job.attempt, "job dead-lettered");
        } else {
            let next_run_at = backoff::next_run_at(retry, job.attempt as u32);
            store.retry_job(id, error_message, next_run_at).await?;
            coordination
                .insert_delayed(queue, id, next_run_at)
                .await
                .map_err(ConveyorError::from)?;
            warn!(job_id = %id, attempt = job.attempt, next_run_at = %next_run_at, "job scheduled for retry");
        }

        coordination.ack(queue, id).await.map_err(ConveyorError::from)?;
        Ok(())
    }
    .await;

    if let Err(e) = result {
        error!(job_id = %id, error = %e, "failure handler itself failed, acking to avoid wedging the processing set");
        let _ = coordination.ack(queue, id).await;
    }

    jobs_failed.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_config_durations_round_trip() {
        let config = WorkerConfig {
            poll_interval_ms: 250,
            drain_timeout_secs: 30,
            ..WorkerConfig::default()
        };
        assert_eq!(config.poll_interval().as_millis(), 250);
        assert_eq!(config.drain_timeout().as_secs(), 30);
    }
}
