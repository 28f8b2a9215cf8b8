//! Distributed scheduler (C6): leader-elected tick loop that promotes
//! due-delayed jobs, reclaims timed-out claims, and sweeps orphaned
//! pending jobs back into the coordination store.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use conveyor_config::SchedulerConfig;
use conveyor_core::{DurableStore, JobStatus};
use deadpool_redis::Pool;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::coordination::CoordinationStore;
use crate::error::EngineResult;
use crate::redis::CoordinationKeys;

/// Scheduler run statistics, surfaced for the status/metrics layer.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub id: String,
    pub is_leader: bool,
    pub ticks_run: u64,
}

/// Distributed leader-elected tick loop. Safe to run one instance per
/// worker fleet or several — every tick's operations are idempotent, so
/// a second instance winning a leadership race after a network blip
/// causes no duplicate work.
pub struct Scheduler {
    id: String,
    pool: Pool,
    store: Arc<dyn DurableStore>,
    coordination: CoordinationStore,
    config: SchedulerConfig,
    keys: CoordinationKeys,
    queues: Vec<String>,
    shutdown_tx: broadcast::Sender<()>,
    running: Arc<AtomicBool>,
    is_leader: Arc<AtomicBool>,
    ticks_run: Arc<AtomicU64>,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        pool: Pool,
        store: Arc<dyn DurableStore>,
        coordination: CoordinationStore,
        config: SchedulerConfig,
        key_prefix: impl Into<String>,
        queues: Vec<String>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            id: format!("scheduler-{}", Uuid::new_v4()),
            pool,
            store,
            coordination,
            config,
            keys: CoordinationKeys::new(key_prefix),
            queues,
            shutdown_tx,
            running: Arc::new(AtomicBool::new(false)),
            is_leader: Arc::new(AtomicBool::new(false)),
            ticks_run: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Attempts to acquire the scheduler leader lock with `SET NX EX`,
    /// or refreshes the TTL if this instance already owns it.
    async fn try_acquire_leadership(&self) -> EngineResult<bool> {
        let mut conn = self.pool.get().await?;
        let lock_key = self.keys.scheduler_lock();
        let ttl_secs = self.config.leader_lock_ttl_secs as i64;

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&lock_key)
            .arg(&self.id)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut *conn)
            .await?;

        if acquired.is_some() {
            self.is_leader.store(true, Ordering::SeqCst);
            info!(scheduler_id = %self.id, "acquired scheduler leadership");
            return Ok(true);
        }

        let current: Option<String> = conn.get(&lock_key).await?;
        if current.as_deref() == Some(self.id.as_str()) {
            let _: () = conn.expire(&lock_key, ttl_secs).await?;
            return Ok(true);
        }

        self.is_leader.store(false, Ordering::SeqCst);
        Ok(false)
    }

    /// Releases the leader lock, but only if this instance still owns
    /// it — guarded by a Lua script so a stale holder never deletes a
    /// lock a newer leader has since acquired.
    async fn release_leadership(&self) -> EngineResult<()> {
        if !self.is_leader.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut conn = self.pool.get().await?;
        let lua_script = r#"
            if redis.call("get", KEYS[1]) == ARGV[1] then
                return redis.call("del", KEYS[1])
            else
                return 0
            end
        "#;

        let _: i32 = redis::Script::new(lua_script)
            .key(self.keys.scheduler_lock())
            .arg(&self.id)
            .invoke_async(&mut *conn)
            .await?;

        self.is_leader.store(false, Ordering::SeqCst);
        info!(scheduler_id = %self.id, "released scheduler leadership");
        Ok(())
    }

    /// Runs the leader-check and tick loop until a shutdown signal
    /// arrives.
    pub async fn start(&self) -> EngineResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(crate::error::EngineError::Internal("scheduler already running".to_string()));
        }

        info!(scheduler_id = %self.id, tick_interval_ms = self.config.tick_interval_ms, "starting scheduler");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut tick_interval = interval(self.config.tick_interval());
        let leader_check_period = Duration::from_secs((self.config.leader_lock_ttl_secs / 3).max(1));
        let mut leader_check_interval = interval(leader_check_period);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(scheduler_id = %self.id, "received shutdown signal");
                    break;
                }

                _ = leader_check_interval.tick() => {
                    if let Err(e) = self.try_acquire_leadership().await {
                        error!(error = %e, "failed to check leadership");
                    }
                }

                _ = tick_interval.tick() => {
                    if self.is_leader.load(Ordering::SeqCst) {
                        if let Err(e) = self.run_tick().await {
                            error!(error = %e, "scheduler tick failed");
                        } else {
                            self.ticks_run.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
        }

        if let Err(e) = self.release_leadership().await {
            warn!(error = %e, "failed to release leadership on shutdown");
        }

        self.running.store(false, Ordering::SeqCst);
        info!(scheduler_id = %self.id, "scheduler stopped");
        Ok(())
    }

    pub fn stop(&self) {
        info!(scheduler_id = %self.id, "stopping scheduler");
        let _ = self.shutdown_tx.send(());
    }

    /// One tick: for each configured queue, promote due-delayed jobs and
    /// reclaim timed-out claims; sweep orphaned pending rows on the
    /// first tick and every `sweep_interval_ticks` after that.
    async fn run_tick(&self) -> EngineResult<()> {
        let now = Utc::now();

        for queue in &self.queues {
            self.promote_due_delayed(queue, now).await?;
        }

        self.reclaim_timed_out().await?;

        let ticks_run = self.ticks_run.load(Ordering::Relaxed);
        if ticks_run % self.config.sweep_interval_ticks.max(1) == 0 {
            self.sweep_orphaned_pending(now).await?;
        }

        Ok(())
    }

    /// Pops everything due in `delayed(Q)`, then re-checks each id's
    /// durable row before re-enqueueing — a row that moved to a
    /// terminal state during the delay (e.g. cancelled) is dropped
    /// silently rather than re-dispatched.
    async fn promote_due_delayed(&self, queue: &str, now: chrono::DateTime<Utc>) -> EngineResult<()> {
        let due = self.coordination.pop_due_delayed(queue, now).await?;
        if due.is_empty() {
            return Ok(());
        }
        let due_ids: std::collections::HashSet<_> = due.iter().copied().collect();

        // Scoped to this queue: the durable store only promotes rows
        // whose `queue` column matches, so a fleet running several
        // queues never has one queue's tick sweep up another's.
        let promoted = self.store.promote_due_delayed(queue, now).await?;
        let promoted_ids: std::collections::HashSet<_> = promoted.iter().map(|j| j.id).collect();

        for id in &due {
            if !promoted_ids.contains(id) {
                match self.store.get_job(*id).await? {
                    Some(job)
                        if job.status == JobStatus::Pending
                            || job.status == JobStatus::Scheduled
                            || job.status == JobStatus::Failed =>
                    {
                        self.coordination.enqueue(queue, *id, job.priority, now).await?;
                    }
                    _ => debug!(job_id = %id, "delayed job is no longer eligible for promotion, dropping"),
                }
            }
        }

        for job in &promoted {
            if due_ids.contains(&job.id) {
                self.coordination.enqueue(queue, job.id, job.priority, now).await?;
                debug!(job_id = %job.id, "promoted delayed job to waiting");
            }
        }

        Ok(())
    }

    /// Enumerates every `Processing` job across all queues whose
    /// visibility timeout has elapsed and conditionally reverts each,
    /// guarding the durable write on the observed `locked_at` so a
    /// concurrent success-finalize from the original worker can't be
    /// clobbered. Unlike `promote_due_delayed`, this scans globally
    /// rather than per-queue — a job's own `queue` field (not the
    /// caller's loop variable) decides which coordination-store index
    /// it's acked from and re-enqueued into.
    async fn reclaim_timed_out(&self) -> EngineResult<()> {
        let now = Utc::now();
        let timed_out = self.store.find_timed_out(now).await?;

        for job in timed_out {
            let Some(locked_at) = job.locked_at else { continue };
            let reclaimed = self.store.reclaim_timed_out(job.id, locked_at).await?;
            if reclaimed {
                self.coordination.ack(&job.queue, job.id).await?;
                self.coordination.enqueue(&job.queue, job.id, job.priority, now).await?;
                warn!(job_id = %job.id, queue = %job.queue, "reclaimed timed-out job");
            }
        }

        Ok(())
    }

    /// Re-enqueues pending rows that exist in the durable store but
    /// have no coordination-store hint, covering the gap where a
    /// process crashed between `create_job` and `enqueue`.
    async fn sweep_orphaned_pending(&self, now: chrono::DateTime<Utc>) -> EngineResult<()> {
        let threshold = now - chrono::Duration::seconds(30);
        let orphaned = self.store.sweep_orphaned_pending(threshold).await?;

        for job in orphaned {
            self.coordination.enqueue(&job.queue, job.id, job.priority, job.created_at).await?;
            warn!(job_id = %job.id, queue = %job.queue, "re-enqueued orphaned pending job");
        }

        Ok(())
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            id: self.id.clone(),
            is_leader: self.is_leader(),
            ticks_run: self.ticks_run.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leader_lock_ttl_exceeds_tick_interval() {
        let config = SchedulerConfig::default();
        assert!(config.leader_lock_ttl_secs * 1000 > config.tick_interval_ms);
    }
}
