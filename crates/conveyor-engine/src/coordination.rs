//! The coordination store (C2): Redis-backed hints layered over the
//! durable store's five key families — `waiting(Q)`, `processing(Q)`,
//! `delayed(Q)`, `dlq(Q)`, and `poison(job_id)`.
//!
//! Every key here holds only a job id (or a failure counter); the
//! durable store remains the source of truth for job state. Operations
//! that must touch more than one key atomically are expressed as Lua
//! scripts, the same way the leader-election lock release is.

use chrono::{DateTime, Utc};
use conveyor_core::{JobId, Priority};
use deadpool_redis::Pool;
use redis::AsyncCommands;

use crate::error::EngineResult;
use crate::redis::CoordinationKeys;

/// Atomically pops the lowest-scored id from `waiting(Q)` and records it
/// as claimed in `processing(Q)`, in one round trip.
const DEQUEUE_SCRIPT: &str = r#"
local popped = redis.call("ZPOPMIN", KEYS[1], 1)
if #popped == 0 then
    return false
end
redis.call("SADD", KEYS[2], popped[1])
return popped[1]
"#;

/// Atomically removes `id` from `processing(Q)` and appends it to
/// `dlq(Q)`.
const MOVE_TO_DLQ_SCRIPT: &str = r#"
redis.call("SREM", KEYS[1], ARGV[1])
redis.call("RPUSH", KEYS[2], ARGV[1])
return 1
"#;

/// Atomically pops every member of `delayed(Q)` scored at or below
/// `now`, returning the popped ids.
const POP_DUE_DELAYED_SCRIPT: &str = r#"
local due = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1])
if #due > 0 then
    redis.call("ZREMRANGEBYSCORE", KEYS[1], "-inf", ARGV[1])
end
return due
"#;

/// Atomically records a failure timestamp in the poison-pill sorted
/// set, trims entries older than the window, and returns the remaining
/// count. `ARGV`: 1=now (ms), 2=unique member, 3=window cutoff (ms),
/// 4=key TTL (seconds).
const TRACK_FAILURE_SCRIPT: &str = r#"
redis.call("ZADD", KEYS[1], ARGV[1], ARGV[2])
redis.call("ZREMRANGEBYSCORE", KEYS[1], "-inf", ARGV[3])
local count = redis.call("ZCARD", KEYS[1])
redis.call("EXPIRE", KEYS[1], ARGV[4])
return count
"#;

/// Handle onto the coordination store's Redis pool and key layout.
#[derive(Clone)]
pub struct CoordinationStore {
    pool: Pool,
    keys: std::sync::Arc<CoordinationKeys>,
}

impl CoordinationStore {
    #[must_use]
    pub fn new(pool: Pool, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            keys: std::sync::Arc::new(CoordinationKeys::new(key_prefix)),
        }
    }

    /// Adds `id` to `waiting(Q)`, scored by priority weight plus the
    /// enqueue instant so ties within one priority resolve oldest-first.
    pub async fn enqueue(&self, queue: &str, id: JobId, priority: Priority, enqueued_at: DateTime<Utc>) -> EngineResult<()> {
        let score = priority.weight() + enqueued_at.timestamp_millis() as f64;
        let mut conn = self.pool.get().await?;
        conn.zadd::<_, _, _, ()>(self.keys.waiting(queue), id.to_string(), score).await?;
        Ok(())
    }

    /// Pops the highest-priority, oldest-enqueued id from `waiting(Q)`
    /// and marks it claimed in `processing(Q)`.
    pub async fn dequeue(&self, queue: &str) -> EngineResult<Option<JobId>> {
        let mut conn = self.pool.get().await?;
        let popped: Option<String> = redis::Script::new(DEQUEUE_SCRIPT)
            .key(self.keys.waiting(queue))
            .key(self.keys.processing(queue))
            .invoke_async(&mut *conn)
            .await?;

        popped.map(|s| JobId::parse(&s)).transpose().map_err(|e| {
            crate::error::EngineError::Internal(format!("coordination store returned a non-uuid job id: {e}"))
        })
    }

    /// Removes `id` from `processing(Q)` once the worker has finalized
    /// it (success, failure-retry, or dead-letter).
    pub async fn ack(&self, queue: &str, id: JobId) -> EngineResult<()> {
        let mut conn = self.pool.get().await?;
        conn.srem::<_, _, ()>(self.keys.processing(queue), id.to_string()).await?;
        Ok(())
    }

    /// Removes `id` from `waiting(Q)` without claiming it, used when a
    /// dequeued id turns out to be non-eligible (already claimed
    /// elsewhere, cancelled, or otherwise gone from the durable store).
    pub async fn remove_waiting(&self, queue: &str, id: JobId) -> EngineResult<()> {
        let mut conn = self.pool.get().await?;
        conn.zrem::<_, _, ()>(self.keys.waiting(queue), id.to_string()).await?;
        Ok(())
    }

    /// Inserts `id` into `delayed(Q)`, scored by the instant it should
    /// be promoted back to `waiting(Q)` — either a future `scheduled_at`
    /// or a retry's backoff deadline.
    pub async fn insert_delayed(&self, queue: &str, id: JobId, promote_at: DateTime<Utc>) -> EngineResult<()> {
        let mut conn = self.pool.get().await?;
        conn.zadd::<_, _, _, ()>(self.keys.delayed(queue), id.to_string(), promote_at.timestamp_millis())
            .await?;
        Ok(())
    }

    /// Removes `id` from `delayed(Q)`, used symmetrically with
    /// [`Self::remove_waiting`] so cancel always clears both indexes
    /// regardless of which one currently holds the id.
    pub async fn remove_delayed(&self, queue: &str, id: JobId) -> EngineResult<()> {
        let mut conn = self.pool.get().await?;
        conn.zrem::<_, _, ()>(self.keys.delayed(queue), id.to_string()).await?;
        Ok(())
    }

    /// Atomically pops every id in `delayed(Q)` whose promotion instant
    /// has passed.
    pub async fn pop_due_delayed(&self, queue: &str, now: DateTime<Utc>) -> EngineResult<Vec<JobId>> {
        let mut conn = self.pool.get().await?;
        let ids: Vec<String> = redis::Script::new(POP_DUE_DELAYED_SCRIPT)
            .key(self.keys.delayed(queue))
            .arg(now.timestamp_millis())
            .invoke_async(&mut *conn)
            .await?;

        ids.into_iter()
            .map(|s| JobId::parse(&s))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| crate::error::EngineError::Internal(format!("coordination store returned a non-uuid job id: {e}")))
    }

    /// Lists every id currently marked claimed for `queue`, used by the
    /// scheduler's reclaim-timed-out sweep.
    pub async fn processing_ids(&self, queue: &str) -> EngineResult<Vec<JobId>> {
        let mut conn = self.pool.get().await?;
        let ids: Vec<String> = conn.smembers(self.keys.processing(queue)).await?;
        ids.into_iter()
            .map(|s| JobId::parse(&s))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| crate::error::EngineError::Internal(format!("coordination store returned a non-uuid job id: {e}")))
    }

    /// Atomically removes `id` from `processing(Q)` and appends it to
    /// `dlq(Q)`.
    pub async fn move_to_dlq(&self, queue: &str, id: JobId) -> EngineResult<()> {
        let mut conn = self.pool.get().await?;
        let _: () = redis::Script::new(MOVE_TO_DLQ_SCRIPT)
            .key(self.keys.processing(queue))
            .key(self.keys.dlq(queue))
            .arg(id.to_string())
            .invoke_async(&mut *conn)
            .await?;
        Ok(())
    }

    /// Lists the dead-lettered ids for `queue`, oldest first.
    pub async fn dlq_ids(&self, queue: &str) -> EngineResult<Vec<JobId>> {
        let mut conn = self.pool.get().await?;
        let ids: Vec<String> = conn.lrange(self.keys.dlq(queue), 0, -1).await?;
        ids.into_iter()
            .map(|s| JobId::parse(&s))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| crate::error::EngineError::Internal(format!("coordination store returned a non-uuid job id: {e}")))
    }

    /// Removes `id` from `dlq(Q)`, used by `Intake.retry`.
    pub async fn remove_from_dlq(&self, queue: &str, id: JobId) -> EngineResult<()> {
        let mut conn = self.pool.get().await?;
        conn.lrem::<_, _, ()>(self.keys.dlq(queue), 0, id.to_string()).await?;
        Ok(())
    }

    /// Records a failure for `id` in its poison-pill sorted set, trims
    /// entries older than `window_ms`, and returns whether the remaining
    /// count has crossed `threshold` — a true sliding window, not a
    /// fixed window keyed off the first failure, so failures straddling
    /// a window boundary are counted correctly.
    ///
    /// The key's own TTL is set to `⌈window_ms / 1000⌉ + 10` seconds on
    /// every call — comfortably longer than the window itself so the
    /// count can't silently reset mid-window, while still clearing out
    /// once the job has been quiet for a while.
    pub async fn track_failure(&self, id: JobId, window_ms: u64, threshold: u32) -> EngineResult<bool> {
        let mut conn = self.pool.get().await?;
        let now_ms = Utc::now().timestamp_millis();
        let cutoff_ms = now_ms - window_ms as i64;
        let ttl_secs = window_ms.div_ceil(1000) + 10;
        let member = uuid::Uuid::new_v4().to_string();
        let count: u32 = redis::Script::new(TRACK_FAILURE_SCRIPT)
            .key(self.keys.poison(&id.to_string()))
            .arg(now_ms)
            .arg(member)
            .arg(cutoff_ms)
            .arg(ttl_secs)
            .invoke_async(&mut *conn)
            .await?;
        Ok(count >= threshold)
    }

    /// Clears a job's poison-pill counter, used once a job finally
    /// completes so a later, unrelated failure streak starts fresh.
    pub async fn clear_failure_tracking(&self, id: JobId) -> EngineResult<()> {
        let mut conn = self.pool.get().await?;
        conn.del::<_, ()>(self.keys.poison(&id.to_string())).await?;
        Ok(())
    }

    /// Queue-depth snapshot for metrics and the stats surface.
    pub async fn queue_depths(&self, queue: &str) -> EngineResult<QueueDepths> {
        let mut conn = self.pool.get().await?;
        let waiting: u64 = conn.zcard(self.keys.waiting(queue)).await?;
        let processing: u64 = conn.scard(self.keys.processing(queue)).await?;
        let delayed: u64 = conn.zcard(self.keys.delayed(queue)).await?;
        let dlq: u64 = conn.llen(self.keys.dlq(queue)).await?;

        Ok(QueueDepths {
            waiting,
            processing,
            delayed,
            dlq,
        })
    }

    /// Verifies connectivity for the health surface.
    pub async fn health_check(&self) -> EngineResult<()> {
        let mut conn = self.pool.get().await?;
        redis::cmd("PING").query_async::<String>(&mut *conn).await?;
        Ok(())
    }
}

/// Point-in-time queue depth, one count per coordination-store family.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct QueueDepths {
    pub waiting: u64,
    pub processing: u64,
    pub delayed: u64,
    pub dlq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dequeue_script_is_well_formed_lua() {
        assert!(DEQUEUE_SCRIPT.contains("ZPOPMIN"));
        assert!(DEQUEUE_SCRIPT.contains("SADD"));
    }

    #[test]
    fn move_to_dlq_script_removes_then_appends() {
        let srem_pos = MOVE_TO_DLQ_SCRIPT.find("SREM").unwrap();
        let rpush_pos = MOVE_TO_DLQ_SCRIPT.find("RPUSH").unwrap();
        assert!(srem_pos < rpush_pos);
    }

    #[test]
    fn track_failure_script_trims_before_counting() {
        let trim_pos = TRACK_FAILURE_SCRIPT.find("ZREMRANGEBYSCORE").unwrap();
        let count_pos = TRACK_FAILURE_SCRIPT.find("ZCARD").unwrap();
        assert!(trim_pos < count_pos, "stale entries must be trimmed before ZCARD counts the window");
    }
}
