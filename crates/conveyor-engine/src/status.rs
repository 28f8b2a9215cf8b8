//! Job status tracking and monitoring, backed by the durable store.

use std::sync::Arc;

use conveyor_core::{DurableStore, Job, JobCounts, JobFilter, JobHistoryEntry, JobId, Page, PageRequest};
use serde::{Deserialize, Serialize};

use crate::coordination::{CoordinationStore, QueueDepths};
use crate::error::EngineResult;

/// Read-only status surface over the durable and coordination stores,
/// used by operational tooling and the (out-of-scope) HTTP layer alike.
pub struct JobStatusTracker {
    store: Arc<dyn DurableStore>,
    coordination: CoordinationStore,
}

impl JobStatusTracker {
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>, coordination: CoordinationStore) -> Self {
        Self { store, coordination }
    }

    /// Fetches a job and its full transition history.
    pub async fn get_job(&self, id: JobId) -> EngineResult<Option<(Job, Vec<JobHistoryEntry>)>> {
        let Some(job) = self.store.get_job(id).await? else {
            return Ok(None);
        };
        let history = self.store.get_job_history(id).await?;
        Ok(Some((job, history)))
    }

    /// Lists jobs matching a filter, paginated.
    pub async fn list_jobs(&self, filter: JobFilter, page: PageRequest) -> EngineResult<Page<Job>> {
        Ok(self.store.list_jobs(filter, page).await?)
    }

    /// Durable-store-wide counts by status.
    pub async fn stats(&self) -> EngineResult<JobCounts> {
        Ok(self.store.stats().await?)
    }

    /// Coordination-store queue depths for a single queue.
    pub async fn queue_depths(&self, queue: &str) -> EngineResult<QueueDepths> {
        self.coordination.queue_depths(queue).await
    }

    /// Aggregate dashboard view across durable counts and every
    /// configured queue's coordination-store depths.
    pub async fn dashboard(&self, queues: &[String]) -> EngineResult<DashboardStats> {
        let counts = self.stats().await?;
        let mut queue_stats = Vec::with_capacity(queues.len());
        for queue in queues {
            queue_stats.push((queue.clone(), self.queue_depths(queue).await?));
        }

        Ok(DashboardStats { counts, queues: queue_stats })
    }

    /// Health probe: verifies both stores are reachable.
    pub async fn health_check(&self) -> EngineResult<HealthStatus> {
        let coordination_ok = self.coordination.health_check().await.is_ok();
        let durable_ok = self.store.stats().await.is_ok();

        Ok(HealthStatus {
            durable_store: durable_ok,
            coordination_store: coordination_ok,
        })
    }
}

/// Aggregate dashboard statistics combining durable-store counts with
/// coordination-store queue depths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardStats {
    pub counts: JobCounts,
    pub queues: Vec<(String, QueueDepths)>,
}

/// Combined liveness of both stores.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthStatus {
    pub durable_store: bool,
    pub coordination_store: bool,
}

impl HealthStatus {
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.durable_store && self.coordination_store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_requires_both_stores() {
        let status = HealthStatus { durable_store: true, coordination_store: false };
        assert!(!status.is_healthy());

        let status = HealthStatus { durable_store: true, coordination_store: true };
        assert!(status.is_healthy());
    }
}
