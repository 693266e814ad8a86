//! Worker liveness publication and staleness queries.

use super::{QueueError, QueueResult, ValidationError};
use crate::queue::{
    domain::{WorkerHeartbeat, WorkerId},
    ports::HeartbeatRegistry,
};
use chrono::TimeDelta;
use mockable::Clock;
use std::sync::Arc;
use std::time::Duration;

/// Publishes and queries worker heartbeats.
#[derive(Clone)]
pub struct HeartbeatService<H, C>
where
    H: HeartbeatRegistry,
    C: Clock + Send + Sync,
{
    registry: Arc<H>,
    clock: Arc<C>,
}

impl<H, C> HeartbeatService<H, C>
where
    H: HeartbeatRegistry,
    C: Clock + Send + Sync,
{
    /// Creates a heartbeat service.
    #[must_use]
    pub const fn new(registry: Arc<H>, clock: Arc<C>) -> Self {
        Self { registry, clock }
    }

    /// Upserts the worker's liveness row stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidHeartbeatInterval`] when `poll_s`
    /// or `lock_s` is zero or exceeds `i32::MAX`, and
    /// [`QueueError::StoreUnavailable`] when the registry cannot be reached.
    pub async fn beat(
        &self,
        worker_id: &WorkerId,
        poll_s: u32,
        lock_s: u32,
    ) -> QueueResult<WorkerHeartbeat> {
        for (field, value) in [("poll_s", poll_s), ("lock_s", lock_s)] {
            if value == 0 || i32::try_from(value).is_err() {
                return Err(ValidationError::InvalidHeartbeatInterval { field, value }.into());
            }
        }
        let report = WorkerHeartbeat::new(worker_id.clone(), poll_s, lock_s, &*self.clock);
        let stored = self.registry.upsert(&report).await?;
        tracing::trace!(
            worker_id = %worker_id,
            last_seen_at = %stored.last_seen_at(),
            "heartbeat"
        );
        Ok(stored)
    }

    /// Returns the worker's liveness row.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::WorkerNotFound`] when the worker never reported
    /// or was forgotten.
    pub async fn get(&self, worker_id: &WorkerId) -> QueueResult<WorkerHeartbeat> {
        self.registry
            .find(worker_id)
            .await?
            .ok_or_else(|| QueueError::WorkerNotFound(worker_id.clone()))
    }

    /// Lists workers that have not reported within `threshold`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Validation`] when `threshold` is out of range.
    pub async fn stale_workers(&self, threshold: Duration) -> QueueResult<Vec<WorkerHeartbeat>> {
        let window = TimeDelta::from_std(threshold)
            .map_err(|err| ValidationError::DurationOutOfRange(err.to_string()))?;
        let cutoff = self
            .clock
            .utc()
            .checked_sub_signed(window)
            .ok_or_else(|| ValidationError::DurationOutOfRange(window.to_string()))?;
        Ok(self.registry.list_stale(cutoff).await?)
    }

    /// Lists every known worker.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] when the registry cannot be
    /// reached.
    pub async fn workers(&self) -> QueueResult<Vec<WorkerHeartbeat>> {
        Ok(self.registry.list_all().await?)
    }

    /// Removes the worker's liveness row, typically on graceful shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::WorkerNotFound`] when no row existed.
    pub async fn forget(&self, worker_id: &WorkerId) -> QueueResult<()> {
        if self.registry.remove(worker_id).await? {
            tracing::info!(worker_id = %worker_id, "worker heartbeat removed");
            Ok(())
        } else {
            Err(QueueError::WorkerNotFound(worker_id.clone()))
        }
    }
}
