//! Background renewal of a claimed task's lease.

use crate::queue::{
    domain::{TaskId, WorkerId},
    ports::{CancellationTrigger, TaskStore},
    services::{LeaseManager, QueueError},
};
use mockable::Clock;
use std::time::Duration;

/// Renews one lease on a fixed cadence while its handler runs.
pub(super) struct LeaseKeeper<'a, S, C>
where
    S: TaskStore,
    C: Clock + Send + Sync,
{
    pub(super) leases: &'a LeaseManager<S, C>,
    pub(super) task_id: TaskId,
    pub(super) worker_id: &'a WorkerId,
    pub(super) lease_duration: Duration,
    pub(super) renew_interval: Duration,
}

impl<S, C> LeaseKeeper<'_, S, C>
where
    S: TaskStore,
    C: Clock + Send + Sync,
{
    /// Renews until the lease is lost and returns the reason.
    ///
    /// Cancellation fires `trigger` and keeps the future pending so the
    /// handler can wind down; transient store errors are retried on the next
    /// tick, since the lease may still be valid.
    pub(super) async fn run(self, trigger: &CancellationTrigger) -> QueueError {
        let mut ticker = tokio::time::interval(self.renew_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match self
                .leases
                .extend(self.task_id, self.worker_id, self.lease_duration)
                .await
            {
                Ok(_) => {}
                Err(QueueError::Canceled(task_id)) => {
                    tracing::info!(
                        task_id = %task_id,
                        worker_id = %self.worker_id,
                        "task canceled; signalling handler"
                    );
                    trigger.cancel();
                    return std::future::pending().await;
                }
                Err(err) if err.is_transient() => {
                    tracing::warn!(
                        task_id = %self.task_id,
                        worker_id = %self.worker_id,
                        error = %err,
                        "lease renewal failed; retrying"
                    );
                }
                Err(err) => return err,
            }
        }
    }
}
