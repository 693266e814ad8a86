//! Lease renewal and expiry reporting.

use super::{QueueError, QueueResult, ValidationError, transition::apply_transition};
use crate::queue::{
    domain::{Task, TaskDomainError, TaskId, WorkerId},
    ports::TaskStore,
};
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use std::sync::Arc;
use std::time::Duration;

/// Extends leases held by live workers and reports lapsed ones.
///
/// Reclaiming an expired lease is the claim engine's job; this service only
/// observes.
#[derive(Clone)]
pub struct LeaseManager<S, C>
where
    S: TaskStore,
    C: Clock + Send + Sync,
{
    store: Arc<S>,
    clock: Arc<C>,
}

impl<S, C> LeaseManager<S, C>
where
    S: TaskStore,
    C: Clock + Send + Sync,
{
    /// Creates a lease manager.
    #[must_use]
    pub const fn new(store: Arc<S>, clock: Arc<C>) -> Self {
        Self { store, clock }
    }

    /// Moves the expiry of `worker_id`'s lease on `task_id` to `new_expiry`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::LeaseLost`] when the caller no longer holds a
    /// live lease, [`QueueError::Canceled`] when the task was canceled, and
    /// [`QueueError::Validation`] when `new_expiry` is not in the future.
    pub async fn renew(
        &self,
        task_id: TaskId,
        worker_id: &WorkerId,
        new_expiry: DateTime<Utc>,
    ) -> QueueResult<Task> {
        let result = apply_transition(&*self.store, &*self.clock, task_id, |task, now| {
            task.renew_lease(worker_id, new_expiry, now)
                .map_err(|err| renewal_error(err, worker_id))
        })
        .await;

        match result {
            Ok((task, ())) => {
                tracing::trace!(
                    task_id = %task_id,
                    worker_id = %worker_id,
                    %new_expiry,
                    "lease renewed"
                );
                Ok(task)
            }
            Err(err) => {
                if matches!(err, QueueError::LeaseLost { .. } | QueueError::Canceled(_)) {
                    tracing::warn!(
                        task_id = %task_id,
                        worker_id = %worker_id,
                        error = %err,
                        "lease renewal refused"
                    );
                }
                Err(err)
            }
        }
    }

    /// Renews the lease to expire `lease_duration` from now.
    ///
    /// # Errors
    ///
    /// Same as [`Self::renew`], plus [`QueueError::Validation`] when the
    /// duration is out of range.
    pub async fn extend(
        &self,
        task_id: TaskId,
        worker_id: &WorkerId,
        lease_duration: Duration,
    ) -> QueueResult<Task> {
        let lease = TimeDelta::from_std(lease_duration)
            .map_err(|err| ValidationError::DurationOutOfRange(err.to_string()))?;
        let new_expiry = self
            .clock
            .utc()
            .checked_add_signed(lease)
            .ok_or_else(|| ValidationError::DurationOutOfRange(format!("{lease_duration:?}")))?;
        self.renew(task_id, worker_id, new_expiry).await
    }

    /// Reports up to `limit` running tasks whose lease has lapsed, oldest
    /// expiry first.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] when the store cannot be
    /// reached.
    pub async fn find_expired(&self, limit: usize) -> QueueResult<Vec<Task>> {
        Ok(self
            .store
            .find_expired_leases(self.clock.utc(), limit)
            .await?)
    }
}

fn renewal_error(err: TaskDomainError, worker_id: &WorkerId) -> QueueError {
    match err {
        TaskDomainError::LeaseNotHeld { task_id, .. } => QueueError::LeaseLost {
            task_id,
            worker_id: worker_id.clone(),
        },
        other => other.into(),
    }
}
