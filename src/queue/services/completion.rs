//! Terminal and retry outcomes reported by lease holders.

use super::{QueueError, QueueResult, transition::apply_transition};
use crate::queue::{
    domain::{BackoffPolicy, Document, FailOutcome, Task, TaskDomainError, TaskId, WorkerId},
    ports::TaskStore,
};
use mockable::Clock;
use std::sync::Arc;

/// Records success or failure for tasks owned by the caller.
#[derive(Clone)]
pub struct CompletionService<S, C>
where
    S: TaskStore,
    C: Clock + Send + Sync,
{
    store: Arc<S>,
    clock: Arc<C>,
    backoff: BackoffPolicy,
}

impl<S, C> CompletionService<S, C>
where
    S: TaskStore,
    C: Clock + Send + Sync,
{
    /// Creates a completion service with the default backoff policy.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<C>) -> Self {
        Self::with_backoff(store, clock, BackoffPolicy::default())
    }

    /// Creates a completion service with an explicit backoff policy.
    #[must_use]
    pub const fn with_backoff(store: Arc<S>, clock: Arc<C>, backoff: BackoffPolicy) -> Self {
        Self {
            store,
            clock,
            backoff,
        }
    }

    /// Returns the retry backoff policy.
    #[must_use]
    pub const fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Marks the task `succeeded` with `result` and releases ownership.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AlreadyTerminal`] when the task already
    /// finished (the stored outcome is left untouched) and
    /// [`QueueError::AlreadyReassigned`] when the caller no longer holds a
    /// live lease.
    pub async fn complete(
        &self,
        task_id: TaskId,
        worker_id: &WorkerId,
        result: Document,
    ) -> QueueResult<Task> {
        let (task, ()) = apply_transition(&*self.store, &*self.clock, task_id, |task, now| {
            task.complete(worker_id, result.clone(), now)
                .map_err(|err| report_error(err, worker_id))
        })
        .await
        .inspect_err(|err| log_rejected("complete", task_id, worker_id, err))?;

        tracing::info!(
            task_id = %task_id,
            worker_id = %worker_id,
            attempts = task.attempts(),
            run_id = ?task.run_id(),
            "task succeeded"
        );
        Ok(task)
    }

    /// Records a failed attempt. The task is requeued after a backoff delay
    /// or, once attempts are exhausted, marked `failed`.
    ///
    /// # Errors
    ///
    /// Same preconditions as [`Self::complete`].
    pub async fn fail(
        &self,
        task_id: TaskId,
        worker_id: &WorkerId,
        error: &str,
    ) -> QueueResult<(Task, FailOutcome)> {
        let backoff = self.backoff;
        let (task, outcome) =
            apply_transition(&*self.store, &*self.clock, task_id, |task, now| {
                task.fail(worker_id, error, &backoff, now)
                    .map_err(|err| report_error(err, worker_id))
            })
            .await
            .inspect_err(|err| log_rejected("fail", task_id, worker_id, err))?;

        match outcome {
            FailOutcome::Requeued { available_at } => tracing::warn!(
                task_id = %task_id,
                worker_id = %worker_id,
                attempts = task.attempts(),
                max_attempts = task.max_attempts(),
                %available_at,
                error,
                "task failed; requeued with backoff"
            ),
            FailOutcome::Exhausted => tracing::error!(
                task_id = %task_id,
                worker_id = %worker_id,
                attempts = task.attempts(),
                run_id = ?task.run_id(),
                error,
                "task failed permanently"
            ),
        }
        Ok((task, outcome))
    }
}

fn report_error(err: TaskDomainError, worker_id: &WorkerId) -> QueueError {
    match err {
        TaskDomainError::LeaseNotHeld { task_id, .. } => QueueError::AlreadyReassigned {
            task_id,
            worker_id: worker_id.clone(),
        },
        other => other.into(),
    }
}

fn log_rejected(operation: &str, task_id: TaskId, worker_id: &WorkerId, err: &QueueError) {
    if matches!(
        err,
        QueueError::AlreadyTerminal { .. } | QueueError::AlreadyReassigned { .. }
    ) {
        tracing::warn!(
            task_id = %task_id,
            worker_id = %worker_id,
            operation,
            error = %err,
            "stale report rejected"
        );
    }
}
