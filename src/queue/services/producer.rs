//! Producer-side operations: enqueue, lookup, cancellation and purge.

use super::{QueueError, QueueResult, ValidationError, transition::apply_transition};
use crate::queue::{
    domain::{
        DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY, Document, NewTask, RunId, Task, TaskId, TaskType,
    },
    ports::TaskStore,
};
use mockable::Clock;
use std::sync::Arc;

/// Request payload for enqueueing a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRequest {
    task_type: String,
    payload: Document,
    priority: i32,
    max_attempts: i32,
    run_id: Option<RunId>,
    parent_task_id: Option<TaskId>,
}

impl EnqueueRequest {
    /// Creates a request with default priority and attempt cap.
    #[must_use]
    pub fn new(task_type: impl Into<String>, payload: Document) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            priority: DEFAULT_PRIORITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            run_id: None,
            parent_task_id: None,
        }
    }

    /// Sets the priority; lower values are claimed first.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the attempt cap.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Stamps an audit correlation identifier.
    #[must_use]
    pub const fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Links the task to the task that spawned it.
    #[must_use]
    pub const fn with_parent(mut self, parent_task_id: TaskId) -> Self {
        self.parent_task_id = Some(parent_task_id);
        self
    }
}

/// Producer-facing queue service.
#[derive(Clone)]
pub struct TaskQueueService<S, C>
where
    S: TaskStore,
    C: Clock + Send + Sync,
{
    store: Arc<S>,
    clock: Arc<C>,
}

impl<S, C> TaskQueueService<S, C>
where
    S: TaskStore,
    C: Clock + Send + Sync,
{
    /// Creates a producer service.
    #[must_use]
    pub const fn new(store: Arc<S>, clock: Arc<C>) -> Self {
        Self { store, clock }
    }

    /// Inserts a new `queued` task available immediately.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Validation`] for an empty type, a
    /// `max_attempts` below 1 or a parent that does not resolve, and
    /// [`QueueError::StoreUnavailable`] when the store cannot be reached.
    pub async fn enqueue(&self, request: EnqueueRequest) -> QueueResult<TaskId> {
        let task_type = TaskType::new(request.task_type).map_err(ValidationError::from)?;
        let task = Task::new(
            NewTask {
                task_type,
                payload: request.payload,
                priority: request.priority,
                max_attempts: request.max_attempts,
                run_id: request.run_id,
                parent_task_id: request.parent_task_id,
            },
            &*self.clock,
        )
        .map_err(ValidationError::from)?;

        self.store.insert(&task).await?;
        tracing::info!(
            task_id = %task.id(),
            task_type = %task.task_type(),
            priority = task.priority(),
            run_id = ?task.run_id(),
            "task enqueued"
        );
        Ok(task.id())
    }

    /// Returns the current state of a task.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] when no such task exists.
    pub async fn get(&self, task_id: TaskId) -> QueueResult<Task> {
        self.store
            .find_by_id(task_id)
            .await?
            .ok_or(QueueError::NotFound(task_id))
    }

    /// Cancels a queued or running task.
    ///
    /// A running task's worker is not interrupted; it learns about the
    /// cancellation on its next lease renewal.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AlreadyTerminal`] when the task already
    /// finished and [`QueueError::NotFound`] when it does not exist.
    pub async fn cancel(&self, task_id: TaskId) -> QueueResult<Task> {
        let (task, previous) =
            apply_transition(&*self.store, &*self.clock, task_id, |task, now| {
                Ok(task.cancel(now)?)
            })
            .await?;
        tracing::info!(task_id = %task_id, previous = %previous, "task canceled");
        Ok(task)
    }

    /// Physically deletes a task for retention tooling. Children keep
    /// existing with their parent reference cleared.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] when the task does not exist.
    pub async fn purge(&self, task_id: TaskId) -> QueueResult<()> {
        if self.store.purge(task_id).await? {
            tracing::info!(task_id = %task_id, "task purged");
            Ok(())
        } else {
            Err(QueueError::NotFound(task_id))
        }
    }
}
