//! Store port for task persistence and conditional updates.

use crate::queue::domain::{Task, TaskGuard, TaskId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Result type for task store operations.
pub type TaskStoreResult<T> = Result<T, TaskStoreError>;

/// Durable task table contract.
///
/// Every mutation after insertion goes through
/// [`TaskStore::compare_and_swap`], which must be atomic with respect to a
/// single row and must never lock more than that row.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Stores a new task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::DuplicateTask`] when the identifier exists,
    /// [`TaskStoreError::ParentNotFound`] when `parent_task_id` does not
    /// resolve and [`TaskStoreError::ParentCycle`] when the parent chain
    /// already contains the new task.
    async fn insert(&self, task: &Task) -> TaskStoreResult<()>;

    /// Finds a task by identifier.
    ///
    /// Returns `None` when the task does not exist.
    async fn find_by_id(&self, id: TaskId) -> TaskStoreResult<Option<Task>>;

    /// Returns up to `limit` claimable tasks at `now`, ordered by priority
    /// then creation time.
    ///
    /// Claimable means `available_at <= now` and either `queued`, or
    /// `running` with `lock_expires_at < now`.
    async fn claim_candidates(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> TaskStoreResult<Vec<Task>>;

    /// Replaces the stored row with `next` if it still matches `guard`.
    ///
    /// Returns `Ok(false)` when a competitor changed the row first; nothing
    /// is written in that case.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::NotFound`] when the row does not exist.
    async fn compare_and_swap(&self, guard: &TaskGuard, next: &Task) -> TaskStoreResult<bool>;

    /// Returns up to `limit` running tasks whose lease lapsed before `now`,
    /// oldest expiry first.
    async fn find_expired_leases(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> TaskStoreResult<Vec<Task>>;

    /// Physically deletes a task for retention tooling, clearing the
    /// `parent_task_id` of its children. Returns `false` if it did not exist.
    async fn purge(&self, id: TaskId) -> TaskStoreResult<bool>;
}

/// Errors returned by task store implementations.
#[derive(Debug, Clone, Error)]
pub enum TaskStoreError {
    /// A task with the same identifier already exists.
    #[error("duplicate task identifier: {0}")]
    DuplicateTask(TaskId),

    /// The referenced parent task does not exist.
    #[error("parent task not found: {0}")]
    ParentNotFound(TaskId),

    /// Linking to the parent would make the task its own ancestor.
    #[error("task {task_id} cannot descend from {parent_id}: cycle")]
    ParentCycle {
        /// Task being inserted.
        task_id: TaskId,
        /// Requested parent.
        parent_id: TaskId,
    },

    /// The task was not found.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// Persisted data could not be reconstructed into domain types.
    #[error("invalid persisted data: {0}")]
    InvalidPersistedData(Arc<dyn std::error::Error + Send + Sync>),

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl TaskStoreError {
    /// Wraps a data-quality or deserialization error from persisted rows.
    pub fn invalid_persisted_data(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::InvalidPersistedData(Arc::new(err))
    }

    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
