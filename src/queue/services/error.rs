//! Service-level errors for queue operations.

use crate::queue::{
    domain::{TaskDomainError, TaskId, TaskStatus, WorkerId},
    ports::{HandlerError, HeartbeatRegistryError, TaskStoreError},
};
use std::sync::Arc;
use thiserror::Error;

/// Result type for queue service operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Input rejected before any state changed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A domain constructor or transition rejected the input.
    #[error(transparent)]
    Domain(#[from] TaskDomainError),

    /// The requested parent task does not exist.
    #[error("parent task not found: {0}")]
    ParentNotFound(TaskId),

    /// Linking to the parent would create a cycle.
    #[error("task {task_id} cannot descend from {parent_id}: cycle")]
    ParentCycle {
        /// Task being inserted.
        task_id: TaskId,
        /// Requested parent.
        parent_id: TaskId,
    },

    /// Claim batches must request at least one task.
    #[error("claim batch must be at least 1, got {0}")]
    InvalidBatch(usize),

    /// A heartbeat interval must be between 1 and `i32::MAX` seconds.
    #[error("heartbeat {field} must be between 1 and 2147483647, got {value}")]
    InvalidHeartbeatInterval {
        /// Reported setting, `poll_s` or `lock_s`.
        field: &'static str,
        /// Rejected value.
        value: u32,
    },

    /// A duration argument does not fit the supported range.
    #[error("duration out of range: {0}")]
    DurationOutOfRange(String),
}

/// Errors surfaced by queue services.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// Input validation failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The task does not exist.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// No heartbeat row exists for the worker.
    #[error("worker not found: {0}")]
    WorkerNotFound(WorkerId),

    /// A competing writer changed the task first. Transient.
    #[error("conflicting update on task {0}")]
    ClaimConflict(TaskId),

    /// The caller's lease lapsed or moved to another worker during renewal.
    #[error("worker {worker_id} lost the lease on task {task_id}")]
    LeaseLost {
        /// Task whose lease was lost.
        task_id: TaskId,
        /// Worker that attempted the renewal.
        worker_id: WorkerId,
    },

    /// A completion report arrived from a worker that no longer owns the task.
    #[error("task {task_id} is no longer owned by worker {worker_id}")]
    AlreadyReassigned {
        /// Reported task.
        task_id: TaskId,
        /// Reporting worker.
        worker_id: WorkerId,
    },

    /// The task already reached a terminal status.
    #[error("task {task_id} is already {status}")]
    AlreadyTerminal {
        /// Reported task.
        task_id: TaskId,
        /// Terminal status found.
        status: TaskStatus,
    },

    /// The task was canceled while its worker held the lease.
    #[error("task {0} was canceled")]
    Canceled(TaskId),

    /// A handler failed or no handler matched the task type.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// The store could not be reached. Transient.
    #[error("store unavailable: {0}")]
    StoreUnavailable(Arc<dyn std::error::Error + Send + Sync>),

    /// The task store reported a non-transient failure.
    #[error(transparent)]
    Store(TaskStoreError),

    /// The heartbeat registry reported a non-transient failure.
    #[error(transparent)]
    Heartbeat(HeartbeatRegistryError),
}

impl QueueError {
    /// Returns `true` for errors worth retrying after a pause.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::ClaimConflict(_))
    }
}

impl From<TaskStoreError> for QueueError {
    fn from(err: TaskStoreError) -> Self {
        match err {
            TaskStoreError::Persistence(source) => Self::StoreUnavailable(source),
            TaskStoreError::NotFound(task_id) => Self::NotFound(task_id),
            TaskStoreError::ParentNotFound(parent_id) => {
                ValidationError::ParentNotFound(parent_id).into()
            }
            TaskStoreError::ParentCycle { task_id, parent_id } => {
                ValidationError::ParentCycle { task_id, parent_id }.into()
            }
            other @ (TaskStoreError::DuplicateTask(_)
            | TaskStoreError::InvalidPersistedData(_)) => Self::Store(other),
        }
    }
}

impl From<HeartbeatRegistryError> for QueueError {
    fn from(err: HeartbeatRegistryError) -> Self {
        match err {
            HeartbeatRegistryError::Persistence(source) => Self::StoreUnavailable(source),
            other @ HeartbeatRegistryError::InvalidPersistedData(_) => Self::Heartbeat(other),
        }
    }
}

impl From<TaskDomainError> for QueueError {
    fn from(err: TaskDomainError) -> Self {
        match err {
            TaskDomainError::AlreadyTerminal { task_id, status } => {
                Self::AlreadyTerminal { task_id, status }
            }
            TaskDomainError::Canceled(task_id) => Self::Canceled(task_id),
            TaskDomainError::LeaseNotHeld { task_id, worker_id } => {
                Self::LeaseLost { task_id, worker_id }
            }
            TaskDomainError::NotClaimable { task_id, .. } => Self::ClaimConflict(task_id),
            other => ValidationError::Domain(other).into(),
        }
    }
}
