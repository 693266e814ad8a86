//! Error types for queue domain validation and state transitions.

use super::{TaskId, TaskStatus, WorkerId};
use thiserror::Error;

/// Errors returned while constructing or transitioning domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskDomainError {
    /// The task type is empty after trimming.
    #[error("task type must not be empty")]
    EmptyTaskType,

    /// The task type exceeds the persisted length limit.
    #[error("task type is {0} bytes long, limit is 255")]
    TaskTypeTooLong(usize),

    /// The worker identifier is blank or too long.
    #[error("invalid worker identifier '{0}'")]
    InvalidWorkerId(String),

    /// `max_attempts` must allow at least one attempt.
    #[error("max_attempts must be at least 1, got {0}")]
    InvalidMaxAttempts(i32),

    /// Lease durations must be strictly positive.
    #[error("lease duration must be positive")]
    NonPositiveLeaseDuration,

    /// A renewed lease must expire after the renewal instant.
    #[error("new lease expiry for task {0} is not in the future")]
    LeaseExpiryNotInFuture(TaskId),

    /// The task is not eligible for a claim at this instant.
    #[error("task {task_id} is not claimable in state {status}")]
    NotClaimable {
        /// Task that was inspected.
        task_id: TaskId,
        /// State the task was found in.
        status: TaskStatus,
    },

    /// The task already reached a terminal state.
    #[error("task {task_id} is already terminal ({status})")]
    AlreadyTerminal {
        /// Task that was inspected.
        task_id: TaskId,
        /// Terminal state the task was found in.
        status: TaskStatus,
    },

    /// The caller does not hold a live lease on the task.
    #[error("worker {worker_id} does not hold a live lease on task {task_id}")]
    LeaseNotHeld {
        /// Task that was inspected.
        task_id: TaskId,
        /// Worker that attempted the operation.
        worker_id: WorkerId,
    },

    /// The task was canceled while the caller held it.
    #[error("task {0} was canceled")]
    Canceled(TaskId),

    /// Persisted fields violate a record invariant.
    #[error("task {task_id} violates record invariant: {reason}")]
    InconsistentRecord {
        /// Offending task.
        task_id: TaskId,
        /// Invariant that does not hold.
        reason: &'static str,
    },
}

/// Error returned while parsing task states from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown task status: {0}")]
pub struct ParseTaskStatusError(pub String);
