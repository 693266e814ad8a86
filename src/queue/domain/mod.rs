//! Domain model for the lease-based task queue.
//!
//! Tasks carry their own state machine: claiming, lease renewal, completion,
//! failure with backoff and cancellation are all methods on [`Task`] that
//! either apply a transition or explain why it is not allowed. Stores only
//! persist the results, guarded by a [`TaskGuard`].

mod backoff;
mod document;
mod error;
mod heartbeat;
mod ids;
mod lease;
mod status;
mod task;

pub use backoff::BackoffPolicy;
pub use document::Document;
pub use error::{ParseTaskStatusError, TaskDomainError};
pub use heartbeat::WorkerHeartbeat;
pub use ids::{RunId, TaskId, TaskType, WorkerId};
pub use lease::Lease;
pub use status::TaskStatus;
pub use task::{
    ClaimKind, DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY, FailOutcome, NewTask, PersistedTaskData,
    Task, TaskGuard,
};
