//! Handler port: the boundary between the queue and task-specific logic.

use crate::queue::domain::{Document, RunId, TaskId, TaskType};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

/// Executes the payload of one task type.
///
/// Handlers may run more than once for the same task when a lease lapses
/// mid-execution, so they must tolerate re-execution.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Runs the task and returns its result document.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`]; the queue records it and decides whether
    /// the task is retried.
    async fn execute(&self, ctx: &TaskContext, payload: &Document)
    -> Result<Document, HandlerError>;
}

/// Per-execution information handed to a handler.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    task_type: TaskType,
    attempt: i32,
    max_attempts: i32,
    run_id: Option<RunId>,
    cancellation: CancellationSignal,
}

impl TaskContext {
    /// Creates a context. `attempt` is 1-based.
    #[must_use]
    pub const fn new(
        task_id: TaskId,
        task_type: TaskType,
        attempt: i32,
        max_attempts: i32,
        run_id: Option<RunId>,
        cancellation: CancellationSignal,
    ) -> Self {
        Self {
            task_id,
            task_type,
            attempt,
            max_attempts,
            run_id,
            cancellation,
        }
    }

    /// Returns the task identifier.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Returns the task type.
    #[must_use]
    pub const fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    /// Returns the 1-based attempt number of this execution.
    #[must_use]
    pub const fn attempt(&self) -> i32 {
        self.attempt
    }

    /// Returns the attempt cap.
    #[must_use]
    pub const fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// Returns the audit correlation identifier.
    #[must_use]
    pub const fn run_id(&self) -> Option<RunId> {
        self.run_id
    }

    /// Returns the cooperative cancellation signal.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationSignal {
        &self.cancellation
    }
}

/// Read side of a cooperative cancellation flag.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    receiver: watch::Receiver<bool>,
}

/// Write side of a cooperative cancellation flag.
#[derive(Debug)]
pub struct CancellationTrigger {
    sender: watch::Sender<bool>,
}

impl CancellationSignal {
    /// Creates a linked trigger and signal.
    #[must_use]
    pub fn pair() -> (CancellationTrigger, Self) {
        let (sender, receiver) = watch::channel(false);
        (CancellationTrigger { sender }, Self { receiver })
    }

    /// Creates a signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        let (_trigger, signal) = Self::pair();
        signal
    }

    /// Returns `true` once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if the
    /// trigger is dropped without firing.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl CancellationTrigger {
    /// Requests cancellation.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

/// Failure reported by a handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// No handler is registered for the task type.
    #[error("unknown task type: {0}")]
    UnknownType(TaskType),

    /// The payload does not match what the handler expects.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The handler observed cancellation and stopped.
    #[error("handler stopped after cancellation")]
    Canceled,

    /// The handler ran and failed.
    #[error("{kind}: {message}")]
    Failed {
        /// Short error class, for example `ValueError` or `Timeout`.
        kind: String,
        /// Human-readable description.
        message: String,
    },
}

impl HandlerError {
    /// Creates a [`HandlerError::Failed`].
    pub fn failed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Returns the error class used in the persisted `last_error`.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::UnknownType(_) => "UnknownType",
            Self::InvalidPayload(_) => "InvalidPayload",
            Self::Canceled => "Canceled",
            Self::Failed { kind, .. } => kind,
        }
    }

    /// Renders the `"<kind>: <message>"` form recorded as `last_error`.
    #[must_use]
    pub fn to_last_error(&self) -> String {
        match self {
            Self::Failed { .. } => self.to_string(),
            Self::UnknownType(_) | Self::InvalidPayload(_) | Self::Canceled => {
                format!("{}: {self}", self.kind())
            }
        }
    }
}
