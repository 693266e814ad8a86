//! Port contracts for the task queue.
//!
//! Ports define infrastructure-agnostic interfaces used by queue services.

pub mod handler;
pub mod heartbeat;
pub mod store;

pub use handler::{CancellationSignal, CancellationTrigger, HandlerError, TaskContext, TaskHandler};
pub use heartbeat::{HeartbeatRegistry, HeartbeatRegistryError, HeartbeatRegistryResult};
pub use store::{TaskStore, TaskStoreError, TaskStoreResult};

#[cfg(test)]
pub use store::MockTaskStore;
