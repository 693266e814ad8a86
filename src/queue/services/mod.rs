//! Application services orchestrating the queue ports.

mod claim;
mod completion;
mod dispatch;
mod error;
mod heartbeat;
mod lease;
mod producer;
mod transition;

pub use claim::ClaimEngine;
pub use completion::CompletionService;
pub use dispatch::{HandlerRegistry, RegistryError, TypedHandler, TypedTaskHandler};
pub use error::{QueueError, QueueResult, ValidationError};
pub use heartbeat::HeartbeatService;
pub use lease::LeaseManager;
pub use producer::{EnqueueRequest, TaskQueueService};
