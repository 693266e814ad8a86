//! In-memory adapters for tests and single-process embedding.

mod heartbeat;
mod store;

pub use heartbeat::InMemoryHeartbeatRegistry;
pub use store::InMemoryTaskStore;
