//! `PostgreSQL` adapters for queue persistence.

mod heartbeat;
mod models;
mod pool;
mod schema;
mod store;

pub use heartbeat::PostgresHeartbeatRegistry;
pub use pool::{QueuePgPool, build_pool};
pub use store::PostgresTaskStore;
