//! Taskloom: a durable lease-based task queue.
//!
//! Producers enqueue typed tasks into a shared store; any number of
//! independent worker processes claim them under time-bounded leases,
//! renew those leases while working and record success or failure. A worker
//! that crashes simply stops renewing, and its task becomes claimable again
//! once the lease lapses.
//!
//! # Architecture
//!
//! Taskloom follows hexagonal architecture principles:
//!
//! - **Domain**: task lifecycle rules with no infrastructure dependencies
//! - **Ports**: trait interfaces for storage, heartbeats and handlers
//! - **Adapters**: in-memory and `PostgreSQL` implementations of the ports
//!
//! # Modules
//!
//! - [`queue`]: task model, store ports, adapters and queue services
//! - [`worker`]: configuration and the polling worker runtime
//! - [`handlers`]: built-in task handlers
//! - [`telemetry`]: tracing subscriber setup for the binaries

pub mod handlers;
pub mod queue;
pub mod telemetry;
pub mod worker;
