//! Durable lease-based task queue.
//!
//! Producers enqueue tasks; independent workers claim them under a
//! time-bounded lease, renew the lease while working and report success or
//! failure. A lease that lapses is reclaimed by the next claim, which counts
//! the lapse as a failed attempt, so a crashed worker's task is retried
//! without any coordinator. The module follows hexagonal architecture:
//!
//! - Domain types and transitions in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;
pub mod testing;

#[cfg(test)]
mod tests;
