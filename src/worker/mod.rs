//! Worker process runtime.
//!
//! A [`Worker`] polls the claim engine, keeps the lease of every claimed
//! task alive while its handler runs, reports the outcome and publishes a
//! liveness heartbeat on its own cadence. [`WorkerConfig`] loads the
//! settings from an optional JSON file and the environment.

mod config;
mod lease_keeper;
mod runtime;

pub use config::{
    ConfigError, ENV_BATCH, ENV_DATABASE_URL, ENV_HEARTBEAT_S, ENV_LOCK_S, ENV_POLL_S,
    ENV_POOL_SIZE, ENV_RENEW_S, ENV_WORKER_ID, WorkerConfig,
};
pub use runtime::{ProcessOutcome, Worker, WorkerOptions, result_envelope};
