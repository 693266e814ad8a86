//! Runs a queue worker against `PostgreSQL` until interrupted.
//!
//! Usage:
//!
//! ```text
//! taskloom-worker [config.json]
//! ```
//!
//! The optional JSON file is read first and environment variables
//! (`DATABASE_URL`, `AIOP_POLL_S`, `AIOP_LOCK_S`, `TASKLOOM_*`) override it.
//! Ctrl-C finishes the tasks already claimed, removes the heartbeat row and
//! exits.

use mockable::DefaultClock;
use std::path::PathBuf;
use std::sync::Arc;
use taskloom::handlers::register_builtin_handlers;
use taskloom::queue::adapters::postgres::{PostgresHeartbeatRegistry, PostgresTaskStore, build_pool};
use taskloom::queue::services::HandlerRegistry;
use taskloom::worker::{Worker, WorkerConfig, WorkerOptions};
use thiserror::Error;
use tokio::sync::watch;

/// Boxed error type for the main result.
type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
enum WorkerCliError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    taskloom::telemetry::init_tracing()?;
    let config_path = parse_args(std::env::args())?;
    let config = WorkerConfig::load(config_path.as_deref())?;

    let pool = build_pool(config.database_url()?, config.pool_size)?;
    let mut handlers = HandlerRegistry::new();
    register_builtin_handlers(&mut handlers)?;

    let worker = Arc::new(Worker::new(
        config.worker_id()?,
        WorkerOptions::from(&config),
        Arc::new(PostgresTaskStore::new(pool.clone())),
        Arc::new(PostgresHeartbeatRegistry::new(pool)),
        Arc::new(DefaultClock),
        handlers,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for interrupt; running until killed");
            std::future::pending::<()>().await;
        }
        tracing::info!("interrupt received; shutting down");
        shutdown_tx.send_replace(true);
    });

    worker.run(shutdown_rx).await?;
    Ok(())
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Option<PathBuf>, WorkerCliError> {
    let _program = args.next();
    let config_path = args.next().map(PathBuf::from);
    if let Some(extra) = args.next() {
        return Err(WorkerCliError::InvalidArgs(format!(
            "unexpected extra argument: {extra}"
        )));
    }
    Ok(config_path)
}
