//! Enqueues one task and prints its identifier.
//!
//! Usage:
//!
//! ```text
//! taskloom-enqueue <type> <payload-json> [priority]
//! ```
//!
//! The database is taken from `DATABASE_URL`. For example:
//!
//! ```text
//! taskloom-enqueue tool.call '{"tool":"ping","args":{"message":"hi"}}' 50
//! ```

use mockable::DefaultClock;
use std::sync::Arc;
use taskloom::queue::adapters::postgres::{PostgresTaskStore, build_pool};
use taskloom::queue::domain::Document;
use taskloom::queue::services::{EnqueueRequest, TaskQueueService};
use taskloom::worker::ENV_DATABASE_URL;
use thiserror::Error;

/// Boxed error type for the main result.
type BoxError = Box<dyn std::error::Error + Send + Sync>;

const ENQUEUE_POOL_SIZE: u32 = 1;

#[derive(Debug, Error)]
enum EnqueueError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("payload is not valid JSON: {0}")]
    Payload(#[source] serde_json::Error),
    #[error("{ENV_DATABASE_URL} is not set")]
    MissingDatabaseUrl,
}

#[derive(Debug, PartialEq)]
struct EnqueueArgs {
    task_type: String,
    payload: Document,
    priority: Option<i32>,
}

impl EnqueueArgs {
    fn into_request(self) -> EnqueueRequest {
        let request = EnqueueRequest::new(self.task_type, self.payload);
        match self.priority {
            Some(priority) => request.with_priority(priority),
            None => request,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    taskloom::telemetry::init_tracing()?;
    let args = parse_args(std::env::args())?;
    let database_url = std::env::var(ENV_DATABASE_URL)
        .ok()
        .filter(|url| !url.trim().is_empty())
        .ok_or(EnqueueError::MissingDatabaseUrl)?;

    let pool = build_pool(&database_url, ENQUEUE_POOL_SIZE)?;
    let service = TaskQueueService::new(
        Arc::new(PostgresTaskStore::new(pool)),
        Arc::new(DefaultClock),
    );
    let task_id = service.enqueue(args.into_request()).await?;
    print_task_id(&task_id.to_string());
    Ok(())
}

#[expect(
    clippy::print_stdout,
    reason = "the task identifier is the command's output"
)]
fn print_task_id(task_id: &str) {
    println!("{task_id}");
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<EnqueueArgs, EnqueueError> {
    let _program = args.next();
    let task_type = args
        .next()
        .ok_or_else(|| EnqueueError::InvalidArgs("missing task type argument".into()))?;
    let raw_payload = args
        .next()
        .ok_or_else(|| EnqueueError::InvalidArgs("missing payload argument".into()))?;
    let payload = serde_json::from_str(&raw_payload)
        .map(Document::from_value)
        .map_err(EnqueueError::Payload)?;
    let priority = args
        .next()
        .map(|raw| {
            raw.trim()
                .parse::<i32>()
                .map_err(|_| EnqueueError::InvalidArgs(format!("priority must be an integer: {raw}")))
        })
        .transpose()?;
    if let Some(extra) = args.next() {
        return Err(EnqueueError::InvalidArgs(format!(
            "unexpected extra argument: {extra}"
        )));
    }
    Ok(EnqueueArgs {
        task_type,
        payload,
        priority,
    })
}
