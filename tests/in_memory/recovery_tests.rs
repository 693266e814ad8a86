//! A crashed worker's task is finished by another worker.

use super::helpers::{LEASE, Queue, queue, worker};
use chrono::TimeDelta;
use std::sync::Arc;
use std::time::Duration;
use rstest::rstest;
use taskloom::handlers::register_builtin_handlers;
use taskloom::queue::{
    adapters::memory::InMemoryHeartbeatRegistry,
    domain::{BackoffPolicy, Document, TaskStatus},
    services::{EnqueueRequest, HandlerRegistry, HeartbeatService},
};
use taskloom::worker::{ProcessOutcome, Worker, WorkerOptions};
use serde_json::json;

fn options() -> WorkerOptions {
    WorkerOptions {
        poll_interval: Duration::from_millis(20),
        lease_duration: LEASE,
        renew_interval: Duration::from_secs(10),
        heartbeat_interval: Duration::from_secs(5),
        batch: 1,
        backoff: BackoffPolicy::fixed_exponential(Duration::from_secs(1), Duration::from_secs(60)),
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn lapsed_lease_is_finished_by_a_healthy_worker(queue: Queue) -> eyre::Result<()> {
    let heartbeats = Arc::new(InMemoryHeartbeatRegistry::new());
    let liveness = HeartbeatService::new(Arc::clone(&heartbeats), Arc::new(queue.clock.clone()));
    let id = queue
        .producer
        .enqueue(EnqueueRequest::new(
            "tool.call",
            Document::from_value(json!({ "tool": "ping", "args": { "message": "again" } })),
        ))
        .await?;

    let crashed = worker("crashed");
    liveness.beat(&crashed, 1, 30).await?;
    let lost = queue.claims.try_claim(&crashed, LEASE, 1).await?;
    assert_eq!(lost.len(), 1);

    queue.clock.advance(TimeDelta::seconds(45));
    let stale = liveness.stale_workers(Duration::from_secs(30)).await?;
    assert_eq!(stale.first().map(|row| row.worker_id().clone()), Some(crashed));
    assert_eq!(queue.leases.find_expired(10).await?.len(), 1);

    let mut handlers = HandlerRegistry::new();
    register_builtin_handlers(&mut handlers)?;
    let healthy = Arc::new(Worker::new(
        worker("healthy"),
        options(),
        Arc::clone(&queue.store),
        heartbeats,
        Arc::new(queue.clock.clone()),
        handlers,
    ));
    let outcomes = healthy.run_once().await?;

    assert!(matches!(outcomes.as_slice(), [ProcessOutcome::Completed]));
    let task = queue.producer.get(id).await?;
    assert_eq!(task.status(), TaskStatus::Succeeded);
    assert_eq!(task.attempts(), 1);
    assert_eq!(task.last_error(), None);
    let result = task.result().and_then(Document::as_object);
    assert_eq!(
        result.and_then(|fields| fields.get("echo")),
        Some(&json!("again"))
    );
    Ok(())
}
