//! Claim, reclaim and completion through the `PostgreSQL` store.

use super::helpers::{BoxError, PgQueue, epoch, pg_queue, worker};
use chrono::TimeDelta;
use rstest::rstest;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use taskloom::queue::{
    domain::{Document, TaskId, TaskStatus},
    services::{ClaimEngine, CompletionService, EnqueueRequest, QueueError, TaskQueueService},
    testing::ManualClock,
};
use tokio::task::JoinSet;

const LEASE: Duration = Duration::from_secs(30);
const TASKS: usize = 20;
const WORKERS: usize = 8;

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_never_share_a_task(
    pg_queue: Result<Option<PgQueue>, BoxError>,
) -> Result<(), BoxError> {
    let Some(db) = pg_queue? else {
        return Ok(());
    };
    let clock = Arc::new(ManualClock::new(epoch()));
    let producer = TaskQueueService::new(Arc::clone(&db.store), Arc::clone(&clock));
    for n in 0..TASKS {
        producer
            .enqueue(EnqueueRequest::new("echo", Document::from_value(json!({ "n": n }))))
            .await?;
    }
    let claims = ClaimEngine::new(Arc::clone(&db.store), Arc::clone(&clock));

    let mut claimers = JoinSet::new();
    for index in 0..WORKERS {
        let engine = claims.clone();
        claimers.spawn(async move {
            let me = worker(&format!("pg-w{index}"));
            let mut mine = Vec::new();
            loop {
                let batch = engine.try_claim(&me, LEASE, 2).await?;
                if batch.is_empty() {
                    break;
                }
                mine.extend(batch.iter().map(|task| task.id()));
            }
            Ok::<_, QueueError>(mine)
        });
    }

    let mut seen: HashSet<TaskId> = HashSet::new();
    while let Some(joined) = claimers.join_next().await {
        for id in joined?? {
            assert!(seen.insert(id), "task {id} claimed twice");
        }
    }

    assert_eq!(seen.len(), TASKS);
    for id in seen {
        assert_eq!(producer.get(id).await?.status(), TaskStatus::Running);
    }
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn lapsed_lease_is_reclaimed_and_completed(
    pg_queue: Result<Option<PgQueue>, BoxError>,
) -> Result<(), BoxError> {
    let Some(db) = pg_queue? else {
        return Ok(());
    };
    let clock = ManualClock::new(epoch());
    let shared = Arc::new(clock.clone());
    let producer = TaskQueueService::new(Arc::clone(&db.store), Arc::clone(&shared));
    let claims = ClaimEngine::new(Arc::clone(&db.store), Arc::clone(&shared));
    let completions = CompletionService::new(Arc::clone(&db.store), shared);
    let id = producer
        .enqueue(EnqueueRequest::new("echo", Document::empty()))
        .await?;
    let (crashed, healthy) = (worker("crashed"), worker("healthy"));

    assert_eq!(claims.try_claim(&crashed, LEASE, 1).await?.len(), 1);
    clock.advance(TimeDelta::seconds(31));
    let reclaimed = claims.try_claim(&healthy, LEASE, 1).await?;
    let late = completions
        .complete(id, &crashed, Document::from_value(json!({ "late": true })))
        .await;
    let done = completions
        .complete(id, &healthy, Document::from_value(json!({ "ok": true })))
        .await?;

    assert!(
        reclaimed
            .first()
            .and_then(|task| task.last_error())
            .is_some_and(|err| err.contains("crashed"))
    );
    assert!(matches!(late, Err(QueueError::AlreadyReassigned { .. })));
    assert_eq!(done.status(), TaskStatus::Succeeded);
    assert_eq!(done.attempts(), 1);
    assert!(done.lease().is_none());
    let stored = producer.get(id).await?;
    assert_eq!(stored.result().map(Document::as_value), Some(&json!({ "ok": true })));
    assert_eq!(stored.last_error(), None);
    Ok(())
}
