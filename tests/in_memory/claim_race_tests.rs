//! Concurrent claimers racing over one store.

use super::helpers::{LEASE, Queue, queue, worker};
use rstest::rstest;
use std::collections::HashSet;
use std::sync::Arc;
use taskloom::queue::domain::{TaskId, TaskStatus};
use tokio::task::JoinSet;

const TASKS: i64 = 60;
const WORKERS: usize = 12;

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_task_is_claimed_by_exactly_one_worker(queue: Queue) -> eyre::Result<()> {
    for n in 0..TASKS {
        queue.enqueue(n).await;
    }
    let queue = Arc::new(queue);

    let mut claimers = JoinSet::new();
    for index in 0..WORKERS {
        let shared = Arc::clone(&queue);
        claimers.spawn(async move {
            let me = worker(&format!("w{index}"));
            let mut mine = Vec::new();
            loop {
                let batch = shared.claims.try_claim(&me, LEASE, 3).await?;
                if batch.is_empty() {
                    break;
                }
                mine.extend(batch.into_iter().map(|task| task.id()));
            }
            Ok::<_, taskloom::queue::services::QueueError>(mine)
        });
    }

    let mut seen: HashSet<TaskId> = HashSet::new();
    let mut total = 0;
    while let Some(joined) = claimers.join_next().await {
        for id in joined?? {
            total += 1;
            assert!(seen.insert(id), "task {id} claimed twice");
        }
    }

    assert_eq!(total, usize::try_from(TASKS)?);
    for id in seen {
        let task = queue.producer.get(id).await?;
        assert_eq!(task.status(), TaskStatus::Running);
        assert_eq!(task.attempts(), 0);
    }
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_task_has_a_single_winner(queue: Queue) -> eyre::Result<()> {
    let id = queue.enqueue(1).await;
    let queue = Arc::new(queue);

    let mut claimers = JoinSet::new();
    for index in 0..WORKERS {
        let shared = Arc::clone(&queue);
        claimers.spawn(async move {
            shared
                .claims
                .try_claim(&worker(&format!("w{index}")), LEASE, 1)
                .await
        });
    }

    let mut winners = 0;
    while let Some(joined) = claimers.join_next().await {
        winners += joined??.len();
    }

    assert_eq!(winners, 1);
    let task = queue.producer.get(id).await?;
    assert_eq!(task.status(), TaskStatus::Running);
    Ok(())
}
