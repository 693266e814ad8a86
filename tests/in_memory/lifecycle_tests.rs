//! Retry, reclaim and cancellation behaviour through the public services.

use super::helpers::{LEASE, Queue, queue, worker};
use chrono::TimeDelta;
use rstest::rstest;
use serde_json::json;
use taskloom::queue::{
    domain::{Document, FailOutcome, TaskStatus},
    services::{EnqueueRequest, QueueError},
};

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn nested_payload_is_returned_verbatim(queue: Queue) -> eyre::Result<()> {
    let payload = json!({
        "tool": "ping",
        "args": { "message": "héllo", "depth": [1, { "deeper": null }] },
        "flags": [true, false],
        "ratio": 0.25
    });
    let id = queue
        .producer
        .enqueue(EnqueueRequest::new("tool.call", Document::from_value(payload.clone())))
        .await?;

    let claimed = queue.claims.try_claim(&worker("w1"), LEASE, 1).await?;

    let task = claimed.first().ok_or_else(|| eyre::eyre!("nothing claimed"))?;
    assert_eq!(task.id(), id);
    assert_eq!(task.payload().as_value(), &payload);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn each_lapse_adds_exactly_one_attempt(queue: Queue) -> eyre::Result<()> {
    let id = queue
        .producer
        .enqueue(EnqueueRequest::new("echo", Document::empty()).with_max_attempts(4))
        .await?;

    for (round, name) in ["a", "b", "c", "d"].into_iter().enumerate() {
        let claimed = queue.claims.try_claim(&worker(name), LEASE, 1).await?;
        assert_eq!(claimed.len(), 1);
        let task = queue.producer.get(id).await?;
        assert_eq!(i64::from(task.attempts()), i64::try_from(round)?);
        queue.clock.advance(TimeDelta::seconds(31));
    }

    let last = queue.claims.try_claim(&worker("e"), LEASE, 1).await?;
    assert!(last.is_empty());
    let task = queue.producer.get(id).await?;
    assert_eq!(task.status(), TaskStatus::Failed);
    assert_eq!(task.attempts(), 4);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn attempts_never_exceed_the_cap(queue: Queue) -> eyre::Result<()> {
    let id = queue.enqueue(1).await;
    let owner = worker("w1");
    let mut claims = 0;

    for _ in 0..10 {
        let claimed = queue.claims.try_claim(&owner, LEASE, 1).await?;
        if claimed.is_empty() {
            queue.clock.advance(TimeDelta::seconds(120));
            continue;
        }
        claims += 1;
        if claims % 2 == 1 {
            queue.completions.fail(id, &owner, "Flaky: again").await?;
        } else {
            queue.clock.advance(TimeDelta::seconds(31));
        }
        let task = queue.producer.get(id).await?;
        assert!(task.attempts() <= task.max_attempts());
        assert!(matches!(
            task.status(),
            TaskStatus::Queued | TaskStatus::Running | TaskStatus::Failed
        ));
    }

    let task = queue.producer.get(id).await?;
    assert_eq!(task.status(), TaskStatus::Failed);
    assert_eq!(task.attempts(), task.max_attempts());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn lower_priority_value_wins_across_batches(queue: Queue) -> eyre::Result<()> {
    for priority in [50, 10, 90, 10] {
        queue
            .producer
            .enqueue(EnqueueRequest::new("echo", Document::empty()).with_priority(priority))
            .await?;
        queue.clock.advance(TimeDelta::milliseconds(5));
    }

    let mut priorities = Vec::new();
    for _ in 0..4 {
        let claimed = queue.claims.try_claim(&worker("w1"), LEASE, 1).await?;
        priorities.extend(claimed.iter().map(taskloom::queue::domain::Task::priority));
    }

    assert_eq!(priorities, vec![10, 10, 50, 90]);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn success_after_a_failure_clears_the_error(queue: Queue) -> eyre::Result<()> {
    let id = queue.enqueue(1).await;
    let owner = worker("w1");
    queue.claims.try_claim(&owner, LEASE, 1).await?;
    let (_, outcome) = queue.completions.fail(id, &owner, "Timeout: slow").await?;
    let FailOutcome::Requeued { available_at } = outcome else {
        eyre::bail!("expected a requeue, got {outcome:?}");
    };

    queue.clock.set(available_at);
    let retried = queue.claims.try_claim(&owner, LEASE, 1).await?;
    let done = queue
        .completions
        .complete(id, &owner, Document::from_value(json!({ "ok": true })))
        .await?;

    assert_eq!(
        retried.first().and_then(|task| task.last_error()),
        Some("Timeout: slow")
    );
    assert_eq!(done.status(), TaskStatus::Succeeded);
    assert_eq!(done.attempts(), 1);
    assert_eq!(done.last_error(), None);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn finished_tasks_cannot_be_canceled(queue: Queue) -> eyre::Result<()> {
    let id = queue.enqueue(1).await;
    let owner = worker("w1");
    queue.claims.try_claim(&owner, LEASE, 1).await?;
    queue.completions.complete(id, &owner, Document::empty()).await?;

    let result = queue.producer.cancel(id).await;

    assert!(matches!(
        result,
        Err(QueueError::AlreadyTerminal {
            status: TaskStatus::Succeeded,
            ..
        })
    ));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_double_completion_has_one_winner(queue: Queue) -> eyre::Result<()> {
    let id = queue.enqueue(1).await;
    let owner = worker("w1");
    queue.claims.try_claim(&owner, LEASE, 1).await?;

    let (first, second) = tokio::join!(
        queue
            .completions
            .complete(id, &owner, Document::from_value(json!({ "by": 1 }))),
        queue
            .completions
            .complete(id, &owner, Document::from_value(json!({ "by": 2 }))),
    );

    let results = [first, second];
    let winners = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results.iter().any(|result| matches!(
        result,
        Err(QueueError::AlreadyTerminal { .. })
    )));
    Ok(())
}
