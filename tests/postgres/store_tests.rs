//! Store adapter behaviour against a real `PostgreSQL` database.

use super::helpers::{BoxError, PgQueue, epoch, pg_queue, worker};
use chrono::TimeDelta;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use mockable::Clock;
use rstest::rstest;
use serde_json::json;
use std::sync::Arc;
use taskloom::queue::{
    domain::{Document, NewTask, Task, TaskStatus, TaskType},
    ports::{TaskStore, TaskStoreError},
    services::{EnqueueRequest, QueueError, TaskQueueService, ValidationError},
    testing::ManualClock,
};

fn new_task(clock: &ManualClock, priority: i32) -> Task {
    Task::new(
        NewTask {
            task_type: TaskType::new("echo").expect("valid type"),
            payload: Document::from_value(json!({ "priority": priority })),
            priority,
            max_attempts: 3,
            run_id: None,
            parent_task_id: None,
        },
        clock,
    )
    .expect("valid task")
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn insert_and_find_round_trip(
    pg_queue: Result<Option<PgQueue>, BoxError>,
) -> Result<(), BoxError> {
    let Some(db) = pg_queue? else {
        return Ok(());
    };
    let clock = ManualClock::new(epoch());
    let producer = TaskQueueService::new(Arc::clone(&db.store), Arc::new(clock.clone()));
    let payload = json!({ "tool": "ping", "args": { "message": "hi", "tags": ["a", "b"] } });

    let id = producer
        .enqueue(
            EnqueueRequest::new("tool.call", Document::from_value(payload.clone())).with_priority(7),
        )
        .await?;
    let stored = db.store.find_by_id(id).await?.expect("row exists");

    assert_eq!(stored.status(), TaskStatus::Queued);
    assert_eq!(stored.task_type().as_str(), "tool.call");
    assert_eq!(stored.payload().as_value(), &payload);
    assert_eq!(stored.priority(), 7);
    assert_eq!(stored.attempts(), 0);
    assert_eq!(stored.available_at(), epoch());
    assert!(stored.lease().is_none());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn duplicate_insert_is_rejected(
    pg_queue: Result<Option<PgQueue>, BoxError>,
) -> Result<(), BoxError> {
    let Some(db) = pg_queue? else {
        return Ok(());
    };
    let task = new_task(&ManualClock::new(epoch()), 100);
    db.store.insert(&task).await?;

    let result = db.store.insert(&task).await;

    assert!(matches!(result, Err(TaskStoreError::DuplicateTask(id)) if id == task.id()));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn unknown_parent_is_a_validation_error(
    pg_queue: Result<Option<PgQueue>, BoxError>,
) -> Result<(), BoxError> {
    let Some(db) = pg_queue? else {
        return Ok(());
    };
    let producer =
        TaskQueueService::new(Arc::clone(&db.store), Arc::new(ManualClock::new(epoch())));
    let missing = taskloom::queue::domain::TaskId::new();

    let result = producer
        .enqueue(EnqueueRequest::new("echo", Document::empty()).with_parent(missing))
        .await;

    assert!(matches!(
        result,
        Err(QueueError::Validation(ValidationError::ParentNotFound(id))) if id == missing
    ));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn candidates_follow_priority_then_age(
    pg_queue: Result<Option<PgQueue>, BoxError>,
) -> Result<(), BoxError> {
    let Some(db) = pg_queue? else {
        return Ok(());
    };
    let clock = ManualClock::new(epoch());
    let late = new_task(&clock, 50);
    clock.advance(TimeDelta::seconds(1));
    let urgent = new_task(&clock, 10);
    let later = new_task(&clock, 50);
    for task in [&late, &urgent, &later] {
        db.store.insert(task).await?;
    }

    let ids: Vec<_> = db
        .store
        .claim_candidates(clock.utc(), 10)
        .await?
        .iter()
        .map(Task::id)
        .collect();

    assert_eq!(ids, vec![urgent.id(), late.id(), later.id()]);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn stale_guard_does_not_write(
    pg_queue: Result<Option<PgQueue>, BoxError>,
) -> Result<(), BoxError> {
    let Some(db) = pg_queue? else {
        return Ok(());
    };
    let task = new_task(&ManualClock::new(epoch()), 100);
    db.store.insert(&task).await?;
    let guard = task.guard();
    let mut first = task.clone();
    first.claim(&worker("w1"), TimeDelta::seconds(60), epoch())?;
    let mut second = task;
    second.claim(&worker("w2"), TimeDelta::seconds(60), epoch())?;

    assert!(db.store.compare_and_swap(&guard, &first).await?);
    assert!(!db.store.compare_and_swap(&guard, &second).await?);
    let stored = db.store.find_by_id(first.id()).await?.expect("row exists");
    assert_eq!(
        stored.lease().map(|lease| lease.worker_id().as_str()),
        Some("w1")
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn purge_detaches_children(
    pg_queue: Result<Option<PgQueue>, BoxError>,
) -> Result<(), BoxError> {
    let Some(db) = pg_queue? else {
        return Ok(());
    };
    let producer =
        TaskQueueService::new(Arc::clone(&db.store), Arc::new(ManualClock::new(epoch())));
    let parent = producer
        .enqueue(EnqueueRequest::new("echo", Document::empty()))
        .await?;
    let child = producer
        .enqueue(EnqueueRequest::new("echo", Document::empty()).with_parent(parent))
        .await?;

    producer.purge(parent).await?;

    assert!(db.store.find_by_id(parent).await?.is_none());
    let orphan = db.store.find_by_id(child).await?.expect("child survives");
    assert_eq!(orphan.parent_task_id(), None);
    assert!(!db.store.purge(parent).await?);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn expired_leases_are_listed_oldest_first(
    pg_queue: Result<Option<PgQueue>, BoxError>,
) -> Result<(), BoxError> {
    let Some(db) = pg_queue? else {
        return Ok(());
    };
    let clock = ManualClock::new(epoch());
    let mut short = new_task(&clock, 100);
    let mut long = new_task(&clock, 100);
    let idle = new_task(&clock, 100);
    long.claim(&worker("w1"), TimeDelta::seconds(20), epoch())?;
    short.claim(&worker("w2"), TimeDelta::seconds(10), epoch())?;
    for task in [&long, &short, &idle] {
        db.store.insert(task).await?;
    }

    let early: Vec<_> = db
        .store
        .find_expired_leases(epoch() + TimeDelta::seconds(15), 10)
        .await?
        .iter()
        .map(Task::id)
        .collect();
    let late: Vec<_> = db
        .store
        .find_expired_leases(epoch() + TimeDelta::seconds(25), 10)
        .await?
        .iter()
        .map(Task::id)
        .collect();

    assert_eq!(early, vec![short.id()]);
    assert_eq!(late, vec![short.id(), long.id()]);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn schema_rejects_inconsistent_rows(
    pg_queue: Result<Option<PgQueue>, BoxError>,
) -> Result<(), BoxError> {
    let Some(db) = pg_queue? else {
        return Ok(());
    };
    let mut conn = PgConnection::establish(db.url())?;

    let unknown_status = conn.batch_execute(
        "INSERT INTO tasks (id, task_type, status) \
         VALUES (gen_random_uuid(), 'echo', 'paused')",
    );
    let attempts_over_cap = conn.batch_execute(
        "INSERT INTO tasks (id, task_type, attempts, max_attempts) \
         VALUES (gen_random_uuid(), 'echo', 4, 3)",
    );

    assert!(unknown_status.is_err());
    assert!(attempts_over_cap.is_err());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn looping_parent_chain_is_rejected(
    pg_queue: Result<Option<PgQueue>, BoxError>,
) -> Result<(), BoxError> {
    let Some(db) = pg_queue? else {
        return Ok(());
    };
    let producer =
        TaskQueueService::new(Arc::clone(&db.store), Arc::new(ManualClock::new(epoch())));
    let root = producer
        .enqueue(EnqueueRequest::new("echo", Document::empty()))
        .await?;
    let child = producer
        .enqueue(EnqueueRequest::new("echo", Document::empty()).with_parent(root))
        .await?;
    let mut conn = PgConnection::establish(db.url())?;
    conn.batch_execute(&format!(
        "UPDATE tasks SET parent_task_id = '{child}' WHERE id = '{root}'"
    ))?;

    let result = producer
        .enqueue(EnqueueRequest::new("echo", Document::empty()).with_parent(child))
        .await;

    assert!(matches!(
        result,
        Err(QueueError::Validation(ValidationError::ParentCycle { parent_id, .. }))
            if parent_id == child
    ));
    Ok(())
}
