//! Worker heartbeat rows in `PostgreSQL`.

use super::helpers::{BoxError, PgQueue, epoch, pg_queue, worker};
use chrono::TimeDelta;
use rstest::rstest;
use std::sync::Arc;
use std::time::Duration;
use taskloom::queue::{
    services::{HeartbeatService, QueueError},
    testing::ManualClock,
};

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn upsert_keeps_start_and_refreshes_settings(
    pg_queue: Result<Option<PgQueue>, BoxError>,
) -> Result<(), BoxError> {
    let Some(db) = pg_queue? else {
        return Ok(());
    };
    let clock = ManualClock::new(epoch());
    let service = HeartbeatService::new(Arc::clone(&db.heartbeats), Arc::new(clock.clone()));
    let id = worker("pg-w1");

    service.beat(&id, 1, 60).await?;
    clock.advance(TimeDelta::seconds(10));
    let row = service.beat(&id, 2, 90).await?;

    assert_eq!(row.started_at(), epoch());
    assert_eq!(row.last_seen_at(), epoch() + TimeDelta::seconds(10));
    assert_eq!((row.poll_s(), row.lock_s()), (2, 90));
    assert_eq!(service.get(&id).await?, row);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn silent_workers_are_reported_stale(
    pg_queue: Result<Option<PgQueue>, BoxError>,
) -> Result<(), BoxError> {
    let Some(db) = pg_queue? else {
        return Ok(());
    };
    let clock = ManualClock::new(epoch());
    let service = HeartbeatService::new(Arc::clone(&db.heartbeats), Arc::new(clock.clone()));
    let (quiet, busy) = (worker("quiet"), worker("busy"));
    service.beat(&quiet, 1, 60).await?;
    clock.advance(TimeDelta::seconds(45));
    service.beat(&busy, 1, 60).await?;

    let stale: Vec<_> = service
        .stale_workers(Duration::from_secs(30))
        .await?
        .iter()
        .map(|row| row.worker_id().clone())
        .collect();

    assert_eq!(stale, vec![quiet]);
    assert_eq!(service.workers().await?.len(), 2);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn forget_removes_the_row_once(
    pg_queue: Result<Option<PgQueue>, BoxError>,
) -> Result<(), BoxError> {
    let Some(db) = pg_queue? else {
        return Ok(());
    };
    let service = HeartbeatService::new(
        Arc::clone(&db.heartbeats),
        Arc::new(ManualClock::new(epoch())),
    );
    let id = worker("leaving");
    service.beat(&id, 1, 60).await?;

    service.forget(&id).await?;
    let again = service.forget(&id).await;

    assert!(matches!(again, Err(QueueError::WorkerNotFound(gone)) if gone == id));
    assert!(matches!(service.get(&id).await, Err(QueueError::WorkerNotFound(_))));
    Ok(())
}
