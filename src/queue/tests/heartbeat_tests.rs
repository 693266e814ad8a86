//! Tests for worker liveness reporting.

use super::fixtures::{clock, epoch, worker};
use crate::queue::{
    adapters::memory::InMemoryHeartbeatRegistry,
    services::{HeartbeatService, QueueError, ValidationError},
    testing::ManualClock,
};
use chrono::TimeDelta;
use rstest::{fixture, rstest};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    clock: ManualClock,
    service: HeartbeatService<InMemoryHeartbeatRegistry, ManualClock>,
}

#[fixture]
fn harness(clock: ManualClock) -> Harness {
    Harness {
        service: HeartbeatService::new(
            Arc::new(InMemoryHeartbeatRegistry::new()),
            Arc::new(clock.clone()),
        ),
        clock,
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn repeated_beats_keep_start_and_move_last_seen(harness: Harness) {
    let id = worker("w1");
    harness.service.beat(&id, 1, 60).await.expect("first beat");
    harness.clock.advance(TimeDelta::seconds(10));

    let row = harness.service.beat(&id, 2, 90).await.expect("second beat");

    assert_eq!(row.started_at(), epoch());
    assert_eq!(row.last_seen_at(), epoch() + TimeDelta::seconds(10));
    assert_eq!((row.poll_s(), row.lock_s()), (2, 90));
    assert_eq!(harness.service.workers().await.expect("listed").len(), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn silent_workers_are_reported_stale(harness: Harness) {
    harness.service.beat(&worker("quiet"), 1, 60).await.expect("beat");
    harness.clock.advance(TimeDelta::seconds(45));
    harness.service.beat(&worker("busy"), 1, 60).await.expect("beat");
    harness.clock.advance(TimeDelta::seconds(20));

    let stale = harness
        .service
        .stale_workers(Duration::from_secs(30))
        .await
        .expect("scan succeeds");

    let ids: Vec<_> = stale.iter().map(|row| row.worker_id().clone()).collect();
    assert_eq!(ids, vec![worker("quiet")]);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn forget_removes_the_row_once(harness: Harness) {
    let id = worker("w1");
    harness.service.beat(&id, 1, 60).await.expect("beat");

    harness.service.forget(&id).await.expect("forget succeeds");

    assert!(matches!(
        harness.service.get(&id).await,
        Err(QueueError::WorkerNotFound(_))
    ));
    assert!(matches!(
        harness.service.forget(&id).await,
        Err(QueueError::WorkerNotFound(_))
    ));
}

#[rstest]
#[case::zero_poll(0, 60, "poll_s")]
#[case::zero_lock(1, 0, "lock_s")]
#[case::lock_beyond_storage(1, u32::MAX, "lock_s")]
#[tokio::test(flavor = "multi_thread")]
async fn beat_rejects_out_of_range_intervals(
    harness: Harness,
    #[case] poll_s: u32,
    #[case] lock_s: u32,
    #[case] expected_field: &str,
) {
    let id = worker("w1");

    let result = harness.service.beat(&id, poll_s, lock_s).await;

    assert!(matches!(
        result,
        Err(QueueError::Validation(ValidationError::InvalidHeartbeatInterval { field, .. }))
            if field == expected_field
    ));
    assert!(matches!(
        harness.service.get(&id).await,
        Err(QueueError::WorkerNotFound(_))
    ));
}
