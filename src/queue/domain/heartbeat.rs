//! Worker-level liveness records.

use super::WorkerId;
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};

/// Liveness row published by a worker process, independent of any task lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    worker_id: WorkerId,
    started_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    poll_s: u32,
    lock_s: u32,
}

impl WorkerHeartbeat {
    /// Creates a heartbeat stamped with the current time.
    #[must_use]
    pub fn new(worker_id: WorkerId, poll_s: u32, lock_s: u32, clock: &impl Clock) -> Self {
        let now = clock.utc();
        Self {
            worker_id,
            started_at: now,
            last_seen_at: now,
            poll_s,
            lock_s,
        }
    }

    /// Reconstructs a heartbeat from persisted storage.
    #[must_use]
    pub const fn from_persisted(
        worker_id: WorkerId,
        started_at: DateTime<Utc>,
        last_seen_at: DateTime<Utc>,
        poll_s: u32,
        lock_s: u32,
    ) -> Self {
        Self {
            worker_id,
            started_at,
            last_seen_at,
            poll_s,
            lock_s,
        }
    }

    /// Returns the worker identity.
    #[must_use]
    pub const fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Returns when the worker first reported.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns the most recent report time.
    #[must_use]
    pub const fn last_seen_at(&self) -> DateTime<Utc> {
        self.last_seen_at
    }

    /// Returns the published poll interval in seconds.
    #[must_use]
    pub const fn poll_s(&self) -> u32 {
        self.poll_s
    }

    /// Returns the published lease duration in seconds.
    #[must_use]
    pub const fn lock_s(&self) -> u32 {
        self.lock_s
    }

    /// Merges a fresh report into an existing row, keeping `started_at`.
    #[must_use]
    pub fn refreshed_by(&self, report: &Self) -> Self {
        Self {
            worker_id: self.worker_id.clone(),
            started_at: self.started_at,
            last_seen_at: report.last_seen_at.max(self.last_seen_at),
            poll_s: report.poll_s,
            lock_s: report.lock_s,
        }
    }

    /// Returns `true` when no report arrived within `threshold` of `now`.
    #[must_use]
    pub fn is_stale_at(&self, now: DateTime<Utc>, threshold: TimeDelta) -> bool {
        now.signed_duration_since(self.last_seen_at) > threshold
    }
}
