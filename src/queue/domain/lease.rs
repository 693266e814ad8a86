//! Time-bounded ownership grant on a task.

use super::WorkerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exclusive, time-bounded ownership of a task by one worker.
///
/// Persisted as the `locked_by`, `locked_at` and `lock_expires_at` columns,
/// which are therefore either all set or all null.
///
/// A lease is held while `now <= expires_at` and becomes reclaimable once
/// `expires_at < now`; the two predicates never overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    worker_id: WorkerId,
    locked_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Lease {
    /// Creates a lease record.
    #[must_use]
    pub const fn new(
        worker_id: WorkerId,
        locked_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            worker_id,
            locked_at,
            expires_at,
        }
    }

    /// Returns the owning worker.
    #[must_use]
    pub const fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Returns when the lease was granted.
    #[must_use]
    pub const fn locked_at(&self) -> DateTime<Utc> {
        self.locked_at
    }

    /// Returns when the lease lapses.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns `true` when the lease has lapsed and may be reclaimed.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Returns `true` when `worker_id` holds this lease at `now`.
    #[must_use]
    pub fn is_held_by(&self, worker_id: &WorkerId, now: DateTime<Utc>) -> bool {
        self.worker_id == *worker_id && !self.is_expired_at(now)
    }

    pub(super) const fn extend_to(&mut self, expires_at: DateTime<Utc>) {
        self.expires_at = expires_at;
    }
}
