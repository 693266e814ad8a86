//! Registry port for worker liveness rows.

use crate::queue::domain::{WorkerHeartbeat, WorkerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Result type for heartbeat registry operations.
pub type HeartbeatRegistryResult<T> = Result<T, HeartbeatRegistryError>;

/// Worker liveness persistence contract.
#[async_trait]
pub trait HeartbeatRegistry: Send + Sync {
    /// Inserts the row or refreshes `last_seen_at`, `poll_s` and `lock_s`
    /// of an existing one, keeping its `started_at`. Returns the stored row.
    async fn upsert(&self, heartbeat: &WorkerHeartbeat) -> HeartbeatRegistryResult<WorkerHeartbeat>;

    /// Finds the row for a worker.
    async fn find(&self, worker_id: &WorkerId) -> HeartbeatRegistryResult<Option<WorkerHeartbeat>>;

    /// Returns rows whose `last_seen_at` is older than `cutoff`.
    async fn list_stale(&self, cutoff: DateTime<Utc>)
    -> HeartbeatRegistryResult<Vec<WorkerHeartbeat>>;

    /// Returns every row.
    async fn list_all(&self) -> HeartbeatRegistryResult<Vec<WorkerHeartbeat>>;

    /// Removes a worker's row. Returns `false` when none existed.
    async fn remove(&self, worker_id: &WorkerId) -> HeartbeatRegistryResult<bool>;
}

/// Errors returned by heartbeat registry implementations.
#[derive(Debug, Clone, Error)]
pub enum HeartbeatRegistryError {
    /// Persisted data could not be reconstructed into domain types.
    #[error("invalid persisted data: {0}")]
    InvalidPersistedData(Arc<dyn std::error::Error + Send + Sync>),

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl HeartbeatRegistryError {
    /// Wraps a data-quality or deserialization error from persisted rows.
    pub fn invalid_persisted_data(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::InvalidPersistedData(Arc::new(err))
    }

    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
