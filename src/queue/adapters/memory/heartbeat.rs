//! In-memory worker heartbeat registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::queue::{
    domain::{WorkerHeartbeat, WorkerId},
    ports::{HeartbeatRegistry, HeartbeatRegistryError, HeartbeatRegistryResult},
};

/// Thread-safe in-memory heartbeat registry.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHeartbeatRegistry {
    rows: Arc<RwLock<HashMap<WorkerId, WorkerHeartbeat>>>,
}

impl InMemoryHeartbeatRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error(err: impl std::fmt::Display) -> HeartbeatRegistryError {
    HeartbeatRegistryError::persistence(std::io::Error::other(err.to_string()))
}

fn by_worker(mut rows: Vec<WorkerHeartbeat>) -> Vec<WorkerHeartbeat> {
    rows.sort_by(|left, right| left.worker_id().as_str().cmp(right.worker_id().as_str()));
    rows
}

#[async_trait]
impl HeartbeatRegistry for InMemoryHeartbeatRegistry {
    async fn upsert(&self, heartbeat: &WorkerHeartbeat) -> HeartbeatRegistryResult<WorkerHeartbeat> {
        let mut rows = self.rows.write().map_err(lock_error)?;
        let stored = rows
            .get(heartbeat.worker_id())
            .map_or_else(|| heartbeat.clone(), |existing| existing.refreshed_by(heartbeat));
        rows.insert(stored.worker_id().clone(), stored.clone());
        Ok(stored)
    }

    async fn find(&self, worker_id: &WorkerId) -> HeartbeatRegistryResult<Option<WorkerHeartbeat>> {
        let rows = self.rows.read().map_err(lock_error)?;
        Ok(rows.get(worker_id).cloned())
    }

    async fn list_stale(
        &self,
        cutoff: DateTime<Utc>,
    ) -> HeartbeatRegistryResult<Vec<WorkerHeartbeat>> {
        let rows = self.rows.read().map_err(lock_error)?;
        Ok(by_worker(
            rows.values()
                .filter(|row| row.last_seen_at() < cutoff)
                .cloned()
                .collect(),
        ))
    }

    async fn list_all(&self) -> HeartbeatRegistryResult<Vec<WorkerHeartbeat>> {
        let rows = self.rows.read().map_err(lock_error)?;
        Ok(by_worker(rows.values().cloned().collect()))
    }

    async fn remove(&self, worker_id: &WorkerId) -> HeartbeatRegistryResult<bool> {
        let mut rows = self.rows.write().map_err(lock_error)?;
        Ok(rows.remove(worker_id).is_some())
    }
}
