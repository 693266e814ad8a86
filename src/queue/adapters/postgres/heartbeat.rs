//! `PostgreSQL` worker heartbeat registry.

use super::{
    models::HeartbeatRow,
    pool::{QueuePgPool, run_blocking},
    schema::worker_heartbeats,
};
use crate::queue::{
    domain::{WorkerHeartbeat, WorkerId},
    ports::{HeartbeatRegistry, HeartbeatRegistryError, HeartbeatRegistryResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::{Int4, Timestamptz, Varchar};

/// `PostgreSQL`-backed heartbeat registry.
#[derive(Debug, Clone)]
pub struct PostgresHeartbeatRegistry {
    pool: QueuePgPool,
}

impl PostgresHeartbeatRegistry {
    /// Creates a registry from a connection pool.
    #[must_use]
    pub const fn new(pool: QueuePgPool) -> Self {
        Self { pool }
    }

    async fn run_blocking<F, T>(&self, f: F) -> HeartbeatRegistryResult<T>
    where
        F: FnOnce(&mut PgConnection) -> HeartbeatRegistryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        run_blocking(
            &self.pool,
            move |connection| f(connection),
            HeartbeatRegistryError::persistence,
        )
        .await
    }
}

#[async_trait]
impl HeartbeatRegistry for PostgresHeartbeatRegistry {
    async fn upsert(&self, heartbeat: &WorkerHeartbeat) -> HeartbeatRegistryResult<WorkerHeartbeat> {
        let key = heartbeat.worker_id().as_str().to_owned();
        let started_at = heartbeat.started_at();
        let last_seen_at = heartbeat.last_seen_at();
        let poll_s = to_column(heartbeat.poll_s())?;
        let lock_s = to_column(heartbeat.lock_s())?;

        self.run_blocking(move |connection| {
            let row = diesel::sql_query(concat!(
                "INSERT INTO worker_heartbeats ",
                "(worker_id, started_at, last_seen_at, poll_s, lock_s) ",
                "VALUES ($1, $2, $3, $4, $5) ",
                "ON CONFLICT (worker_id) DO UPDATE SET ",
                "last_seen_at = GREATEST(worker_heartbeats.last_seen_at, EXCLUDED.last_seen_at), ",
                "poll_s = EXCLUDED.poll_s, lock_s = EXCLUDED.lock_s ",
                "RETURNING worker_id, started_at, last_seen_at, poll_s, lock_s",
            ))
            .bind::<Varchar, _>(key)
            .bind::<Timestamptz, _>(started_at)
            .bind::<Timestamptz, _>(last_seen_at)
            .bind::<Int4, _>(poll_s)
            .bind::<Int4, _>(lock_s)
            .get_result::<HeartbeatRow>(connection)
            .map_err(HeartbeatRegistryError::persistence)?;
            row_to_heartbeat(row)
        })
        .await
    }

    async fn find(&self, worker_id: &WorkerId) -> HeartbeatRegistryResult<Option<WorkerHeartbeat>> {
        let key = worker_id.as_str().to_owned();
        self.run_blocking(move |connection| {
            let row = worker_heartbeats::table
                .filter(worker_heartbeats::worker_id.eq(key))
                .select(HeartbeatRow::as_select())
                .first::<HeartbeatRow>(connection)
                .optional()
                .map_err(HeartbeatRegistryError::persistence)?;
            row.map(row_to_heartbeat).transpose()
        })
        .await
    }

    async fn list_stale(
        &self,
        cutoff: DateTime<Utc>,
    ) -> HeartbeatRegistryResult<Vec<WorkerHeartbeat>> {
        self.run_blocking(move |connection| {
            let rows = worker_heartbeats::table
                .filter(worker_heartbeats::last_seen_at.lt(cutoff))
                .order(worker_heartbeats::worker_id.asc())
                .select(HeartbeatRow::as_select())
                .load::<HeartbeatRow>(connection)
                .map_err(HeartbeatRegistryError::persistence)?;
            rows.into_iter().map(row_to_heartbeat).collect()
        })
        .await
    }

    async fn list_all(&self) -> HeartbeatRegistryResult<Vec<WorkerHeartbeat>> {
        self.run_blocking(move |connection| {
            let rows = worker_heartbeats::table
                .order(worker_heartbeats::worker_id.asc())
                .select(HeartbeatRow::as_select())
                .load::<HeartbeatRow>(connection)
                .map_err(HeartbeatRegistryError::persistence)?;
            rows.into_iter().map(row_to_heartbeat).collect()
        })
        .await
    }

    async fn remove(&self, worker_id: &WorkerId) -> HeartbeatRegistryResult<bool> {
        let key = worker_id.as_str().to_owned();
        self.run_blocking(move |connection| {
            let deleted = diesel::delete(
                worker_heartbeats::table.filter(worker_heartbeats::worker_id.eq(key)),
            )
            .execute(connection)
            .map_err(HeartbeatRegistryError::persistence)?;
            Ok(deleted > 0)
        })
        .await
    }
}

fn to_column(seconds: u32) -> HeartbeatRegistryResult<i32> {
    i32::try_from(seconds).map_err(HeartbeatRegistryError::invalid_persisted_data)
}

fn row_to_heartbeat(row: HeartbeatRow) -> HeartbeatRegistryResult<WorkerHeartbeat> {
    let worker_id =
        WorkerId::new(row.worker_id).map_err(HeartbeatRegistryError::invalid_persisted_data)?;
    let poll_s = u32::try_from(row.poll_s).map_err(HeartbeatRegistryError::invalid_persisted_data)?;
    let lock_s = u32::try_from(row.lock_s).map_err(HeartbeatRegistryError::invalid_persisted_data)?;
    Ok(WorkerHeartbeat::from_persisted(
        worker_id,
        row.started_at,
        row.last_seen_at,
        poll_s,
        lock_s,
    ))
}
