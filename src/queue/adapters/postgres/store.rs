//! `PostgreSQL` task store.

use super::{
    models::{ChainProbeRow, NewTaskRow, TaskRow},
    pool::{QueuePgPool, run_blocking},
    schema::tasks,
};
use crate::queue::{
    domain::{
        Document, Lease, PersistedTaskData, RunId, Task, TaskDomainError, TaskGuard, TaskId,
        TaskStatus, TaskType, WorkerId,
    },
    ports::{TaskStore, TaskStoreError, TaskStoreResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::{BigInt, Int4, Jsonb, Nullable, Text, Timestamptz, Uuid as SqlUuid};

const TASK_COLUMNS: &str = concat!(
    "id, created_at, updated_at, task_type, priority, payload, status, available_at, ",
    "locked_by, locked_at, lock_expires_at, run_id, parent_task_id, attempts, ",
    "max_attempts, last_error, result",
);

/// Bound on how far the cycle probe follows a parent chain.
const MAX_PARENT_DEPTH: i64 = 10_000;

/// `PostgreSQL`-backed task store.
#[derive(Debug, Clone)]
pub struct PostgresTaskStore {
    pool: QueuePgPool,
}

impl PostgresTaskStore {
    /// Creates a store from a connection pool.
    #[must_use]
    pub const fn new(pool: QueuePgPool) -> Self {
        Self { pool }
    }

    async fn run_blocking<F, T>(&self, f: F) -> TaskStoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> TaskStoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        run_blocking(
            &self.pool,
            move |connection| f(connection),
            TaskStoreError::persistence,
        )
        .await
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn insert(&self, task: &Task) -> TaskStoreResult<()> {
        let task_id = task.id();
        let parent_id = task.parent_task_id();
        let new_row = to_new_row(task);

        self.run_blocking(move |connection| {
            if let Some(parent) = parent_id {
                probe_parent_chain(connection, task_id, parent)?;
            }
            diesel::insert_into(tasks::table)
                .values(&new_row)
                .execute(connection)
                .map_err(|err| match err {
                    DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                        TaskStoreError::DuplicateTask(task_id)
                    }
                    DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => {
                        parent_id.map_or_else(
                            || TaskStoreError::persistence(err),
                            TaskStoreError::ParentNotFound,
                        )
                    }
                    _ => TaskStoreError::persistence(err),
                })?;
            Ok(())
        })
        .await
    }

    async fn find_by_id(&self, id: TaskId) -> TaskStoreResult<Option<Task>> {
        self.run_blocking(move |connection| {
            let row = tasks::table
                .filter(tasks::id.eq(id.into_inner()))
                .select(TaskRow::as_select())
                .first::<TaskRow>(connection)
                .optional()
                .map_err(TaskStoreError::persistence)?;
            row.map(row_to_task).transpose()
        })
        .await
    }

    async fn claim_candidates(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> TaskStoreResult<Vec<Task>> {
        let row_limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.run_blocking(move |connection| {
            let query = format!(
                concat!(
                    "SELECT {} FROM tasks ",
                    "WHERE available_at <= $1 ",
                    "AND (status = 'queued' OR (status = 'running' AND lock_expires_at < $1)) ",
                    "ORDER BY priority ASC, created_at ASC, id ASC ",
                    "LIMIT $2",
                ),
                TASK_COLUMNS
            );
            let rows = diesel::sql_query(query)
                .bind::<Timestamptz, _>(now)
                .bind::<BigInt, _>(row_limit)
                .load::<TaskRow>(connection)
                .map_err(TaskStoreError::persistence)?;
            rows.into_iter().map(row_to_task).collect()
        })
        .await
    }

    async fn compare_and_swap(&self, guard: &TaskGuard, next: &Task) -> TaskStoreResult<bool> {
        let expected = guard.clone();
        let row = to_new_row(next);
        self.run_blocking(move |connection| {
            let (guard_by, guard_at, guard_expires) = lease_columns(expected.lease.as_ref());
            let updated = diesel::sql_query(concat!(
                "UPDATE tasks SET status = $1, available_at = $2, locked_by = $3, ",
                "locked_at = $4, lock_expires_at = $5, attempts = $6, last_error = $7, ",
                "result = $8, updated_at = $9 ",
                "WHERE id = $10 AND status = $11 ",
                "AND locked_by IS NOT DISTINCT FROM $12 ",
                "AND locked_at IS NOT DISTINCT FROM $13 ",
                "AND lock_expires_at IS NOT DISTINCT FROM $14 ",
                "AND attempts = $15",
            ))
            .bind::<Text, _>(row.status)
            .bind::<Timestamptz, _>(row.available_at)
            .bind::<Nullable<Text>, _>(row.locked_by)
            .bind::<Nullable<Timestamptz>, _>(row.locked_at)
            .bind::<Nullable<Timestamptz>, _>(row.lock_expires_at)
            .bind::<Int4, _>(row.attempts)
            .bind::<Nullable<Text>, _>(row.last_error)
            .bind::<Nullable<Jsonb>, _>(row.result)
            .bind::<Timestamptz, _>(row.updated_at)
            .bind::<SqlUuid, _>(expected.task_id.into_inner())
            .bind::<Text, _>(expected.status.as_str())
            .bind::<Nullable<Text>, _>(guard_by)
            .bind::<Nullable<Timestamptz>, _>(guard_at)
            .bind::<Nullable<Timestamptz>, _>(guard_expires)
            .bind::<Int4, _>(expected.attempts)
            .execute(connection)
            .map_err(TaskStoreError::persistence)?;
            if updated > 0 {
                return Ok(true);
            }

            let exists = diesel::select(diesel::dsl::exists(
                tasks::table.filter(tasks::id.eq(expected.task_id.into_inner())),
            ))
            .get_result::<bool>(connection)
            .map_err(TaskStoreError::persistence)?;
            if exists {
                Ok(false)
            } else {
                Err(TaskStoreError::NotFound(expected.task_id))
            }
        })
        .await
    }

    async fn find_expired_leases(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> TaskStoreResult<Vec<Task>> {
        let row_limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.run_blocking(move |connection| {
            let rows = tasks::table
                .filter(tasks::status.eq(TaskStatus::Running.as_str()))
                .filter(tasks::lock_expires_at.lt(now))
                .order((tasks::lock_expires_at.asc(), tasks::id.asc()))
                .limit(row_limit)
                .select(TaskRow::as_select())
                .load::<TaskRow>(connection)
                .map_err(TaskStoreError::persistence)?;
            rows.into_iter().map(row_to_task).collect()
        })
        .await
    }

    async fn purge(&self, id: TaskId) -> TaskStoreResult<bool> {
        self.run_blocking(move |connection| {
            let deleted = diesel::delete(tasks::table.filter(tasks::id.eq(id.into_inner())))
                .execute(connection)
                .map_err(TaskStoreError::persistence)?;
            Ok(deleted > 0)
        })
        .await
    }
}

/// Rejects an unresolved parent or a chain that reaches `task_id` or loops.
///
/// The walk stops at `MAX_PARENT_DEPTH`; a chain that deep counts as a loop.
fn probe_parent_chain(
    connection: &mut PgConnection,
    task_id: TaskId,
    parent_id: TaskId,
) -> TaskStoreResult<()> {
    let probe = diesel::sql_query(concat!(
        "WITH RECURSIVE chain(id, parent_task_id, depth) AS (",
        "SELECT id, parent_task_id, 0::BIGINT FROM tasks WHERE id = $1 ",
        "UNION ALL ",
        "SELECT t.id, t.parent_task_id, c.depth + 1 FROM tasks t ",
        "JOIN chain c ON t.id = c.parent_task_id WHERE c.depth < $3",
        ") SELECT EXISTS (SELECT 1 FROM chain) AS parent_exists, ",
        "EXISTS (SELECT 1 FROM chain WHERE id = $2 OR depth >= $3) AS reaches_task",
    ))
    .bind::<SqlUuid, _>(parent_id.into_inner())
    .bind::<SqlUuid, _>(task_id.into_inner())
    .bind::<BigInt, _>(MAX_PARENT_DEPTH)
    .get_result::<ChainProbeRow>(connection)
    .map_err(TaskStoreError::persistence)?;

    if !probe.parent_exists {
        return Err(TaskStoreError::ParentNotFound(parent_id));
    }
    if probe.reaches_task {
        return Err(TaskStoreError::ParentCycle { task_id, parent_id });
    }
    Ok(())
}

fn lease_columns(
    lease: Option<&Lease>,
) -> (Option<String>, Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    lease.map_or((None, None, None), |lease| {
        (
            Some(lease.worker_id().as_str().to_owned()),
            Some(lease.locked_at()),
            Some(lease.expires_at()),
        )
    })
}

fn to_new_row(task: &Task) -> NewTaskRow {
    let (locked_by, locked_at, lock_expires_at) = lease_columns(task.lease());
    NewTaskRow {
        id: task.id().into_inner(),
        created_at: task.created_at(),
        updated_at: task.updated_at(),
        task_type: task.task_type().as_str().to_owned(),
        priority: task.priority(),
        payload: task.payload().as_value().clone(),
        status: task.status().as_str().to_owned(),
        available_at: task.available_at(),
        locked_by,
        locked_at,
        lock_expires_at,
        run_id: task.run_id().map(RunId::into_inner),
        parent_task_id: task.parent_task_id().map(TaskId::into_inner),
        attempts: task.attempts(),
        max_attempts: task.max_attempts(),
        last_error: task.last_error().map(str::to_owned),
        result: task.result().map(|result| result.as_value().clone()),
    }
}

fn row_to_task(row: TaskRow) -> TaskStoreResult<Task> {
    let TaskRow {
        id,
        created_at,
        updated_at,
        task_type,
        priority,
        payload,
        status,
        available_at,
        locked_by,
        locked_at,
        lock_expires_at,
        run_id,
        parent_task_id,
        attempts,
        max_attempts,
        last_error,
        result,
    } = row;

    let task_id = TaskId::from_uuid(id);
    let lease = match (locked_by, locked_at, lock_expires_at) {
        (Some(worker), Some(locked_at), Some(expires_at)) => Some(Lease::new(
            WorkerId::new(worker).map_err(TaskStoreError::invalid_persisted_data)?,
            locked_at,
            expires_at,
        )),
        (None, None, None) => None,
        _ => {
            return Err(TaskStoreError::invalid_persisted_data(
                TaskDomainError::InconsistentRecord {
                    task_id,
                    reason: "ownership columns partially set",
                },
            ));
        }
    };

    let data = PersistedTaskData {
        id: task_id,
        task_type: TaskType::new(task_type).map_err(TaskStoreError::invalid_persisted_data)?,
        priority,
        payload: Document::from_value(payload),
        status: TaskStatus::try_from(status.as_str())
            .map_err(TaskStoreError::invalid_persisted_data)?,
        available_at,
        lease,
        run_id: run_id.map(RunId::from_uuid),
        parent_task_id: parent_task_id.map(TaskId::from_uuid),
        attempts,
        max_attempts,
        last_error,
        result: result.map(Document::from_value),
        created_at,
        updated_at,
    };
    Task::from_persisted(data).map_err(TaskStoreError::invalid_persisted_data)
}
