//! Diesel row models for queue persistence.

use super::schema::{tasks, worker_heartbeats};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

/// Query result row for task records.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = tasks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TaskRow {
    /// Task identifier.
    #[diesel(sql_type = diesel::sql_types::Uuid)]
    pub id: uuid::Uuid,
    /// Creation timestamp.
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    pub created_at: DateTime<Utc>,
    /// Latest mutation timestamp.
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    pub updated_at: DateTime<Utc>,
    /// Handler tag.
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    pub task_type: String,
    /// Scheduling priority.
    #[diesel(sql_type = diesel::sql_types::Int4)]
    pub priority: i32,
    /// Payload JSON.
    #[diesel(sql_type = diesel::sql_types::Jsonb)]
    pub payload: Value,
    /// Lifecycle status.
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    pub status: String,
    /// Earliest claim time.
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    pub available_at: DateTime<Utc>,
    /// Lease holder.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Varchar>)]
    pub locked_by: Option<String>,
    /// Lease grant time.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Timestamptz>)]
    pub locked_at: Option<DateTime<Utc>>,
    /// Lease expiry.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Timestamptz>)]
    pub lock_expires_at: Option<DateTime<Utc>>,
    /// Audit correlation identifier.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Uuid>)]
    pub run_id: Option<uuid::Uuid>,
    /// Originating task.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Uuid>)]
    pub parent_task_id: Option<uuid::Uuid>,
    /// Failed attempts so far.
    #[diesel(sql_type = diesel::sql_types::Int4)]
    pub attempts: i32,
    /// Attempt cap.
    #[diesel(sql_type = diesel::sql_types::Int4)]
    pub max_attempts: i32,
    /// Most recent failure description.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Text>)]
    pub last_error: Option<String>,
    /// Success result JSON.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Jsonb>)]
    pub result: Option<Value>,
}

/// Insert model for task records.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTaskRow {
    /// Task identifier.
    pub id: uuid::Uuid,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Latest mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Handler tag.
    pub task_type: String,
    /// Scheduling priority.
    pub priority: i32,
    /// Payload JSON.
    pub payload: Value,
    /// Lifecycle status.
    pub status: String,
    /// Earliest claim time.
    pub available_at: DateTime<Utc>,
    /// Lease holder.
    pub locked_by: Option<String>,
    /// Lease grant time.
    pub locked_at: Option<DateTime<Utc>>,
    /// Lease expiry.
    pub lock_expires_at: Option<DateTime<Utc>>,
    /// Audit correlation identifier.
    pub run_id: Option<uuid::Uuid>,
    /// Originating task.
    pub parent_task_id: Option<uuid::Uuid>,
    /// Failed attempts so far.
    pub attempts: i32,
    /// Attempt cap.
    pub max_attempts: i32,
    /// Most recent failure description.
    pub last_error: Option<String>,
    /// Success result JSON.
    pub result: Option<Value>,
}

/// Query result row for worker heartbeats.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = worker_heartbeats)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct HeartbeatRow {
    /// Worker identity.
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    pub worker_id: String,
    /// First report time.
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    pub started_at: DateTime<Utc>,
    /// Latest report time.
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    pub last_seen_at: DateTime<Utc>,
    /// Published poll interval in seconds.
    #[diesel(sql_type = diesel::sql_types::Int4)]
    pub poll_s: i32,
    /// Published lease duration in seconds.
    #[diesel(sql_type = diesel::sql_types::Int4)]
    pub lock_s: i32,
}

/// Probe row for the parent-chain query.
#[derive(Debug, Clone, Copy, QueryableByName)]
pub struct ChainProbeRow {
    /// Whether the parent exists.
    #[diesel(sql_type = diesel::sql_types::Bool)]
    pub parent_exists: bool,
    /// Whether the parent chain reaches the new task.
    #[diesel(sql_type = diesel::sql_types::Bool)]
    pub reaches_task: bool,
}
