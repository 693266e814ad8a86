//! Shared helpers for `PostgreSQL` integration tests.

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use rstest::fixture;
use std::sync::Arc;
use taskloom::queue::adapters::postgres::{
    PostgresHeartbeatRegistry, PostgresTaskStore, QueuePgPool, build_pool,
};
use uuid::Uuid;

/// Boxed error type for fallible test helpers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Environment variable naming the server used for integration tests.
pub const ENV_TEST_DATABASE_URL: &str = "TASKLOOM_TEST_DATABASE_URL";

/// SQL creating the `tasks` table.
pub const CREATE_TASKS_SQL: &str =
    include_str!("../../migrations/2026-10-01-000000_create_tasks/up.sql");

/// SQL creating the `worker_heartbeats` table.
pub const CREATE_HEARTBEATS_SQL: &str =
    include_str!("../../migrations/2026-10-01-000001_create_worker_heartbeats/up.sql");

const POOL_SIZE: u32 = 8;

/// A database created for one test and dropped afterwards.
pub struct TemporaryDatabase {
    admin_url: String,
    name: String,
    url: String,
}

impl TemporaryDatabase {
    /// Creates an empty database next to the one `admin_url` points at.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unreachable or refuses the create.
    pub fn create(admin_url: &str) -> Result<Self, BoxError> {
        let name = format!("taskloom_test_{}", Uuid::new_v4().simple());
        let mut admin = PgConnection::establish(admin_url)?;
        admin.batch_execute(&format!("CREATE DATABASE \"{name}\""))?;
        Ok(Self {
            admin_url: admin_url.to_owned(),
            url: sibling_database_url(admin_url, &name),
            name,
        })
    }

    /// Returns the connection string of the temporary database.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for TemporaryDatabase {
    fn drop(&mut self) {
        if let Ok(mut admin) = PgConnection::establish(&self.admin_url) {
            let _ignored = admin.batch_execute(&format!(
                "DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)",
                self.name
            ));
        }
    }
}

/// Replaces the database name in a connection URL, keeping any query string.
pub fn sibling_database_url(url: &str, name: &str) -> String {
    let (base, query) = url
        .split_once('?')
        .map_or((url, None), |(base, query)| (base, Some(query)));
    let prefix = base
        .rsplit_once('/')
        .filter(|(head, _)| !head.ends_with('/'))
        .map_or(base, |(head, _)| head);
    query.map_or_else(
        || format!("{prefix}/{name}"),
        |params| format!("{prefix}/{name}?{params}"),
    )
}

/// Migrated database with queue adapters attached.
pub struct PgQueue {
    /// Connection pool shared by the adapters.
    pub pool: QueuePgPool,
    /// Task store adapter.
    pub store: Arc<PostgresTaskStore>,
    /// Heartbeat registry adapter.
    pub heartbeats: Arc<PostgresHeartbeatRegistry>,
    database: TemporaryDatabase,
}

impl PgQueue {
    /// Returns the temporary database's connection string.
    pub fn url(&self) -> &str {
        self.database.url()
    }
}

/// Provides a migrated temporary database, or `None` when
/// `TASKLOOM_TEST_DATABASE_URL` is unset.
///
/// # Errors
///
/// Returns an error if database creation or migration fails.
#[fixture]
pub fn pg_queue() -> Result<Option<PgQueue>, BoxError> {
    let Some(admin_url) = std::env::var(ENV_TEST_DATABASE_URL)
        .ok()
        .filter(|url| !url.trim().is_empty())
    else {
        return Ok(None);
    };
    let database = TemporaryDatabase::create(&admin_url)?;
    let mut conn = PgConnection::establish(database.url())?;
    conn.batch_execute(CREATE_TASKS_SQL)?;
    conn.batch_execute(CREATE_HEARTBEATS_SQL)?;
    drop(conn);

    let pool = build_pool(database.url(), POOL_SIZE)?;
    Ok(Some(PgQueue {
        store: Arc::new(PostgresTaskStore::new(pool.clone())),
        heartbeats: Arc::new(PostgresHeartbeatRegistry::new(pool.clone())),
        pool,
        database,
    }))
}

/// Whole-second instant the `PostgreSQL` tests start their clocks at.
///
/// `timestamptz` keeps microseconds, so sub-microsecond instants would not
/// survive a round trip.
pub fn epoch() -> chrono::DateTime<chrono::Utc> {
    use chrono::TimeZone;
    chrono::Utc
        .with_ymd_and_hms(2026, 1, 1, 12, 0, 0)
        .single()
        .expect("valid epoch")
}

/// Builds a worker identifier.
pub fn worker(name: &str) -> taskloom::queue::domain::WorkerId {
    taskloom::queue::domain::WorkerId::new(name).expect("valid worker id")
}
