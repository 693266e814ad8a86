//! Connection pool and blocking-call helpers shared by the queue adapters.

use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PoolError, PooledConnection};

/// `PostgreSQL` connection pool type used by queue adapters.
pub type QueuePgPool = Pool<ConnectionManager<PgConnection>>;

pub(super) type PooledConn = PooledConnection<ConnectionManager<PgConnection>>;

/// Builds a pool of at most `max_size` connections to `database_url`.
///
/// # Errors
///
/// Returns [`PoolError`] when the initial connections cannot be opened.
pub fn build_pool(database_url: &str, max_size: u32) -> Result<QueuePgPool, PoolError> {
    Pool::builder()
        .max_size(max_size.max(1))
        .build(ConnectionManager::<PgConnection>::new(database_url))
}

/// Checks out a connection and runs `f` on the blocking thread pool.
///
/// Both pool checkout failures and join errors go through `map_err`.
pub(super) async fn run_blocking<F, T, E, M>(pool: &QueuePgPool, f: F, map_err: M) -> Result<T, E>
where
    F: FnOnce(&mut PooledConn) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    M: Fn(std::io::Error) -> E + Send + Clone + 'static,
{
    let pool = pool.clone();
    let checkout_err = map_err.clone();
    tokio::task::spawn_blocking(move || {
        let mut connection = pool.get().map_err(|err| checkout_err(std::io::Error::other(err)))?;
        f(&mut connection)
    })
    .await
    .map_err(|err| map_err(std::io::Error::other(err)))?
}
