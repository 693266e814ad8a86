//! Read-modify-CAS loop shared by the mutating services.

use super::{QueueError, QueueResult};
use crate::queue::{
    domain::{Task, TaskId},
    ports::TaskStore,
};
use chrono::{DateTime, Utc};
use mockable::Clock;

/// Number of read-modify-CAS rounds before a mutation gives up with
/// [`QueueError::ClaimConflict`].
pub(super) const MAX_CAS_ROUNDS: usize = 8;

/// Loads `task_id`, applies `transition` and writes it back guarded by the
/// state that was read, re-reading on conflict.
///
/// A transition error ends the loop immediately: it reflects the state that
/// was actually stored, not a race.
pub(super) async fn apply_transition<S, C, T, F>(
    store: &S,
    clock: &C,
    task_id: TaskId,
    mut transition: F,
) -> QueueResult<(Task, T)>
where
    S: TaskStore + ?Sized,
    C: Clock + Send + Sync + ?Sized,
    F: FnMut(&mut Task, DateTime<Utc>) -> QueueResult<T> + Send,
    T: Send,
{
    for _ in 0..MAX_CAS_ROUNDS {
        let current = store
            .find_by_id(task_id)
            .await?
            .ok_or(QueueError::NotFound(task_id))?;
        let guard = current.guard();
        let mut next = current;
        let outcome = transition(&mut next, clock.utc())?;
        if store.compare_and_swap(&guard, &next).await? {
            return Ok((next, outcome));
        }
        tracing::debug!(task_id = %task_id, "conditional update lost a race, re-reading");
    }
    Err(QueueError::ClaimConflict(task_id))
}
