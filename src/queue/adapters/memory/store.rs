//! In-memory task store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::queue::{
    domain::{Task, TaskGuard, TaskId, TaskStatus},
    ports::{TaskStore, TaskStoreError, TaskStoreResult},
};

/// Thread-safe in-memory task store.
///
/// Conditional updates compare and write under one write-lock section, which
/// gives the same single-row atomicity as the `PostgreSQL` adapter.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskStore {
    state: Arc<RwLock<InMemoryTaskState>>,
}

#[derive(Debug, Default)]
struct InMemoryTaskState {
    tasks: HashMap<TaskId, Task>,
}

impl InMemoryTaskStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored tasks.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::Persistence`] if the lock is poisoned.
    pub fn len(&self) -> TaskStoreResult<usize> {
        let state = self.state.read().map_err(lock_error)?;
        Ok(state.tasks.len())
    }

    /// Returns `true` when no task is stored.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::Persistence`] if the lock is poisoned.
    pub fn is_empty(&self) -> TaskStoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

fn lock_error(err: impl std::fmt::Display) -> TaskStoreError {
    TaskStoreError::persistence(std::io::Error::other(err.to_string()))
}

/// Walks the parent chain of `parent_id` and rejects it if it reaches
/// `task_id` or does not resolve.
///
/// Fresh ids and immutable parents keep the cycle branch unreachable from the
/// queue services; the walk is still bounded by the row count.
fn check_parent_chain(
    state: &InMemoryTaskState,
    task_id: TaskId,
    parent_id: TaskId,
) -> TaskStoreResult<()> {
    if !state.tasks.contains_key(&parent_id) {
        return Err(TaskStoreError::ParentNotFound(parent_id));
    }
    let mut cursor = Some(parent_id);
    let mut steps = 0_usize;
    while let Some(current) = cursor {
        if current == task_id || steps > state.tasks.len() {
            return Err(TaskStoreError::ParentCycle { task_id, parent_id });
        }
        cursor = state
            .tasks
            .get(&current)
            .and_then(Task::parent_task_id);
        steps += 1;
    }
    Ok(())
}

fn sorted_by<K: Ord>(mut tasks: Vec<Task>, key: impl Fn(&Task) -> K, limit: usize) -> Vec<Task> {
    tasks.sort_by_key(|task| key(task));
    tasks.truncate(limit);
    tasks
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &Task) -> TaskStoreResult<()> {
        let mut state = self.state.write().map_err(lock_error)?;
        if state.tasks.contains_key(&task.id()) {
            return Err(TaskStoreError::DuplicateTask(task.id()));
        }
        if let Some(parent_id) = task.parent_task_id() {
            check_parent_chain(&state, task.id(), parent_id)?;
        }
        state.tasks.insert(task.id(), task.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: TaskId) -> TaskStoreResult<Option<Task>> {
        let state = self.state.read().map_err(lock_error)?;
        Ok(state.tasks.get(&id).cloned())
    }

    async fn claim_candidates(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> TaskStoreResult<Vec<Task>> {
        let state = self.state.read().map_err(lock_error)?;
        let eligible = state
            .tasks
            .values()
            .filter(|task| task.is_claimable_at(now))
            .cloned()
            .collect();
        Ok(sorted_by(
            eligible,
            |task| (task.priority(), task.created_at(), task.id()),
            limit,
        ))
    }

    async fn compare_and_swap(&self, guard: &TaskGuard, next: &Task) -> TaskStoreResult<bool> {
        let mut state = self.state.write().map_err(lock_error)?;
        let stored = state
            .tasks
            .get_mut(&guard.task_id)
            .ok_or(TaskStoreError::NotFound(guard.task_id))?;
        if stored.guard() != *guard {
            return Ok(false);
        }
        *stored = next.clone();
        Ok(true)
    }

    async fn find_expired_leases(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> TaskStoreResult<Vec<Task>> {
        let state = self.state.read().map_err(lock_error)?;
        let expired = state
            .tasks
            .values()
            .filter(|task| {
                task.status() == TaskStatus::Running
                    && task.lease().is_some_and(|lease| lease.is_expired_at(now))
            })
            .cloned()
            .collect();
        Ok(sorted_by(
            expired,
            |task| (task.lease().map(|lease| lease.expires_at()), task.id()),
            limit,
        ))
    }

    async fn purge(&self, id: TaskId) -> TaskStoreResult<bool> {
        let mut state = self.state.write().map_err(lock_error)?;
        if state.tasks.remove(&id).is_none() {
            return Ok(false);
        }
        let orphans: Vec<Task> = state
            .tasks
            .values()
            .filter(|task| task.parent_task_id() == Some(id))
            .cloned()
            .collect();
        for orphan in orphans {
            state.tasks.insert(orphan.id(), orphan.detached_from_parent());
        }
        Ok(true)
    }
}
