//! Task aggregate root and its lifecycle transitions.

use super::{
    BackoffPolicy, Document, Lease, RunId, TaskDomainError, TaskId, TaskStatus, TaskType, WorkerId,
};
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};

/// Priority applied when a producer does not supply one.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Attempt cap applied when a producer does not supply one.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Parameter object for creating a new task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    /// Handler tag.
    pub task_type: TaskType,
    /// Opaque payload.
    pub payload: Document,
    /// Scheduling hint, lower is sooner.
    pub priority: i32,
    /// Attempt cap, at least 1.
    pub max_attempts: i32,
    /// Optional audit correlation identifier.
    pub run_id: Option<RunId>,
    /// Optional originating task.
    pub parent_task_id: Option<TaskId>,
}

/// Task aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    task_type: TaskType,
    priority: i32,
    payload: Document,
    status: TaskStatus,
    available_at: DateTime<Utc>,
    lease: Option<Lease>,
    run_id: Option<RunId>,
    parent_task_id: Option<TaskId>,
    attempts: i32,
    max_attempts: i32,
    last_error: Option<String>,
    result: Option<Document>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Parameter object for reconstructing a persisted task aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedTaskData {
    /// Persisted task identifier.
    pub id: TaskId,
    /// Persisted handler tag.
    pub task_type: TaskType,
    /// Persisted priority.
    pub priority: i32,
    /// Persisted payload.
    pub payload: Document,
    /// Persisted status.
    pub status: TaskStatus,
    /// Persisted earliest claim time.
    pub available_at: DateTime<Utc>,
    /// Persisted ownership, if any.
    pub lease: Option<Lease>,
    /// Persisted correlation identifier.
    pub run_id: Option<RunId>,
    /// Persisted parent reference.
    pub parent_task_id: Option<TaskId>,
    /// Persisted attempt counter.
    pub attempts: i32,
    /// Persisted attempt cap.
    pub max_attempts: i32,
    /// Persisted most recent failure.
    pub last_error: Option<String>,
    /// Persisted success result.
    pub result: Option<Document>,
    /// Persisted creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Persisted latest mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Snapshot of the fields a conditional update is guarded on.
///
/// A store applies a write only if the row still carries exactly these
/// values, which makes every transition a compare-and-set against the row's
/// status, ownership and attempt counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskGuard {
    /// Task the guard was taken from.
    pub task_id: TaskId,
    /// Status observed at read time.
    pub status: TaskStatus,
    /// Ownership observed at read time.
    pub lease: Option<Lease>,
    /// Attempt counter observed at read time.
    pub attempts: i32,
}

/// How a successful claim acquired the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimKind {
    /// A queued task was claimed.
    Fresh,
    /// An expired lease was taken over; counts as a failed attempt of the
    /// previous owner.
    Reclaimed {
        /// Worker whose lease lapsed.
        previous_owner: WorkerId,
    },
    /// An expired lease was found but the implicit failure exhausted the
    /// task's attempts; the task is now `failed` and not owned.
    Exhausted {
        /// Worker whose lease lapsed.
        previous_owner: WorkerId,
    },
}

/// Result of reporting a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The task returns to the queue once `available_at` passes.
    Requeued {
        /// When the task becomes claimable again.
        available_at: DateTime<Utc>,
    },
    /// The task failed permanently.
    Exhausted,
}

impl Task {
    /// Creates a queued task available immediately.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidMaxAttempts`] when `max_attempts`
    /// is below 1.
    pub fn new(new_task: NewTask, clock: &impl Clock) -> Result<Self, TaskDomainError> {
        if new_task.max_attempts < 1 {
            return Err(TaskDomainError::InvalidMaxAttempts(new_task.max_attempts));
        }
        let timestamp = clock.utc();
        Ok(Self {
            id: TaskId::new(),
            task_type: new_task.task_type,
            priority: new_task.priority,
            payload: new_task.payload,
            status: TaskStatus::Queued,
            available_at: timestamp,
            lease: None,
            run_id: new_task.run_id,
            parent_task_id: new_task.parent_task_id,
            attempts: 0,
            max_attempts: new_task.max_attempts,
            last_error: None,
            result: None,
            created_at: timestamp,
            updated_at: timestamp,
        })
    }

    /// Reconstructs a task from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InconsistentRecord`] when the persisted
    /// fields break an invariant: ownership present exactly when running,
    /// `0 <= attempts <= max_attempts` and `max_attempts >= 1`.
    pub fn from_persisted(data: PersistedTaskData) -> Result<Self, TaskDomainError> {
        let task = Self {
            id: data.id,
            task_type: data.task_type,
            priority: data.priority,
            payload: data.payload,
            status: data.status,
            available_at: data.available_at,
            lease: data.lease,
            run_id: data.run_id,
            parent_task_id: data.parent_task_id,
            attempts: data.attempts,
            max_attempts: data.max_attempts,
            last_error: data.last_error,
            result: data.result,
            created_at: data.created_at,
            updated_at: data.updated_at,
        };
        task.check_invariants()?;
        Ok(task)
    }

    fn check_invariants(&self) -> Result<(), TaskDomainError> {
        let reason = if self.max_attempts < 1 {
            Some("max_attempts below 1")
        } else if self.attempts < 0 || self.attempts > self.max_attempts {
            Some("attempts outside 0..=max_attempts")
        } else if (self.status == TaskStatus::Running) != self.lease.is_some() {
            Some("ownership must be set exactly while running")
        } else if self.result.is_some() && self.status != TaskStatus::Succeeded {
            Some("result present on a task that did not succeed")
        } else if self.parent_task_id == Some(self.id) {
            Some("task is its own parent")
        } else {
            None
        };
        reason.map_or(Ok(()), |reason| {
            Err(TaskDomainError::InconsistentRecord {
                task_id: self.id,
                reason,
            })
        })
    }

    /// Returns the task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the handler tag.
    #[must_use]
    pub const fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    /// Returns the scheduling priority.
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// Returns the payload document.
    #[must_use]
    pub const fn payload(&self) -> &Document {
        &self.payload
    }

    /// Returns the lifecycle status.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    /// Returns the earliest claim time.
    #[must_use]
    pub const fn available_at(&self) -> DateTime<Utc> {
        self.available_at
    }

    /// Returns the current lease, if the task is owned.
    #[must_use]
    pub const fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    /// Returns the audit correlation identifier.
    #[must_use]
    pub const fn run_id(&self) -> Option<RunId> {
        self.run_id
    }

    /// Returns the originating task, if any.
    #[must_use]
    pub const fn parent_task_id(&self) -> Option<TaskId> {
        self.parent_task_id
    }

    /// Returns the number of failed attempts so far.
    #[must_use]
    pub const fn attempts(&self) -> i32 {
        self.attempts
    }

    /// Returns the attempt cap.
    #[must_use]
    pub const fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// Returns the most recent failure description.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Returns the success result.
    #[must_use]
    pub const fn result(&self) -> Option<&Document> {
        self.result.as_ref()
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the latest mutation timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Captures the guard for a conditional update of this task.
    #[must_use]
    pub fn guard(&self) -> TaskGuard {
        TaskGuard {
            task_id: self.id,
            status: self.status,
            lease: self.lease.clone(),
            attempts: self.attempts,
        }
    }

    /// Returns `true` when a claim at `now` would succeed.
    #[must_use]
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        if self.available_at > now {
            return false;
        }
        match self.status {
            TaskStatus::Queued => true,
            TaskStatus::Running => self.lease.as_ref().is_some_and(|lease| lease.is_expired_at(now)),
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Canceled => false,
        }
    }

    /// Grants `worker_id` a lease of `lease_duration` starting at `now`.
    ///
    /// Taking over an expired lease increments `attempts` and records the
    /// lapse in `last_error`. If that exhausts the task it becomes `failed`
    /// instead and [`ClaimKind::Exhausted`] is returned.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::NonPositiveLeaseDuration`] for empty leases
    /// and [`TaskDomainError::NotClaimable`] when the task is not eligible.
    pub fn claim(
        &mut self,
        worker_id: &WorkerId,
        lease_duration: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<ClaimKind, TaskDomainError> {
        if lease_duration <= TimeDelta::zero() {
            return Err(TaskDomainError::NonPositiveLeaseDuration);
        }
        if !self.is_claimable_at(now) {
            return Err(TaskDomainError::NotClaimable {
                task_id: self.id,
                status: self.status,
            });
        }

        let kind = match self.lease.take() {
            None => ClaimKind::Fresh,
            Some(expired) => {
                let previous_owner = expired.worker_id().clone();
                self.attempts = self.attempts.saturating_add(1);
                self.last_error = Some(format!("lease expired (held by {previous_owner})"));
                if self.attempts >= self.max_attempts {
                    self.status = TaskStatus::Failed;
                    self.touch(now);
                    return Ok(ClaimKind::Exhausted { previous_owner });
                }
                ClaimKind::Reclaimed { previous_owner }
            }
        };

        let expires_at = now
            .checked_add_signed(lease_duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.status = TaskStatus::Running;
        self.lease = Some(Lease::new(worker_id.clone(), now, expires_at));
        self.touch(now);
        Ok(kind)
    }

    /// Moves the lease expiry of a held lease to `new_expiry`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::Canceled`] if the task was canceled,
    /// [`TaskDomainError::LeaseNotHeld`] if `worker_id` has no live lease and
    /// [`TaskDomainError::LeaseExpiryNotInFuture`] if `new_expiry <= now`.
    pub fn renew_lease(
        &mut self,
        worker_id: &WorkerId,
        new_expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), TaskDomainError> {
        if self.status == TaskStatus::Canceled {
            return Err(TaskDomainError::Canceled(self.id));
        }
        let task_id = self.id;
        let lease = self.held_lease_mut(worker_id, now)?;
        if new_expiry <= now {
            return Err(TaskDomainError::LeaseExpiryNotInFuture(task_id));
        }
        lease.extend_to(new_expiry);
        self.touch(now);
        Ok(())
    }

    /// Records success for the lease holder and clears `last_error`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::AlreadyTerminal`] for terminal tasks (the
    /// stored result is left untouched) and [`TaskDomainError::LeaseNotHeld`]
    /// when the caller no longer owns the task.
    pub fn complete(
        &mut self,
        worker_id: &WorkerId,
        result: Document,
        now: DateTime<Utc>,
    ) -> Result<(), TaskDomainError> {
        self.ensure_not_terminal()?;
        self.held_lease_mut(worker_id, now)?;
        self.status = TaskStatus::Succeeded;
        self.result = Some(result);
        self.last_error = None;
        self.lease = None;
        self.touch(now);
        Ok(())
    }

    /// Records a failed attempt for the lease holder.
    ///
    /// # Errors
    ///
    /// Same preconditions as [`Task::complete`].
    pub fn fail(
        &mut self,
        worker_id: &WorkerId,
        error: impl Into<String>,
        backoff: &BackoffPolicy,
        now: DateTime<Utc>,
    ) -> Result<FailOutcome, TaskDomainError> {
        self.ensure_not_terminal()?;
        self.held_lease_mut(worker_id, now)?;
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.into());
        self.lease = None;
        self.touch(now);

        if self.attempts >= self.max_attempts {
            self.status = TaskStatus::Failed;
            return Ok(FailOutcome::Exhausted);
        }

        let attempts = u32::try_from(self.attempts).unwrap_or(u32::MAX);
        let available_at = now
            .checked_add_signed(backoff.delay_for(attempts))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.status = TaskStatus::Queued;
        self.available_at = available_at;
        Ok(FailOutcome::Requeued { available_at })
    }

    /// Cancels a queued or running task. Returns the status it was in.
    ///
    /// Cancellation of a running task does not preempt its worker; the
    /// worker observes it on its next lease renewal and any later terminal
    /// write is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::AlreadyTerminal`] for terminal tasks.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<TaskStatus, TaskDomainError> {
        self.ensure_not_terminal()?;
        let previous = self.status;
        self.status = TaskStatus::Canceled;
        self.lease = None;
        self.touch(now);
        Ok(previous)
    }

    /// Returns a copy with the parent reference cleared, as happens when the
    /// parent row is purged.
    #[must_use]
    pub fn detached_from_parent(&self) -> Self {
        Self {
            parent_task_id: None,
            ..self.clone()
        }
    }

    fn ensure_not_terminal(&self) -> Result<(), TaskDomainError> {
        if self.status.is_terminal() {
            return Err(TaskDomainError::AlreadyTerminal {
                task_id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    fn held_lease_mut(
        &mut self,
        worker_id: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<&mut Lease, TaskDomainError> {
        let task_id = self.id;
        match self.lease.as_mut() {
            Some(lease) if self.status == TaskStatus::Running && lease.is_held_by(worker_id, now) => {
                Ok(lease)
            }
            _ => Err(TaskDomainError::LeaseNotHeld {
                task_id,
                worker_id: worker_id.clone(),
            }),
        }
    }

    /// Updates the `updated_at` timestamp, never moving it backwards.
    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = self.updated_at.max(now);
    }
}
