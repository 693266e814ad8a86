//! Claim engine: moves eligible tasks into the ownership of one worker.

use super::{QueueResult, ValidationError, transition::MAX_CAS_ROUNDS};
use crate::queue::{
    domain::{ClaimKind, Task, TaskDomainError, WorkerId},
    ports::{TaskStore, TaskStoreError},
};
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use std::sync::Arc;
use std::time::Duration;

/// Extra candidates fetched per wanted task, so that losing a few races
/// does not end a scan early.
const CANDIDATE_SLACK: usize = 4;

/// Outcome of trying to claim a single candidate.
enum Attempt {
    Claimed(Task),
    /// An expired lease was found on a task with no attempts left; it is now
    /// `failed`.
    Retired,
    Conflict,
}

/// Claims tasks for workers.
///
/// Each claim is a conditional update guarded on the candidate's status,
/// ownership and attempt counter, so two workers racing for one row cannot
/// both win. Losers move on to the next candidate and, if a scan ends short
/// of the batch after losing races, rescan a bounded number of times.
#[derive(Clone)]
pub struct ClaimEngine<S, C>
where
    S: TaskStore,
    C: Clock + Send + Sync,
{
    store: Arc<S>,
    clock: Arc<C>,
}

impl<S, C> ClaimEngine<S, C>
where
    S: TaskStore,
    C: Clock + Send + Sync,
{
    /// Creates a claim engine.
    #[must_use]
    pub const fn new(store: Arc<S>, clock: Arc<C>) -> Self {
        Self { store, clock }
    }

    /// Claims up to `batch` tasks for `worker_id`, each leased for
    /// `lease_duration`.
    ///
    /// Never blocks waiting for work: an empty vector means nothing was
    /// claimable right now.
    ///
    /// # Errors
    ///
    /// Returns [`super::QueueError::Validation`] for a zero batch or lease
    /// and [`super::QueueError::StoreUnavailable`] when the store cannot be
    /// reached.
    pub async fn try_claim(
        &self,
        worker_id: &WorkerId,
        lease_duration: Duration,
        batch: usize,
    ) -> QueueResult<Vec<Task>> {
        if batch == 0 {
            return Err(ValidationError::InvalidBatch(batch).into());
        }
        let lease = TimeDelta::from_std(lease_duration)
            .map_err(|err| ValidationError::DurationOutOfRange(err.to_string()))?;
        if lease <= TimeDelta::zero() {
            return Err(ValidationError::Domain(TaskDomainError::NonPositiveLeaseDuration).into());
        }

        let mut claimed = Vec::new();
        for _ in 0..MAX_CAS_ROUNDS {
            let wanted = batch - claimed.len();
            let now = self.clock.utc();
            let candidates = self
                .store
                .claim_candidates(now, wanted.saturating_mul(CANDIDATE_SLACK))
                .await?;
            if candidates.is_empty() {
                break;
            }

            let mut contended = false;
            for candidate in candidates {
                if claimed.len() == batch {
                    break;
                }
                match self.claim_one(candidate, worker_id, lease, now).await? {
                    Attempt::Claimed(task) => claimed.push(task),
                    Attempt::Retired | Attempt::Conflict => contended = true,
                }
            }
            if claimed.len() == batch || !contended {
                break;
            }
        }
        Ok(claimed)
    }

    async fn claim_one(
        &self,
        candidate: Task,
        worker_id: &WorkerId,
        lease: TimeDelta,
        now: DateTime<Utc>,
    ) -> QueueResult<Attempt> {
        let guard = candidate.guard();
        let mut next = candidate;
        let kind = match next.claim(worker_id, lease, now) {
            Ok(kind) => kind,
            Err(TaskDomainError::NotClaimable { .. }) => return Ok(Attempt::Conflict),
            Err(err) => return Err(ValidationError::from(err).into()),
        };

        match self.store.compare_and_swap(&guard, &next).await {
            Ok(true) => {}
            Ok(false) | Err(TaskStoreError::NotFound(_)) => {
                tracing::debug!(task_id = %next.id(), worker_id = %worker_id, "claim conflict");
                return Ok(Attempt::Conflict);
            }
            Err(err) => return Err(err.into()),
        }

        match kind {
            ClaimKind::Fresh => {
                tracing::debug!(
                    task_id = %next.id(),
                    worker_id = %worker_id,
                    task_type = %next.task_type(),
                    "task claimed"
                );
                Ok(Attempt::Claimed(next))
            }
            ClaimKind::Reclaimed { previous_owner } => {
                tracing::warn!(
                    task_id = %next.id(),
                    worker_id = %worker_id,
                    previous_owner = %previous_owner,
                    attempts = next.attempts(),
                    "reclaimed expired lease"
                );
                Ok(Attempt::Claimed(next))
            }
            ClaimKind::Exhausted { previous_owner } => {
                tracing::warn!(
                    task_id = %next.id(),
                    previous_owner = %previous_owner,
                    attempts = next.attempts(),
                    "expired lease used up the last attempt; task failed"
                );
                Ok(Attempt::Retired)
            }
        }
    }
}
