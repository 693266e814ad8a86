//! Shared helpers for in-memory integration tests.

use rstest::fixture;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use taskloom::queue::{
    adapters::memory::InMemoryTaskStore,
    domain::{BackoffPolicy, Document, TaskId, WorkerId},
    services::{ClaimEngine, CompletionService, EnqueueRequest, LeaseManager, TaskQueueService},
    testing::ManualClock,
};

/// Lease granted by every claim in these tests.
pub const LEASE: Duration = Duration::from_secs(30);

/// Services wired to one shared store and clock.
pub struct Queue {
    /// Clock driving lease expiry and backoff.
    pub clock: ManualClock,
    /// Backing store.
    pub store: Arc<InMemoryTaskStore>,
    /// Producer-side operations.
    pub producer: TaskQueueService<InMemoryTaskStore, ManualClock>,
    /// Claim engine.
    pub claims: ClaimEngine<InMemoryTaskStore, ManualClock>,
    /// Lease renewal.
    pub leases: LeaseManager<InMemoryTaskStore, ManualClock>,
    /// Completion and failure reporting.
    pub completions: CompletionService<InMemoryTaskStore, ManualClock>,
}

impl Queue {
    /// Enqueues an `echo` task carrying `n`.
    pub async fn enqueue(&self, n: i64) -> TaskId {
        self.producer
            .enqueue(EnqueueRequest::new(
                "echo",
                Document::from_value(json!({ "n": n })),
            ))
            .await
            .expect("enqueue succeeds")
    }
}

/// Provides a fresh queue with a deterministic, jitter-free backoff.
#[fixture]
pub fn queue() -> Queue {
    let clock = ManualClock::starting_now();
    let store = Arc::new(InMemoryTaskStore::new());
    let shared_clock = Arc::new(clock.clone());
    Queue {
        producer: TaskQueueService::new(Arc::clone(&store), Arc::clone(&shared_clock)),
        claims: ClaimEngine::new(Arc::clone(&store), Arc::clone(&shared_clock)),
        leases: LeaseManager::new(Arc::clone(&store), Arc::clone(&shared_clock)),
        completions: CompletionService::with_backoff(
            Arc::clone(&store),
            shared_clock,
            BackoffPolicy::fixed_exponential(Duration::from_secs(1), Duration::from_secs(60)),
        ),
        store,
        clock,
    }
}

/// Builds a worker identifier.
pub fn worker(name: &str) -> WorkerId {
    WorkerId::new(name).expect("valid worker id")
}
