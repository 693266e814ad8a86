//! Worker poll loop: claim, keep the lease alive, dispatch, report.

use super::{WorkerConfig, lease_keeper::LeaseKeeper};
use crate::queue::{
    domain::{BackoffPolicy, Document, FailOutcome, Task, TaskId, TaskType, WorkerId},
    ports::{CancellationSignal, HandlerError, HeartbeatRegistry, TaskContext, TaskStore},
    services::{
        ClaimEngine, CompletionService, HandlerRegistry, HeartbeatService, LeaseManager,
        QueueError, QueueResult,
    },
};
use mockable::Clock;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Timing and batching knobs of a [`Worker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Idle wait after an empty poll.
    pub poll_interval: Duration,
    /// Lease granted per claim and per renewal.
    pub lease_duration: Duration,
    /// Cadence of lease renewals while a handler runs.
    pub renew_interval: Duration,
    /// Cadence of heartbeat upserts.
    pub heartbeat_interval: Duration,
    /// Tasks claimed per poll; claimed tasks run concurrently.
    pub batch: usize,
    /// Retry policy for failed attempts and for store outages.
    pub backoff: BackoffPolicy,
}

impl From<&WorkerConfig> for WorkerOptions {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            lease_duration: config.lease_duration(),
            renew_interval: config.renew_interval(),
            heartbeat_interval: config.heartbeat_interval(),
            batch: config.batch,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

/// What happened to one claimed task.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// The handler succeeded and the result was stored.
    Completed,
    /// The handler failed and the failure was recorded.
    Failed(FailOutcome),
    /// The lease was lost mid-execution; nothing was reported.
    Abandoned,
    /// The report was refused because the task was canceled, finished or
    /// reassigned in the meantime.
    Rejected(QueueError),
    /// The report could not be delivered within one lease duration; the
    /// lease will lapse and the task will be retried.
    Unreported(QueueError),
}

/// A worker process bound to one store, heartbeat registry and handler set.
pub struct Worker<S, H, C>
where
    S: TaskStore + 'static,
    H: HeartbeatRegistry + 'static,
    C: Clock + Send + Sync + 'static,
{
    worker_id: WorkerId,
    options: WorkerOptions,
    claims: ClaimEngine<S, C>,
    leases: LeaseManager<S, C>,
    completions: CompletionService<S, C>,
    heartbeats: Arc<H>,
    clock: Arc<C>,
    handlers: HandlerRegistry,
}

impl<S, H, C> Worker<S, H, C>
where
    S: TaskStore + 'static,
    H: HeartbeatRegistry + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Assembles a worker.
    #[must_use]
    pub fn new(
        worker_id: WorkerId,
        options: WorkerOptions,
        store: Arc<S>,
        heartbeats: Arc<H>,
        clock: Arc<C>,
        handlers: HandlerRegistry,
    ) -> Self {
        Self {
            worker_id,
            options,
            claims: ClaimEngine::new(Arc::clone(&store), Arc::clone(&clock)),
            leases: LeaseManager::new(Arc::clone(&store), Arc::clone(&clock)),
            completions: CompletionService::with_backoff(store, Arc::clone(&clock), options.backoff),
            heartbeats,
            clock,
            handlers,
        }
    }

    /// Returns the worker identity.
    #[must_use]
    pub const fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Returns the runtime options.
    #[must_use]
    pub const fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Runs until `shutdown` turns `true` or its sender is dropped.
    ///
    /// Tasks already claimed when shutdown arrives are run to completion.
    /// The heartbeat row is removed on exit.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Validation`] when the options are rejected by
    /// the claim engine. Store outages are logged and retried, never
    /// returned.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> QueueResult<()> {
        tracing::info!(
            worker_id = %self.worker_id,
            poll_ms = duration_ms(self.options.poll_interval),
            lease_ms = duration_ms(self.options.lease_duration),
            batch = self.options.batch,
            task_types = ?self.handlers.registered_types(),
            "worker starting"
        );

        let (stop_heartbeat, heartbeat_stopped) = watch::channel(false);
        let heartbeat = tokio::spawn(heartbeat_loop(
            HeartbeatService::new(Arc::clone(&self.heartbeats), Arc::clone(&self.clock)),
            self.worker_id.clone(),
            self.options,
            heartbeat_stopped,
        ));

        let mut consecutive_failures: u32 = 0;
        let outcome = loop {
            if *shutdown.borrow() {
                break Ok(());
            }
            let pause = match self.run_once().await {
                Ok(outcomes) => {
                    consecutive_failures = 0;
                    outcomes.is_empty().then_some(self.options.poll_interval)
                }
                Err(QueueError::Validation(err)) => break Err(err.into()),
                Err(err) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    let delay = self
                        .options
                        .backoff
                        .delay_for(consecutive_failures)
                        .to_std()
                        .unwrap_or(self.options.poll_interval);
                    tracing::warn!(
                        worker_id = %self.worker_id,
                        error = %err,
                        consecutive_failures,
                        delay_ms = duration_ms(delay),
                        "claim failed; backing off"
                    );
                    Some(delay)
                }
            };
            if let Some(delay) = pause {
                if wait_or_shutdown(&mut shutdown, delay).await {
                    break Ok(());
                }
            }
        };

        stop_heartbeat.send_replace(true);
        if let Err(err) = heartbeat.await {
            tracing::error!(worker_id = %self.worker_id, error = %err, "heartbeat task panicked");
        }
        self.deregister().await;
        tracing::info!(worker_id = %self.worker_id, "worker stopped");
        outcome
    }

    /// Claims one batch and processes it, returning one outcome per claimed
    /// task. An empty vector means nothing was claimable.
    ///
    /// # Errors
    ///
    /// Returns the claim engine's error; processing errors are reported in
    /// the outcomes instead.
    pub async fn run_once(self: &Arc<Self>) -> QueueResult<Vec<ProcessOutcome>> {
        let claimed = self
            .claims
            .try_claim(&self.worker_id, self.options.lease_duration, self.options.batch)
            .await?;

        let mut running = JoinSet::new();
        for task in claimed {
            let worker = Arc::clone(self);
            running.spawn(async move { worker.process(task).await });
        }

        let mut outcomes = Vec::with_capacity(running.len());
        while let Some(joined) = running.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    tracing::error!(
                        worker_id = %self.worker_id,
                        error = %err,
                        "task execution panicked; its lease will lapse"
                    );
                    outcomes.push(ProcessOutcome::Abandoned);
                }
            }
        }
        Ok(outcomes)
    }

    async fn process(&self, task: Task) -> ProcessOutcome {
        let task_id = task.id();
        let (trigger, signal) = CancellationSignal::pair();
        let ctx = TaskContext::new(
            task_id,
            task.task_type().clone(),
            task.attempts().saturating_add(1),
            task.max_attempts(),
            task.run_id(),
            signal,
        );
        tracing::info!(
            task_id = %task_id,
            worker_id = %self.worker_id,
            task_type = %task.task_type(),
            attempt = ctx.attempt(),
            max_attempts = task.max_attempts(),
            run_id = ?task.run_id(),
            "task started"
        );

        let keeper = LeaseKeeper {
            leases: &self.leases,
            task_id,
            worker_id: &self.worker_id,
            lease_duration: self.options.lease_duration,
            renew_interval: self.options.renew_interval,
        };
        let started = Instant::now();
        let execution = tokio::select! {
            lost = keeper.run(&trigger) => Err(lost),
            result = self.handlers.dispatch(&ctx, task.payload()) => Ok(result),
        };
        let took_ms = duration_ms(started.elapsed());

        match execution {
            Err(lost) => {
                tracing::warn!(
                    task_id = %task_id,
                    worker_id = %self.worker_id,
                    error = %lost,
                    took_ms,
                    "lease lost; abandoning task"
                );
                ProcessOutcome::Abandoned
            }
            Ok(Ok(output)) => {
                let envelope = result_envelope(task.task_type(), took_ms, output);
                let (completions, worker_id) = (&self.completions, &self.worker_id);
                match self
                    .deliver(task_id, move || {
                        completions.complete(task_id, worker_id, envelope.clone())
                    })
                    .await
                {
                    Ok(_) => ProcessOutcome::Completed,
                    Err(err) => self.unreported(task_id, err),
                }
            }
            Ok(Err(err)) => self.report_failure(&task, &err, took_ms).await,
        }
    }

    async fn report_failure(&self, task: &Task, err: &HandlerError, took_ms: u64) -> ProcessOutcome {
        let last_error = err.to_last_error();
        tracing::debug!(
            task_id = %task.id(),
            worker_id = %self.worker_id,
            error = %last_error,
            took_ms,
            "handler failed"
        );
        let (completions, worker_id) = (&self.completions, &self.worker_id);
        let reason = last_error.as_str();
        let task_id = task.id();
        match self
            .deliver(task_id, move || completions.fail(task_id, worker_id, reason))
            .await
        {
            Ok((_, outcome)) => ProcessOutcome::Failed(outcome),
            Err(report_err) => self.unreported(task_id, report_err),
        }
    }

    /// Sends a terminal report, retrying transient store errors with the
    /// backoff policy for at most one lease duration.
    async fn deliver<T, F, Fut>(&self, task_id: TaskId, mut report: F) -> QueueResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = QueueResult<T>>,
    {
        let deadline = Instant::now().checked_add(self.options.lease_duration);
        let mut retries: u32 = 0;
        loop {
            match report().await {
                Err(err) if err.is_transient() => {
                    let remaining = deadline.map_or(Duration::MAX, |until| {
                        until.saturating_duration_since(Instant::now())
                    });
                    if remaining.is_zero() {
                        return Err(err);
                    }
                    retries = retries.saturating_add(1);
                    let delay = self
                        .options
                        .backoff
                        .delay_for(retries)
                        .to_std()
                        .unwrap_or(self.options.poll_interval)
                        .min(remaining);
                    tracing::warn!(
                        task_id = %task_id,
                        worker_id = %self.worker_id,
                        error = %err,
                        retries,
                        delay_ms = duration_ms(delay),
                        "could not record task outcome; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                settled => return settled,
            }
        }
    }

    fn unreported(&self, task_id: TaskId, err: QueueError) -> ProcessOutcome {
        match err {
            QueueError::AlreadyTerminal { .. } | QueueError::AlreadyReassigned { .. } => {
                ProcessOutcome::Rejected(err)
            }
            other => {
                tracing::error!(
                    task_id = %task_id,
                    worker_id = %self.worker_id,
                    error = %other,
                    "could not record task outcome"
                );
                ProcessOutcome::Unreported(other)
            }
        }
    }

    async fn deregister(&self) {
        let service = HeartbeatService::new(Arc::clone(&self.heartbeats), Arc::clone(&self.clock));
        match service.forget(&self.worker_id).await {
            Ok(()) | Err(QueueError::WorkerNotFound(_)) => {}
            Err(err) => tracing::warn!(
                worker_id = %self.worker_id,
                error = %err,
                "could not remove heartbeat row"
            ),
        }
    }
}

/// Wraps handler output in the stored result document:
/// `{"ok": true, "kind": <task type>, "took_ms": <n>, ...output}`.
///
/// Object outputs are merged key by key (handler keys win), `null` adds
/// nothing and any other value is stored under `"value"`.
#[must_use]
pub fn result_envelope(kind: &TaskType, took_ms: u64, output: Document) -> Document {
    let mut envelope = Map::new();
    envelope.insert("ok".to_owned(), Value::Bool(true));
    envelope.insert("kind".to_owned(), Value::String(kind.as_str().to_owned()));
    envelope.insert("took_ms".to_owned(), Value::from(took_ms));
    match output.into_inner() {
        Value::Object(fields) => envelope.extend(fields),
        Value::Null => {}
        other => {
            envelope.insert("value".to_owned(), other);
        }
    }
    Document::from_value(Value::Object(envelope))
}

async fn heartbeat_loop<H, C>(
    service: HeartbeatService<H, C>,
    worker_id: WorkerId,
    options: WorkerOptions,
    mut stop: watch::Receiver<bool>,
) where
    H: HeartbeatRegistry,
    C: Clock + Send + Sync,
{
    let poll_s = whole_seconds(options.poll_interval);
    let lock_s = whole_seconds(options.lease_duration);
    let mut ticker = tokio::time::interval(options.heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = service.beat(&worker_id, poll_s, lock_s).await {
                    tracing::warn!(worker_id = %worker_id, error = %err, "heartbeat failed");
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
}

/// Sleeps for `delay`; returns `true` if shutdown was requested meanwhile.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

fn whole_seconds(duration: Duration) -> u32 {
    u32::try_from(duration.as_secs())
        .unwrap_or(u32::MAX)
        .clamp(1, i32::MAX.unsigned_abs())
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
