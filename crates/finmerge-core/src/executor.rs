//! Bounded-concurrency batch runner.
//!
//! Every task runs on its own tokio task but only `worker_count` hold a
//! permit at once. The request rate is still governed by the shared
//! [`crate::RateLimiter`]; the pool bound only limits contention. One task's
//! error or panic becomes that task's outcome and never touches its siblings.

use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::operation::FetchTask;
use crate::outcome::{FailureClass, FetchFailure, FetchOutcome};

/// Shared abort switch for an in-flight batch.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`Self::cancel`] has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Re-invocation of a failed task body, separate from the client's HTTP retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskRetry {
    /// Extra invocations after the first failure.
    pub attempts: u32,
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkPlan {
    size: usize,
    pause: Duration,
}

/// Counts for a finished batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn from_outcomes<T>(outcomes: &[FetchOutcome<T>], elapsed: Duration) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let cancelled = outcomes
            .iter()
            .filter(|o| o.failure().is_some_and(|f| f.class() == FailureClass::Cancelled))
            .count();
        Self {
            total: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded - cancelled,
            cancelled,
            elapsed,
        }
    }
}

/// Runs [`FetchTask`]s through a caller-supplied async body.
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    worker_count: usize,
    task_retry: TaskRetry,
    chunking: Option<ChunkPlan>,
    cancellation: CancellationFlag,
}

impl BatchExecutor {
    /// A `worker_count` of zero is treated as one.
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
            task_retry: TaskRetry::default(),
            chunking: None,
            cancellation: CancellationFlag::new(),
        }
    }

    pub fn with_task_retry(mut self, task_retry: TaskRetry) -> Self {
        self.task_retry = task_retry;
        self
    }

    /// Make [`Self::run_all`] process `size` tasks at a time with `pause` between chunks.
    pub fn with_chunking(mut self, size: usize, pause: Duration) -> Self {
        self.chunking = Some(ChunkPlan {
            size: size.max(1),
            pause,
        });
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationFlag) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancellation
    }

    /// Run every task and return exactly one outcome per task, in no particular order.
    pub async fn run_all<T, F, Fut>(&self, tasks: Vec<FetchTask>, body: F) -> Vec<FetchOutcome<T>>
    where
        T: Send + 'static,
        F: Fn(FetchTask) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchFailure>> + Send + 'static,
    {
        match self.chunking {
            Some(plan) => self.run_chunked(tasks, plan.size, plan.pause, body).await,
            None => {
                let started = Instant::now();
                let outcomes = self.run_batch(tasks, Arc::new(body)).await;
                log_summary(&BatchSummary::from_outcomes(&outcomes, started.elapsed()));
                outcomes
            }
        }
    }

    /// Run `tasks` in sequential chunks of `chunk_size`, sleeping `pause` between chunks.
    pub async fn run_chunked<T, F, Fut>(
        &self,
        tasks: Vec<FetchTask>,
        chunk_size: usize,
        pause: Duration,
        body: F,
    ) -> Vec<FetchOutcome<T>>
    where
        T: Send + 'static,
        F: Fn(FetchTask) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchFailure>> + Send + 'static,
    {
        let started = Instant::now();
        let body = Arc::new(body);
        let chunks: Vec<Vec<FetchTask>> = tasks
            .chunks(chunk_size.max(1))
            .map(<[FetchTask]>::to_vec)
            .collect();
        let chunk_count = chunks.len();
        let mut outcomes = Vec::with_capacity(chunks.iter().map(Vec::len).sum());

        for (index, chunk) in chunks.into_iter().enumerate() {
            if index > 0 && !self.cancellation.is_cancelled() {
                info!(
                    next_chunk = index + 1,
                    chunk_count,
                    pause_ms = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX),
                    "pausing between chunks"
                );
                tokio::select! {
                    () = tokio::time::sleep(pause) => {}
                    () = self.cancellation.cancelled() => {}
                }
            }

            if self.cancellation.is_cancelled() {
                outcomes.extend(chunk.into_iter().map(cancelled_outcome));
                continue;
            }

            let chunk_outcomes = self.run_batch(chunk, Arc::clone(&body)).await;
            debug!(
                chunk = index + 1,
                chunk_count,
                failed = chunk_outcomes.iter().filter(|o| !o.is_success()).count(),
                "chunk finished"
            );
            outcomes.extend(chunk_outcomes);
        }

        log_summary(&BatchSummary::from_outcomes(&outcomes, started.elapsed()));
        outcomes
    }

    async fn run_batch<T, F, Fut>(
        &self,
        tasks: Vec<FetchTask>,
        body: Arc<F>,
    ) -> Vec<FetchOutcome<T>>
    where
        T: Send + 'static,
        F: Fn(FetchTask) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchFailure>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.worker_count));
        let mut handles = Vec::with_capacity(tasks.len());

        for task in tasks {
            let semaphore = Arc::clone(&semaphore);
            let body = Arc::clone(&body);
            let cancellation = self.cancellation.clone();
            let task_retry = self.task_retry;
            let spawned = task.clone();

            let handle = tokio::spawn(async move {
                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok(),
                    () = cancellation.cancelled() => None,
                };
                let Some(_permit) = permit else {
                    return cancelled_outcome(spawned);
                };
                if cancellation.is_cancelled() {
                    return cancelled_outcome(spawned);
                }
                invoke_with_retry(spawned, body.as_ref(), task_retry, &cancellation).await
            });
            handles.push((task, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (task, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_error) if join_error.is_panic() => {
                    let message = panic_message(join_error.into_panic());
                    warn!(symbol = %task.symbol, %message, "fetch task panicked");
                    FetchOutcome::new(
                        task,
                        Err(FetchFailure::new(FailureClass::TaskPanicked, message)),
                        1,
                    )
                }
                Err(_) => cancelled_outcome(task),
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}

async fn invoke_with_retry<T, F, Fut>(
    task: FetchTask,
    body: &F,
    task_retry: TaskRetry,
    cancellation: &CancellationFlag,
) -> FetchOutcome<T>
where
    F: Fn(FetchTask) -> Fut,
    Fut: Future<Output = Result<T, FetchFailure>>,
{
    let mut invocations = 0_u32;
    loop {
        invocations += 1;
        let result = tokio::select! {
            result = body(task.clone()) => result,
            () = cancellation.cancelled() => Err(FetchFailure::cancelled()),
        };

        let failure = match result {
            Ok(value) => return FetchOutcome::new(task, Ok(value), invocations),
            Err(failure) => failure,
        };
        if failure.class() == FailureClass::Cancelled || invocations > task_retry.attempts {
            return FetchOutcome::new(task, Err(failure), invocations);
        }

        debug!(
            symbol = %task.symbol,
            invocation = invocations,
            error = %failure,
            "task failed; invoking again"
        );
        tokio::select! {
            () = tokio::time::sleep(task_retry.delay) => {}
            () = cancellation.cancelled() => {
                return FetchOutcome::new(task, Err(FetchFailure::cancelled()), invocations);
            }
        }
    }
}

fn cancelled_outcome<T>(task: FetchTask) -> FetchOutcome<T> {
    FetchOutcome::new(task, Err(FetchFailure::cancelled()), 0)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("task panicked")
    }
}

fn log_summary(summary: &BatchSummary) {
    info!(
        total = summary.total,
        succeeded = summary.succeeded,
        failed = summary.failed,
        cancelled = summary.cancelled,
        elapsed_ms = u64::try_from(summary.elapsed.as_millis()).unwrap_or(u64::MAX),
        "batch finished"
    );
}
