//! Worker pool draining the publish queue.
//!
//! `concurrency` loops share one queue. Each loop reserves a delivery, runs
//! the post worker on it and then completes or releases the delivery.
//! Publisher panics and stalls are settled by the worker itself. A delivery
//! whose handler still errors, panics or overruns `job_timeout` (a stalled
//! store, for instance) is released with the retry delay while attempts
//! remain and dropped afterwards; the post stays Scheduled, so the next scan
//! enqueues it again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::queue::{Delivery, TaskQueue, POSTS_QUEUE};
use crate::worker::{PostPublishWorker, TaskOutcome};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    pub queue: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(500),
            job_timeout: Duration::from_secs(120),
            queue: POSTS_QUEUE.to_string(),
        }
    }
}

/// What the pool did with one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    /// Handler finished; the job was removed from the queue
    Completed(TaskOutcome),
    /// Job handed back for another delivery
    Released { delay: Duration },
    /// Handler kept failing and attempts ran out; the job was removed
    Dropped { reason: String },
}

/// Counters for a run of the pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolReport {
    pub published: usize,
    pub halted: usize,
    pub skipped: usize,
    pub released: usize,
    pub dropped: usize,
}

impl PoolReport {
    pub fn processed(&self) -> usize {
        self.published + self.halted + self.skipped + self.released + self.dropped
    }

    fn record(&mut self, result: &DeliveryResult) {
        match result {
            DeliveryResult::Completed(TaskOutcome::Published) => self.published += 1,
            DeliveryResult::Completed(TaskOutcome::Halted { .. }) => self.halted += 1,
            DeliveryResult::Completed(TaskOutcome::Skipped { .. }) => self.skipped += 1,
            DeliveryResult::Completed(TaskOutcome::Release { .. })
            | DeliveryResult::Released { .. } => self.released += 1,
            DeliveryResult::Dropped { .. } => self.dropped += 1,
        }
    }

    fn merge(&mut self, other: PoolReport) {
        self.published += other.published;
        self.halted += other.halted;
        self.skipped += other.skipped;
        self.released += other.released;
        self.dropped += other.dropped;
    }
}

#[derive(Clone)]
pub struct WorkerPool {
    worker: Arc<PostPublishWorker>,
    queue: Arc<dyn TaskQueue>,
    config: PoolConfig,
}

impl WorkerPool {
    pub fn new(worker: Arc<PostPublishWorker>, queue: Arc<dyn TaskQueue>, config: PoolConfig) -> Self {
        Self {
            worker,
            queue,
            config,
        }
    }

    /// Run until `shutdown` is set. In-flight deliveries finish first.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) -> PoolReport {
        info!(
            concurrency = self.config.concurrency,
            queue = %self.config.queue,
            "Starting worker pool"
        );
        let report = self.spawn_loops(shutdown, false).await;
        info!(processed = report.processed(), "Worker pool stopped");
        report
    }

    /// Process ready deliveries until the queue has none left
    pub async fn drain(&self) -> PoolReport {
        self.spawn_loops(Arc::new(AtomicBool::new(false)), true)
            .await
    }

    async fn spawn_loops(&self, shutdown: Arc<AtomicBool>, stop_when_empty: bool) -> PoolReport {
        let mut loops = JoinSet::new();
        for index in 0..self.config.concurrency.max(1) {
            let pool = self.clone();
            let shutdown = Arc::clone(&shutdown);
            loops.spawn(async move { pool.worker_loop(index, shutdown, stop_when_empty).await });
        }

        let mut report = PoolReport::default();
        while let Some(joined) = loops.join_next().await {
            match joined {
                Ok(loop_report) => report.merge(loop_report),
                Err(e) => error!(error = %e, "Worker loop terminated abnormally"),
            }
        }
        report
    }

    async fn worker_loop(self, index: usize, shutdown: Arc<AtomicBool>, stop_when_empty: bool) -> PoolReport {
        debug!(worker = index, "Worker started");
        let mut report = PoolReport::default();

        while !shutdown.load(Ordering::SeqCst) {
            match self.queue.reserve(&self.config.queue).await {
                Ok(Some(delivery)) => match self.process_delivery(delivery).await {
                    Ok(result) => report.record(&result),
                    Err(e) => error!(worker = index, error = %e, "Failed to settle delivery"),
                },
                Ok(None) => {
                    if stop_when_empty {
                        break;
                    }
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(e) => {
                    error!(worker = index, error = %e, "Failed to reserve from queue");
                    if stop_when_empty {
                        break;
                    }
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        debug!(worker = index, "Worker stopped");
        report
    }

    /// Run the post worker on one delivery and settle it with the queue
    pub async fn process_delivery(&self, delivery: Delivery) -> Result<DeliveryResult> {
        let worker = Arc::clone(&self.worker);
        let post_id = delivery.task.post_id.clone();
        let attempts = delivery.attempts;

        // A separate task keeps a panicking handler from taking the loop down
        let handle = tokio::spawn(async move { worker.handle(&post_id, attempts).await });
        let abort = handle.abort_handle();

        let failure = match tokio::time::timeout(self.config.job_timeout, handle).await {
            Ok(Ok(Ok(TaskOutcome::Release { delay }))) => {
                self.queue.release(&delivery, delay).await?;
                return Ok(DeliveryResult::Released { delay });
            }
            Ok(Ok(Ok(outcome))) => {
                self.queue.complete(&delivery).await?;
                return Ok(DeliveryResult::Completed(outcome));
            }
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(join_err)) if join_err.is_panic() => "handler panicked".to_string(),
            Ok(Err(join_err)) => join_err.to_string(),
            Err(_) => {
                abort.abort();
                format!("handler timed out after {}s", self.config.job_timeout.as_secs())
            }
        };

        let policy = self.worker.policy();
        if policy.can_retry(attempts) {
            warn!(
                post_id = %delivery.task.post_id,
                attempts,
                delay_secs = policy.retry_delay.as_secs(),
                error = %failure,
                "Delivery failed, releasing for retry"
            );
            self.queue.release(&delivery, policy.retry_delay).await?;
            Ok(DeliveryResult::Released {
                delay: policy.retry_delay,
            })
        } else {
            error!(
                post_id = %delivery.task.post_id,
                attempts,
                error = %failure,
                "Delivery failed on final attempt, dropping"
            );
            self.queue.complete(&delivery).await?;
            Ok(DeliveryResult::Dropped { reason: failure })
        }
    }
}
