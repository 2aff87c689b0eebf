//! Worker pool
//!
//! Pulls jobs from the queue concurrently and drives the order processor.
//! A failed attempt is requeued with backoff; once attempts are exhausted
//! the order itself is forced to FAILED so nothing stays QUEUED forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::pg::{PgJobQueue, RetryDecision};
use crate::config::QueueConfig;
use crate::engine::OrderProcessor;

pub struct WorkerPool {
    queue: Arc<PgJobQueue>,
    processor: Arc<OrderProcessor>,
    config: QueueConfig,
    running: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(queue: Arc<PgJobQueue>, processor: Arc<OrderProcessor>, config: QueueConfig) -> Self {
        Self {
            queue,
            processor,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the worker tasks plus the stale-job reaper. Returns the join
    /// handles so the caller can await them after `stop`.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        self.running.store(true, Ordering::SeqCst);
        info!(
            workers = self.config.workers,
            poll_interval_ms = self.config.poll_interval_ms,
            "worker pool started"
        );

        let mut handles = Vec::with_capacity(self.config.workers + 1);
        for worker_id in 0..self.config.workers {
            handles.push(self.spawn_worker(worker_id));
        }
        handles.push(self.spawn_reaper());
        handles
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("worker pool stopping");
    }

    fn spawn_worker(&self, worker_id: usize) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let processor = self.processor.clone();
        let running = self.running.clone();
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                let job = match queue.claim().await {
                    Ok(Some(job)) => job,
                    Ok(None) => {
                        tokio::time::sleep(poll_interval).await;
                        continue;
                    }
                    Err(e) => {
                        error!(worker_id, "failed to claim job: {e}");
                        tokio::time::sleep(poll_interval).await;
                        continue;
                    }
                };

                debug!(
                    worker_id,
                    job_id = job.id,
                    order_id = %job.order_id,
                    attempt = job.attempts,
                    "processing order job"
                );

                match processor.process(job.order_id).await {
                    Ok(outcome) => {
                        debug!(worker_id, job_id = job.id, ?outcome, "job done");
                        if let Err(e) = queue.complete(job.id).await {
                            error!(job_id = job.id, "failed to complete job: {e}");
                        }
                    }
                    Err(e) => {
                        warn!(
                            worker_id,
                            job_id = job.id,
                            order_id = %job.order_id,
                            attempt = job.attempts,
                            "order processing attempt failed: {e}"
                        );
                        match queue.retry(&job, &e.to_string()).await {
                            Ok(RetryDecision::Requeued { delay }) => {
                                debug!(
                                    job_id = job.id,
                                    delay_ms = delay.as_millis() as u64,
                                    "attempt will be retried"
                                );
                            }
                            Ok(RetryDecision::Exhausted) => {
                                if let Err(fail_err) =
                                    processor.force_fail(job.order_id, job.attempts).await
                                {
                                    error!(
                                        order_id = %job.order_id,
                                        "failed to force-fail exhausted order: {fail_err}"
                                    );
                                }
                            }
                            Err(retry_err) => {
                                error!(job_id = job.id, "failed to record retry: {retry_err}");
                            }
                        }
                    }
                }
            }

            debug!(worker_id, "worker stopped");
        })
    }

    /// Periodically requeues jobs whose worker died mid-attempt.
    fn spawn_reaper(&self) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let running = self.running.clone();
        let visibility_timeout = Duration::from_secs(self.config.visibility_timeout_secs);
        let sweep_interval = Duration::from_secs(self.config.visibility_timeout_secs.max(2) / 2);

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(sweep_interval);
            while running.load(Ordering::SeqCst) {
                timer.tick().await;
                if let Err(e) = queue.requeue_stale(visibility_timeout).await {
                    error!("stale job sweep failed: {e}");
                }
            }
            debug!("reaper stopped");
        })
    }
}
