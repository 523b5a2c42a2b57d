use crate::database::job_store::JobStore;
use crate::database::models::{JobPatch, JobStatus};
use crate::engine::{truncate_chars, EvaluationEngine, EvaluationInput};
use crate::queue::{Delivery, WorkItem, WorkQueue};
use crate::utils::error::EvalError;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const IDLE_POLL: Duration = Duration::from_millis(100);
const TERMINAL_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Fixed-size pool draining the work queue. Each worker transitions its job
/// through processing into a terminal state and never leaves one dangling:
/// panics become `failed` transitions, shutdown drains the item in hand.
pub struct WorkerPool {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    engine: Arc<EvaluationEngine>,
    pool_size: usize,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        engine: Arc<EvaluationEngine>,
        pool_size: usize,
    ) -> Self {
        Self {
            store,
            queue,
            engine,
            pool_size: pool_size.max(1),
        }
    }

    /// Run until the shutdown signal flips. Items already dequeued are
    /// finished before a worker exits.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        info!("🎯 Worker pool started ({} workers)", self.pool_size);

        let mut handles = Vec::with_capacity(self.pool_size);
        for worker_id in 0..self.pool_size {
            let pool = Arc::clone(&self);
            let mut shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    match pool.queue.dequeue().await {
                        Some(delivery) => {
                            pool.handle_delivery(worker_id, &delivery).await;
                            pool.queue.ack(&delivery).await;
                        }
                        None => {
                            tokio::select! {
                                _ = shutdown.changed() => break,
                                _ = tokio::time::sleep(IDLE_POLL) => {}
                            }
                        }
                    }
                }
                debug!("Worker {} drained and stopped", worker_id);
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        info!("Worker pool stopped");
    }

    async fn handle_delivery(&self, worker_id: usize, delivery: &Delivery) {
        let item = &delivery.item;
        debug!("Worker {} picked up job {}", worker_id, item.job_id);

        match AssertUnwindSafe(self.process(item)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Job {} processing error: {}", item.job_id, e),
            Err(_) => {
                error!(
                    "Worker {} panicked while processing job {}",
                    worker_id, item.job_id
                );
                self.finalize(
                    &item.job_id,
                    JobStatus::Failed,
                    JobPatch {
                        error_message: Some(
                            "Evaluation aborted by an internal error".to_string(),
                        ),
                        ..Default::default()
                    },
                )
                .await;
            }
        }
    }

    async fn process(&self, item: &WorkItem) -> Result<(), EvalError> {
        let Some(job) = self.store.get(&item.job_id).await? else {
            warn!("Work item references unknown job {}", item.job_id);
            return Ok(());
        };

        match job.status {
            JobStatus::Cancelled => {
                info!("Job {} was cancelled before processing, skipping", item.job_id);
                return Ok(());
            }
            JobStatus::Completed | JobStatus::Failed => {
                debug!("Duplicate delivery of terminal job {}, skipping", item.job_id);
                return Ok(());
            }
            JobStatus::Queued => {
                self.store
                    .transition(&item.job_id, JobStatus::Processing, JobPatch::default())
                    .await?;
            }
            // at-least-once delivery: another copy of this item was already
            // picked up, or a previous run died mid-flight
            JobStatus::Processing => {
                debug!("Job {} re-delivered while processing", item.job_id);
            }
        }

        let input = EvaluationInput {
            job_id: item.job_id.clone(),
            job_title: item.job_title.clone(),
            cv_text: item.cv_text.clone(),
            project_text: item.project_text.clone(),
        };

        match self.engine.evaluate(&input).await {
            Ok(result) => {
                self.finalize(
                    &item.job_id,
                    JobStatus::Completed,
                    JobPatch {
                        result: Some(result),
                        ..Default::default()
                    },
                )
                .await;
            }
            Err(e) => {
                warn!("Job {} failed: {}", item.job_id, e);
                self.finalize(
                    &item.job_id,
                    JobStatus::Failed,
                    JobPatch {
                        error_message: Some(operator_message(&e)),
                        retry_count: Some(job.retry_count + 1),
                        ..Default::default()
                    },
                )
                .await;
            }
        }
        Ok(())
    }

    /// Terminal write with one best-effort second attempt. A job that was
    /// finalized elsewhere in the meantime (duplicate delivery,
    /// cancellation) is left alone.
    async fn finalize(&self, job_id: &str, status: JobStatus, patch: JobPatch) {
        match self.store.transition(job_id, status, patch.clone()).await {
            Ok(_) => {}
            Err(first) => {
                if self.already_terminal(job_id).await {
                    debug!(
                        "Job {} already reached a terminal state, skipping write",
                        job_id
                    );
                    return;
                }
                warn!(
                    "Terminal write for job {} failed ({}), retrying once",
                    job_id, first
                );
                tokio::time::sleep(TERMINAL_RETRY_DELAY).await;
                if let Err(second) = self.store.transition(job_id, status, patch).await {
                    if self.already_terminal(job_id).await {
                        debug!(
                            "Job {} was finalized by another writer, skipping",
                            job_id
                        );
                    } else {
                        error!(
                            "Job {} is stuck in processing after two terminal-write failures: {}",
                            job_id, second
                        );
                    }
                }
            }
        }
    }

    async fn already_terminal(&self, job_id: &str) -> bool {
        matches!(
            self.store.get(job_id).await,
            Ok(Some(job)) if job.status.is_terminal()
        )
    }
}

/// Single-sentence, operator-safe failure message. Never leaks stack traces.
fn operator_message(err: &EvalError) -> String {
    match err {
        EvalError::Quota { retry_after, .. } => {
            let mut message = "Evaluation temporarily unavailable because the LLM provider \
                 reported API usage limits"
                .to_string();
            if let Some(seconds) = retry_after {
                message.push_str(&format!(" (retry after {seconds}s)"));
            }
            message
        }
        other => truncate_chars(&other.to_string(), 200),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_message_names_usage_limits() {
        let message = operator_message(&EvalError::Quota {
            message: "insufficient_quota".into(),
            retry_after: Some(60),
        });
        assert!(message.contains("temporarily unavailable"));
        assert!(message.contains("API usage limits"));
        assert!(message.contains("60"));
    }

    #[test]
    fn test_other_messages_are_bounded() {
        let long = EvalError::Engine("x".repeat(1000));
        assert!(operator_message(&long).chars().count() <= 200);
    }
}
