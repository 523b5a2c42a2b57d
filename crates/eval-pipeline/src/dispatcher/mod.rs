pub mod worker;

pub use worker::WorkerPool;

use crate::database::job_store::JobStore;
use crate::database::models::{
    Document, DocumentKind, JobPage, JobPatch, JobStatus, JobView, NewJob,
};
use crate::documents::DocumentProvider;
use crate::queue::{WorkItem, WorkQueue};
use crate::utils::error::EvalError;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub job_title: String,
    pub cv_document_id: i32,
    pub project_document_id: i32,
    pub owner_id: i32,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SubmitReceipt {
    pub job_id: String,
    pub status: JobStatus,
    pub estimated_completion: String,
}

/// Front door of the pipeline: validates submissions, owns job-id minting,
/// persists the queued record, and hands work to the queue. Reads
/// (`get_status`/`list`) and `cancel` are owner-scoped pass-throughs.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    documents: Arc<dyn DocumentProvider>,
    queue: Arc<dyn WorkQueue>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        documents: Arc<dyn DocumentProvider>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            store,
            documents,
            queue,
        }
    }

    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitReceipt, EvalError> {
        let job_title = request.job_title.trim().to_string();
        let title_chars = job_title.chars().count();
        if !(3..=100).contains(&title_chars) {
            return Err(EvalError::Validation(
                "job title must be between 3 and 100 characters".to_string(),
            ));
        }

        let cv = self
            .resolve_document(request.cv_document_id, request.owner_id, DocumentKind::Cv, "CV")
            .await?;
        let project = self
            .resolve_document(
                request.project_document_id,
                request.owner_id,
                DocumentKind::ProjectReport,
                "project report",
            )
            .await?;

        // Collisions are astronomically unlikely; create_atomic makes one
        // observably safe anyway.
        let job_id = mint_job_id();
        let job = self
            .store
            .create_atomic(NewJob {
                job_id: job_id.clone(),
                owner_id: request.owner_id,
                job_title: job_title.clone(),
                cv_document_id: cv.id,
                project_document_id: project.id,
            })
            .await?;

        let item = WorkItem {
            job_id: job.job_id.clone(),
            job_record_id: job.id,
            job_title,
            cv_text: cv.extracted_text,
            project_text: project.extracted_text,
            owner_id: request.owner_id,
        };
        if let Err(e) = self.queue.enqueue(item).await {
            warn!("Enqueue for job {} failed: {}", job.job_id, e);
            let patch = JobPatch {
                error_message: Some(format!("enqueue failed: {e}")),
                ..Default::default()
            };
            if let Err(mark) = self
                .store
                .transition(&job.job_id, JobStatus::Failed, patch)
                .await
            {
                error!(
                    "Could not mark job {} failed after enqueue error: {}",
                    job.job_id, mark
                );
            }
            return Err(e);
        }

        info!("📥 Job {} queued for owner {}", job.job_id, request.owner_id);
        Ok(SubmitReceipt {
            job_id: job.job_id,
            status: JobStatus::Queued,
            estimated_completion: "1-2 minutes".to_string(),
        })
    }

    async fn resolve_document(
        &self,
        document_id: i32,
        owner_id: i32,
        expected: DocumentKind,
        label: &str,
    ) -> Result<Document, EvalError> {
        let document = self
            .documents
            .get(document_id, owner_id)
            .await?
            .ok_or_else(|| {
                EvalError::NotFound(format!("{label} document {document_id} not found"))
            })?;
        if document.kind != expected {
            return Err(EvalError::Validation(format!(
                "document {} is not a {} (found {})",
                document_id,
                label,
                document.kind.as_str()
            )));
        }
        if document.extracted_text.trim().is_empty() {
            return Err(EvalError::Validation(format!(
                "{label} document {document_id} has no extracted text yet"
            )));
        }
        Ok(document)
    }

    pub async fn get_status(&self, job_id: &str, owner_id: i32) -> Result<JobView, EvalError> {
        self.store
            .find(job_id, owner_id)
            .await?
            .map(JobView::from)
            .ok_or_else(|| EvalError::NotFound(format!("job {job_id} not found")))
    }

    pub async fn list(
        &self,
        owner_id: i32,
        status: Option<JobStatus>,
        page: i64,
        limit: i64,
    ) -> Result<JobPage, EvalError> {
        self.store.list(owner_id, status, page, limit).await
    }

    pub async fn cancel(&self, job_id: &str, owner_id: i32) -> Result<JobView, EvalError> {
        self.store.cancel(job_id, owner_id).await.map(JobView::from)
    }

    /// Startup sweep over queued rows older than the grace window: a crash
    /// between insert and enqueue leaves them without a backing work item.
    pub async fn requeue_stale(&self, grace: chrono::Duration) -> Result<usize, EvalError> {
        let cutoff = Utc::now() - grace;
        let stale = self.store.stale_queued(cutoff).await?;
        let mut requeued = 0usize;

        for job in stale {
            let cv = self.documents.get(job.cv_document_id, job.owner_id).await?;
            let project = self
                .documents
                .get(job.project_document_id, job.owner_id)
                .await?;

            match (cv, project) {
                (Some(cv), Some(project)) => {
                    let item = WorkItem {
                        job_id: job.job_id.clone(),
                        job_record_id: job.id,
                        job_title: job.job_title.clone(),
                        cv_text: cv.extracted_text,
                        project_text: project.extracted_text,
                        owner_id: job.owner_id,
                    };
                    match self.queue.enqueue(item).await {
                        Ok(()) => {
                            requeued += 1;
                            info!("Re-enqueued stale job {}", job.job_id);
                        }
                        Err(e) => warn!("Could not re-enqueue stale job {}: {}", job.job_id, e),
                    }
                }
                _ => {
                    warn!(
                        "Documents for stale job {} are gone, marking it failed",
                        job.job_id
                    );
                    let patch = JobPatch {
                        error_message: Some("source documents no longer available".to_string()),
                        ..Default::default()
                    };
                    if let Err(e) = self
                        .store
                        .transition(&job.job_id, JobStatus::Failed, patch)
                        .await
                    {
                        warn!("Could not mark stale job {} failed: {}", job.job_id, e);
                    }
                }
            }
        }
        Ok(requeued)
    }
}

/// `eval_<base36 millis>_<12 hex>`
fn mint_job_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let random: String = Uuid::new_v4().simple().to_string().chars().take(12).collect();
    format!("eval_{}_{}", base36(millis), random)
}

fn base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryJobStore;
    use crate::documents::InMemoryDocumentProvider;
    use crate::queue::InMemoryQueue;

    async fn fixture() -> (Dispatcher, Arc<InMemoryJobStore>, Arc<InMemoryQueue>) {
        let store = Arc::new(InMemoryJobStore::new());
        let documents = Arc::new(InMemoryDocumentProvider::new());
        documents
            .insert(Document {
                id: 10,
                kind: DocumentKind::Cv,
                owner_id: 1,
                extracted_text: "Senior backend engineer, 6 years Node.js".to_string(),
                vectorized: false,
            })
            .await;
        documents
            .insert(Document {
                id: 11,
                kind: DocumentKind::ProjectReport,
                owner_id: 1,
                extracted_text: "Microservice with tests and a readme".to_string(),
                vectorized: false,
            })
            .await;
        let queue = Arc::new(InMemoryQueue::new(8));
        let dispatcher = Dispatcher::new(store.clone(), documents, queue.clone());
        (dispatcher, store, queue)
    }

    fn request() -> SubmitRequest {
        SubmitRequest {
            job_title: "Backend Engineer".to_string(),
            cv_document_id: 10,
            project_document_id: 11,
            owner_id: 1,
        }
    }

    #[tokio::test]
    async fn test_submit_persists_and_enqueues() {
        let (dispatcher, store, queue) = fixture().await;
        let receipt = dispatcher.submit(request()).await.unwrap();

        assert!(receipt.job_id.starts_with("eval_"));
        assert_eq!(receipt.status, JobStatus::Queued);
        assert_eq!(queue.len().await, 1);

        let view = dispatcher.get_status(&receipt.job_id, 1).await.unwrap();
        assert_eq!(view.job_id, receipt.job_id);
        assert_eq!(view.status, JobStatus::Queued);
        assert!(view.result.is_none());

        let stored = store.get(&receipt.job_id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_title_length_is_validated() {
        let (dispatcher, store, _queue) = fixture().await;
        let mut bad = request();
        bad.job_title = "QA".to_string();
        assert!(matches!(
            dispatcher.submit(bad).await,
            Err(EvalError::Validation(_))
        ));

        let mut long = request();
        long.job_title = "x".repeat(101);
        assert!(matches!(
            dispatcher.submit(long).await,
            Err(EvalError::Validation(_))
        ));

        assert_eq!(store.list(1, None, 1, 10).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_unresolvable_cv_ref_creates_no_job() {
        let (dispatcher, store, queue) = fixture().await;
        let mut bad = request();
        bad.cv_document_id = 999;
        assert!(matches!(
            dispatcher.submit(bad).await,
            Err(EvalError::NotFound(_))
        ));
        assert_eq!(store.list(1, None, 1, 10).await.unwrap().total, 0);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_swapped_document_kinds_are_rejected() {
        let (dispatcher, _store, _queue) = fixture().await;
        let mut swapped = request();
        swapped.cv_document_id = 11;
        swapped.project_document_id = 10;
        assert!(matches!(
            dispatcher.submit(swapped).await,
            Err(EvalError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_cross_owner_reads_do_not_leak_existence() {
        let (dispatcher, _store, _queue) = fixture().await;
        let receipt = dispatcher.submit(request()).await.unwrap();

        let err = dispatcher.get_status(&receipt.job_id, 2).await.unwrap_err();
        assert!(matches!(err, EvalError::NotFound(_)));
        let err = dispatcher.cancel(&receipt.job_id, 2).await.unwrap_err();
        assert!(matches!(err, EvalError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_enqueue_failure_marks_job_failed() {
        let (dispatcher, store, queue) = fixture().await;
        // Fill the queue so the next enqueue is rejected.
        queue
            .enqueue(WorkItem {
                job_id: "filler".to_string(),
                job_record_id: 0,
                job_title: "filler".to_string(),
                cv_text: String::new(),
                project_text: String::new(),
                owner_id: 1,
            })
            .await
            .unwrap();
        for _ in 0..7 {
            let _ = queue
                .enqueue(WorkItem {
                    job_id: "filler".to_string(),
                    job_record_id: 0,
                    job_title: "filler".to_string(),
                    cv_text: String::new(),
                    project_text: String::new(),
                    owner_id: 1,
                })
                .await;
        }

        let err = dispatcher.submit(request()).await.unwrap_err();
        assert!(matches!(err, EvalError::Transient(_)));

        let page = store.list(1, Some(JobStatus::Failed), 1, 10).await.unwrap();
        assert_eq!(page.total, 1);
        let failed = &page.jobs[0];
        assert!(failed
            .error_message
            .as_deref()
            .unwrap_or_default()
            .starts_with("enqueue failed"));
    }

    #[tokio::test]
    async fn test_cancel_round_trip() {
        let (dispatcher, _store, _queue) = fixture().await;
        let receipt = dispatcher.submit(request()).await.unwrap();

        let cancelled = dispatcher.cancel(&receipt.job_id, 1).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        // no-op law: cancelling again returns the same record
        let again = dispatcher.cancel(&receipt.job_id, 1).await.unwrap();
        assert_eq!(again.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_requeue_stale_sweep() {
        let (dispatcher, store, queue) = fixture().await;
        // Simulate a crash after insert: row exists, queue is empty.
        store
            .create_atomic(NewJob {
                job_id: "eval_stale_1".to_string(),
                owner_id: 1,
                job_title: "Backend Engineer".to_string(),
                cv_document_id: 10,
                project_document_id: 11,
            })
            .await
            .unwrap();

        let requeued = dispatcher
            .requeue_stale(chrono::Duration::seconds(-1))
            .await
            .unwrap();
        assert_eq!(requeued, 1);
        assert_eq!(queue.len().await, 1);
    }

    #[test]
    fn test_job_id_shape() {
        let id = mint_job_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "eval");
        assert!(!parts[1].is_empty());
        assert_eq!(parts[2].len(), 12);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_base36() {
        assert_eq!(base36(0), "0");
        assert_eq!(base36(35), "z");
        assert_eq!(base36(36), "10");
    }
}
