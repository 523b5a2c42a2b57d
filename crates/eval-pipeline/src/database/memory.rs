use super::job_store::JobStore;
use super::models::{EvaluationJob, JobPage, JobPatch, JobStatus, JobView, NewJob};
use crate::utils::error::EvalError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Mutex;

/// Mutex-backed job store with the same observable semantics as
/// [`super::PgJobStore`]. Backs the test suite and store-less deployments.
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<String, EvaluationJob>>,
    next_id: AtomicI64,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_patch(job: &mut EvaluationJob, patch: JobPatch) {
    if let Some(status) = patch.status {
        job.status = status;
    }
    if let Some(message) = patch.error_message {
        job.error_message = Some(message);
    }
    if let Some(result) = patch.result {
        job.result = Some(result);
    }
    if let Some(retry_count) = patch.retry_count {
        job.retry_count = retry_count;
    }
    if let Some(started) = patch.processing_started_at {
        job.processing_started_at = Some(started);
    }
    if let Some(completed) = patch.processing_completed_at {
        job.processing_completed_at = Some(completed);
    }
    job.version += 1;
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_atomic(&self, new: NewJob) -> Result<EvaluationJob, EvalError> {
        let mut jobs = self.jobs.lock().await;
        if let Some(existing) = jobs.get(&new.job_id) {
            return Ok(existing.clone());
        }
        let job = EvaluationJob {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            job_id: new.job_id.clone(),
            owner_id: new.owner_id,
            job_title: new.job_title,
            cv_document_id: new.cv_document_id,
            project_document_id: new.project_document_id,
            status: JobStatus::Queued,
            version: 1,
            retry_count: 0,
            error_message: None,
            result: None,
            created_at: Utc::now(),
            processing_started_at: None,
            processing_completed_at: None,
        };
        jobs.insert(new.job_id, job.clone());
        Ok(job)
    }

    async fn try_update(
        &self,
        job_id: &str,
        expected_version: i32,
        patch: JobPatch,
    ) -> Result<Option<EvaluationJob>, EvalError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(job_id) else {
            return Ok(None);
        };
        if job.version != expected_version {
            return Ok(None);
        }
        apply_patch(job, patch);
        Ok(Some(job.clone()))
    }

    async fn get(&self, job_id: &str) -> Result<Option<EvaluationJob>, EvalError> {
        Ok(self.jobs.lock().await.get(job_id).cloned())
    }

    async fn find(&self, job_id: &str, owner_id: i32) -> Result<Option<EvaluationJob>, EvalError> {
        Ok(self
            .jobs
            .lock()
            .await
            .get(job_id)
            .filter(|job| job.owner_id == owner_id)
            .cloned())
    }

    async fn list(
        &self,
        owner_id: i32,
        status: Option<JobStatus>,
        page: i64,
        limit: i64,
    ) -> Result<JobPage, EvalError> {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);
        let jobs = self.jobs.lock().await;
        let mut matching: Vec<&EvaluationJob> = jobs
            .values()
            .filter(|job| job.owner_id == owner_id)
            .filter(|job| status.map_or(true, |s| job.status == s))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as i64;
        let offset = ((page - 1) * limit) as usize;
        let views = matching
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .map(|job| JobView::from(job.clone()))
            .collect();
        Ok(JobPage::new(views, page, limit, total))
    }

    async fn stale_queued(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<EvaluationJob>, EvalError> {
        let jobs = self.jobs.lock().await;
        let mut stale: Vec<EvaluationJob> = jobs
            .values()
            .filter(|job| job.status == JobStatus::Queued && job.created_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|job| job.created_at);
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_job(job_id: &str) -> NewJob {
        NewJob {
            job_id: job_id.to_string(),
            owner_id: 1,
            job_title: "Backend Engineer".to_string(),
            cv_document_id: 10,
            project_document_id: 11,
        }
    }

    #[tokio::test]
    async fn test_create_atomic_is_idempotent() {
        let store = InMemoryJobStore::new();
        let first = store.create_atomic(new_job("eval_a_1")).await.unwrap();
        let second = store.create_atomic(new_job("eval_a_1")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.version, second.version);

        let page = store.list(1, None, 1, 10).await.unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn test_version_increases_on_every_mutation() {
        let store = InMemoryJobStore::new();
        let job = store.create_atomic(new_job("eval_a_2")).await.unwrap();
        assert_eq!(job.version, 1);

        let processing = store
            .transition("eval_a_2", JobStatus::Processing, JobPatch::default())
            .await
            .unwrap();
        assert_eq!(processing.version, 2);
        assert!(processing.processing_started_at.is_some());

        let failed = store
            .transition(
                "eval_a_2",
                JobStatus::Failed,
                JobPatch {
                    error_message: Some("boom".into()),
                    retry_count: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(failed.version, 3);
        assert!(failed.processing_completed_at.is_some());
        assert!(failed.processing_completed_at >= failed.processing_started_at);
    }

    #[tokio::test]
    async fn test_terminal_state_cannot_be_exited() {
        let store = InMemoryJobStore::new();
        store.create_atomic(new_job("eval_a_3")).await.unwrap();
        store
            .transition("eval_a_3", JobStatus::Cancelled, JobPatch::default())
            .await
            .unwrap();

        let err = store
            .transition("eval_a_3", JobStatus::Processing, JobPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Concurrency(_)));
    }

    #[tokio::test]
    async fn test_racing_terminal_writers() {
        let store = InMemoryJobStore::new();
        store.create_atomic(new_job("eval_a_4")).await.unwrap();
        store
            .transition("eval_a_4", JobStatus::Processing, JobPatch::default())
            .await
            .unwrap();

        let won = store
            .transition("eval_a_4", JobStatus::Completed, JobPatch::default())
            .await
            .unwrap();
        let lost = store
            .transition("eval_a_4", JobStatus::Completed, JobPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(lost, EvalError::Concurrency(_)));

        let current = store.get("eval_a_4").await.unwrap().unwrap();
        assert_eq!(current.version, won.version);
        assert_eq!(
            current.processing_completed_at,
            won.processing_completed_at
        );
    }

    #[tokio::test]
    async fn test_update_optimistic_rereads_stale_version() {
        let store = InMemoryJobStore::new();
        store.create_atomic(new_job("eval_a_5")).await.unwrap();
        store
            .transition("eval_a_5", JobStatus::Processing, JobPatch::default())
            .await
            .unwrap();

        // Caller holds a stale version; the store re-reads and applies.
        let updated = store
            .update_optimistic(
                "eval_a_5",
                1,
                JobPatch {
                    retry_count: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.retry_count, 2);
        assert_eq!(updated.version, 3);
    }

    #[tokio::test]
    async fn test_cancel_is_noop_when_already_cancelled() {
        let store = InMemoryJobStore::new();
        store.create_atomic(new_job("eval_a_6")).await.unwrap();

        let cancelled = store.cancel("eval_a_6", 1).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        let again = store.cancel("eval_a_6", 1).await.unwrap();
        assert_eq!(again.status, JobStatus::Cancelled);
        assert_eq!(again.version, cancelled.version);
    }

    #[tokio::test]
    async fn test_cancel_rejected_from_terminal_states() {
        let store = InMemoryJobStore::new();
        store.create_atomic(new_job("eval_a_7")).await.unwrap();
        store
            .transition("eval_a_7", JobStatus::Processing, JobPatch::default())
            .await
            .unwrap();
        store
            .transition("eval_a_7", JobStatus::Completed, JobPatch::default())
            .await
            .unwrap();

        let err = store.cancel("eval_a_7", 1).await.unwrap_err();
        assert!(matches!(err, EvalError::Validation(_)));
    }

    #[tokio::test]
    async fn test_find_is_owner_scoped() {
        let store = InMemoryJobStore::new();
        store.create_atomic(new_job("eval_a_8")).await.unwrap();
        assert!(store.find("eval_a_8", 1).await.unwrap().is_some());
        assert!(store.find("eval_a_8", 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_pagination() {
        let store = InMemoryJobStore::new();
        for i in 0..5 {
            store
                .create_atomic(new_job(&format!("eval_list_{i}")))
                .await
                .unwrap();
        }
        let page = store.list(1, Some(JobStatus::Queued), 1, 2).await.unwrap();
        assert_eq!(page.jobs.len(), 2);
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next);
        assert!(!page.has_prev);

        let last = store.list(1, Some(JobStatus::Queued), 3, 2).await.unwrap();
        assert_eq!(last.jobs.len(), 1);
        assert!(!last.has_next);
        assert!(last.has_prev);
    }
}
