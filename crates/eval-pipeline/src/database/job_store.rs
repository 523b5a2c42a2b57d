use super::models::{
    result_from_json, EvaluationJob, JobPage, JobPatch, JobStatus, JobView, NewJob,
};
use super::DbPool;
use crate::utils::error::EvalError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{debug, warn};

const UPDATE_ATTEMPTS: u32 = 3;
const CREATE_ATTEMPTS: u32 = 3;

/// Authoritative persistence of evaluation jobs. Implementations provide the
/// primitive reads and a single compare-and-set attempt; the retry loops,
/// state-machine validation, and cancellation policy live in the default
/// methods so every backend behaves identically.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Upsert by `job_id`: returns the existing record when one is already
    /// there, the freshly inserted `queued` record otherwise.
    async fn create_atomic(&self, new: NewJob) -> Result<EvaluationJob, EvalError>;

    /// One optimistic-lock attempt. `Ok(None)` means the version did not
    /// match (or the row vanished mid-flight).
    async fn try_update(
        &self,
        job_id: &str,
        expected_version: i32,
        patch: JobPatch,
    ) -> Result<Option<EvaluationJob>, EvalError>;

    async fn get(&self, job_id: &str) -> Result<Option<EvaluationJob>, EvalError>;

    /// Owner-scoped read. A job owned by someone else is indistinguishable
    /// from a missing one.
    async fn find(&self, job_id: &str, owner_id: i32) -> Result<Option<EvaluationJob>, EvalError>;

    async fn list(
        &self,
        owner_id: i32,
        status: Option<JobStatus>,
        page: i64,
        limit: i64,
    ) -> Result<JobPage, EvalError>;

    /// Queued rows created before `older_than`, i.e. candidates for the
    /// startup re-enqueue sweep.
    async fn stale_queued(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<EvaluationJob>, EvalError>;

    /// Apply `patch` iff the stored version still matches, re-reading the
    /// current version and retrying with backoff on a mismatch.
    async fn update_optimistic(
        &self,
        job_id: &str,
        expected_version: i32,
        patch: JobPatch,
    ) -> Result<EvaluationJob, EvalError> {
        let mut version = expected_version;
        for attempt in 0..UPDATE_ATTEMPTS {
            if let Some(updated) = self.try_update(job_id, version, patch.clone()).await? {
                return Ok(updated);
            }
            let current = self.get(job_id).await?.ok_or_else(|| {
                EvalError::NotFound(format!("job {job_id} disappeared during update"))
            })?;
            debug!(
                "Optimistic update of job {} raced (expected v{}, found v{})",
                job_id, version, current.version
            );
            version = current.version;
            if attempt + 1 < UPDATE_ATTEMPTS {
                tokio::time::sleep(Duration::from_millis(50u64 << attempt)).await;
            }
        }
        Err(EvalError::Concurrency(format!(
            "optimistic update of job {job_id} exhausted {UPDATE_ATTEMPTS} attempts"
        )))
    }

    /// Status change through the state machine. Stamps
    /// `processing_started_at` on entry to `processing` and
    /// `processing_completed_at` on entry to `completed`/`failed`. Every
    /// retry re-reads and re-validates, so a lost race against another
    /// terminal writer surfaces as a `Concurrency` error instead of a
    /// silent overwrite.
    async fn transition(
        &self,
        job_id: &str,
        new_status: JobStatus,
        extras: JobPatch,
    ) -> Result<EvaluationJob, EvalError> {
        for attempt in 0..UPDATE_ATTEMPTS {
            let job = self
                .get(job_id)
                .await?
                .ok_or_else(|| EvalError::NotFound(format!("job {job_id} not found")))?;

            if !job.status.can_transition_to(new_status) {
                return Err(EvalError::Concurrency(format!(
                    "job {} cannot move from {} to {}",
                    job_id, job.status, new_status
                )));
            }

            let mut patch = extras.clone();
            patch.status = Some(new_status);
            let now = Utc::now();
            if new_status == JobStatus::Processing && patch.processing_started_at.is_none() {
                patch.processing_started_at = Some(now);
            }
            if matches!(new_status, JobStatus::Completed | JobStatus::Failed)
                && patch.processing_completed_at.is_none()
            {
                patch.processing_completed_at = Some(now);
            }

            if let Some(updated) = self.try_update(job_id, job.version, patch).await? {
                return Ok(updated);
            }
            if attempt + 1 < UPDATE_ATTEMPTS {
                tokio::time::sleep(Duration::from_millis(50u64 << attempt)).await;
            }
        }
        Err(EvalError::Concurrency(format!(
            "transition of job {job_id} to {new_status} lost the version race"
        )))
    }

    /// Cancel is permitted from `queued` and `processing` only. Cancelling
    /// an already-cancelled job is a no-op returning the stored record.
    async fn cancel(&self, job_id: &str, owner_id: i32) -> Result<EvaluationJob, EvalError> {
        let job = self
            .find(job_id, owner_id)
            .await?
            .ok_or_else(|| EvalError::NotFound(format!("job {job_id} not found")))?;
        match job.status {
            JobStatus::Cancelled => Ok(job),
            JobStatus::Completed | JobStatus::Failed => Err(EvalError::Validation(
                "only queued or processing jobs can be cancelled".to_string(),
            )),
            JobStatus::Queued | JobStatus::Processing => {
                self.transition(job_id, JobStatus::Cancelled, JobPatch::default())
                    .await
            }
        }
    }
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: i64,
    job_id: String,
    owner_id: i32,
    job_title: String,
    cv_document_id: i32,
    project_document_id: i32,
    status: String,
    version: i32,
    retry_count: i32,
    error_message: Option<String>,
    result: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    processing_started_at: Option<DateTime<Utc>>,
    processing_completed_at: Option<DateTime<Utc>>,
}

impl From<JobRow> for EvaluationJob {
    fn from(row: JobRow) -> Self {
        let status = JobStatus::parse(&row.status).unwrap_or_else(|| {
            warn!("Job {} carries unknown status '{}'", row.job_id, row.status);
            JobStatus::Failed
        });
        Self {
            id: row.id,
            job_id: row.job_id,
            owner_id: row.owner_id,
            job_title: row.job_title,
            cv_document_id: row.cv_document_id,
            project_document_id: row.project_document_id,
            status,
            version: row.version,
            retry_count: row.retry_count,
            error_message: row.error_message,
            result: row.result.and_then(result_from_json),
            created_at: row.created_at,
            processing_started_at: row.processing_started_at,
            processing_completed_at: row.processing_completed_at,
        }
    }
}

const JOB_COLUMNS: &str = "id, job_id, owner_id, job_title, cv_document_id, \
     project_document_id, status, version, retry_count, error_message, result, \
     created_at, processing_started_at, processing_completed_at";

pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_atomic(&self, new: NewJob) -> Result<EvaluationJob, EvalError> {
        let insert = format!(
            "INSERT INTO evaluation_jobs \
               (job_id, owner_id, job_title, cv_document_id, project_document_id, \
                status, version, retry_count, created_at) \
             VALUES ($1, $2, $3, $4, $5, 'queued', 1, 0, NOW()) \
             ON CONFLICT (job_id) DO NOTHING \
             RETURNING {JOB_COLUMNS}"
        );

        for attempt in 0..CREATE_ATTEMPTS {
            let inserted = sqlx::query_as::<_, JobRow>(&insert)
                .bind(&new.job_id)
                .bind(new.owner_id)
                .bind(&new.job_title)
                .bind(new.cv_document_id)
                .bind(new.project_document_id)
                .fetch_optional(self.pool.pool())
                .await;

            match inserted {
                Ok(Some(row)) => {
                    debug!("Created job {} for owner {}", new.job_id, new.owner_id);
                    return Ok(row.into());
                }
                // Conflict: someone else inserted the same job_id first.
                Ok(None) => {
                    if let Some(existing) = self.get(&new.job_id).await? {
                        return Ok(existing);
                    }
                }
                Err(e) => {
                    warn!(
                        "Job insert attempt {} for {} failed: {}",
                        attempt + 1,
                        new.job_id,
                        e
                    );
                }
            }
            if attempt + 1 < CREATE_ATTEMPTS {
                tokio::time::sleep(Duration::from_millis(100u64 << attempt)).await;
            }
        }

        self.get(&new.job_id).await?.ok_or_else(|| {
            EvalError::Persistence(format!(
                "job {} could not be created after {CREATE_ATTEMPTS} attempts",
                new.job_id
            ))
        })
    }

    async fn try_update(
        &self,
        job_id: &str,
        expected_version: i32,
        patch: JobPatch,
    ) -> Result<Option<EvaluationJob>, EvalError> {
        let result_json = match &patch.result {
            Some(result) => Some(
                serde_json::to_value(result)
                    .map_err(|e| EvalError::Persistence(format!("result not serializable: {e}")))?,
            ),
            None => None,
        };

        let update = format!(
            "UPDATE evaluation_jobs SET \
               status = COALESCE($3, status), \
               error_message = COALESCE($4, error_message), \
               result = COALESCE($5, result), \
               retry_count = COALESCE($6, retry_count), \
               processing_started_at = COALESCE($7, processing_started_at), \
               processing_completed_at = COALESCE($8, processing_completed_at), \
               version = version + 1 \
             WHERE job_id = $1 AND version = $2 \
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query_as::<_, JobRow>(&update)
            .bind(job_id)
            .bind(expected_version)
            .bind(patch.status.map(|s| s.as_str().to_string()))
            .bind(patch.error_message)
            .bind(result_json)
            .bind(patch.retry_count)
            .bind(patch.processing_started_at)
            .bind(patch.processing_completed_at)
            .fetch_optional(self.pool.pool())
            .await?;

        Ok(row.map(EvaluationJob::from))
    }

    async fn get(&self, job_id: &str) -> Result<Option<EvaluationJob>, EvalError> {
        let query = format!("SELECT {JOB_COLUMNS} FROM evaluation_jobs WHERE job_id = $1");
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(job_id)
            .fetch_optional(self.pool.pool())
            .await?;
        Ok(row.map(EvaluationJob::from))
    }

    async fn find(&self, job_id: &str, owner_id: i32) -> Result<Option<EvaluationJob>, EvalError> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM evaluation_jobs WHERE job_id = $1 AND owner_id = $2"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(job_id)
            .bind(owner_id)
            .fetch_optional(self.pool.pool())
            .await?;
        Ok(row.map(EvaluationJob::from))
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
        let status_filter = status.map(|s| s.as_str().to_string());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM evaluation_jobs \
             WHERE owner_id = $1 AND ($2::text IS NULL OR status = $2)",
        )
        .bind(owner_id)
        .bind(&status_filter)
        .fetch_one(self.pool.pool())
        .await?;

        let query = format!(
            "SELECT {JOB_COLUMNS} FROM evaluation_jobs \
             WHERE owner_id = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(owner_id)
            .bind(&status_filter)
            .bind(limit)
            .bind((page - 1) * limit)
            .fetch_all(self.pool.pool())
            .await?;

        let jobs = rows
            .into_iter()
            .map(|row| JobView::from(EvaluationJob::from(row)))
            .collect();
        Ok(JobPage::new(jobs, page, limit, total))
    }

    async fn stale_queued(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<EvaluationJob>, EvalError> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM evaluation_jobs \
             WHERE status = 'queued' AND created_at < $1 \
             ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(older_than)
            .fetch_all(self.pool.pool())
            .await?;
        Ok(rows.into_iter().map(EvaluationJob::from).collect())
    }
}
