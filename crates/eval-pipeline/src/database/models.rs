use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Lifecycle of an evaluation job. Transitions are restricted to the state
/// machine encoded in [`JobStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// queued → processing|cancelled|failed, processing → completed|failed|cancelled.
    /// queued → failed covers the enqueue-failure path after a successful insert.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Processing)
                | (Self::Queued, Self::Cancelled)
                | (Self::Queued, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Cv,
    ProjectReport,
    JobDescription,
    CaseStudy,
    CvRubric,
    ProjectRubric,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cv => "cv",
            Self::ProjectReport => "project_report",
            Self::JobDescription => "job_description",
            Self::CaseStudy => "case_study",
            Self::CvRubric => "cv_rubric",
            Self::ProjectRubric => "project_rubric",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cv" => Some(Self::Cv),
            "project_report" => Some(Self::ProjectReport),
            "job_description" => Some(Self::JobDescription),
            "case_study" => Some(Self::CaseStudy),
            "cv_rubric" => Some(Self::CvRubric),
            "project_rubric" => Some(Self::ProjectRubric),
            _ => None,
        }
    }
}

/// A document as handed over by the upload subsystem. The pipeline only ever
/// reads these.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: i32,
    pub kind: DocumentKind,
    pub owner_id: i32,
    pub extracted_text: String,
    pub vectorized: bool,
}

#[derive(Debug, Clone)]
pub struct EvaluationJob {
    pub id: i64,
    pub job_id: String,
    pub owner_id: i32,
    pub job_title: String,
    pub cv_document_id: i32,
    pub project_document_id: i32,
    pub status: JobStatus,
    pub version: i32,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub result: Option<EvaluationResult>,
    pub created_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
}

/// Fields for a fresh `queued` row. The store owns everything else.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: String,
    pub owner_id: i32,
    pub job_title: String,
    pub cv_document_id: i32,
    pub project_document_id: i32,
}

/// Partial update applied under optimistic locking. `None` fields are left
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub error_message: Option<String>,
    pub result: Option<EvaluationResult>,
    pub retry_count: Option<i32>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
}

/// The job as exposed to API consumers: surrogate id and version stay
/// internal; failure and result fields only appear in the states that carry
/// them.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job_id: String,
    pub job_title: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<EvaluationResult>,
}

impl From<EvaluationJob> for JobView {
    fn from(job: EvaluationJob) -> Self {
        let failed = job.status == JobStatus::Failed;
        let completed = job.status == JobStatus::Completed;
        Self {
            job_id: job.job_id,
            job_title: job.job_title,
            status: job.status,
            created_at: job.created_at,
            processing_started_at: job.processing_started_at,
            processing_completed_at: job.processing_completed_at,
            error_message: if failed { job.error_message } else { None },
            retry_count: if failed { Some(job.retry_count) } else { None },
            result: if completed { job.result } else { None },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
    pub jobs: Vec<JobView>,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl JobPage {
    pub fn new(jobs: Vec<JobView>, page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if total == 0 {
            0
        } else {
            (total + limit - 1) / limit
        };
        Self {
            jobs,
            page,
            limit,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1 && total_pages > 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Hire,
    ConditionalHire,
    Reject,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CvBreakdown {
    pub technical_skills: f32,
    pub experience_level: f32,
    pub achievements: f32,
    pub cultural_fit: f32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProjectBreakdown {
    pub correctness: f32,
    pub code_quality: f32,
    pub resilience: f32,
    pub documentation: f32,
    pub creativity: f32,
}

/// How many reference chunks each collection contributed to the evaluation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ContextSources {
    pub job_descriptions: u32,
    pub rubrics: u32,
    pub cv_documents: u32,
    pub project_documents: u32,
    pub case_studies: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub cv_match_rate: f32,
    pub cv_breakdown: CvBreakdown,
    pub cv_feedback: String,
    pub project_score: f32,
    pub project_breakdown: ProjectBreakdown,
    pub overall_summary: String,
    pub recommendation: Recommendation,
    pub evaluated_at: DateTime<Utc>,
    #[serde(default)]
    pub context_sources: ContextSources,
}

impl EvaluationResult {
    /// Force every numeric field into its declared range. LLM numerics are
    /// never trusted without this.
    pub fn clamped(mut self) -> Self {
        self.cv_match_rate = self.cv_match_rate.clamp(0.0, 1.0);
        self.cv_breakdown.technical_skills = self.cv_breakdown.technical_skills.clamp(0.0, 1.0);
        self.cv_breakdown.experience_level = self.cv_breakdown.experience_level.clamp(0.0, 1.0);
        self.cv_breakdown.achievements = self.cv_breakdown.achievements.clamp(0.0, 1.0);
        self.cv_breakdown.cultural_fit = self.cv_breakdown.cultural_fit.clamp(0.0, 1.0);
        self.project_score = self.project_score.clamp(1.0, 5.0);
        self.project_breakdown.correctness = self.project_breakdown.correctness.clamp(1.0, 5.0);
        self.project_breakdown.code_quality = self.project_breakdown.code_quality.clamp(1.0, 5.0);
        self.project_breakdown.resilience = self.project_breakdown.resilience.clamp(1.0, 5.0);
        self.project_breakdown.documentation = self.project_breakdown.documentation.clamp(1.0, 5.0);
        self.project_breakdown.creativity = self.project_breakdown.creativity.clamp(1.0, 5.0);
        self
    }

    /// Aggregate for consumers; not persisted.
    pub fn weighted_overall(&self) -> f32 {
        let cv_score = (self.cv_breakdown.technical_skills
            + self.cv_breakdown.experience_level
            + self.cv_breakdown.achievements
            + self.cv_breakdown.cultural_fit)
            / 4.0;
        0.4 * cv_score + 0.35 * (self.project_score - 1.0) / 4.0 + 0.25 * self.cv_match_rate
    }
}

/// Decode a JSONB result payload, tolerating rows written by older builds.
pub fn result_from_json(value: serde_json::Value) -> Option<EvaluationResult> {
    match serde_json::from_value(value) {
        Ok(result) => Some(result),
        Err(e) => {
            warn!("Discarding undecodable stored evaluation result: {}", e);
            None
        }
    }
}
