pub mod fallback;
pub mod prompts;

use crate::config::EngineConfig;
use crate::database::models::{EvaluationResult, DocumentKind, Recommendation};
use crate::llm::json::{json_f32, json_string, json_string_list};
use crate::llm::{ChatMessage, ChatOptions, LlmApi};
use crate::retrieval::{collections, ScoredChunk, SearchRequest, VectorIndex};
use crate::utils::error::EvalError;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One end-to-end scoring request, as handed over by a worker.
#[derive(Debug, Clone)]
pub struct EvaluationInput {
    pub job_id: String,
    pub job_title: String,
    pub cv_text: String,
    pub project_text: String,
}

/// Parsed (or fallback-generated) outcome of the CV scoring stage.
#[derive(Debug, Clone)]
pub struct CvAnalysis {
    pub match_rate: f32,
    pub experience_match: Option<f32>,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub missing_skills: Vec<String>,
    pub overall_assessment: String,
}

/// Parsed (or fallback-generated) outcome of the project scoring stage.
#[derive(Debug, Clone)]
pub struct ProjectAnalysis {
    pub overall_score: f32,
    pub technical_quality: Option<f32>,
    pub complexity_level: Option<f32>,
    pub innovation_score: Option<f32>,
    pub documentation_quality: Option<f32>,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OverallOutcome {
    pub recommendation_raw: String,
    pub feedback: String,
    pub specifics: String,
}

struct RetrievedContext {
    job_requirements: Vec<ScoredChunk>,
    cv_rubric: Vec<ScoredChunk>,
    similar_cvs: Vec<ScoredChunk>,
    case_studies: Vec<ScoredChunk>,
    tech_requirements: Vec<ScoredChunk>,
    project_rubric: Vec<ScoredChunk>,
    similar_projects: Vec<ScoredChunk>,
}

impl RetrievedContext {
    fn source_counts(&self) -> crate::database::models::ContextSources {
        crate::database::models::ContextSources {
            job_descriptions: (self.job_requirements.len() + self.tech_requirements.len()) as u32,
            rubrics: (self.cv_rubric.len() + self.project_rubric.len()) as u32,
            cv_documents: self.similar_cvs.len() as u32,
            project_documents: self.similar_projects.len() as u32,
            case_studies: self.case_studies.len() as u32,
        }
    }
}

static RECOMMENDATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)RECOMMENDATION:\s*(.+?)\s*(?:DETAILED FEEDBACK:|SPECIFIC RECOMMENDATIONS:|$)")
        .expect("recommendation pattern")
});
static FEEDBACK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)DETAILED FEEDBACK:\s*(.+?)\s*(?:SPECIFIC RECOMMENDATIONS:|$)")
        .expect("feedback pattern")
});
static SPECIFIC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)SPECIFIC RECOMMENDATIONS:\s*(.+)$").expect("specifics pattern")
});

/// The multi-stage scoring chain: parallel context retrieval, CV scoring,
/// project scoring, final recommendation, result assembly. Dependencies are
/// injected so tests can substitute scripted LLMs and in-memory indexes.
pub struct EvaluationEngine {
    llm: Arc<dyn LlmApi>,
    index: Arc<dyn VectorIndex>,
    config: EngineConfig,
}

impl EvaluationEngine {
    pub fn new(llm: Arc<dyn LlmApi>, index: Arc<dyn VectorIndex>, config: EngineConfig) -> Self {
        Self { llm, index, config }
    }

    pub async fn evaluate(&self, input: &EvaluationInput) -> Result<EvaluationResult, EvalError> {
        info!("Evaluating job {} ({})", input.job_id, input.job_title);

        let context = self.gather_context(input).await;
        let cv = self.score_cv(input, &context).await;
        let project = self.score_project(input, &context).await;

        let mut result = EvaluationResult {
            cv_match_rate: cv.match_rate,
            cv_breakdown: fallback::derive_cv_breakdown(
                &input.cv_text,
                cv.match_rate.clamp(0.0, 1.0),
                cv.experience_match,
            ),
            cv_feedback: truncate_chars(&compose_cv_feedback(&cv), self.config.max_feedback_chars),
            project_score: project.overall_score,
            project_breakdown: fallback::derive_project_breakdown(&project),
            overall_summary: String::new(),
            recommendation: Recommendation::ConditionalHire,
            evaluated_at: Utc::now(),
            context_sources: context.source_counts(),
        }
        .clamped();

        // A quota failure here is fatal to the job; everything else falls
        // back to the deterministic recommendation.
        let overall = self
            .overall_recommendation(input, &cv, &project, result.weighted_overall())
            .await?;

        result.recommendation = normalize_recommendation(&overall.recommendation_raw);
        result.overall_summary =
            truncate_chars(&compose_summary(&overall), self.config.max_feedback_chars);

        debug!(
            "Job {} scored: match {:.2}, project {:.1}, {:?}",
            input.job_id, result.cv_match_rate, result.project_score, result.recommendation
        );
        Ok(result)
    }

    /// Seven independent searches; every one of them degrades to an empty
    /// list on failure, so this cannot fail.
    async fn gather_context(&self, input: &EvaluationInput) -> RetrievedContext {
        let base = SearchRequest {
            max_results: self.config.top_k,
            doc_kind: None,
            threshold: self.config.similarity_threshold,
        };
        let cv_rubric_request = SearchRequest {
            doc_kind: Some(DocumentKind::CvRubric),
            ..base.clone()
        };
        let project_rubric_request = SearchRequest {
            doc_kind: Some(DocumentKind::ProjectRubric),
            ..base.clone()
        };
        let cv_excerpt = truncate_chars(&input.cv_text, 500);
        let project_excerpt = truncate_chars(&input.project_text, 500);

        let cv_rubric_query = format!("{} CV evaluation criteria", input.job_title);
        let tech_requirements_query = format!("{} technical requirements", input.job_title);
        let project_rubric_query = format!("{} project evaluation criteria", input.job_title);

        let (
            job_requirements,
            cv_rubric,
            similar_cvs,
            case_studies,
            tech_requirements,
            project_rubric,
            similar_projects,
        ) = futures::join!(
            self.index
                .search(&input.job_title, collections::JOB_DESCRIPTIONS, &base),
            self.index.search(
                &cv_rubric_query,
                collections::RUBRICS,
                &cv_rubric_request,
            ),
            self.index
                .search(&cv_excerpt, collections::CV_DOCUMENTS, &base),
            self.index
                .search(&input.job_title, collections::CASE_STUDIES, &base),
            self.index.search(
                &tech_requirements_query,
                collections::JOB_DESCRIPTIONS,
                &base,
            ),
            self.index.search(
                &project_rubric_query,
                collections::RUBRICS,
                &project_rubric_request,
            ),
            self.index
                .search(&project_excerpt, collections::PROJECT_DOCUMENTS, &base),
        );

        RetrievedContext {
            job_requirements,
            cv_rubric,
            similar_cvs,
            case_studies,
            tech_requirements,
            project_rubric,
            similar_projects,
        }
    }

    async fn score_cv(&self, input: &EvaluationInput, context: &RetrievedContext) -> CvAnalysis {
        let prompt = prompts::cv_scoring(
            &input.job_title,
            &render_context(&context.job_requirements, self.config.max_context_chars),
            &render_context(&context.cv_rubric, self.config.max_context_chars),
            &truncate_chars(&input.cv_text, self.config.max_document_chars),
        );
        let messages = [ChatMessage::system(prompts::CV_SYSTEM), ChatMessage::user(prompt)];

        match self.llm.evaluate(&messages, &self.chat_options()).await {
            Ok(evaluation) => match parse_cv_analysis(evaluation.parsed.as_ref()) {
                Some(analysis) => analysis,
                None => {
                    warn!(
                        "CV scoring for job {} returned no usable JSON, using deterministic fallback",
                        input.job_id
                    );
                    fallback::fallback_cv(&input.job_title, &input.cv_text)
                }
            },
            Err(e) => {
                warn!(
                    "CV scoring call for job {} failed ({}), using deterministic fallback",
                    input.job_id, e
                );
                fallback::fallback_cv(&input.job_title, &input.cv_text)
            }
        }
    }

    async fn score_project(
        &self,
        input: &EvaluationInput,
        context: &RetrievedContext,
    ) -> ProjectAnalysis {
        let prompt = prompts::project_scoring(
            &input.job_title,
            &render_context(&context.tech_requirements, self.config.max_context_chars),
            &render_context(&context.project_rubric, self.config.max_context_chars),
            &truncate_chars(&input.project_text, self.config.max_document_chars),
        );
        let messages = [
            ChatMessage::system(prompts::PROJECT_SYSTEM),
            ChatMessage::user(prompt),
        ];

        match self.llm.evaluate(&messages, &self.chat_options()).await {
            Ok(evaluation) => match parse_project_analysis(evaluation.parsed.as_ref()) {
                Some(analysis) => analysis,
                None => {
                    warn!(
                        "Project scoring for job {} returned no usable JSON, using deterministic fallback",
                        input.job_id
                    );
                    fallback::fallback_project(&input.project_text)
                }
            },
            Err(e) => {
                warn!(
                    "Project scoring call for job {} failed ({}), using deterministic fallback",
                    input.job_id, e
                );
                fallback::fallback_project(&input.project_text)
            }
        }
    }

    async fn overall_recommendation(
        &self,
        input: &EvaluationInput,
        cv: &CvAnalysis,
        project: &ProjectAnalysis,
        weighted: f32,
    ) -> Result<OverallOutcome, EvalError> {
        let prompt = prompts::overall(&input.job_title, &summarize_cv(cv), &summarize_project(project));
        let messages = [
            ChatMessage::system(prompts::OVERALL_SYSTEM),
            ChatMessage::user(prompt),
        ];

        match self.llm.chat(&messages, &self.chat_options()).await {
            Ok(chat) => Ok(parse_overall_sections(&chat.content)),
            Err(e) if e.is_quota() => Err(e),
            Err(e) => {
                warn!(
                    "Recommendation call for job {} failed ({}), deriving it from the aggregate score",
                    input.job_id, e
                );
                Ok(fallback::fallback_overall(weighted, cv, project))
            }
        }
    }

    fn chat_options(&self) -> ChatOptions {
        ChatOptions {
            model: self.config.evaluation_model.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }
}

fn parse_cv_analysis(parsed: Option<&Value>) -> Option<CvAnalysis> {
    let value = parsed?;
    let match_rate = json_f32(value, "matchRate")?;
    Some(CvAnalysis {
        match_rate,
        experience_match: json_f32(value, "experienceMatch"),
        strengths: json_string_list(value, "strengths"),
        weaknesses: json_string_list(value, "weaknesses"),
        missing_skills: json_string_list(value, "missingSkills"),
        overall_assessment: json_string(value, "overallAssessment").unwrap_or_default(),
    })
}

fn parse_project_analysis(parsed: Option<&Value>) -> Option<ProjectAnalysis> {
    let value = parsed?;
    let overall_score = json_f32(value, "overallScore")?;
    Some(ProjectAnalysis {
        overall_score,
        technical_quality: json_f32(value, "technicalQuality"),
        complexity_level: json_f32(value, "complexityLevel"),
        innovation_score: json_f32(value, "innovationScore"),
        documentation_quality: json_f32(value, "documentationQuality"),
        strengths: json_string_list(value, "strengths"),
        improvements: json_string_list(value, "improvements"),
    })
}

fn parse_overall_sections(content: &str) -> OverallOutcome {
    let recommendation_raw = RECOMMENDATION_RE
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| content.trim().to_string());
    let feedback = FEEDBACK_RE
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| content.trim().to_string());
    let specifics = SPECIFIC_RE
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    OverallOutcome {
        recommendation_raw,
        feedback,
        specifics,
    }
}

/// Case-insensitive substring normalization: CONDITIONAL or MAYBE win over
/// HIRE, HIRE wins over REJECT/NO, anything unrecognizable lands in the
/// middle.
pub fn normalize_recommendation(raw: &str) -> Recommendation {
    let upper = raw.to_uppercase();
    if upper.contains("CONDITIONAL") || upper.contains("MAYBE") {
        Recommendation::ConditionalHire
    } else if upper.contains("HIRE") {
        Recommendation::Hire
    } else if upper.contains("REJECT") || upper.contains("NO") {
        Recommendation::Reject
    } else {
        Recommendation::ConditionalHire
    }
}

fn render_context(chunks: &[ScoredChunk], cap: usize) -> String {
    if chunks.is_empty() {
        return "(no reference material available)".to_string();
    }
    let mut out = String::new();
    for chunk in chunks {
        if out.chars().count() >= cap {
            break;
        }
        if !out.is_empty() {
            out.push_str("\n---\n");
        }
        out.push_str(chunk.content.trim());
    }
    truncate_chars(&out, cap)
}

fn compose_cv_feedback(cv: &CvAnalysis) -> String {
    let mut parts = Vec::new();
    if !cv.overall_assessment.is_empty() {
        parts.push(cv.overall_assessment.clone());
    }
    if !cv.strengths.is_empty() {
        parts.push(format!("Strengths: {}.", cv.strengths.join(", ")));
    }
    if !cv.weaknesses.is_empty() {
        parts.push(format!("Areas to improve: {}.", cv.weaknesses.join(", ")));
    }
    if !cv.missing_skills.is_empty() {
        parts.push(format!("Missing skills: {}.", cv.missing_skills.join(", ")));
    }
    parts.join(" ")
}

fn compose_summary(overall: &OverallOutcome) -> String {
    if overall.specifics.is_empty() {
        overall.feedback.clone()
    } else {
        format!(
            "{}\n\nSpecific recommendations:\n{}",
            overall.feedback, overall.specifics
        )
    }
}

fn summarize_cv(cv: &CvAnalysis) -> String {
    format!(
        "Match rate: {:.2}. Strengths: {}. Weaknesses: {}. Missing skills: {}. Assessment: {}",
        cv.match_rate,
        join_or_none(&cv.strengths),
        join_or_none(&cv.weaknesses),
        join_or_none(&cv.missing_skills),
        cv.overall_assessment
    )
}

fn summarize_project(project: &ProjectAnalysis) -> String {
    format!(
        "Overall score: {:.1}/5. Strengths: {}. Suggested improvements: {}",
        project.overall_score,
        join_or_none(&project.strengths),
        join_or_none(&project.improvements)
    )
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none noted".to_string()
    } else {
        items.join(", ")
    }
}

pub(crate) fn truncate_chars(text: &str, cap: usize) -> String {
    text.chars().take(cap).collect()
}
