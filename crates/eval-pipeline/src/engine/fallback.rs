//! Deterministic, LLM-free scoring. Not meant to produce good evaluations;
//! it exists so the pipeline degrades to a schema-valid result instead of
//! failing hard when the backend is unreachable.

use super::{CvAnalysis, OverallOutcome, ProjectAnalysis};
use crate::database::models::{CvBreakdown, ProjectBreakdown};

const EXPERIENCE_KEYWORDS: [&str; 4] = ["experience", "years", "worked", "developed"];
const TECHNICAL_KEYWORDS: [&str; 7] = [
    "javascript",
    "python",
    "java",
    "react",
    "node",
    "sql",
    "database",
];
const ACHIEVEMENT_KEYWORDS: [&str; 6] = ["led", "managed", "built", "created", "achieved", "improved"];
const CODE_KEYWORDS: [&str; 6] = ["code", "api", "function", "class", "endpoint", "test"];
const DOC_KEYWORDS: [&str; 5] = ["readme", "documentation", "docs", "setup", "usage"];

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_string)
        .collect();
    tokens.sort();
    tokens.dedup();
    tokens
}

fn contains_any(lower: &str, words: &[&str]) -> bool {
    words.iter().any(|w| lower.contains(w))
}

/// Share of job-title tokens contained in the CV text, clamped to
/// [0.3, 0.9] so a degraded pipeline never emits an extreme score.
pub fn keyword_match_rate(job_title: &str, cv_text: &str) -> f32 {
    let job_tokens = tokenize(job_title);
    if job_tokens.is_empty() {
        return 0.3;
    }
    let cv_lower = cv_text.to_lowercase();
    let hits = job_tokens
        .iter()
        .filter(|token| cv_lower.contains(token.as_str()))
        .count();
    (hits as f32 / job_tokens.len() as f32).clamp(0.3, 0.9)
}

/// Sub-scores modulated at most ±0.15 around the match rate, driven by the
/// presence of the three keyword classes. An explicit experience figure
/// from the model wins over the keyword estimate.
pub fn derive_cv_breakdown(
    cv_text: &str,
    match_rate: f32,
    experience_match: Option<f32>,
) -> CvBreakdown {
    let lower = cv_text.to_lowercase();
    let lift = |present: bool, up: f32, down: f32| if present { up } else { -down };
    CvBreakdown {
        technical_skills: (match_rate + lift(contains_any(&lower, &TECHNICAL_KEYWORDS), 0.10, 0.15))
            .clamp(0.0, 1.0),
        experience_level: experience_match
            .map(|e| e.clamp(0.0, 1.0))
            .unwrap_or_else(|| {
                (match_rate + lift(contains_any(&lower, &EXPERIENCE_KEYWORDS), 0.10, 0.15))
                    .clamp(0.0, 1.0)
            }),
        achievements: (match_rate + lift(contains_any(&lower, &ACHIEVEMENT_KEYWORDS), 0.15, 0.10))
            .clamp(0.0, 1.0),
        cultural_fit: (match_rate - 0.05).clamp(0.0, 1.0),
    }
}

pub fn fallback_cv(job_title: &str, cv_text: &str) -> CvAnalysis {
    let match_rate = keyword_match_rate(job_title, cv_text);
    let lower = cv_text.to_lowercase();

    let mut strengths = Vec::new();
    let mut weaknesses = Vec::new();
    if contains_any(&lower, &TECHNICAL_KEYWORDS) {
        strengths.push("Mentions a recognizable technical stack".to_string());
    } else {
        weaknesses.push("No recognizable technical stack keywords".to_string());
    }
    if contains_any(&lower, &EXPERIENCE_KEYWORDS) {
        strengths.push("Describes hands-on experience".to_string());
    } else {
        weaknesses.push("Experience history is unclear".to_string());
    }
    if contains_any(&lower, &ACHIEVEMENT_KEYWORDS) {
        strengths.push("Lists concrete achievements".to_string());
    } else {
        weaknesses.push("Few concrete achievements listed".to_string());
    }

    CvAnalysis {
        match_rate,
        experience_match: None,
        strengths,
        weaknesses,
        missing_skills: Vec::new(),
        overall_assessment: format!(
            "Keyword-based screening put this CV at a {:.0}% match for '{}'.",
            match_rate * 100.0,
            job_title
        ),
    }
}

/// Base 3.0, plus a capped length bonus and flat bonuses for code and
/// documentation vocabulary.
pub fn fallback_project(project_text: &str) -> ProjectAnalysis {
    let lower = project_text.to_lowercase();
    let mut score = 3.0f32;
    score += (project_text.chars().count() as f32 / 2000.0 * 0.5).min(1.0);

    let has_code = contains_any(&lower, &CODE_KEYWORDS);
    if has_code {
        score += 0.5;
    }
    let has_docs = contains_any(&lower, &DOC_KEYWORDS);
    if has_docs {
        score += 0.3;
    }
    let score = score.min(5.0);

    ProjectAnalysis {
        overall_score: score,
        technical_quality: Some(if has_code {
            (score + 0.2).min(5.0)
        } else {
            (score - 0.2).max(1.0)
        }),
        complexity_level: Some(score),
        innovation_score: Some((score - 0.5).max(1.0)),
        documentation_quality: Some(if has_docs { 4.0 } else { 3.0 }),
        strengths: if has_code {
            vec!["Report references concrete implementation details".to_string()]
        } else {
            Vec::new()
        },
        improvements: if has_docs {
            Vec::new()
        } else {
            vec!["Add setup and usage documentation".to_string()]
        },
    }
}

/// Map the scoring fields onto the stored breakdown, defaulting every
/// missing field to the overall score.
pub fn derive_project_breakdown(project: &ProjectAnalysis) -> ProjectBreakdown {
    let overall = project.overall_score.clamp(1.0, 5.0);
    let field = |value: Option<f32>| value.unwrap_or(overall).clamp(1.0, 5.0);
    ProjectBreakdown {
        correctness: overall,
        code_quality: field(project.technical_quality),
        resilience: field(project.complexity_level),
        documentation: field(project.documentation_quality),
        creativity: field(project.innovation_score),
    }
}

/// Final-stage fallback when the recommendation call fails for non-quota
/// reasons: thresholds over the weighted aggregate.
pub fn fallback_overall(
    weighted: f32,
    cv: &CvAnalysis,
    project: &ProjectAnalysis,
) -> OverallOutcome {
    let recommendation = if weighted >= 0.75 {
        "HIRE"
    } else if weighted >= 0.5 {
        "CONDITIONAL_HIRE"
    } else {
        "REJECT"
    };
    OverallOutcome {
        recommendation_raw: recommendation.to_string(),
        feedback: format!(
            "Deterministic assessment: CV match rate {:.2}, project score {:.1}, \
             weighted aggregate {:.2}. {}",
            cv.match_rate, project.overall_score, weighted, cv.overall_assessment
        ),
        specifics: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRONG_CV: &str = "Senior backend engineer with 6 years of experience. \
         Worked with Node.js, SQL and database tuning. Led a team and improved \
         deployment reliability.";

    #[test]
    fn test_match_rate_is_clamped_to_band() {
        // Both title tokens present -> raw 1.0, clamped down to 0.9.
        assert_eq!(keyword_match_rate("Backend Engineer", STRONG_CV), 0.9);
        // Nothing matches -> floor at 0.3.
        assert_eq!(keyword_match_rate("Backend Engineer", "florist"), 0.3);
        assert_eq!(keyword_match_rate("", STRONG_CV), 0.3);
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let a = fallback_cv("Backend Engineer", STRONG_CV);
        let b = fallback_cv("Backend Engineer", STRONG_CV);
        assert_eq!(a.match_rate, b.match_rate);
        assert_eq!(a.strengths, b.strengths);
        assert_eq!(a.overall_assessment, b.overall_assessment);
    }

    #[test]
    fn test_cv_breakdown_stays_near_match_rate() {
        let breakdown = derive_cv_breakdown(STRONG_CV, 0.6, None);
        for value in [
            breakdown.technical_skills,
            breakdown.experience_level,
            breakdown.achievements,
            breakdown.cultural_fit,
        ] {
            assert!((value - 0.6).abs() <= 0.15 + 1e-6);
            assert!((0.0..=1.0).contains(&value));
        }
    }

    #[test]
    fn test_explicit_experience_match_wins() {
        let breakdown = derive_cv_breakdown(STRONG_CV, 0.6, Some(0.95));
        assert_eq!(breakdown.experience_level, 0.95);
    }

    #[test]
    fn test_project_bonuses() {
        let bare = fallback_project("A small script.");
        assert!((bare.overall_score - 3.0).abs() < 0.01);
        assert_eq!(bare.documentation_quality, Some(3.0));

        let rich_text = format!(
            "This service exposes an api endpoint with full test coverage and a \
             readme covering setup. {}",
            "x".repeat(4000)
        );
        let rich = fallback_project(&rich_text);
        // 3.0 base + 1.0 length cap + 0.5 code + 0.3 docs
        assert!((rich.overall_score - 4.8).abs() < 0.01);
        assert_eq!(rich.documentation_quality, Some(4.0));
    }

    #[test]
    fn test_project_score_never_exceeds_five() {
        let text = format!("api test readme documentation {}", "y".repeat(10_000));
        let project = fallback_project(&text);
        assert!(project.overall_score <= 5.0);
        let breakdown = derive_project_breakdown(&project);
        for value in [
            breakdown.correctness,
            breakdown.code_quality,
            breakdown.resilience,
            breakdown.documentation,
            breakdown.creativity,
        ] {
            assert!((1.0..=5.0).contains(&value));
        }
    }

    #[test]
    fn test_overall_thresholds() {
        let cv = fallback_cv("Backend Engineer", STRONG_CV);
        let project = fallback_project("api test readme");
        assert_eq!(fallback_overall(0.8, &cv, &project).recommendation_raw, "HIRE");
        assert_eq!(
            fallback_overall(0.6, &cv, &project).recommendation_raw,
            "CONDITIONAL_HIRE"
        );
        assert_eq!(
            fallback_overall(0.2, &cv, &project).recommendation_raw,
            "REJECT"
        );
    }
}
