//! Prompt construction for the three-stage scoring chain.

pub const CV_SYSTEM: &str =
    "You are a senior technical recruiter. Respond with a single JSON object and nothing else.";

pub const PROJECT_SYSTEM: &str = "You are a principal engineer reviewing take-home projects. \
     Respond with a single JSON object and nothing else.";

pub const OVERALL_SYSTEM: &str =
    "You are a hiring committee chair producing the final written decision.";

pub fn cv_scoring(job_title: &str, job_requirements: &str, rubric: &str, cv_text: &str) -> String {
    format!(
        "Evaluate the following CV for the role of {job_title}.\n\n\
         JOB REQUIREMENTS (retrieved reference material):\n{job_requirements}\n\n\
         CV EVALUATION RUBRIC:\n{rubric}\n\n\
         CANDIDATE CV:\n{cv_text}\n\n\
         Return a JSON object with exactly these keys:\n\
         - \"matchRate\": number between 0 and 1\n\
         - \"experienceMatch\": number between 0 and 1\n\
         - \"strengths\": array of strings\n\
         - \"weaknesses\": array of strings\n\
         - \"missingSkills\": array of strings\n\
         - \"overallAssessment\": string"
    )
}

pub fn project_scoring(
    job_title: &str,
    tech_requirements: &str,
    rubric: &str,
    project_text: &str,
) -> String {
    format!(
        "Evaluate the following project report submitted for the role of {job_title}.\n\n\
         TECHNICAL REQUIREMENTS (retrieved reference material):\n{tech_requirements}\n\n\
         PROJECT EVALUATION RUBRIC:\n{rubric}\n\n\
         PROJECT REPORT:\n{project_text}\n\n\
         Return a JSON object with exactly these keys:\n\
         - \"overallScore\": number between 1 and 5\n\
         - \"technicalQuality\": number between 1 and 5\n\
         - \"complexityLevel\": number between 1 and 5\n\
         - \"innovationScore\": number between 1 and 5\n\
         - \"documentationQuality\": number between 1 and 5\n\
         - \"strengths\": array of strings\n\
         - \"improvements\": array of strings"
    )
}

pub fn overall(job_title: &str, cv_summary: &str, project_summary: &str) -> String {
    format!(
        "Produce the final hiring assessment for a {job_title} candidate.\n\n\
         CV EVALUATION:\n{cv_summary}\n\n\
         PROJECT EVALUATION:\n{project_summary}\n\n\
         Answer in exactly this layout:\n\
         RECOMMENDATION: one of HIRE, CONDITIONAL_HIRE, REJECT\n\
         DETAILED FEEDBACK: a paragraph justifying the recommendation\n\
         SPECIFIC RECOMMENDATIONS: concrete next steps for the candidate"
    )
}
