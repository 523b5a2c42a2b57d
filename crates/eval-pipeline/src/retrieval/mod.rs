pub mod chunker;
pub mod index;

pub use chunker::{ChunkSplitter, TextChunk};
pub use index::{InMemoryVectorIndex, PgVectorIndex, ScoredChunk, SearchRequest, VectorIndex};

use crate::database::models::DocumentKind;
use crate::documents::DocumentProvider;
use crate::utils::error::EvalError;
use tracing::{debug, info, warn};

/// Collection names as laid out in the persistent store.
pub mod collections {
    pub const JOB_DESCRIPTIONS: &str = "job_descriptions";
    pub const CV_DOCUMENTS: &str = "cv_documents";
    pub const PROJECT_DOCUMENTS: &str = "project_documents";
    pub const RUBRICS: &str = "rubrics";
    pub const CASE_STUDIES: &str = "case_studies";
}

pub fn collection_for(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::Cv => collections::CV_DOCUMENTS,
        DocumentKind::ProjectReport => collections::PROJECT_DOCUMENTS,
        DocumentKind::JobDescription => collections::JOB_DESCRIPTIONS,
        DocumentKind::CaseStudy => collections::CASE_STUDIES,
        DocumentKind::CvRubric | DocumentKind::ProjectRubric => collections::RUBRICS,
    }
}

/// Startup sweep: index every document the upload subsystem has flagged as
/// not yet vectorized, then mark it done. Individual failures are logged
/// and skipped so one bad document cannot block the rest.
pub async fn vectorize_pending(
    documents: &dyn DocumentProvider,
    index: &dyn VectorIndex,
) -> Result<usize, EvalError> {
    let pending = documents.list_unvectorized().await?;
    let mut indexed = 0usize;
    for doc in pending {
        if doc.extracted_text.trim().is_empty() {
            debug!("Document {} has no extracted text yet, skipping", doc.id);
            continue;
        }
        let collection = collection_for(doc.kind);
        match index.index_document(&doc, collection).await {
            Ok(chunks) => {
                documents.mark_vectorized(doc.id).await?;
                indexed += 1;
                info!(
                    "Indexed document {} into '{}' ({} chunks)",
                    doc.id, collection, chunks
                );
            }
            Err(e) => warn!("Failed to index document {}: {}", doc.id, e),
        }
    }
    Ok(indexed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_mapping() {
        assert_eq!(collection_for(DocumentKind::Cv), "cv_documents");
        assert_eq!(
            collection_for(DocumentKind::ProjectReport),
            "project_documents"
        );
        assert_eq!(
            collection_for(DocumentKind::JobDescription),
            "job_descriptions"
        );
        assert_eq!(collection_for(DocumentKind::CaseStudy), "case_studies");
        assert_eq!(collection_for(DocumentKind::CvRubric), "rubrics");
        assert_eq!(collection_for(DocumentKind::ProjectRubric), "rubrics");
    }
}
