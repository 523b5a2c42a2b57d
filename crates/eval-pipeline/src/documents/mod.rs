use crate::database::models::{Document, DocumentKind};
use crate::database::DbPool;
use crate::utils::error::EvalError;
use async_trait::async_trait;
use sqlx::FromRow;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::warn;

/// Read-only view onto the upload subsystem's documents. The pipeline never
/// writes document bytes; `mark_vectorized` is the one flag it owns.
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    /// Owner-scoped read; a document owned by someone else reads as missing.
    async fn get(&self, document_id: i32, owner_id: i32)
        -> Result<Option<Document>, EvalError>;

    /// Documents waiting for the startup vectorization sweep.
    async fn list_unvectorized(&self) -> Result<Vec<Document>, EvalError>;

    async fn mark_vectorized(&self, document_id: i32) -> Result<(), EvalError>;
}

#[derive(Debug, FromRow)]
struct DocumentRow {
    id: i32,
    kind: String,
    owner_id: i32,
    extracted_text: Option<String>,
    vectorized: bool,
}

impl DocumentRow {
    fn into_document(self) -> Option<Document> {
        let kind = match DocumentKind::parse(&self.kind) {
            Some(kind) => kind,
            None => {
                warn!("Document {} carries unknown kind '{}'", self.id, self.kind);
                return None;
            }
        };
        Some(Document {
            id: self.id,
            kind,
            owner_id: self.owner_id,
            extracted_text: self.extracted_text.unwrap_or_default(),
            vectorized: self.vectorized,
        })
    }
}

pub struct PgDocumentProvider {
    pool: DbPool,
}

impl PgDocumentProvider {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentProvider for PgDocumentProvider {
    async fn get(
        &self,
        document_id: i32,
        owner_id: i32,
    ) -> Result<Option<Document>, EvalError> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, kind, owner_id, extracted_text, vectorized \
             FROM documents WHERE id = $1 AND owner_id = $2",
        )
        .bind(document_id)
        .bind(owner_id)
        .fetch_optional(self.pool.pool())
        .await?;

        Ok(row.and_then(DocumentRow::into_document))
    }

    async fn list_unvectorized(&self) -> Result<Vec<Document>, EvalError> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, kind, owner_id, extracted_text, vectorized \
             FROM documents WHERE vectorized = false ORDER BY id",
        )
        .fetch_all(self.pool.pool())
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(DocumentRow::into_document)
            .collect())
    }

    async fn mark_vectorized(&self, document_id: i32) -> Result<(), EvalError> {
        sqlx::query("UPDATE documents SET vectorized = true WHERE id = $1")
            .bind(document_id)
            .execute(self.pool.pool())
            .await?;
        Ok(())
    }
}

/// In-process document provider for tests and local fixtures.
pub struct InMemoryDocumentProvider {
    documents: Mutex<HashMap<i32, Document>>,
}

impl InMemoryDocumentProvider {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, document: Document) {
        self.documents.lock().await.insert(document.id, document);
    }
}

impl Default for InMemoryDocumentProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentProvider for InMemoryDocumentProvider {
    async fn get(
        &self,
        document_id: i32,
        owner_id: i32,
    ) -> Result<Option<Document>, EvalError> {
        Ok(self
            .documents
            .lock()
            .await
            .get(&document_id)
            .filter(|doc| doc.owner_id == owner_id)
            .cloned())
    }

    async fn list_unvectorized(&self) -> Result<Vec<Document>, EvalError> {
        let documents = self.documents.lock().await;
        let mut pending: Vec<Document> = documents
            .values()
            .filter(|doc| !doc.vectorized)
            .cloned()
            .collect();
        pending.sort_by_key(|doc| doc.id);
        Ok(pending)
    }

    async fn mark_vectorized(&self, document_id: i32) -> Result<(), EvalError> {
        if let Some(doc) = self.documents.lock().await.get_mut(&document_id) {
            doc.vectorized = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: i32, owner_id: i32, kind: DocumentKind) -> Document {
        Document {
            id,
            kind,
            owner_id,
            extracted_text: "text".to_string(),
            vectorized: false,
        }
    }

    #[tokio::test]
    async fn test_get_is_owner_scoped() {
        let provider = InMemoryDocumentProvider::new();
        provider.insert(doc(1, 7, DocumentKind::Cv)).await;

        assert!(provider.get(1, 7).await.unwrap().is_some());
        assert!(provider.get(1, 8).await.unwrap().is_none());
        assert!(provider.get(2, 7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_vectorization_flag() {
        let provider = InMemoryDocumentProvider::new();
        provider.insert(doc(1, 7, DocumentKind::JobDescription)).await;
        provider.insert(doc(2, 7, DocumentKind::CvRubric)).await;

        assert_eq!(provider.list_unvectorized().await.unwrap().len(), 2);
        provider.mark_vectorized(1).await.unwrap();
        let pending = provider.list_unvectorized().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, 2);
    }
}
