use super::chunker::ChunkSplitter;
use crate::config::RetrievalConfig;
use crate::database::models::{Document, DocumentKind};
use crate::database::DbPool;
use crate::llm::LlmApi;
use crate::utils::error::EvalError;
use crate::utils::vectors::cosine_similarity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::FromRow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub document_id: i32,
    pub chunk_index: i32,
    pub content: String,
    pub similarity: f32,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub max_results: usize,
    pub doc_kind: Option<DocumentKind>,
    pub threshold: f32,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            max_results: 5,
            doc_kind: None,
            threshold: 0.3,
        }
    }
}

/// Embedding-backed nearest-neighbor store partitioned into named
/// collections. `search` never fails its caller: any internal error
/// degrades to an empty result with a warning, and the engine proceeds
/// with empty context.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn index_document(
        &self,
        document: &Document,
        collection: &str,
    ) -> Result<usize, EvalError>;

    async fn search(
        &self,
        query: &str,
        collection: &str,
        request: &SearchRequest,
    ) -> Vec<ScoredChunk>;

    async fn remove(&self, document_id: i32, collection: &str) -> Result<u64, EvalError>;
}

#[derive(Debug, FromRow)]
struct ChunkRow {
    document_id: i32,
    chunk_index: i32,
    content: String,
    similarity: f64,
}

pub struct PgVectorIndex {
    pool: DbPool,
    llm: Arc<dyn LlmApi>,
    chunker: ChunkSplitter,
    search_timeout: Duration,
}

impl PgVectorIndex {
    pub fn new(pool: DbPool, llm: Arc<dyn LlmApi>, config: &RetrievalConfig) -> Self {
        Self {
            pool,
            llm,
            chunker: ChunkSplitter::new(
                config.chunk_size,
                config.chunk_overlap,
                config.min_chunk_chars,
            ),
            search_timeout: Duration::from_secs(config.search_timeout_seconds),
        }
    }

    async fn search_inner(
        &self,
        query: &str,
        collection: &str,
        request: &SearchRequest,
    ) -> Result<Vec<ScoredChunk>, EvalError> {
        let embedding = self.llm.embed(query).await?;
        let vector = Vector::from(embedding);

        let rows = sqlx::query_as::<_, ChunkRow>(
            "SELECT document_id, chunk_index, content, \
                    1 - (embedding <=> $2) AS similarity \
             FROM reference_chunks \
             WHERE collection = $1 \
               AND ($3::text IS NULL OR doc_kind = $3) \
               AND 1 - (embedding <=> $2) >= $4 \
             ORDER BY embedding <=> $2 \
             LIMIT $5",
        )
        .bind(collection)
        .bind(&vector)
        .bind(request.doc_kind.map(|k| k.as_str().to_string()))
        .bind(request.threshold as f64)
        .bind(request.max_results as i64)
        .fetch_all(self.pool.pool())
        .await?;

        debug!("Found {} chunks in collection '{}'", rows.len(), collection);
        Ok(rows
            .into_iter()
            .map(|row| ScoredChunk {
                document_id: row.document_id,
                chunk_index: row.chunk_index,
                content: row.content,
                similarity: row.similarity as f32,
            })
            .collect())
    }
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    async fn index_document(
        &self,
        document: &Document,
        collection: &str,
    ) -> Result<usize, EvalError> {
        let chunks = self.chunker.split(&document.extracted_text);
        if chunks.is_empty() {
            warn!(
                "Document {} produced no indexable chunks for '{}'",
                document.id, collection
            );
            return Ok(0);
        }

        let total_chunks = chunks.len();
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embedded: Vec<Vector> = self
            .llm
            .embed_batch(&texts)
            .await?
            .into_iter()
            .map(Vector::from)
            .collect();

        // Replace any previous indexing of this document in one transaction.
        let mut transaction = self.pool.pool().begin().await?;
        sqlx::query("DELETE FROM reference_chunks WHERE document_id = $1 AND collection = $2")
            .bind(document.id)
            .bind(collection)
            .execute(&mut *transaction)
            .await?;

        let indexed_at: DateTime<Utc> = Utc::now();
        for (chunk, embedding) in chunks.iter().zip(embedded) {
            sqlx::query(
                "INSERT INTO reference_chunks \
                   (collection, document_id, owner_id, doc_kind, chunk_index, \
                    total_chunks, content, embedding, indexed_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(collection)
            .bind(document.id)
            .bind(document.owner_id)
            .bind(document.kind.as_str())
            .bind(chunk.index as i32)
            .bind(total_chunks as i32)
            .bind(&chunk.content)
            .bind(embedding)
            .execute(&mut *transaction)
            .await?;
        }
        transaction.commit().await?;

        debug!(
            "Indexed document {} into '{}' as {} chunks",
            document.id, collection, total_chunks
        );
        Ok(total_chunks)
    }

    async fn search(
        &self,
        query: &str,
        collection: &str,
        request: &SearchRequest,
    ) -> Vec<ScoredChunk> {
        match tokio::time::timeout(
            self.search_timeout,
            self.search_inner(query, collection, request),
        )
        .await
        {
            Ok(Ok(chunks)) => chunks,
            Ok(Err(e)) => {
                warn!(
                    "Vector search in '{}' degraded to empty results: {}",
                    collection, e
                );
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "Vector search in '{}' timed out after {:?}",
                    collection, self.search_timeout
                );
                Vec::new()
            }
        }
    }

    async fn remove(&self, document_id: i32, collection: &str) -> Result<u64, EvalError> {
        let result =
            sqlx::query("DELETE FROM reference_chunks WHERE document_id = $1 AND collection = $2")
                .bind(document_id)
                .bind(collection)
                .execute(self.pool.pool())
                .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
struct StoredChunk {
    document_id: i32,
    doc_kind: DocumentKind,
    chunk_index: i32,
    content: String,
    embedding: Vec<f32>,
}

/// In-process index with the same degradation contract as
/// [`PgVectorIndex`]. Used by the test suite and store-less deployments.
pub struct InMemoryVectorIndex {
    llm: Arc<dyn LlmApi>,
    chunker: ChunkSplitter,
    collections: RwLock<HashMap<String, Vec<StoredChunk>>>,
}

impl InMemoryVectorIndex {
    pub fn new(llm: Arc<dyn LlmApi>, config: &RetrievalConfig) -> Self {
        Self {
            llm,
            chunker: ChunkSplitter::new(
                config.chunk_size,
                config.chunk_overlap,
                config.min_chunk_chars,
            ),
            collections: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn index_document(
        &self,
        document: &Document,
        collection: &str,
    ) -> Result<usize, EvalError> {
        let chunks = self.chunker.split(&document.extracted_text);
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.llm.embed_batch(&texts).await?;
        let stored: Vec<StoredChunk> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| StoredChunk {
                document_id: document.id,
                doc_kind: document.kind,
                chunk_index: chunk.index as i32,
                content: chunk.content.clone(),
                embedding,
            })
            .collect();

        let total = stored.len();
        let mut collections = self.collections.write().await;
        let entry = collections.entry(collection.to_string()).or_default();
        entry.retain(|c| c.document_id != document.id);
        entry.extend(stored);
        Ok(total)
    }

    async fn search(
        &self,
        query: &str,
        collection: &str,
        request: &SearchRequest,
    ) -> Vec<ScoredChunk> {
        let query_embedding = match self.llm.embed(query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!(
                    "Query embedding failed, returning empty results for '{}': {}",
                    collection, e
                );
                return Vec::new();
            }
        };

        let collections = self.collections.read().await;
        let Some(chunks) = collections.get(collection) else {
            return Vec::new();
        };

        let mut scored: Vec<ScoredChunk> = chunks
            .iter()
            .filter(|chunk| {
                request
                    .doc_kind
                    .map_or(true, |kind| chunk.doc_kind == kind)
            })
            .filter_map(|chunk| {
                let similarity = cosine_similarity(&query_embedding, &chunk.embedding)?;
                (similarity >= request.threshold).then(|| ScoredChunk {
                    document_id: chunk.document_id,
                    chunk_index: chunk.chunk_index,
                    content: chunk.content.clone(),
                    similarity,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(request.max_results);
        scored
    }

    async fn remove(&self, document_id: i32, collection: &str) -> Result<u64, EvalError> {
        let mut collections = self.collections.write().await;
        let Some(chunks) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = chunks.len();
        chunks.retain(|c| c.document_id != document_id);
        Ok((before - chunks.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::hash_embedding;
    use crate::llm::types::{ChatMessage, ChatOptions, ChatSuccess};

    struct HashOnlyLlm;

    #[async_trait]
    impl LlmApi for HashOnlyLlm {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<ChatSuccess, EvalError> {
            Err(EvalError::Engine("chat not available in this fake".into()))
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EvalError> {
            Ok(hash_embedding(text, 32))
        }
    }

    struct BrokenLlm;

    #[async_trait]
    impl LlmApi for BrokenLlm {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<ChatSuccess, EvalError> {
            Err(EvalError::Transient("down".into()))
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EvalError> {
            Err(EvalError::Transient("down".into()))
        }
    }

    fn rubric_text() -> String {
        "Score candidates on technical depth, ownership, and communication. \
         A strong submission demonstrates production experience and testing discipline."
            .to_string()
    }

    fn document(id: i32, kind: DocumentKind, text: &str) -> Document {
        Document {
            id,
            kind,
            owner_id: 1,
            extracted_text: text.to_string(),
            vectorized: false,
        }
    }

    fn index() -> InMemoryVectorIndex {
        InMemoryVectorIndex::new(Arc::new(HashOnlyLlm), &RetrievalConfig::default())
    }

    #[tokio::test]
    async fn test_identical_text_is_the_top_hit() {
        let idx = index();
        let text = rubric_text();
        let indexed = idx
            .index_document(&document(1, DocumentKind::CvRubric, &text), "rubrics")
            .await
            .unwrap();
        assert_eq!(indexed, 1);

        let hits = idx
            .search(&text, "rubrics", &SearchRequest::default())
            .await;
        assert_eq!(hits.len(), 1);
        assert!(hits[0].similarity > 0.99);
        assert_eq!(hits[0].document_id, 1);
    }

    #[tokio::test]
    async fn test_missing_collection_returns_empty() {
        let idx = index();
        let hits = idx
            .search("anything", "case_studies", &SearchRequest::default())
            .await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_doc_kind_filter() {
        let idx = index();
        let text = rubric_text();
        idx.index_document(&document(1, DocumentKind::CvRubric, &text), "rubrics")
            .await
            .unwrap();
        idx.index_document(&document(2, DocumentKind::ProjectRubric, &text), "rubrics")
            .await
            .unwrap();

        let request = SearchRequest {
            doc_kind: Some(DocumentKind::ProjectRubric),
            ..Default::default()
        };
        let hits = idx.search(&text, "rubrics", &request).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, 2);
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_empty() {
        let idx = InMemoryVectorIndex::new(Arc::new(BrokenLlm), &RetrievalConfig::default());
        let hits = idx
            .search("query", "rubrics", &SearchRequest::default())
            .await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_reindex_replaces_previous_chunks() {
        let idx = index();
        let text = rubric_text();
        idx.index_document(&document(1, DocumentKind::CvRubric, &text), "rubrics")
            .await
            .unwrap();
        idx.index_document(&document(1, DocumentKind::CvRubric, &text), "rubrics")
            .await
            .unwrap();

        let hits = idx
            .search(&text, "rubrics", &SearchRequest::default())
            .await;
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let idx = index();
        let text = rubric_text();
        idx.index_document(&document(1, DocumentKind::CvRubric, &text), "rubrics")
            .await
            .unwrap();
        let removed = idx.remove(1, "rubrics").await.unwrap();
        assert_eq!(removed, 1);
        assert!(idx
            .search(&text, "rubrics", &SearchRequest::default())
            .await
            .is_empty());
    }
}
