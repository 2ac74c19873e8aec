//! Document retrieval: per-user vector search and the document-context block.

use async_trait::async_trait;
use std::sync::Arc;
use switchboard_core::error::EnrichError;
use switchboard_core::provider::{EmbeddingRequest, Provider};
use switchboard_core::retrieval::{IndexQuery, RetrievedChunk, VectorIndex};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Turns text into vectors through a provider's embeddings endpoint.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn Provider>,
    model: String,
}

impl Embedder {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EnrichError> {
        let response = self
            .provider
            .embed(EmbeddingRequest {
                model: self.model.clone(),
                inputs: vec![text.to_string()],
            })
            .await
            .map_err(|e| EnrichError::Embedding(e.to_string()))?;

        response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EnrichError::Embedding("provider returned no embedding".into()))
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1.0, 1.0] where 1.0 means identical direction.
/// Returns 0.0 if either vector is zero-length or they differ in size.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold((0.0f64, 0.0f64, 0.0f64), |(d, na, nb), (x, y)| {
        let (x, y) = (*x as f64, *y as f64);
        (d + x * y, na + x * x, nb + y * y)
    });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    (dot / denom) as f32
}

#[derive(Debug, Clone)]
struct IndexedChunk {
    user_id: String,
    project: Option<String>,
    source_document: String,
    text: String,
    embedding: Vec<f32>,
}

/// Brute-force cosine index kept in process memory.
#[derive(Clone)]
pub struct InMemoryIndex {
    embedder: Embedder,
    chunks: Arc<RwLock<Vec<IndexedChunk>>>,
}

impl InMemoryIndex {
    pub fn new(embedder: Embedder) -> Self {
        Self {
            embedder,
            chunks: Arc::default(),
        }
    }

    /// Embed and store one chunk of a user's document.
    pub async fn add(
        &self,
        user_id: &str,
        project: Option<&str>,
        source_document: &str,
        text: &str,
    ) -> Result<(), EnrichError> {
        let embedding = self.embedder.embed(text).await?;
        self.chunks.write().await.push(IndexedChunk {
            user_id: user_id.to_string(),
            project: project.map(str::to_string),
            source_document: source_document.to_string(),
            text: text.to_string(),
            embedding,
        });
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chunks.read().await.is_empty()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn search(&self, query: &IndexQuery) -> Result<Vec<RetrievedChunk>, EnrichError> {
        let vector = self.embedder.embed(&query.text).await?;
        let chunks = self.chunks.read().await;

        let mut scored: Vec<RetrievedChunk> = chunks
            .iter()
            .filter(|c| c.user_id == query.user_id)
            .filter(|c| query.project.is_none() || c.project == query.project)
            .map(|c| RetrievedChunk {
                source_document: c.source_document.clone(),
                text: c.text.clone(),
                relevance_score: cosine_similarity(&vector, &c.embedding),
            })
            .filter(|c| c.relevance_score >= query.score_threshold)
            .collect();

        scored.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        scored.truncate(query.top_k);
        Ok(scored)
    }
}

/// Prepends retrieved document chunks to the user's question.
#[derive(Clone)]
pub struct DocumentEnricher {
    index: Arc<dyn VectorIndex>,
    top_k: usize,
    score_threshold: f32,
}

impl DocumentEnricher {
    pub fn new(index: Arc<dyn VectorIndex>, top_k: usize, score_threshold: f32) -> Self {
        Self {
            index,
            top_k,
            score_threshold,
        }
    }

    /// Returns the rewritten question, or `None` when nothing relevant was
    /// found or the index could not be reached.
    pub async fn enrich(&self, user_id: &str, question: &str, project: Option<&str>) -> Option<String> {
        let query = IndexQuery {
            user_id: user_id.to_string(),
            text: question.to_string(),
            top_k: self.top_k,
            score_threshold: self.score_threshold,
            project: project.map(str::to_string),
        };

        let chunks = match self.index.search(&query).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(user_id, error = %e, "Document retrieval failed");
                return None;
            }
        };

        // The index contract already scopes by user; the threshold is
        // re-applied in case a backend ignores it.
        let chunks: Vec<_> = chunks
            .into_iter()
            .filter(|c| c.relevance_score >= self.score_threshold)
            .take(self.top_k)
            .collect();

        if chunks.is_empty() {
            return None;
        }
        debug!(user_id, chunks = chunks.len(), "Injecting document context");
        Some(render_document_context(&chunks, question))
    }
}

fn render_document_context(chunks: &[RetrievedChunk], question: &str) -> String {
    let mut out = String::from(
        "Use the following excerpts from the user's documents if they help answer the question.\n\n\
         --- DOCUMENT CONTEXT ---\n",
    );
    for chunk in chunks {
        out.push_str(&format!("[From: {}]\n{}\n\n", chunk.source_document, chunk.text));
    }
    out.push_str("--- END DOCUMENT CONTEXT ---\n\n");
    out.push_str(question);
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use switchboard_core::error::ProviderError;
    use switchboard_core::provider::{EmbeddingResponse, ProviderRequest, ProviderResponse};

    /// Embeds text into a 3-d space by keyword: rust, cooking, other.
    pub(crate) struct KeywordEmbedder;

    #[async_trait]
    impl Provider for KeywordEmbedder {
        fn name(&self) -> &str {
            "keyword-embedder"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::InvalidRequest("embeddings only".into()))
        }

        async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
            let embeddings = request
                .inputs
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    if t.contains("rust") {
                        vec![1.0, 0.1, 0.0]
                    } else if t.contains("cook") {
                        vec![0.0, 1.0, 0.1]
                    } else {
                        vec![0.0, 0.0, 1.0]
                    }
                })
                .collect();
            Ok(EmbeddingResponse { embeddings, model: request.model })
        }
    }

    pub(crate) fn embedder() -> Embedder {
        Embedder::new(Arc::new(KeywordEmbedder), "test-embed")
    }

    #[test]
    fn cosine_known_values() {
        assert!((cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 1.0], &[1.0, 0.0]) - 0.7071).abs() < 0.001);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn search_is_scoped_to_user() {
        let index = InMemoryIndex::new(embedder());
        index.add("alice", None, "rust.md", "Rust ownership rules").await.unwrap();
        index.add("bob", None, "bob-rust.md", "Rust lifetimes").await.unwrap();
        index.add("alice", None, "recipes.md", "Cooking pasta").await.unwrap();
        assert_eq!(index.len().await, 3);

        let query = IndexQuery {
            user_id: "alice".into(),
            text: "tell me about rust".into(),
            top_k: 5,
            score_threshold: 0.7,
            project: None,
        };
        let hits = index.search(&query).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_document, "rust.md");
    }

    #[tokio::test]
    async fn project_filter_applies() {
        let index = InMemoryIndex::new(embedder());
        index.add("alice", Some("work"), "a.md", "Rust at work").await.unwrap();
        index.add("alice", Some("home"), "b.md", "Rust at home").await.unwrap();

        let query = IndexQuery {
            user_id: "alice".into(),
            text: "rust".into(),
            top_k: 5,
            score_threshold: 0.0,
            project: Some("home".into()),
        };
        let hits = index.search(&query).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_document, "b.md");
    }

    #[tokio::test]
    async fn enricher_prepends_tagged_chunks() {
        let index = InMemoryIndex::new(embedder());
        index.add("alice", None, "rust.md", "Ownership moves values").await.unwrap();
        index.add("alice", None, "notes.txt", "Rust borrowck notes").await.unwrap();
        let enricher = DocumentEnricher::new(Arc::new(index), 5, 0.7);

        let rewritten = enricher.enrich("alice", "How does rust ownership work?", None).await.unwrap();
        assert!(rewritten.contains("--- DOCUMENT CONTEXT ---"));
        assert!(rewritten.contains("[From: notes.txt]\nRust borrowck notes"));
        assert!(!rewritten.contains("rust.md"));
        assert!(rewritten.ends_with("How does rust ownership work?"));
    }

    #[tokio::test]
    async fn nothing_relevant_leaves_question_alone() {
        let index = InMemoryIndex::new(embedder());
        index.add("alice", None, "recipes.md", "Cooking pasta").await.unwrap();
        let enricher = DocumentEnricher::new(Arc::new(index), 5, 0.7);
        assert!(enricher.enrich("alice", "rust question", None).await.is_none());
        assert!(enricher.enrich("nobody", "rust question", None).await.is_none());
    }

    #[tokio::test]
    async fn index_failure_is_swallowed() {
        struct Broken;
        #[async_trait]
        impl VectorIndex for Broken {
            async fn search(&self, _query: &IndexQuery) -> Result<Vec<RetrievedChunk>, EnrichError> {
                Err(EnrichError::Index("connection refused".into()))
            }
        }
        let enricher = DocumentEnricher::new(Arc::new(Broken), 5, 0.7);
        assert!(enricher.enrich("alice", "q", None).await.is_none());
    }
}
