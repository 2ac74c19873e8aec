//! Contracts for the external lookup services used to enrich a turn.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::EnrichError;

/// A document fragment returned by the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// Filename of the document the chunk came from
    pub source_document: String,
    pub text: String,
    pub relevance_score: f32,
}

/// A similarity query scoped to one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexQuery {
    pub user_id: String,
    pub text: String,
    pub top_k: usize,
    pub score_threshold: f32,
    /// Restrict to documents tagged with this project
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

/// Per-user document index.
///
/// Implementations must only return chunks owned by `query.user_id`.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, query: &IndexQuery) -> Result<Vec<RetrievedChunk>, EnrichError>;
}

/// One web search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub url: String,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, EnrichError>;
}
