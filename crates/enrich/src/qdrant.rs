//! Qdrant REST client for per-user document search.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use switchboard_core::error::EnrichError;
use switchboard_core::retrieval::{IndexQuery, RetrievedChunk, VectorIndex};
use tracing::{debug, warn};

use crate::rag::Embedder;

/// Searches a Qdrant collection whose points carry `user_id`, `filename`,
/// `project_name` and `chunk_text` payload fields.
pub struct QdrantIndex {
    base_url: String,
    api_key: Option<String>,
    collection: String,
    embedder: Embedder,
    client: reqwest::Client,
}

impl QdrantIndex {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        collection: impl Into<String>,
        embedder: Embedder,
    ) -> Result<Self, EnrichError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| EnrichError::Index(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            collection: collection.into(),
            embedder,
            client,
        })
    }

    fn search_body(query: &IndexQuery, vector: Vec<f32>) -> Value {
        let mut must = vec![json!({"key": "user_id", "match": {"value": query.user_id}})];
        if let Some(project) = &query.project {
            must.push(json!({"key": "project_name", "match": {"value": project}}));
        }

        json!({
            "vector": vector,
            "limit": query.top_k,
            "score_threshold": query.score_threshold,
            "with_payload": true,
            "filter": {"must": must},
        })
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    chunk_text: Option<String>,
}

fn into_chunks(response: SearchResponse, user_id: &str) -> Vec<RetrievedChunk> {
    response
        .result
        .into_iter()
        .filter_map(|point| {
            let payload = point.payload?;
            if payload.user_id.as_deref() != Some(user_id) {
                warn!(user_id, "Dropping search hit owned by another user");
                return None;
            }
            Some(RetrievedChunk {
                source_document: payload.filename.unwrap_or_else(|| "unknown".into()),
                text: payload.chunk_text?,
                relevance_score: point.score,
            })
        })
        .collect()
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn search(&self, query: &IndexQuery) -> Result<Vec<RetrievedChunk>, EnrichError> {
        let vector = self.embedder.embed(&query.text).await?;
        let url = format!("{}/collections/{}/points/search", self.base_url, self.collection);

        let mut request = self.client.post(&url).json(&Self::search_body(query, vector));
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EnrichError::Index(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EnrichError::Index(format!("HTTP {status}: {body}")));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| EnrichError::Index(format!("invalid response: {e}")))?;

        let chunks = into_chunks(parsed, &query.user_id);
        debug!(user_id = %query.user_id, hits = chunks.len(), "Qdrant search complete");
        Ok(chunks)
    }
}
