//! Brave Search API client.

use async_trait::async_trait;
use serde::Deserialize;
use switchboard_config::SearchConfig;
use switchboard_core::error::EnrichError;
use switchboard_core::retrieval::{SearchHit, WebSearch};
use tracing::debug;

pub struct BraveSearch {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl BraveSearch {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Result<Self, EnrichError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| EnrichError::Search(format!("HTTP client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Build from configuration. `None` when search is disabled or has no key.
    pub fn from_config(config: &SearchConfig) -> Result<Option<Self>, EnrichError> {
        match (&config.api_key, config.enabled) {
            (Some(key), true) => Self::new(&config.endpoint, key).map(Some),
            _ => Ok(None),
        }
    }
}

#[derive(Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Deserialize)]
struct BraveResult {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    url: String,
}

#[async_trait]
impl WebSearch for BraveSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, EnrichError> {
        debug!(max_results, "Querying Brave Search");
        let response = self
            .client
            .get(&self.endpoint)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .query(&[("q", query), ("count", &max_results.to_string())])
            .send()
            .await
            .map_err(|e| EnrichError::Search(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EnrichError::Search(format!("HTTP {status}: {body}")));
        }

        let parsed: BraveResponse = response
            .json()
            .await
            .map_err(|e| EnrichError::Search(format!("invalid response: {e}")))?;

        Ok(into_hits(parsed, max_results))
    }
}

fn into_hits(response: BraveResponse, max_results: usize) -> Vec<SearchHit> {
    response
        .web
        .map(|w| w.results)
        .unwrap_or_default()
        .into_iter()
        .take(max_results)
        .map(|r| SearchHit {
            title: strip_tags(&r.title),
            body: strip_tags(&r.description),
            url: r.url,
        })
        .collect()
}

/// Brave highlights matches with inline markup; drop it.
fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}
