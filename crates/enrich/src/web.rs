//! Web-search framing for the latest user message.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use switchboard_core::retrieval::{SearchHit, WebSearch};
use tracing::{debug, warn};

/// Rewrites a user query so the model sees fresh search results, or an
/// explicit notice that none could be fetched.
#[derive(Clone)]
pub struct WebSearchEnricher {
    search: Option<Arc<dyn WebSearch>>,
    max_results: usize,
}

impl WebSearchEnricher {
    pub fn new(search: Arc<dyn WebSearch>, max_results: usize) -> Self {
        Self {
            search: Some(search),
            max_results,
        }
    }

    /// An enricher with no search backend. Requests still get the date and
    /// the unavailability notice.
    pub fn unavailable() -> Self {
        Self {
            search: None,
            max_results: 0,
        }
    }

    /// Fetch up to `max_results` hits for `query`. Failures and a missing
    /// backend both yield no hits.
    pub async fn search(&self, query: &str) -> Vec<SearchHit> {
        let Some(search) = &self.search else {
            return Vec::new();
        };
        match search.search(query, self.max_results).await {
            Ok(mut hits) => {
                hits.truncate(self.max_results);
                hits
            }
            Err(e) => {
                warn!(error = %e, "Web search failed");
                Vec::new()
            }
        }
    }

    /// Wrap `content` (the possibly already rewritten user message) in the
    /// hits. Returns the new content and whether live results were included.
    pub fn frame(&self, hits: &[SearchHit], content: &str, now: DateTime<Utc>) -> (String, bool) {
        if hits.is_empty() {
            return (render_unavailable(content, now), false);
        }
        debug!(results = hits.len(), "Injecting web search results");
        (render_results(hits, content, now), true)
    }

    /// Search for `query` and frame `content` in the results.
    pub async fn enrich(&self, query: &str, content: &str, now: DateTime<Utc>) -> (String, bool) {
        let hits = self.search(query).await;
        self.frame(&hits, content, now)
    }
}

fn render_results(hits: &[SearchHit], content: &str, now: DateTime<Utc>) -> String {
    let results = hits
        .iter()
        .map(|h| format!("Title: {}\nBody: {}", h.title, h.body))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "The user has requested a web search. Here are the top results. \
         Use this information to answer the user's query.\n\
         Current date: {}\n\n\
         --- BEGIN WEB SEARCH RESULTS ---\n\
         {results}\n\
         --- END WEB SEARCH RESULTS ---\n\n\
         Original Query: {content}",
        now.format("%A, %B %-d, %Y")
    )
}

fn render_unavailable(content: &str, now: DateTime<Utc>) -> String {
    format!(
        "The user has requested a web search, but live search results are not \
         available right now. Answer from your own knowledge and tell the user \
         that you could not check current sources.\n\
         Current date: {}\n\n\
         Original Query: {content}",
        now.format("%A, %B %-d, %Y")
    )
}
