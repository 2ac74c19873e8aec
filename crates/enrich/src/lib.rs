//! Context assembly for Switchboard.
//!
//! Three independent enrichers prepare a turn before it is sent to a model:
//!
//! - [`ProfileEnricher`] turns the stored user profile into the system message
//! - [`DocumentEnricher`] prepends matching document chunks to the question
//! - [`WebSearchEnricher`] wraps the (possibly document-enriched) question in
//!   fresh search results
//!
//! None of them can fail a turn. Errors are logged and the message is left
//! as it was.

pub mod brave;
pub mod profile;
pub mod qdrant;
pub mod rag;
pub mod web;

pub use brave::BraveSearch;
pub use profile::{BASE_INSTRUCTION, ProfileEnricher};
pub use qdrant::QdrantIndex;
pub use rag::{DocumentEnricher, Embedder, InMemoryIndex, cosine_similarity};
pub use web::WebSearchEnricher;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use switchboard_config::AppConfig;
use switchboard_core::error::EnrichError;
use switchboard_core::message::{Message, last_user_index};
use switchboard_core::provider::Provider;
use switchboard_core::store::ProfileStore;
use tracing::{info, warn};

/// What the client asked for on this turn.
#[derive(Debug, Clone, Default)]
pub struct EnrichOptions {
    pub search_web: bool,
    pub search_docs: bool,
    pub project: Option<String>,
}

/// The message sequence ready for the provider, plus what was added.
#[derive(Debug, Clone)]
pub struct Enriched {
    pub messages: Vec<Message>,
    pub web_search: bool,
    pub documents: bool,
}

#[derive(Clone)]
pub struct ContextAssembler {
    profile: Option<ProfileEnricher>,
    documents: Option<DocumentEnricher>,
    web: WebSearchEnricher,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self {
            profile: None,
            documents: None,
            web: WebSearchEnricher::unavailable(),
        }
    }
}

impl ContextAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(mut self, enricher: ProfileEnricher) -> Self {
        self.profile = Some(enricher);
        self
    }

    pub fn with_documents(mut self, enricher: DocumentEnricher) -> Self {
        self.documents = Some(enricher);
        self
    }

    pub fn with_web(mut self, enricher: WebSearchEnricher) -> Self {
        self.web = enricher;
        self
    }

    /// Build the provider-bound conversation for a turn.
    ///
    /// The system instruction (with profile) goes first. The last user
    /// message is rewritten with document context, then with web results.
    pub async fn assemble(
        &self,
        user_id: &str,
        history: &[Message],
        options: &EnrichOptions,
        now: DateTime<Utc>,
    ) -> Enriched {
        let system = match &self.profile {
            Some(p) => p.system_prompt(user_id, now).await,
            None => BASE_INSTRUCTION.to_string(),
        };

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(system));
        messages.extend_from_slice(history);

        let mut enriched = Enriched {
            messages,
            web_search: false,
            documents: false,
        };

        // +1 for the system message inserted above
        let Some(idx) = last_user_index(history).map(|i| i + 1) else {
            return enriched;
        };
        let question = history[idx - 1].content.clone();

        // Both lookups key on the original question, so they run together;
        // only the framing below is ordered.
        let documents = async {
            if !options.search_docs {
                return None;
            }
            match &self.documents {
                Some(docs) => docs.enrich(user_id, &question, options.project.as_deref()).await,
                None => {
                    warn!(user_id, "Document search requested but no index is configured");
                    None
                }
            }
        };
        let hits = async {
            if options.search_web {
                Some(self.web.search(&question).await)
            } else {
                None
            }
        };
        let (documents, hits) = tokio::join!(documents, hits);

        let mut content = question;
        if let Some(rewritten) = documents {
            content = rewritten;
            enriched.documents = true;
        }
        if let Some(hits) = hits {
            let (framed, used) = self.web.frame(&hits, &content, now);
            content = framed;
            enriched.web_search = used;
        }

        enriched.messages[idx].content = content;
        enriched
    }
}

/// Wire up the enrichers the configuration enables. `embeddings` is the
/// provider used to embed queries for document search.
pub fn build_from_config(
    config: &AppConfig,
    profiles: Arc<dyn ProfileStore>,
    embeddings: Option<Arc<dyn Provider>>,
) -> Result<ContextAssembler, EnrichError> {
    let mut assembler = ContextAssembler::new().with_profiles(ProfileEnricher::new(profiles));

    match BraveSearch::from_config(&config.search)? {
        Some(brave) => {
            info!("Web search enabled");
            assembler = assembler.with_web(WebSearchEnricher::new(Arc::new(brave), config.search.max_results));
        }
        None => info!("Web search not configured"),
    }

    let retrieval = &config.retrieval;
    match (&retrieval.qdrant_url, embeddings) {
        (Some(url), Some(provider)) => {
            let embedder = Embedder::new(provider, &retrieval.embedding_model);
            let index = QdrantIndex::new(url, retrieval.api_key.clone(), &retrieval.collection, embedder)?;
            info!(collection = %retrieval.collection, "Document retrieval enabled");
            assembler = assembler.with_documents(DocumentEnricher::new(
                Arc::new(index),
                retrieval.top_k,
                retrieval.score_threshold,
            ));
        }
        (Some(_), None) => warn!("Qdrant configured but no embeddings provider is available"),
        (None, _) => info!("Document retrieval not configured"),
    }

    Ok(assembler)
}
