//! Provider registry - dispatches requests to the backend for a model's family.
//!
//! Built once from configuration. Dispatch is keyed by the descriptor's
//! `ProviderFamily`; nothing inspects model-name prefixes at call time.

use std::collections::HashMap;
use std::sync::Arc;
use switchboard_core::error::ProviderError;
use switchboard_core::message::{Message, into_provider_messages};
use switchboard_core::model::{ModelDescriptor, ProviderFamily};
use switchboard_core::provider::{ChunkStream, Provider, ProviderRequest, ProviderResponse};
use tracing::{debug, warn};

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// Family-keyed table of provider strategies.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderFamily, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the provider serving a family.
    pub fn register(&mut self, family: ProviderFamily, provider: Arc<dyn Provider>) {
        self.providers.insert(family, provider);
    }

    pub fn with(mut self, family: ProviderFamily, provider: Arc<dyn Provider>) -> Self {
        self.register(family, provider);
        self
    }

    pub fn get(&self, family: ProviderFamily) -> Option<Arc<dyn Provider>> {
        self.providers.get(&family).cloned()
    }

    /// Families with a registered provider.
    pub fn families(&self) -> Vec<ProviderFamily> {
        let mut families: Vec<_> = self.providers.keys().copied().collect();
        families.sort_by_key(|f| f.as_str());
        families
    }

    fn provider_for(&self, model: &ModelDescriptor) -> Result<Arc<dyn Provider>, ProviderError> {
        self.get(model.family).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "no credentials for provider '{}' (model '{}')",
                model.family, model.id
            ))
        })
    }

    /// Build the wire request: temperature adjusted for the model and
    /// `context` messages rewritten to `user`.
    pub fn build_request(
        model: &ModelDescriptor,
        temperature: f32,
        messages: Vec<Message>,
        max_tokens: Option<u32>,
        stream: bool,
    ) -> ProviderRequest {
        let effective = model.effective_temperature(temperature);
        if effective != temperature {
            debug!(model = %model.id, requested = temperature, effective, "Adjusted temperature for model");
        }

        ProviderRequest {
            model: model.id.clone(),
            messages: into_provider_messages(messages),
            temperature: effective,
            max_tokens: Some(max_tokens.unwrap_or(model.max_tokens)),
            stream,
        }
    }

    /// Stream text deltas from the model's backend.
    ///
    /// The returned receiver yields chunks until a `done` chunk or an error.
    /// Dropping it cancels the upstream request.
    pub async fn stream(
        &self,
        model: &ModelDescriptor,
        temperature: f32,
        messages: Vec<Message>,
    ) -> Result<ChunkStream, ProviderError> {
        let provider = self.provider_for(model)?;
        let request = Self::build_request(model, temperature, messages, None, true);
        debug!(provider = provider.name(), model = %model.id, "Dispatching stream");
        provider.stream(request).await.inspect_err(|e| {
            warn!(provider = provider.name(), model = %model.id, error = %e, "Provider refused stream");
        })
    }

    /// Single-shot completion with an explicit output ceiling.
    pub async fn complete(
        &self,
        model: &ModelDescriptor,
        temperature: f32,
        messages: Vec<Message>,
        max_tokens: u32,
    ) -> Result<ProviderResponse, ProviderError> {
        let provider = self.provider_for(model)?;
        let request = Self::build_request(model, temperature, messages, Some(max_tokens), false);
        provider.complete(request).await
    }
}

/// Build the registry from configuration. Families without an API key are
/// left unregistered; dispatching to them fails with `NotConfigured`.
pub fn build_from_config(config: &switchboard_config::AppConfig) -> Result<ProviderRegistry, ProviderError> {
    let mut registry = ProviderRegistry::new();

    for family in ProviderFamily::all() {
        let Some(provider_config) = config.provider(family) else { continue };
        let Some(api_key) = provider_config.api_key.as_deref() else { continue };
        let base_url = provider_config.api_url.as_deref();

        let provider: Arc<dyn Provider> = match family {
            ProviderFamily::OpenAi => Arc::new(OpenAiCompatProvider::openai(api_key, base_url)?),
            ProviderFamily::Google => Arc::new(OpenAiCompatProvider::gemini(api_key, base_url)?),
            ProviderFamily::Perplexity => Arc::new(OpenAiCompatProvider::perplexity(api_key, base_url)?),
            ProviderFamily::Anthropic => {
                let mut p = AnthropicProvider::new(api_key)?;
                if let Some(url) = base_url {
                    p = p.with_base_url(url);
                }
                Arc::new(p)
            }
        };

        registry.register(family, provider);
    }

    if registry.providers.is_empty() {
        warn!("No provider API keys configured; every chat request will fail");
    }

    Ok(registry)
}
