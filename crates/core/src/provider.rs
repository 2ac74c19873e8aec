//! Provider trait - the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation to an LLM and get a response
//! back, either as a complete message or as a stream of text deltas.
//!
//! Implementations: OpenAI-compatible endpoints and Anthropic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ProviderError;
use crate::message::ProviderMessage;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-5-mini", "claude-sonnet-4-5")
    pub model: String,

    /// The conversation messages, already in provider form
    pub messages: Vec<ProviderMessage>,

    /// Temperature, already clamped for the model
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,
}

fn default_temperature() -> f32 {
    0.7
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated text
    pub content: String,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn done() -> Self {
        Self {
            done: true,
            ..Default::default()
        }
    }
}

/// Receiving half of a provider stream.
///
/// Dropping it tells the producing task to stop reading the upstream
/// response and release the connection.
pub type ChunkStream = tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// An embedding request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// The model to use for embeddings (e.g., "text-embedding-3-small").
    pub model: String,

    /// The texts to embed.
    pub inputs: Vec<String>,
}

/// An embedding response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// The embedding vectors, one per input text.
    pub embeddings: Vec<Vec<f32>>,

    /// Which model was used.
    pub model: String,
}

/// The core Provider trait.
///
/// Every backend family implements this trait. The orchestrator reaches it
/// through the provider registry without knowing which API sits behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(&self, request: ProviderRequest) -> std::result::Result<ChunkStream, ProviderError> {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(response.content),
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }

    /// Generate embeddings for the given texts.
    ///
    /// Default implementation returns an error indicating embeddings aren't supported.
    async fn embed(
        &self,
        _request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        Err(ProviderError::NotConfigured(format!(
            "Provider '{}' does not support embeddings",
            self.name()
        )))
    }
}
