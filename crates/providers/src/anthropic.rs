//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly (not OpenAI-compatible proxy).
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Streaming via SSE with typed `content_block_delta` events

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use switchboard_core::error::ProviderError;
use switchboard_core::message::{ProviderMessage, ProviderRole};
use switchboard_core::provider::*;
use tracing::{debug, trace};

use crate::sse::{LineBuffer, check_status, data_payload};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Extract system messages from the message list.
    /// Anthropic puts system prompt as a top-level field, not in messages.
    fn extract_system(messages: &[ProviderMessage]) -> (Option<String>, Vec<&ProviderMessage>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut non_system: Vec<&ProviderMessage> = Vec::new();

        for msg in messages {
            match msg.role {
                ProviderRole::System => system_parts.push(&msg.content),
                _ => non_system.push(msg),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, non_system)
    }

    /// Convert messages to Anthropic API format, folding consecutive
    /// messages of the same role into one turn.
    fn to_api_messages(messages: &[&ProviderMessage]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            let role = msg.role.as_str();
            match result.last_mut() {
                Some(last) if last.role == role => {
                    last.content.push_str("\n\n");
                    last.content.push_str(&msg.content);
                }
                _ => result.push(AnthropicMessage {
                    role: role.into(),
                    content: msg.content.clone(),
                }),
            }
        }

        result
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let (system, messages) = Self::extract_system(&request.messages);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&messages),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
        });

        if stream {
            body["stream"] = serde_json::json!(true);
        }

        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }

        body
    }

    async fn send(&self, body: &serde_json::Value, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body);

        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        check_status(&self.name, response).await
    }
}

#[async_trait]
impl switchboard_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::request_body(&request, false);

        debug!(provider = "anthropic", model = %request.model, "Sending completion request");

        let response = self.send(&body, false).await?;

        let api_resp: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse Anthropic response: {e}"),
            })?;

        Ok(api_resp.into_provider_response())
    }

    async fn stream(&self, request: ProviderRequest) -> std::result::Result<ChunkStream, ProviderError> {
        let body = Self::request_body(&request, true);

        debug!(provider = "anthropic", model = %request.model, "Sending streaming request");

        let response = self.send(&body, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = LineBuffer::default();
            let mut input_tokens = 0u32;
            let mut output_tokens = 0u32;

            loop {
                let next = tokio::select! {
                    _ = tx.closed() => {
                        debug!(provider = "anthropic", "Stream consumer dropped, releasing connection");
                        return;
                    }
                    next = byte_stream.next() => next,
                };

                let Some(chunk_result) = next else { break };
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.push(&bytes);

                while let Some(line) = buffer.next_line() {
                    let Some(data) = data_payload(&line) else { continue };
                    if data.is_empty() {
                        continue;
                    }

                    let event: StreamEvent = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(e) => {
                            trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                            continue;
                        }
                    };

                    match event {
                        StreamEvent::MessageStart { message } => {
                            input_tokens = message.usage.input_tokens;
                        }
                        StreamEvent::ContentBlockDelta { delta: BlockDelta::TextDelta { text } } => {
                            if text.is_empty() {
                                continue;
                            }
                            if tx.send(Ok(StreamChunk::text(text))).await.is_err() {
                                return;
                            }
                        }
                        StreamEvent::MessageDelta { usage } => {
                            if let Some(usage) = usage {
                                output_tokens = usage.output_tokens;
                            }
                        }
                        StreamEvent::MessageStop => {
                            let usage = Usage {
                                prompt_tokens: input_tokens,
                                completion_tokens: output_tokens,
                                total_tokens: input_tokens + output_tokens,
                            };
                            let chunk = StreamChunk { usage: Some(usage), ..StreamChunk::done() };
                            let _ = tx.send(Ok(chunk)).await;
                            return;
                        }
                        StreamEvent::Error { error } => {
                            let _ = tx
                                .send(Err(ProviderError::StreamInterrupted(format!(
                                    "{}: {}",
                                    error.kind, error.message
                                ))))
                                .await;
                            return;
                        }
                        _ => {}
                    }
                }
            }

            let _ = tx
                .send(Err(ProviderError::StreamInterrupted(
                    "connection closed before message_stop".into(),
                )))
                .await;
        });

        Ok(rx)
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
}

impl AnthropicResponse {
    fn into_provider_response(self) -> ProviderResponse {
        let text = self
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(text),
                ResponseContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        ProviderResponse {
            content: text,
            usage: Some(Usage {
                prompt_tokens: self.usage.input_tokens,
                completion_tokens: self.usage.output_tokens,
                total_tokens: self.usage.input_tokens + self.usage.output_tokens,
            }),
            model: self.model,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// Typed SSE events of the Messages streaming API.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart { message: StartMessage },
    ContentBlockDelta { delta: BlockDelta },
    MessageDelta {
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    Error { error: StreamErrorBody },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StartMessage {
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}
