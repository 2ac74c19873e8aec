//! OpenAI-compatible provider implementation.
//!
//! Serves every family that speaks the `/chat/completions` dialect: OpenAI
//! itself, Google Gemini through its OpenAI endpoint, and Perplexity.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Embeddings (used by document retrieval)

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use switchboard_core::error::ProviderError;
use switchboard_core::message::ProviderMessage;
use switchboard_core::provider::*;
use tracing::{debug, trace};

use crate::sse::{LineBuffer, check_status, data_payload};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    /// Body field carrying the output ceiling; OpenAI's reasoning models
    /// only accept `max_completion_tokens`.
    max_tokens_field: &'static str,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            max_tokens_field: "max_tokens",
            client,
        })
    }

    /// OpenAI's own API.
    pub fn openai(api_key: impl Into<String>, base_url: Option<&str>) -> Result<Self, ProviderError> {
        let mut provider = Self::new("openai", base_url.unwrap_or("https://api.openai.com/v1"), api_key)?;
        provider.max_tokens_field = "max_completion_tokens";
        Ok(provider)
    }

    /// Google Gemini through its OpenAI-compatible endpoint.
    pub fn gemini(api_key: impl Into<String>, base_url: Option<&str>) -> Result<Self, ProviderError> {
        Self::new(
            "google",
            base_url.unwrap_or("https://generativelanguage.googleapis.com/v1beta/openai"),
            api_key,
        )
    }

    /// Perplexity's search-grounded models.
    pub fn perplexity(api_key: impl Into<String>, base_url: Option<&str>) -> Result<Self, ProviderError> {
        Self::new("perplexity", base_url.unwrap_or("https://api.perplexity.ai"), api_key)
    }

    /// Convert provider messages to OpenAI API format.
    fn to_api_messages(messages: &[ProviderMessage]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().into(),
                content: Some(m.content.clone()),
            })
            .collect()
    }

    fn request_body(&self, request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body[self.max_tokens_field] = serde_json::json!(max_tokens);
        }

        body
    }
}

#[async_trait]
impl switchboard_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request, false);

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let response = check_status(&self.name, response).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice =
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::ApiError {
                    status_code: 200,
                    message: "No choices in response".into(),
                })?;

        let usage = api_response.usage.map(ApiUsage::into_usage);

        Ok(ProviderResponse {
            content: choice.message.content.unwrap_or_default(),
            usage,
            model: api_response.model,
        })
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        let url = format!("{}/embeddings", self.base_url);

        let body = serde_json::json!({
            "model": request.model,
            "input": request.inputs,
            "encoding_format": "float",
        });

        debug!(
            provider = %self.name,
            model = %request.model,
            count = request.inputs.len(),
            "Sending embedding request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let response = check_status(&self.name, response).await?;

        let api_resp: EmbeddingApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse embedding response: {e}"),
            })?;

        Ok(EmbeddingResponse {
            embeddings: api_resp.data.into_iter().map(|d| d.embedding).collect(),
            model: api_resp.model,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> std::result::Result<ChunkStream, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request, true);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let response = check_status(&self.name, response).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Read the SSE byte stream until it ends or the receiver goes away.
        // Returning drops `response`, which closes the upstream connection.
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = LineBuffer::default();
            let mut finished = false;

            loop {
                let next = tokio::select! {
                    _ = tx.closed() => {
                        debug!(provider = %provider_name, "Stream consumer dropped, releasing connection");
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

                    match parse_payload(data) {
                        Payload::Done => {
                            let _ = tx.send(Ok(StreamChunk::done())).await;
                            return;
                        }
                        Payload::Delta { content, finish } => {
                            finished |= finish;
                            if let Some(content) = content.filter(|c| !c.is_empty()) {
                                if tx.send(Ok(StreamChunk::text(content))).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Payload::Usage(usage) => {
                            let chunk = StreamChunk { usage: Some(usage), ..StreamChunk::done() };
                            let _ = tx.send(Ok(chunk)).await;
                            return;
                        }
                        Payload::Error(message) => {
                            let _ = tx.send(Err(ProviderError::StreamInterrupted(message))).await;
                            return;
                        }
                        Payload::Unparseable(error) => {
                            trace!(
                                provider = %provider_name,
                                data = %data,
                                error = %error,
                                "Ignoring unparseable SSE chunk"
                            );
                        }
                    }
                }
            }

            // Body ended without [DONE]; only a finish_reason makes that a clean end
            let last = if finished {
                Ok(StreamChunk::done())
            } else {
                Err(ProviderError::StreamInterrupted(
                    "connection closed before the response finished".into(),
                ))
            };
            let _ = tx.send(last).await;
        });

        Ok(rx)
    }
}

/// What one `data:` payload means for the stream.
#[derive(Debug)]
enum Payload {
    Done,
    Delta { content: Option<String>, finish: bool },
    Usage(Usage),
    Error(String),
    Unparseable(String),
}

fn parse_payload(data: &str) -> Payload {
    if data == "[DONE]" {
        return Payload::Done;
    }

    let parsed = match serde_json::from_str::<StreamResponse>(data) {
        Ok(parsed) => parsed,
        Err(e) => return Payload::Unparseable(e.to_string()),
    };

    if let Some(error) = parsed.error {
        return Payload::Error(error.message);
    }

    if let Some(choice) = parsed.choices.into_iter().next() {
        return Payload::Delta {
            content: choice.delta.content,
            finish: choice.finish_reason.is_some(),
        };
    }

    match parsed.usage {
        Some(usage) => Payload::Usage(usage.into_usage()),
        None => Payload::Delta { content: None, finish: false },
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl ApiUsage {
    fn into_usage(self) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

// --- Embedding API types ---

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::Provider;

    #[test]
    fn openai_constructor() {
        let provider = OpenAiCompatProvider::openai("sk-test", None).unwrap();
        assert_eq!(provider.name(), "openai");
        assert!(provider.base_url.contains("api.openai.com"));
        assert_eq!(provider.max_tokens_field, "max_completion_tokens");
    }

    #[test]
    fn gemini_and_perplexity_constructors() {
        let gemini = OpenAiCompatProvider::gemini("g", None).unwrap();
        assert!(gemini.base_url.ends_with("/v1beta/openai"));
        let pplx = OpenAiCompatProvider::perplexity("p", Some("http://localhost:9999/")).unwrap();
        assert_eq!(pplx.base_url, "http://localhost:9999");
        assert_eq!(pplx.max_tokens_field, "max_tokens");
    }

    #[test]
    fn message_conversion() {
        let messages = vec![ProviderMessage::system("You are helpful"), ProviderMessage::user("Hello")];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn request_body_uses_family_token_field() {
        let request = ProviderRequest {
            model: "gpt-5".into(),
            messages: vec![ProviderMessage::user("hi")],
            temperature: 1.0,
            max_tokens: Some(128),
            stream: true,
        };
        let openai = OpenAiCompatProvider::openai("k", None).unwrap();
        let body = openai.request_body(&request, true);
        assert_eq!(body["max_completion_tokens"], 128);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert!(body.get("max_tokens").is_none());

        let pplx = OpenAiCompatProvider::perplexity("k", None).unwrap();
        let body = pplx.request_body(&request, false);
        assert_eq!(body["max_tokens"], 128);
        assert!(body.get("stream_options").is_none());
    }

    // --- SSE parsing tests ---

    #[test]
    fn parse_stream_content_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        match parse_payload(data) {
            Payload::Delta { content, finish } => {
                assert_eq!(content.as_deref(), Some("Hello"));
                assert!(!finish);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_stream_finish_chunk() {
        let data = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert!(matches!(parse_payload(data), Payload::Delta { content: None, finish: true }));
    }

    #[test]
    fn parse_stream_usage() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        match parse_payload(data) {
            Payload::Usage(usage) => {
                assert_eq!(usage.prompt_tokens, 10);
                assert_eq!(usage.completion_tokens, 5);
                assert_eq!(usage.total_tokens, 15);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_done_error_and_garbage() {
        assert!(matches!(parse_payload("[DONE]"), Payload::Done));
        assert!(matches!(
            parse_payload(r#"{"error":{"message":"overloaded"}}"#),
            Payload::Error(m) if m == "overloaded"
        ));
        assert!(matches!(parse_payload("{not json"), Payload::Unparseable(_)));
    }

    #[test]
    fn parse_embedding_response() {
        let data = r#"{
            "data": [
                {"embedding": [0.1, 0.2, 0.3], "index": 0},
                {"embedding": [0.4, 0.5, 0.6], "index": 1}
            ],
            "model": "text-embedding-3-small",
            "usage": {"prompt_tokens": 8, "total_tokens": 8}
        }"#;
        let parsed: EmbeddingApiResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.data.len(), 2);
        assert_eq!(parsed.data[0].embedding, vec![0.1, 0.2, 0.3]);
        assert_eq!(parsed.model, "text-embedding-3-small");
    }

    // --- Streaming against a local endpoint ---

    fn chat_request() -> ProviderRequest {
        ProviderRequest {
            model: "gpt-4o".into(),
            messages: vec![ProviderMessage::user("hi")],
            temperature: 0.0,
            max_tokens: None,
            stream: true,
        }
    }

    fn delta(text: &str) -> String {
        format!("data: {}\n\n", serde_json::json!({"choices": [{"delta": {"content": text}, "finish_reason": null}]}))
    }

    const FINISH: &str = "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n";

    #[tokio::test]
    async fn dropping_the_reader_releases_the_connection() {
        let (base, feed) = crate::test_support::sse_server("/chat/completions").await;
        feed.send(delta("Hel")).await.unwrap();

        let provider = OpenAiCompatProvider::openai("k", Some(&base)).unwrap();
        let mut rx = provider.stream(chat_request()).await.unwrap();
        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.content.as_deref(), Some("Hel"));

        drop(rx);
        crate::test_support::wait_for_disconnect(&feed).await;
    }

    #[tokio::test]
    async fn body_ending_mid_answer_is_interrupted() {
        let (base, feed) = crate::test_support::sse_server("/chat/completions").await;
        feed.send(delta("partial")).await.unwrap();

        let provider = OpenAiCompatProvider::openai("k", Some(&base)).unwrap();
        let mut rx = provider.stream(chat_request()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().unwrap().content.as_deref(), Some("partial"));

        drop(feed);
        let err = rx.recv().await.unwrap().unwrap_err();
        assert!(matches!(err, ProviderError::StreamInterrupted(_)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn finish_reason_then_eof_is_a_clean_end() {
        let (base, feed) = crate::test_support::sse_server("/chat/completions").await;
        feed.send(delta("Hello")).await.unwrap();
        feed.send(delta(" there")).await.unwrap();
        feed.send(FINISH.into()).await.unwrap();
        drop(feed);

        let provider = OpenAiCompatProvider::openai("k", Some(&base)).unwrap();
        let mut rx = provider.stream(chat_request()).await.unwrap();

        let mut text = String::new();
        let mut done = false;
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.unwrap();
            text.push_str(chunk.content.as_deref().unwrap_or_default());
            done |= chunk.done;
        }
        assert_eq!(text, "Hello there");
        assert!(done);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        let provider = OpenAiCompatProvider::new("test", "http://127.0.0.1:1", "k").unwrap();
        let request = ProviderRequest {
            model: "m".into(),
            messages: vec![ProviderMessage::user("hi")],
            temperature: 0.0,
            max_tokens: None,
            stream: true,
        };
        let err = provider.stream(request).await.unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
    }
}
