//! Shared plumbing for reading server-sent event streams from provider APIs.

use switchboard_core::error::ProviderError;
use tracing::warn;

/// Splits a byte stream into complete SSE lines.
///
/// Bytes are buffered until a newline arrives, so a multi-byte UTF-8
/// sequence split across network chunks is decoded intact.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Next complete line without its terminator, if one is buffered.
    pub(crate) fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        let text = String::from_utf8_lossy(&line[..end]);
        Some(text.trim_end_matches('\r').to_string())
    }
}

/// Payload of a `data:` line, skipping blanks, comments and other fields.
pub(crate) fn data_payload(line: &str) -> Option<&str> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    line.strip_prefix("data:").map(str::trim)
}

/// Map a non-success HTTP status to a typed provider error.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ));
    }

    if status == 400 || status == 422 {
        let error_body = response.text().await.unwrap_or_default();
        warn!(provider, status, body = %error_body, "Provider rejected request");
        return Err(ProviderError::InvalidRequest(error_body));
    }

    if status != 200 {
        let error_body = response.text().await.unwrap_or_default();
        warn!(provider, status, body = %error_body, "Provider returned error");
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lines_across_chunks() {
        let mut buf = LineBuffer::default();
        buf.push(b"data: {\"a\"");
        assert!(buf.next_line().is_none());
        buf.push(b":1}\r\n\ndata: [DONE]\n");
        assert_eq!(buf.next_line().as_deref(), Some("data: {\"a\":1}"));
        assert_eq!(buf.next_line().as_deref(), Some(""));
        assert_eq!(buf.next_line().as_deref(), Some("data: [DONE]"));
        assert!(buf.next_line().is_none());
    }

    #[test]
    fn keeps_split_utf8_intact() {
        let text = "data: héllo\n".as_bytes();
        let split = text.iter().position(|b| *b == 0xc3).unwrap() + 1;
        let mut buf = LineBuffer::default();
        buf.push(&text[..split]);
        buf.push(&text[split..]);
        assert_eq!(buf.next_line().as_deref(), Some("data: héllo"));
    }

    #[test]
    fn data_payload_filters_lines() {
        assert_eq!(data_payload("data: [DONE]"), Some("[DONE]"));
        assert_eq!(data_payload("data:{}"), Some("{}"));
        assert_eq!(data_payload(": keep-alive"), None);
        assert_eq!(data_payload("event: message_start"), None);
        assert_eq!(data_payload(""), None);
    }
}
