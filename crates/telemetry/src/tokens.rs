//! Token estimation.
//!
//! Uses the BPE encodings from `tiktoken-rs`: `o200k_base` for OpenAI GPT
//! models and `cl100k_base` as an approximation for everything else. If an
//! encoding cannot be loaded, falls back to ~4 characters per token.

use std::sync::OnceLock;
use switchboard_core::message::Message;
use tiktoken_rs::CoreBPE;

/// Tokens of framing each chat message adds on the wire.
pub const MESSAGE_OVERHEAD: u64 = 4;

static O200K: OnceLock<Option<CoreBPE>> = OnceLock::new();
static CL100K: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn encoding_for(model: &str) -> Option<&'static CoreBPE> {
    if model.starts_with("gpt-") {
        O200K
            .get_or_init(|| {
                tiktoken_rs::o200k_base()
                    .inspect_err(|e| tracing::warn!(error = %e, "o200k_base unavailable, estimating by length"))
                    .ok()
            })
            .as_ref()
    } else {
        CL100K
            .get_or_init(|| {
                tiktoken_rs::cl100k_base()
                    .inspect_err(|e| tracing::warn!(error = %e, "cl100k_base unavailable, estimating by length"))
                    .ok()
            })
            .as_ref()
    }
}

/// Load both encodings ahead of the first request. Blocking; call it from
/// a blocking context at startup.
pub fn warm_up() {
    let _ = encoding_for("gpt-");
    let _ = encoding_for("");
}

/// Heuristic: 1 token ≈ 4 characters.
pub fn estimate_by_length(text: &str) -> u64 {
    (text.chars().count() / 4) as u64
}

/// Estimate the token count of `text` as `model` would see it.
pub fn count_tokens(text: &str, model: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    match encoding_for(model) {
        Some(bpe) => bpe.encode_with_special_tokens(text).len() as u64,
        None => estimate_by_length(text),
    }
}

/// Estimate tokens for a conversation, including per-message overhead.
pub fn count_conversation_tokens(messages: &[Message], model: &str) -> u64 {
    messages
        .iter()
        .map(|m| count_tokens(&m.content, model) + MESSAGE_OVERHEAD)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warm_up_loads_both_encodings() {
        warm_up();
        assert!(O200K.get().is_some());
        assert!(CL100K.get().is_some());
    }

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(count_tokens("", "gpt-5"), 0);
    }

    #[test]
    fn short_text_is_a_few_tokens() {
        let n = count_tokens("What is the capital of France?", "gpt-5-mini");
        assert!((5..=10).contains(&n), "got {n}");
        let n = count_tokens("What is the capital of France?", "claude-sonnet-4-5");
        assert!((5..=10).contains(&n), "got {n}");
    }

    #[test]
    fn length_heuristic() {
        assert_eq!(estimate_by_length("test"), 1);
        assert_eq!(estimate_by_length("abc"), 0);
        assert_eq!(estimate_by_length("abcdefgh"), 2);
    }

    #[test]
    fn conversation_adds_overhead() {
        let msgs = vec![Message::user(""), Message::assistant("")];
        assert_eq!(count_conversation_tokens(&msgs, "gpt-4o"), 2 * MESSAGE_OVERHEAD);

        let msgs = vec![Message::user("hello there")];
        assert_eq!(
            count_conversation_tokens(&msgs, "gpt-4o"),
            count_tokens("hello there", "gpt-4o") + MESSAGE_OVERHEAD
        );
    }
}
