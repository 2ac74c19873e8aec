//! LLM Provider implementations for Switchboard.
//!
//! All providers implement the `switchboard_core::Provider` trait.
//! The registry selects the provider for a model's family.

pub mod anthropic;
pub mod openai_compat;
pub mod registry;
mod sse;
#[cfg(test)]
mod test_support;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use registry::{ProviderRegistry, build_from_config};
