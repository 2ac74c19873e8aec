//! The inbound chat request.

use serde::{Deserialize, Serialize};
use switchboard_core::message::Message;

fn default_model() -> String {
    switchboard_router::AUTO_MODEL.into()
}

/// One user turn as submitted by a client. `history` ends with the new
/// user message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub history: Vec<Message>,

    /// `"auto"` or a configured model id
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub search_web: bool,

    #[serde(default)]
    pub search_docs: bool,

    /// Restricts document search to one project
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Falls back to the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(history: Vec<Message>) -> Self {
        Self {
            history,
            model: default_model(),
            search_web: false,
            search_docs: false,
            project: None,
            temperature: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}
