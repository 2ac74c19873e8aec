//! Events a chat turn emits to its client.

use serde::{Deserialize, Serialize};
use switchboard_core::routing::TaskCategory;

/// One step of a streamed chat turn, in emission order:
///
/// - `keep_alive` - the turn was admitted; sent before any provider call
/// - `routing`    - automatic routing picked a category and model
/// - `delta`      - a piece of the model's answer
/// - `error`      - the turn failed; at most one, always before `done`
/// - `done`       - terminal, always last
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    KeepAlive,

    Routing { category: TaskCategory, model: String },

    Delta { content: String },

    Error { message: String },

    Done,
}

impl ChatEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::KeepAlive => "keep_alive",
            Self::Routing { .. } => "routing",
            Self::Delta { .. } => "delta",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }
}
