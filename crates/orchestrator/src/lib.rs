//! Chat turn orchestration for Switchboard.
//!
//! A turn is admitted by the allowance ledger, routed to a model, enriched
//! with profile, document and web context, streamed back as [`ChatEvent`]s,
//! and finally reconciled by the usage recorder.

pub mod error;
pub mod events;
pub mod orchestrator;
pub mod request;

pub use error::TurnError;
pub use events::ChatEvent;
pub use orchestrator::{ChatOrchestrator, EVENT_BUFFER, TurnState};
pub use request::ChatRequest;
