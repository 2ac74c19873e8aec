//! Ways a chat turn can end early.

use switchboard_core::error::{LedgerError, ProviderError};
use thiserror::Error;

/// Terminal turn failures. Routing, enrichment and usage-recording problems
/// are recovered inside the turn and never show up here.
#[derive(Debug, Error)]
pub enum TurnError {
    /// The user has no credits left.
    #[error("allowance exhausted")]
    AllowanceExhausted,

    /// The ledger could not be consulted. Never reported as exhausted.
    #[error("allowance check unavailable: {0}")]
    AllowanceUnavailable(#[from] LedgerError),

    /// The model backend failed before or during streaming.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The client went away. Nothing more is sent.
    #[error("stream cancelled by client")]
    Cancelled,
}

impl TurnError {
    /// Text shown to the user in the error event, if any.
    pub fn user_message(&self) -> Option<String> {
        match self {
            Self::AllowanceExhausted => Some(
                "You have used all of your credits. Upgrade your plan to keep chatting.".into(),
            ),
            Self::AllowanceUnavailable(_) => {
                Some("Service temporarily unavailable. Please try again in a moment.".into())
            }
            Self::Provider(ProviderError::RateLimited { retry_after_secs }) => Some(format!(
                "The model is busy right now. Please retry in {retry_after_secs} seconds."
            )),
            Self::Provider(ProviderError::AuthenticationFailed(_) | ProviderError::NotConfigured(_)) => {
                Some("This model is not available right now. Please pick another model.".into())
            }
            Self::Provider(e) => Some(format!("The model failed to respond: {e}")),
            Self::Cancelled => None,
        }
    }
}
