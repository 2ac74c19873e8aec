//! Error types for the Switchboard domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for Switchboard operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Enrichment error: {0}")]
    Enrich(#[from] EnrichError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Malformed request: {0}")]
    InvalidRequest(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures of the allowance ledger. A ledger that cannot answer is never
/// reported as an exhausted balance.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("Web search failed: {0}")]
    Search(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Vector index query failed: {0}")]
    Index(String),

    #[error("Profile lookup failed: {0}")]
    Profile(String),
}
