//! # Switchboard Core
//!
//! Domain types, traits, and error definitions for the Switchboard chat
//! orchestration service. This crate has **no framework dependencies** - it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod ledger;
pub mod message;
pub mod model;
pub mod provider;
pub mod retrieval;
pub mod routing;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use error::{EnrichError, Error, LedgerError, ProviderError, Result, StoreError};
pub use ledger::{Account, Admission, AllowanceLedger, INITIAL_GRANT};
pub use message::{Message, ProviderMessage, ProviderRole, Role, into_provider_messages};
pub use model::{ModelDescriptor, ProviderFamily, TemperatureRange};
pub use provider::{ChunkStream, Provider, ProviderRequest, ProviderResponse, StreamChunk};
pub use retrieval::{IndexQuery, RetrievedChunk, SearchHit, VectorIndex, WebSearch};
pub use routing::{CLASSIFIER_TEMPERATURE, RoutingDecision, TaskCategory};
pub use store::{ConversationStore, CurrentItem, MonthlyUsage, ProfileStore, UsageRecord, UsageSink, UserProfile};
