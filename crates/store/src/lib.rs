//! Storage backends for Switchboard.
//!
//! Each backend implements the ledger, usage, conversation and profile
//! contracts from `switchboard_core` over one shared store.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
