//! # Persistence Boundary
//!
//! The engine never talks to a database directly. It consumes an injected
//! [`KeyValueStore`] and routes every write through a [`PersistenceWriter`]
//! that parks failed writes for a later flush instead of dropping them.

pub mod in_memory;
pub mod traits;
pub mod writer;

pub use in_memory::InMemoryKeyValueStore;
pub use traits::{KeyValueStore, StoreError, StoreResult};
pub use writer::{PendingWrite, PersistenceWriter};

/// Storage namespaces used by the engine
pub mod namespaces {
    pub const ERROR_RECORDS: &str = "error_records";
    pub const CIRCUIT_BREAKERS: &str = "circuit_breakers";
    pub const FALLBACK_STRATEGIES: &str = "fallback_strategies";
    pub const RECOVERY_WORKFLOWS: &str = "recovery_workflows";
    pub const FALLBACK_CACHE: &str = "fallback_cache";
    pub const QUEUED_OPERATIONS: &str = "queued_operations";
}
