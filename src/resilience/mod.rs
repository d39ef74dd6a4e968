//! # Resilience Module
//!
//! Circuit breaking for calls to collaborating services. One breaker exists
//! per (service, operation) pair; the [`CircuitBreakerManager`] creates them
//! lazily, persists their snapshots and announces state transitions.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use recovery_core::config::CircuitBreakersConfig;
//! use recovery_core::events::EventPublisher;
//! use recovery_core::models::ServiceKey;
//! use recovery_core::resilience::CircuitBreakerManager;
//! use recovery_core::storage::{InMemoryKeyValueStore, PersistenceWriter};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let writer = Arc::new(PersistenceWriter::new(Arc::new(InMemoryKeyValueStore::new())));
//! let manager = CircuitBreakerManager::new(
//!     CircuitBreakersConfig::default(),
//!     writer,
//!     EventPublisher::default(),
//! );
//!
//! let key = ServiceKey::new("reporting", "export");
//! let result = manager
//!     .call(&key, None, || async { Ok::<_, String>("exported") })
//!     .await;
//! # let _ = result;
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod manager;
pub mod metrics;

pub use crate::error::CircuitBreakerError;
pub use circuit_breaker::{Admission, CircuitBreaker, CircuitState, Rejection, StateTransition};
pub use config::CircuitBreakerConfig;
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerSnapshot, CircuitBreakerStatistics, SystemCircuitBreakerMetrics};
