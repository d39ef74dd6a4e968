//! Key/value store trait consumed by the engine.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store operation '{operation}' failed for {namespace}/{key}: {reason}")]
    OperationFailed {
        operation: String,
        namespace: String,
        key: String,
        reason: String,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Namespaced JSON key/value persistence.
///
/// Implementations must be safe to share across tasks. A `ttl` of `None`
/// means the entry never expires.
#[async_trait]
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<Value>>;

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> StoreResult<()>;

    /// Returns whether an entry was removed
    async fn delete(&self, namespace: &str, key: &str) -> StoreResult<bool>;

    /// All live `(key, value)` pairs in a namespace
    async fn list(&self, namespace: &str) -> StoreResult<Vec<(String, Value)>>;

    /// Name for logging
    fn store_name(&self) -> &'static str;
}
