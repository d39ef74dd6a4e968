//! # Persistence Writer
//!
//! Write path for all engine state. A failed store call is logged and the
//! write is parked; [`PersistenceWriter::flush_pending`] replays parked
//! writes from the short sweep. In-memory state is never rolled back because
//! of a store failure.

use super::traits::KeyValueStore;
use crate::error::{RecoveryError, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A write that could not be applied yet
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    Set {
        namespace: String,
        key: String,
        value: Value,
        ttl: Option<Duration>,
    },
    Delete {
        namespace: String,
        key: String,
    },
}

impl PendingWrite {
    fn target(&self) -> (&str, &str) {
        match self {
            PendingWrite::Set { namespace, key, .. } => (namespace, key),
            PendingWrite::Delete { namespace, key } => (namespace, key),
        }
    }
}

#[derive(Debug)]
pub struct PersistenceWriter {
    store: Arc<dyn KeyValueStore>,
    pending: Mutex<Vec<PendingWrite>>,
}

impl PersistenceWriter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Serialize and store a value. Returns `Ok(false)` when the store
    /// rejected the write and it was parked for a later flush.
    pub async fn write<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let value = serde_json::to_value(value)?;
        let write = PendingWrite::Set {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value,
            ttl,
        };
        Ok(self.apply_or_park(write).await)
    }

    /// Delete a value, parking the delete on failure
    pub async fn delete(&self, namespace: &str, key: &str) -> bool {
        let write = PendingWrite::Delete {
            namespace: namespace.to_string(),
            key: key.to_string(),
        };
        self.apply_or_park(write).await
    }

    /// Read and deserialize a single value
    pub async fn read<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Result<Option<T>> {
        let value = self
            .store
            .get(namespace, key)
            .await
            .map_err(|e| RecoveryError::Persistence(e.to_string()))?;
        value
            .map(serde_json::from_value)
            .transpose()
            .map_err(RecoveryError::from)
    }

    /// Read every value in a namespace. Entries that no longer deserialize
    /// are skipped with a warning.
    pub async fn read_all<T: DeserializeOwned>(&self, namespace: &str) -> Result<Vec<T>> {
        let entries = self
            .store
            .list(namespace)
            .await
            .map_err(|e| RecoveryError::Persistence(e.to_string()))?;

        Ok(entries
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_value(value) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!(namespace = %namespace, key = %key, error = %e, "Skipping unreadable stored entry");
                    None
                }
            })
            .collect())
    }

    /// Number of parked writes
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Replay parked writes in order. Writes that fail again stay parked.
    /// Returns the number of writes applied.
    pub async fn flush_pending(&self) -> usize {
        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return 0;
        }

        let mut applied = 0;
        let mut still_pending = Vec::new();
        for write in batch {
            if self.apply(&write).await {
                applied += 1;
            } else {
                still_pending.push(write);
            }
        }

        if !still_pending.is_empty() {
            let mut pending = self.pending.lock();
            // Anything parked during the flush is newer than the replayed batch
            for write in still_pending.into_iter().rev() {
                let (namespace, key) = write.target();
                let superseded = pending
                    .iter()
                    .any(|newer| newer.target() == (namespace, key));
                if !superseded {
                    pending.insert(0, write);
                }
            }
        }

        debug!(applied = applied, remaining = self.pending_count(), "Flushed parked writes");
        applied
    }

    async fn apply_or_park(&self, write: PendingWrite) -> bool {
        if self.apply(&write).await {
            // A parked write for the same key is older than this one
            let target = write.target();
            self.pending.lock().retain(|parked| parked.target() != target);
            return true;
        }
        self.park(write);
        false
    }

    async fn apply(&self, write: &PendingWrite) -> bool {
        let result = match write {
            PendingWrite::Set {
                namespace,
                key,
                value,
                ttl,
            } => self.store.set(namespace, key, value.clone(), *ttl).await,
            PendingWrite::Delete { namespace, key } => {
                self.store.delete(namespace, key).await.map(|_| ())
            }
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                let (namespace, key) = write.target();
                warn!(
                    store = self.store.store_name(),
                    namespace = %namespace,
                    key = %key,
                    error = %e,
                    "Persistence write failed, parking for retry"
                );
                false
            }
        }
    }

    /// Park a write, replacing any older parked write for the same key
    fn park(&self, write: PendingWrite) {
        let mut pending = self.pending.lock();
        let (namespace, key) = write.target();
        pending.retain(|existing| existing.target() != (namespace, key));
        pending.push(write);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryKeyValueStore;
    use serde_json::json;

    fn writer() -> (Arc<InMemoryKeyValueStore>, PersistenceWriter) {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let writer = PersistenceWriter::new(store.clone());
        (store, writer)
    }

    #[tokio::test]
    async fn test_write_and_read_back() {
        let (_, writer) = writer();
        assert!(writer.write("ns", "k", &json!({"a": 1}), None).await.unwrap());
        let value: Option<Value> = writer.read("ns", "k").await.unwrap();
        assert_eq!(value, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_failed_write_is_parked_and_flushed() {
        let (store, writer) = writer();
        store.set_unavailable(true);

        assert!(!writer.write("ns", "k", &json!(1), None).await.unwrap());
        assert!(!writer.write("ns", "k", &json!(2), None).await.unwrap());
        assert!(!writer.delete("ns", "gone").await);
        // Second write to the same key replaces the first
        assert_eq!(writer.pending_count(), 2);

        // Still down: nothing applied, nothing lost
        assert_eq!(writer.flush_pending().await, 0);
        assert_eq!(writer.pending_count(), 2);

        store.set_unavailable(false);
        assert_eq!(writer.flush_pending().await, 2);
        assert_eq!(writer.pending_count(), 0);

        let value: Option<Value> = writer.read("ns", "k").await.unwrap();
        assert_eq!(value, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_successful_write_discards_older_parked_write() {
        let (store, writer) = writer();
        store.set_unavailable(true);
        assert!(!writer.write("ns", "k", &json!("stale"), None).await.unwrap());

        store.set_unavailable(false);
        assert!(writer.write("ns", "k", &json!("fresh"), None).await.unwrap());
        assert_eq!(writer.pending_count(), 0);
        assert_eq!(writer.flush_pending().await, 0);

        let value: Option<Value> = writer.read("ns", "k").await.unwrap();
        assert_eq!(value, Some(json!("fresh")));
    }

    #[tokio::test]
    async fn test_read_all_skips_unreadable() {
        let (store, writer) = writer();
        store.set("ns", "good", json!(5), None).await.unwrap();
        store.set("ns", "bad", json!("text"), None).await.unwrap();

        let values: Vec<u32> = writer.read_all("ns").await.unwrap();
        assert_eq!(values, vec![5]);
    }
}
