//! # Error Record Store
//!
//! In-memory owner of every [`ErrorRecord`]. Each record sits behind its own
//! mutex so the three writers (initial record, retry sweep, resolution) never
//! interleave on the same record. Other components hold record ids, never
//! copies they mutate.
//!
//! Changes that must reach the store go through
//! [`ErrorRecordStore::update_persisted`], which also holds a per-record
//! write lock until the store write returns. Writes for one record therefore
//! land in the order the changes were made.

use crate::models::{ErrorRecord, ErrorRecordFilter, ErrorStatus};
use crate::storage::{namespaces, PersistenceWriter};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Write a record to the `error_records` namespace with the retention TTL
pub async fn persist_record(writer: &PersistenceWriter, record: &ErrorRecord, ttl: Duration) {
    if let Err(e) = writer
        .write(
            namespaces::ERROR_RECORDS,
            &record.id.to_string(),
            record,
            Some(ttl),
        )
        .await
    {
        warn!(error_id = %record.id, error = %e, "Failed to serialize error record");
    }
}

#[derive(Debug)]
struct RecordSlot {
    record: Mutex<ErrorRecord>,
    write: tokio::sync::Mutex<()>,
}

impl RecordSlot {
    fn new(record: ErrorRecord) -> Arc<Self> {
        Arc::new(Self {
            record: Mutex::new(record),
            write: tokio::sync::Mutex::new(()),
        })
    }
}

#[derive(Debug, Default)]
pub struct ErrorRecordStore {
    records: DashMap<Uuid, Arc<RecordSlot>>,
}

impl ErrorRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record without writing it to the store
    pub fn insert(&self, record: ErrorRecord) {
        self.records.insert(record.id, RecordSlot::new(record));
    }

    /// Insert a new record and write it to the store. Updates to the record
    /// made meanwhile are written after this one.
    pub async fn insert_persisted(&self, record: ErrorRecord, writer: &PersistenceWriter, ttl: Duration) {
        let slot = RecordSlot::new(record.clone());
        let _write = slot.write.lock().await;
        self.records.insert(record.id, slot.clone());
        persist_record(writer, &record, ttl).await;
    }

    pub fn get(&self, id: &Uuid) -> Option<ErrorRecord> {
        self.slot(id).map(|slot| slot.record.lock().clone())
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.records.contains_key(id)
    }

    /// Mutate a record inside its critical section. Returns the closure's
    /// result together with the record as it stands afterwards.
    pub fn update<F, R>(&self, id: &Uuid, mutate: F) -> Option<(R, ErrorRecord)>
    where
        F: FnOnce(&mut ErrorRecord) -> R,
    {
        let slot = self.slot(id)?;
        let mut record = slot.record.lock();
        let result = mutate(&mut record);
        Some((result, record.clone()))
    }

    /// Like [`ErrorRecordStore::update`], and writes the record to the store
    /// when the closure changed it. The write happens before any later
    /// persisted update of the same record starts.
    pub async fn update_persisted<F, R>(
        &self,
        id: &Uuid,
        writer: &PersistenceWriter,
        ttl: Duration,
        mutate: F,
    ) -> Option<(R, ErrorRecord)>
    where
        F: FnOnce(&mut ErrorRecord) -> R,
    {
        let slot = self.slot(id)?;
        let _write = slot.write.lock().await;
        let (result, updated, changed) = {
            let mut record = slot.record.lock();
            let before = record.clone();
            let result = mutate(&mut record);
            let changed = *record != before;
            (result, record.clone(), changed)
        };
        if changed {
            persist_record(writer, &updated, ttl).await;
        }
        Some((result, updated))
    }

    /// Records matching a filter, newest first
    pub fn list(&self, filter: &ErrorRecordFilter) -> Vec<ErrorRecord> {
        let mut records: Vec<ErrorRecord> = self
            .snapshot_all()
            .into_iter()
            .filter(|record| filter.matches(record))
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            records.truncate(limit);
        }
        records
    }

    pub fn active(&self) -> Vec<ErrorRecord> {
        self.list(&ErrorRecordFilter::default().with_status(ErrorStatus::Active))
    }

    pub fn retrying(&self) -> Vec<ErrorRecord> {
        self.list(&ErrorRecordFilter::default().with_status(ErrorStatus::Retrying))
    }

    /// Copy of every record, unordered
    pub fn snapshot_all(&self) -> Vec<ErrorRecord> {
        let slots: Vec<_> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        slots.into_iter().map(|slot| slot.record.lock().clone()).collect()
    }

    /// Link a child record to its parent and persist the parent. Returns
    /// false for an unknown parent.
    pub async fn add_child(
        &self,
        parent_id: &Uuid,
        child_id: Uuid,
        writer: &PersistenceWriter,
        ttl: Duration,
    ) -> bool {
        self.update_persisted(parent_id, writer, ttl, |parent| {
            if !parent.child_error_ids.contains(&child_id) {
                parent.child_error_ids.push(child_id);
            }
        })
        .await
        .is_some()
    }

    /// Drop terminal records (resolved, failed, ignored) recorded before
    /// `cutoff`. Returns the removed ids.
    pub fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Vec<Uuid> {
        let expired: Vec<Uuid> = self
            .snapshot_all()
            .into_iter()
            .filter(|record| record.status.is_terminal() && record.timestamp < cutoff)
            .map(|record| record.id)
            .collect();

        for id in &expired {
            self.records.remove(id);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn slot(&self, id: &Uuid) -> Option<Arc<RecordSlot>> {
        // Clone the slot so the map shard is not locked while the record is
        self.records.get(id).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorCategory, ErrorClassification, ErrorContext};
    use crate::storage::{InMemoryKeyValueStore, KeyValueStore};
    use chrono::Duration;

    fn record(service: &str, category: ErrorCategory, age_minutes: i64) -> ErrorRecord {
        ErrorRecord {
            id: Uuid::new_v4(),
            error_code: "E".to_string(),
            error_message: "failure".to_string(),
            classification: ErrorClassification::for_category(category),
            context: ErrorContext::new(service, "op"),
            timestamp: Utc::now() - Duration::minutes(age_minutes),
            status: ErrorStatus::Active,
            retry_count: 0,
            max_retries: 5,
            next_retry_at: None,
            resolved_at: None,
            resolution: None,
            correlation_id: None,
            parent_error_id: None,
            child_error_ids: Vec::new(),
        }
    }

    #[test]
    fn test_list_is_newest_first_and_filtered() {
        let store = ErrorRecordStore::new();
        let old = record("a", ErrorCategory::Network, 30);
        let new = record("a", ErrorCategory::Network, 1);
        let other = record("b", ErrorCategory::Validation, 5);
        store.insert(old.clone());
        store.insert(new.clone());
        store.insert(other.clone());

        let all = store.list(&ErrorRecordFilter::default());
        assert_eq!(
            all.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![new.id, other.id, old.id]
        );

        let service_a = store.list(&ErrorRecordFilter::default().with_service("a").with_limit(1));
        assert_eq!(service_a.len(), 1);
        assert_eq!(service_a[0].id, new.id);

        let validation =
            store.list(&ErrorRecordFilter::default().with_category(ErrorCategory::Validation));
        assert_eq!(validation.len(), 1);
    }

    #[test]
    fn test_update_returns_new_state() {
        let store = ErrorRecordStore::new();
        let rec = record("a", ErrorCategory::Network, 0);
        store.insert(rec.clone());

        let (previous, updated) = store
            .update(&rec.id, |r| {
                let previous = r.status;
                r.status = ErrorStatus::Retrying;
                previous
            })
            .unwrap();
        assert_eq!(previous, ErrorStatus::Active);
        assert_eq!(updated.status, ErrorStatus::Retrying);
        assert_eq!(store.retrying().len(), 1);
        assert!(store.update(&Uuid::new_v4(), |_| ()).is_none());
    }

    #[test]
    fn test_purge_only_removes_old_terminal_records() {
        let store = ErrorRecordStore::new();
        let mut old_resolved = record("a", ErrorCategory::Network, 120);
        old_resolved.status = ErrorStatus::Resolved;
        let old_active = record("a", ErrorCategory::Network, 120);
        let mut new_failed = record("a", ErrorCategory::Network, 1);
        new_failed.status = ErrorStatus::Failed;
        store.insert(old_resolved.clone());
        store.insert(old_active.clone());
        store.insert(new_failed.clone());

        let removed = store.purge_terminal_before(Utc::now() - Duration::minutes(60));
        assert_eq!(removed, vec![old_resolved.id]);
        assert_eq!(store.len(), 2);
    }

    fn writer() -> (Arc<InMemoryKeyValueStore>, PersistenceWriter) {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        (kv.clone(), PersistenceWriter::new(kv))
    }

    const TTL: std::time::Duration = std::time::Duration::from_secs(3600);

    #[tokio::test]
    async fn test_child_links() {
        let (kv, writer) = writer();
        let store = ErrorRecordStore::new();
        let parent = record("a", ErrorCategory::Network, 0);
        store.insert(parent.clone());
        let child = Uuid::new_v4();

        assert!(store.add_child(&parent.id, child, &writer, TTL).await);
        assert!(store.add_child(&parent.id, child, &writer, TTL).await);
        assert_eq!(store.get(&parent.id).unwrap().child_error_ids, vec![child]);
        assert!(!store.add_child(&Uuid::new_v4(), child, &writer, TTL).await);

        let stored = kv
            .get(namespaces::ERROR_RECORDS, &parent.id.to_string())
            .await
            .unwrap()
            .expect("parent persisted");
        assert_eq!(stored["child_error_ids"], serde_json::json!([child]));
    }

    #[tokio::test]
    async fn test_unchanged_records_are_not_rewritten() {
        let (kv, writer) = writer();
        let store = ErrorRecordStore::new();
        let rec = record("a", ErrorCategory::Network, 0);
        store.insert(rec.clone());

        let (_, unchanged) = store
            .update_persisted(&rec.id, &writer, TTL, |_| ())
            .await
            .unwrap();
        assert_eq!(unchanged, rec);
        assert!(kv.is_empty());

        store
            .update_persisted(&rec.id, &writer, TTL, |r| r.status = ErrorStatus::Resolved)
            .await
            .unwrap();
        let stored = kv
            .get(namespaces::ERROR_RECORDS, &rec.id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["status"], "resolved");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_persisted_updates_land_in_change_order() {
        let (kv, writer) = writer();
        let writer = Arc::new(writer);
        let store = Arc::new(ErrorRecordStore::new());
        let rec = record("a", ErrorCategory::Network, 0);
        let id = rec.id;
        store.insert_persisted(rec, &writer, TTL).await;

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let store = store.clone();
                let writer = writer.clone();
                tokio::spawn(async move {
                    store
                        .update_persisted(&id, &writer, TTL, |r| r.retry_count += 1)
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let stored = kv
            .get(namespaces::ERROR_RECORDS, &id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["retry_count"], 32);
        assert_eq!(store.get(&id).unwrap().retry_count, 32);
    }
}
