//! Shared engine and collaborator builders for integration tests

#![allow(dead_code)] // Not every test binary uses every helper

use async_trait::async_trait;
use parking_lot::Mutex;
use recovery_core::config::{ConfigManager, RecoveryConfig};
use recovery_core::events::{DomainEvent, PublishedEvent};
use recovery_core::models::{ErrorNotification, RetryStrategy};
use recovery_core::orchestration::{NotificationTransport, RecoveryEngine};
use recovery_core::storage::{InMemoryKeyValueStore, KeyValueStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Transport that keeps every delivered notification
#[derive(Debug, Default)]
pub struct RecordingTransport {
    delivered: Mutex<Vec<ErrorNotification>>,
}

impl RecordingTransport {
    pub fn delivered(&self) -> Vec<ErrorNotification> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn deliver(&self, notification: &ErrorNotification) -> anyhow::Result<()> {
        self.delivered.lock().push(notification.clone());
        Ok(())
    }
}

/// Engine plus handles on its collaborators
pub struct TestEngine {
    pub engine: RecoveryEngine,
    pub store: Arc<InMemoryKeyValueStore>,
    pub transport: Arc<RecordingTransport>,
}

pub struct TestEngineBuilder {
    config: RecoveryConfig,
    store: Arc<InMemoryKeyValueStore>,
}

impl TestEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: RecoveryConfig::default(),
            store: Arc::new(InMemoryKeyValueStore::new()),
        }
    }

    /// Default retry strategy without jitter so delays are exact
    pub fn deterministic_retries(mut self) -> Self {
        self.config.retry.default_strategy = self.config.retry.default_strategy.with_jitter(false);
        self
    }

    pub fn retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.config.retry.default_strategy = strategy;
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.circuit_breakers.default_config.failure_threshold = threshold;
        self
    }

    pub fn count_recorded_errors(mut self, count: bool) -> Self {
        self.config.circuit_breakers.count_recorded_errors = count;
        self
    }

    pub fn fast_sweeps(mut self) -> Self {
        self.config.sweeps.retry_interval_ms = 10;
        self.config.sweeps.metrics_interval_ms = 20;
        self
    }

    /// Share a store with a previously built engine
    pub fn store(mut self, store: Arc<InMemoryKeyValueStore>) -> Self {
        self.store = store;
        self
    }

    pub fn build(self) -> TestEngine {
        let transport = Arc::new(RecordingTransport::default());
        let config_manager =
            ConfigManager::from_config(self.config).expect("test configuration is valid");
        let engine = RecoveryEngine::builder()
            .config_manager(config_manager)
            .store(self.store.clone() as Arc<dyn KeyValueStore>)
            .notification_transport(transport.clone())
            .build()
            .expect("engine builds");
        TestEngine {
            engine,
            store: self.store,
            transport,
        }
    }
}

impl Default for TestEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn test_engine() -> TestEngine {
    TestEngineBuilder::new().build()
}

/// Everything published so far, without waiting
pub fn drain_events(receiver: &mut broadcast::Receiver<PublishedEvent>) -> Vec<DomainEvent> {
    let mut events = Vec::new();
    while let Ok(published) = receiver.try_recv() {
        events.push(published.event);
    }
    events
}

pub fn event_names(events: &[DomainEvent]) -> Vec<&'static str> {
    events.iter().map(DomainEvent::name).collect()
}

pub const SHORT: Duration = Duration::from_millis(5);
