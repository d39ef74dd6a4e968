//! # Circuit Breaker Manager
//!
//! Registry of circuit breakers keyed by [`ServiceKey`]. Breakers are created
//! lazily on first use and live for the lifetime of the process. Every state
//! transition is logged, persisted as a snapshot and published as a
//! `CircuitStateChanged` event.

use crate::config::CircuitBreakersConfig;
use crate::error::CircuitBreakerError;
use crate::events::{DomainEvent, EventPublisher};
use crate::logging::log_breaker_transition;
use crate::models::ServiceKey;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, Rejection, StateTransition,
    SystemCircuitBreakerMetrics,
};
use crate::storage::{namespaces, PersistenceWriter};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct CircuitBreakerManager {
    breakers: DashMap<ServiceKey, Arc<CircuitBreaker>>,
    settings: CircuitBreakersConfig,
    writer: Arc<PersistenceWriter>,
    events: EventPublisher,
}

impl CircuitBreakerManager {
    pub fn new(
        settings: CircuitBreakersConfig,
        writer: Arc<PersistenceWriter>,
        events: EventPublisher,
    ) -> Self {
        Self {
            breakers: DashMap::new(),
            settings,
            writer,
            events,
        }
    }

    pub fn settings(&self) -> &CircuitBreakersConfig {
        &self.settings
    }

    /// Get or create the breaker for a key.
    ///
    /// `config` only applies when the breaker does not exist yet; an existing
    /// breaker keeps the configuration it was created with. An invalid
    /// `config` is ignored in favour of the configured one for the key.
    pub fn get_or_create(
        &self,
        key: &ServiceKey,
        config: Option<&CircuitBreakerConfig>,
    ) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(key) {
            return breaker.clone();
        }

        self.breakers
            .entry(key.clone())
            .or_insert_with(|| {
                let config = match config {
                    Some(config) => match config.validate() {
                        Ok(()) => config.clone(),
                        Err(reason) => {
                            warn!(
                                circuit_breaker = %key,
                                reason = %reason,
                                "Invalid circuit breaker config supplied, using configured default"
                            );
                            self.settings.config_for_key(key)
                        }
                    },
                    None => self.settings.config_for_key(key),
                };
                Arc::new(CircuitBreaker::new(key.clone(), config))
            })
            .clone()
    }

    pub fn get(&self, key: &ServiceKey) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(key).map(|breaker| breaker.clone())
    }

    /// Run an operation under the breaker for `key`.
    ///
    /// The operation is not invoked when the breaker rejects the call. No
    /// lock is held while it runs.
    pub async fn call<F, Fut, T, E>(
        &self,
        key: &ServiceKey,
        config: Option<&CircuitBreakerConfig>,
        operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.settings.enabled {
            return operation().await.map_err(CircuitBreakerError::OperationFailed);
        }

        let breaker = self.get_or_create(key, config);

        let mut admission = match breaker.admit() {
            Ok(admission) => admission,
            Err(rejection) => {
                debug!(circuit_breaker = %key, rejection = ?rejection, "Call rejected by circuit breaker");
                return Err(match rejection {
                    Rejection::Open { next_attempt_at } => CircuitBreakerError::CircuitOpen {
                        key: key.clone(),
                        next_attempt_at,
                    },
                    Rejection::HalfOpenExhausted { max_calls } => {
                        CircuitBreakerError::HalfOpenExhausted {
                            key: key.clone(),
                            max_calls,
                        }
                    }
                });
            }
        };
        // Hands the probe slot back if this future is dropped before the
        // outcome is recorded
        let mut slot = ProbeSlot {
            breaker: breaker.as_ref(),
            epoch: admission.probe.take(),
        };
        self.handle_transition(&breaker, admission.transition).await;

        let started = Instant::now();
        let result = operation().await;
        slot.settle();
        let transition = breaker.record_outcome(result.is_ok(), started.elapsed());
        self.handle_transition(&breaker, transition).await;

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Count a failure reported outside a protected call
    pub async fn record_failure(&self, key: &ServiceKey) {
        let breaker = self.get_or_create(key, None);
        let transition = breaker.record_failure();
        self.handle_transition(&breaker, transition).await;
    }

    /// Force a breaker open. Returns false when no breaker exists for `key`.
    pub async fn force_open(&self, key: &ServiceKey) -> bool {
        self.administer(key, CircuitBreaker::force_open).await
    }

    /// Force a breaker closed. Returns false when no breaker exists for `key`.
    pub async fn force_closed(&self, key: &ServiceKey) -> bool {
        self.administer(key, CircuitBreaker::force_closed).await
    }

    /// Close a breaker and clear its statistics
    pub async fn reset(&self, key: &ServiceKey) -> bool {
        self.administer(key, CircuitBreaker::reset).await
    }

    /// Snapshots of every breaker, ordered by key
    pub fn states(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut states: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        states.sort_by(|a, b| a.key.cmp(&b.key));
        states
    }

    pub fn system_metrics(&self) -> SystemCircuitBreakerMetrics {
        SystemCircuitBreakerMetrics::from_snapshots(&self.states())
    }

    /// Reinstate breakers from persisted snapshots, replacing live ones
    pub fn restore(&self, snapshots: Vec<CircuitBreakerSnapshot>) -> usize {
        let count = snapshots.len();
        for snapshot in snapshots {
            let key = snapshot.key.clone();
            self.breakers
                .insert(key, Arc::new(CircuitBreaker::from_snapshot(snapshot)));
        }
        count
    }

    async fn administer<F>(&self, key: &ServiceKey, action: F) -> bool
    where
        F: FnOnce(&CircuitBreaker) -> Vec<StateTransition>,
    {
        let Some(breaker) = self.get(key) else {
            warn!(circuit_breaker = %key, "No circuit breaker registered for key");
            return false;
        };
        for transition in action(breaker.as_ref()) {
            self.handle_transition(&breaker, Some(transition)).await;
        }
        // Persist even without a transition so statistics resets are stored
        self.persist(&breaker).await;
        true
    }

    async fn handle_transition(&self, breaker: &CircuitBreaker, transition: Option<StateTransition>) {
        let Some(transition) = transition else {
            return;
        };

        log_breaker_transition(
            &transition.key.to_string(),
            transition.from.as_str(),
            transition.to.as_str(),
            transition.failure_count,
        );
        self.persist(breaker).await;
        self.events.publish(DomainEvent::CircuitStateChanged {
            key: transition.key,
            from: transition.from,
            to: transition.to,
            failure_count: transition.failure_count,
        });
    }

    async fn persist(&self, breaker: &CircuitBreaker) {
        let snapshot = breaker.snapshot();
        if let Err(e) = self
            .writer
            .write(
                namespaces::CIRCUIT_BREAKERS,
                &snapshot.key.storage_id(),
                &snapshot,
                None,
            )
            .await
        {
            warn!(circuit_breaker = %snapshot.key, error = %e, "Failed to serialize circuit breaker snapshot");
        }
    }
}

struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
    epoch: Option<u64>,
}

impl ProbeSlot<'_> {
    /// The call reported its outcome; keep the slot consumed
    fn settle(&mut self) {
        self.epoch = None;
    }
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if let Some(epoch) = self.epoch.take() {
            if self.breaker.release_probe(epoch) {
                warn!(circuit_breaker = %self.breaker.key(), "Half-open probe cancelled before completion");
            }
        }
    }
}
