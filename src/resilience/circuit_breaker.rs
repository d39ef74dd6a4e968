//! # Circuit Breaker Implementation
//!
//! Per-(service, operation) state machine with three states: Closed (normal
//! operation), Open (failing fast) and Half-Open (admitting a bounded number
//! of probe calls).
//!
//! The breaker itself never runs user code. Callers [`CircuitBreaker::admit`]
//! a call, run it without holding any lock, then report the outcome with
//! [`CircuitBreaker::record_outcome`]. Every mutation happens inside a single
//! short critical section, and each method returns the state transitions it
//! caused so the owner can persist and announce them.
//!
//! Only four transitions exist: closed→open, open→half_open,
//! half_open→closed and half_open→open. Administrative closes of an open
//! circuit pass through half-open.

use crate::models::ServiceKey;
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitBreakerStatistics};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - limited calls allowed to test system health
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change caused by a breaker operation
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransition {
    pub key: ServiceKey,
    pub from: CircuitState,
    pub to: CircuitState,
    pub failure_count: u32,
}

/// Outcome of a successful admission
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Admission {
    /// Set when admitting the call moved the breaker from open to half-open
    pub transition: Option<StateTransition>,
    /// Half-open epoch of the probe slot this call holds. A call that never
    /// reports an outcome hands the slot back with
    /// [`CircuitBreaker::release_probe`].
    pub probe: Option<u64>,
}

/// Why a call was refused
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    Open { next_attempt_at: DateTime<Utc> },
    HalfOpenExhausted { max_calls: u32 },
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    /// Probes admitted since entering half-open
    half_open_calls: u32,
    /// Bumped on every transition; ties probe slots to one half-open window
    epoch: u64,
    last_failure_time: Option<DateTime<Utc>>,
    last_success_time: Option<DateTime<Utc>>,
    next_attempt_time: Option<DateTime<Utc>>,
    statistics: CircuitBreakerStatistics,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_calls: 0,
            epoch: 0,
            last_failure_time: None,
            last_success_time: None,
            next_attempt_time: None,
            statistics: CircuitBreakerStatistics::default(),
        }
    }
}

/// Circuit breaker guarding one (service, operation) pair
#[derive(Debug)]
pub struct CircuitBreaker {
    key: ServiceKey,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given key and configuration
    pub fn new(key: ServiceKey, config: CircuitBreakerConfig) -> Self {
        info!(
            circuit_breaker = %key,
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            half_open_max_calls = config.half_open_max_calls,
            timeout_ms = config.timeout.as_millis() as u64,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            key,
            config,
            inner: Mutex::new(BreakerState::closed()),
        }
    }

    /// Rebuild a breaker from a persisted snapshot
    pub fn from_snapshot(snapshot: CircuitBreakerSnapshot) -> Self {
        Self {
            key: snapshot.key,
            config: snapshot.config,
            inner: Mutex::new(BreakerState {
                state: snapshot.state,
                failure_count: snapshot.failure_count,
                success_count: snapshot.success_count,
                // Probes in flight at persistence time are gone
                half_open_calls: 0,
                epoch: 0,
                last_failure_time: snapshot.last_failure_time,
                last_success_time: snapshot.last_success_time,
                next_attempt_time: snapshot.next_attempt_time,
                statistics: snapshot.statistics,
            }),
        }
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Decide whether a call may run now.
    ///
    /// An open breaker whose cooldown has elapsed moves to half-open here;
    /// admitted half-open calls consume one probe slot.
    pub fn admit(&self) -> Result<Admission, Rejection> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let mut admission = Admission::default();

        if inner.state == CircuitState::Open {
            let next_attempt_at = inner.next_attempt_time.unwrap_or(now);
            if now < next_attempt_at {
                inner.statistics.rejected_calls += 1;
                return Err(Rejection::Open { next_attempt_at });
            }
            admission.transition = Some(self.transition(&mut inner, CircuitState::HalfOpen));
        }

        if inner.state == CircuitState::HalfOpen {
            if inner.half_open_calls >= self.config.half_open_max_calls {
                inner.statistics.rejected_calls += 1;
                return Err(Rejection::HalfOpenExhausted {
                    max_calls: self.config.half_open_max_calls,
                });
            }
            inner.half_open_calls += 1;
            admission.probe = Some(inner.epoch);
        }

        Ok(admission)
    }

    /// Return a probe slot whose call ended without an outcome (dropped or
    /// cancelled). Ignored once the half-open window it belongs to is over.
    pub fn release_probe(&self, epoch: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::HalfOpen
            || inner.epoch != epoch
            || inner.half_open_calls == 0
        {
            return false;
        }
        inner.half_open_calls -= 1;
        debug!(
            circuit_breaker = %self.key,
            half_open_calls = inner.half_open_calls,
            "Probe abandoned, slot released"
        );
        true
    }

    /// Record the outcome of an admitted call
    pub fn record_outcome(&self, success: bool, duration: Duration) -> Option<StateTransition> {
        let mut inner = self.inner.lock();
        inner.statistics.record_call(success, duration);

        if success {
            debug!(
                circuit_breaker = %self.key,
                duration_ms = duration.as_millis() as u64,
                "🟢 Operation succeeded"
            );
            self.on_success(&mut inner)
        } else {
            debug!(
                circuit_breaker = %self.key,
                duration_ms = duration.as_millis() as u64,
                "🔴 Operation failed"
            );
            self.on_failure(&mut inner)
        }
    }

    /// Record a failure observed outside a protected call
    pub fn record_failure(&self) -> Option<StateTransition> {
        let mut inner = self.inner.lock();
        inner.statistics.record_external_failure();
        self.on_failure(&mut inner)
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) -> Vec<StateTransition> {
        warn!(circuit_breaker = %self.key, "🚨 Circuit breaker forced open");
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Open => {
                inner.next_attempt_time = Some(self.next_attempt_from(Utc::now()));
                Vec::new()
            }
            _ => vec![self.transition(&mut inner, CircuitState::Open)],
        }
    }

    /// Force circuit to closed state (for emergency recovery). An open
    /// circuit goes through half-open on the way.
    pub fn force_closed(&self) -> Vec<StateTransition> {
        warn!(circuit_breaker = %self.key, "🚨 Circuit breaker forced closed");
        let mut inner = self.inner.lock();
        self.close(&mut inner)
    }

    /// Close the circuit and clear all statistics
    pub fn reset(&self) -> Vec<StateTransition> {
        let mut inner = self.inner.lock();
        let transitions = self.close(&mut inner);
        inner.statistics = CircuitBreakerStatistics::default();
        inner.last_failure_time = None;
        inner.last_success_time = None;
        transitions
    }

    fn close(&self, inner: &mut BreakerState) -> Vec<StateTransition> {
        let mut transitions = Vec::new();
        if inner.state == CircuitState::Closed {
            inner.failure_count = 0;
            return transitions;
        }
        if inner.state == CircuitState::Open {
            transitions.push(self.transition(inner, CircuitState::HalfOpen));
        }
        transitions.push(self.transition(inner, CircuitState::Closed));
        transitions
    }

    /// Get current snapshot
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock();
        CircuitBreakerSnapshot {
            key: self.key.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            half_open_calls: inner.half_open_calls,
            last_failure_time: inner.last_failure_time,
            last_success_time: inner.last_success_time,
            next_attempt_time: inner.next_attempt_time,
            config: self.config.clone(),
            statistics: inner.statistics.clone(),
        }
    }

    fn on_success(&self, inner: &mut BreakerState) -> Option<StateTransition> {
        inner.last_success_time = Some(Utc::now());
        match inner.state {
            CircuitState::Closed => {
                // Reset failure count on success
                inner.failure_count = 0;
                None
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    Some(self.transition(inner, CircuitState::Closed))
                } else {
                    None
                }
            }
            // A call admitted before another caller tripped the circuit
            CircuitState::Open => None,
        }
    }

    fn on_failure(&self, inner: &mut BreakerState) -> Option<StateTransition> {
        inner.last_failure_time = Some(Utc::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    Some(self.transition(inner, CircuitState::Open))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                // Any failure in half-open state immediately opens circuit
                inner.failure_count += 1;
                Some(self.transition(inner, CircuitState::Open))
            }
            CircuitState::Open => {
                inner.failure_count += 1;
                None
            }
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) -> StateTransition {
        let from = inner.state;
        let now = Utc::now();
        inner.state = to;
        inner.epoch += 1;

        match to {
            CircuitState::Open => {
                inner.next_attempt_time = Some(self.next_attempt_from(now));
                inner.success_count = 0;
                inner.half_open_calls = 0;
                inner.statistics.circuit_openings += 1;
                error!(
                    circuit_breaker = %self.key,
                    failure_count = inner.failure_count,
                    failure_threshold = self.config.failure_threshold,
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "🔴 Circuit breaker opened (failing fast)"
                );
            }
            CircuitState::HalfOpen => {
                inner.success_count = 0;
                inner.half_open_calls = 0;
                info!(
                    circuit_breaker = %self.key,
                    success_threshold = self.config.success_threshold,
                    "🟡 Circuit breaker half-open (testing recovery)"
                );
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.half_open_calls = 0;
                inner.next_attempt_time = None;
                info!(
                    circuit_breaker = %self.key,
                    total_calls = inner.statistics.total_calls,
                    "🟢 Circuit breaker closed (recovered)"
                );
            }
        }

        StateTransition {
            key: self.key.clone(),
            from,
            to,
            failure_count: inner.failure_count,
        }
    }

    fn next_attempt_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let timeout = chrono::Duration::from_std(self.config.timeout)
            .unwrap_or_else(|_| chrono::Duration::weeks(52));
        now + timeout
    }
}
