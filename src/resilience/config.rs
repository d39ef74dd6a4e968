//! # Circuit Breaker Configuration
//!
//! Runtime configuration for a single breaker. System-wide settings live in
//! `crate::config::CircuitBreakersConfig`, which converts into this type per
//! (service, operation) pair.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in closed state before the circuit opens
    pub failure_threshold: u32,

    /// Successful half-open probes required to close the circuit
    pub success_threshold: u32,

    /// Time spent open before probing is allowed
    pub timeout: Duration,

    /// Probe calls admitted while half-open
    pub half_open_max_calls: u32,
}

impl CircuitBreakerConfig {
    /// Create configuration for calls to external APIs
    pub fn for_external_api() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(45),
            half_open_max_calls: 3,
        }
    }

    /// Create configuration for persistence operations
    pub fn for_storage() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_secs(15),
            half_open_max_calls: 2,
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.timeout.is_zero() {
            return Err("timeout must be greater than 0".to_string());
        }

        if self.success_threshold == 0 {
            return Err("success_threshold must be greater than 0".to_string());
        }

        if self.half_open_max_calls == 0 {
            return Err("half_open_max_calls must be greater than 0".to_string());
        }

        // Otherwise a fully successful probe round could never close the circuit
        if self.success_threshold > self.half_open_max_calls {
            return Err(format!(
                "success_threshold ({}) must not exceed half_open_max_calls ({})",
                self.success_threshold, self.half_open_max_calls
            ));
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_config_validation() {
        let valid_config = CircuitBreakerConfig::default();
        assert!(valid_config.validate().is_ok());

        let mut invalid_config = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(invalid_config.validate().is_err());

        invalid_config = CircuitBreakerConfig {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(invalid_config.validate().is_err());

        invalid_config = CircuitBreakerConfig {
            success_threshold: 4,
            half_open_max_calls: 3,
            ..Default::default()
        };
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_preset_configurations() {
        assert!(CircuitBreakerConfig::for_external_api().validate().is_ok());
        assert!(CircuitBreakerConfig::for_storage().validate().is_ok());
    }
}
