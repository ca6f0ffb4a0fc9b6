//! Configuration schema definitions.
//!
//! This module defines the configuration structure for the resilience layer.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::{CircuitBreaker, RetryConfig};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Retry settings shared by outbound calls.
    pub retry: RetrySettings,

    /// Agent HTTP client settings.
    pub client: ClientSettings,

    /// Settings for breakers not listed under `breakers`.
    pub breaker_defaults: BreakerSettings,

    /// Per-dependency breaker overrides, keyed by dependency name.
    pub breakers: BTreeMap<String, BreakerSettings>,
}

impl ResilienceConfig {
    /// Settings for the named dependency, falling back to the defaults.
    pub fn breaker(&self, name: &str) -> &BreakerSettings {
        self.breakers.get(name).unwrap_or(&self.breaker_defaults)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts including the first.
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,

    /// Maximum delay between attempts in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor per retry.
    pub multiplier: f64,

    /// Jitter fraction, e.g. 0.1 for ±10%.
    pub randomize_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            randomize_factor: 0.1,
        }
    }
}

impl RetrySettings {
    /// Build a [`RetryConfig`] using the default retryability classifier.
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            randomize_factor: self.randomize_factor,
            ..RetryConfig::default()
        }
    }
}

/// Circuit breaker configuration for one dependency.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures before the circuit opens.
    pub max_failures: u32,

    /// Time the circuit stays open before probing, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Probe calls admitted while half-open.
    pub half_open_requests: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout_ms: 30_000,
            half_open_requests: 1,
        }
    }
}

impl BreakerSettings {
    /// Build a closed breaker named `name`.
    pub fn build(&self, name: &str) -> CircuitBreaker {
        let reset_timeout = Duration::from_millis(self.reset_timeout_ms);
        let breaker = CircuitBreaker::new(self.max_failures, reset_timeout).with_name(name);
        breaker.set_half_open_requests(self.half_open_requests);
        breaker
    }
}

/// Agent HTTP client configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClientSettings {
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,

    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
            connect_timeout_ms: 2_000,
        }
    }
}
