//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (attempts > 0, jitter within [0, 1], delays ordered)
//! - Check breaker names and thresholds
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ResilienceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{BreakerSettings, ResilienceConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate `config`, collecting every error found.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        errors.push(ValidationError::new("retry.max_attempts", "must be greater than 0"));
    }
    if !(retry.multiplier.is_finite() && retry.multiplier > 0.0) {
        errors.push(ValidationError::new("retry.multiplier", "must be a positive number"));
    }
    if !(0.0..=1.0).contains(&retry.randomize_factor) {
        errors.push(ValidationError::new("retry.randomize_factor", "must be within [0, 1]"));
    }
    if retry.initial_delay_ms > retry.max_delay_ms {
        errors.push(ValidationError::new(
            "retry.initial_delay_ms",
            format!("must not exceed max_delay_ms ({})", retry.max_delay_ms),
        ));
    }

    if config.client.request_timeout_ms == 0 {
        errors.push(ValidationError::new("client.request_timeout_ms", "must be greater than 0"));
    }
    if config.client.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("client.connect_timeout_ms", "must be greater than 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    validate_breaker("breaker_defaults", &config.breaker_defaults, &mut errors);
    for (name, settings) in &config.breakers {
        if name.trim().is_empty() {
            errors.push(ValidationError::new("breakers", "breaker names must not be empty"));
            continue;
        }
        validate_breaker(&format!("breakers.{}", name), settings, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_breaker(path: &str, settings: &BreakerSettings, errors: &mut Vec<ValidationError>) {
    if settings.max_failures == 0 {
        errors.push(ValidationError::new(
            format!("{}.max_failures", path),
            "must be greater than 0",
        ));
    }
    if settings.half_open_requests == 0 {
        errors.push(ValidationError::new(
            format!("{}.half_open_requests", path),
            "must be greater than 0",
        ));
    }
}
