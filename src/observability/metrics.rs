//! Metrics collection and exposition.
//!
//! # Metrics
//! - `resilience_breaker_transitions_total` (counter): transitions by breaker, from, to
//! - `resilience_breaker_rejections_total` (counter): fail-fast rejections by breaker, reason
//! - `resilience_retry_attempts_total` (counter): attempts by outcome
//! - `resilience_retry_exhausted_total` (counter): calls that ran out of attempts
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed recorder it is a no-op
//! - The Prometheus exporter is opt-in and installed by the binary

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::State;

/// Install the Prometheus recorder and serve it on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint started");
    Ok(())
}

pub fn record_breaker_transition(breaker: &str, from: State, to: State) {
    metrics::counter!(
        "resilience_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

pub fn record_breaker_rejection(breaker: &str, reason: &'static str) {
    metrics::counter!(
        "resilience_breaker_rejections_total",
        "breaker" => breaker.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_retry_attempt(outcome: &'static str) {
    metrics::counter!("resilience_retry_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_retry_exhausted() {
    metrics::counter!("resilience_retry_exhausted_total").increment(1);
}
