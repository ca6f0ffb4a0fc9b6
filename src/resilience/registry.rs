//! Per-dependency breaker registry.
//!
//! # Responsibilities
//! - Hand out one breaker per logical dependency (agent, gateway, external service)
//! - Apply per-dependency settings from configuration, falling back to defaults
//! - Provide state snapshots for health reporting
//!
//! # Design Decisions
//! - Breakers are created lazily on first use and live for the registry's lifetime
//! - Concurrent map so lookups never contend with unrelated dependencies

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::schema::BreakerSettings;
use crate::resilience::circuit_breaker::{CircuitBreaker, State};

/// Concurrent map of dependency name to breaker.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    overrides: BTreeMap<String, BreakerSettings>,
    defaults: BreakerSettings,
}

impl BreakerRegistry {
    /// Create a registry using `defaults` for unknown names and `overrides` by name.
    pub fn new(defaults: BreakerSettings, overrides: BTreeMap<String, BreakerSettings>) -> Self {
        Self {
            breakers: DashMap::new(),
            overrides,
            defaults,
        }
    }

    /// The breaker for `name`, created on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }

        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let settings = self.overrides.get(name).unwrap_or(&self.defaults);
                tracing::debug!(
                    breaker = %name,
                    max_failures = settings.max_failures,
                    reset_timeout_ms = settings.reset_timeout_ms,
                    half_open_requests = settings.half_open_requests,
                    "Registering circuit breaker"
                );
                Arc::new(settings.build(name))
            })
            .clone()
    }

    /// The breaker for `name`, if one has been created.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.clone())
    }

    /// Snapshot of every breaker's state, sorted by name.
    pub fn states(&self) -> Vec<(String, State)> {
        let mut states: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Force every breaker closed.
    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
