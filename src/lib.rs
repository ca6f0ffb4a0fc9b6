//! Resilience layer for inter-agent message routing.
//!
//! Circuit breakers and a retry engine that protect callers when an outbound
//! call to another agent, a gateway, or an external service becomes slow or
//! error-prone.

pub mod config;
pub mod observability;
pub mod resilience;
pub mod transport;

pub use config::ResilienceConfig;
pub use resilience::{BreakerError, CircuitBreaker, Context, RetryConfig, RetryError, State};
pub use transport::AgentClient;
