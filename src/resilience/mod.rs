//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call to another agent, gateway or external service:
//!     → registry.rs (breaker for this dependency)
//!     → circuit_breaker.rs (fail fast while the dependency is presumed down)
//!     → retries.rs (retry retryable failures with backoff.rs delays)
//!     → context.rs (stop when the caller cancels or the deadline passes)
//! ```
//!
//! # Design Decisions
//! - Breaker and retry engine are independent; callers compose them
//! - Both wrap an arbitrary closure returning a `Result` future; no transport knowledge
//! - Breaker rejections, operation errors, exhaustion and cancellation are distinct variants
//! - Everything is in-process and per instance; nothing is persisted

pub mod backoff;
pub mod circuit_breaker;
pub mod context;
pub mod registry;
pub mod retries;

pub use backoff::{ExponentialBackoffPolicy, LinearBackoffPolicy, RetryPolicy};
pub use circuit_breaker::{BreakerError, CircuitBreaker, State, StateChange};
pub use context::{Context, ContextError};
pub use registry::BreakerRegistry;
pub use retries::{
    default_retry_config, is_retryable, retry, retry_with_backoff, retry_with_config,
    retry_with_policy, RetryConfig, RetryError,
};
