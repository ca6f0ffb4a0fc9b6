//! Outbound transport to other agents.
//!
//! # Data Flow
//! ```text
//! AgentClient::send(ctx, url, message)
//!     → BreakerRegistry (breaker for host:port)
//!     → CircuitBreaker::execute
//!     → retry_with_config (transport-aware classifier)
//!     → reqwest POST, raced against the caller's context
//! ```

pub mod client;

pub use client::{is_transport_retryable, AgentClient, SendError, TransportError};
