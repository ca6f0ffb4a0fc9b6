//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! circuit breakers and retry loops produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (transition, rejection and attempt counters)
//! ```
//!
//! # Design Decisions
//! - Structured fields (breaker, attempt, delay) rather than formatted strings
//! - Metrics are cheap counter increments on the call path

pub mod logging;
pub mod metrics;
