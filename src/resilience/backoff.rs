//! Backoff delays, jitter, and pluggable retry policies.
//!
//! # Design Decisions
//! - Jitter is symmetric: `delay ± delay * factor`, sampled uniformly, never negative
//! - Growth is capped at the maximum delay before it is ever slept on
//! - Policies are stateless; the driver loop owns the attempt counter

use std::error::Error;
use std::time::Duration;

use rand::Rng;

use crate::resilience::retries::is_retryable;

/// Apply symmetric jitter to `delay`.
///
/// `factor` is clamped to `[0, 1]`; a factor of zero returns `delay` unchanged.
pub fn apply_jitter(delay: Duration, factor: f64) -> Duration {
    if delay.is_zero() || factor.is_nan() || factor <= 0.0 {
        return delay;
    }

    let base = delay.as_secs_f64();
    let delta = base * factor.min(1.0);
    let jittered = rand::thread_rng().gen_range((base - delta)..=(base + delta));

    saturating_secs(jittered)
}

/// Grow `delay` by `multiplier`, capped at `max`.
pub fn grow_delay(delay: Duration, multiplier: f64, max: Duration) -> Duration {
    let grown = delay.as_secs_f64() * multiplier;
    if !grown.is_finite() || grown >= max.as_secs_f64() {
        return max;
    }
    saturating_secs(grown)
}

/// Seconds to a `Duration`, clamped to `[0, Duration::MAX]`.
fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

/// Strategy deciding whether to retry and how long to wait.
///
/// `attempt` is zero-based: `0` means the first call just failed. The driver
/// never stops on its own, so `should_retry` must bound `attempt`.
pub trait RetryPolicy: Send + Sync {
    /// Delay to sleep before the attempt following `attempt`.
    fn next_delay(&self, attempt: u32) -> Duration;

    /// Whether `err`, observed on `attempt`, warrants another try.
    fn should_retry(&self, err: &(dyn Error + 'static), attempt: u32) -> bool;
}

/// Exponential backoff: `initial_delay * multiplier^attempt`, capped, jittered.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub randomize_factor: f64,
    /// Total attempts including the first.
    pub max_attempts: u32,
}

impl Default for ExponentialBackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            randomize_factor: 0.1,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy for ExponentialBackoffPolicy {
    fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = if !raw.is_finite() || raw >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            saturating_secs(raw)
        };
        apply_jitter(capped, self.randomize_factor)
    }

    fn should_retry(&self, err: &(dyn Error + 'static), attempt: u32) -> bool {
        attempt.saturating_add(1) < self.max_attempts && is_retryable(err)
    }
}

/// Linear backoff: `initial_delay + increment * attempt`, capped.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearBackoffPolicy {
    pub initial_delay: Duration,
    pub increment: Duration,
    pub max_delay: Duration,
    /// Total attempts including the first.
    pub max_attempts: u32,
}

impl Default for LinearBackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            increment: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy for LinearBackoffPolicy {
    fn next_delay(&self, attempt: u32) -> Duration {
        self.increment
            .checked_mul(attempt)
            .and_then(|step| self.initial_delay.checked_add(step))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    fn should_retry(&self, err: &(dyn Error + 'static), attempt: u32) -> bool {
        attempt.saturating_add(1) < self.max_attempts && is_retryable(err)
    }
}
