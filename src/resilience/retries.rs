//! Retry engine.
//!
//! # Responsibilities
//! - Re-run a failed operation with growing, jittered delays
//! - Classify errors as retryable or terminal via a predicate
//! - Stop immediately when the caller's context is cancelled or expires
//!
//! # Design Decisions
//! - Terminal errors are returned unchanged, never wrapped
//! - Only running out of attempts wraps the last error (`MaxRetriesExceeded`)
//! - Context errors are surfaced as `Cancelled` and never count as attempts
//! - No state survives between calls; each call owns its counter and delay

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::observability::metrics;
use crate::resilience::backoff::{apply_jitter, grow_delay, RetryPolicy};
use crate::resilience::context::{Context, ContextError};

/// Classifier deciding whether an error is worth retrying.
pub type RetryPredicate = Arc<dyn Fn(&(dyn Error + 'static)) -> bool + Send + Sync>;

/// Parameters for [`retry_with_config`].
#[derive(Clone)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling on the computed delay.
    pub max_delay: Duration,
    /// Growth factor applied after each retry.
    pub multiplier: f64,
    /// Jitter fraction in `[0, 1]`.
    pub randomize_factor: f64,
    /// Returns `false` for errors that must not be retried.
    pub retry_if: RetryPredicate,
}

impl RetryConfig {
    /// Replace the retryability predicate.
    pub fn with_retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&(dyn Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Arc::new(predicate);
        self
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            randomize_factor: 0.1,
            retry_if: Arc::new(is_retryable),
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("randomize_factor", &self.randomize_factor)
            .field("retry_if", &"<predicate>")
            .finish()
    }
}

/// The default configuration: 3 attempts, 100ms doubling up to 10s, 10% jitter.
pub fn default_retry_config() -> RetryConfig {
    RetryConfig::default()
}

/// Errors returned by the retry engine.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The caller's context was cancelled or expired.
    #[error(transparent)]
    Cancelled(ContextError),

    /// The operation failed with an error classified as terminal.
    #[error(transparent)]
    Operation(E),

    /// Every attempt failed with a retryable error.
    #[error("max retries exceeded after {attempts} attempts")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        source: E,
    },
}

impl<E> RetryError<E> {
    /// True when the caller gave up rather than the policy.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled(_))
    }

    /// Attempt count for exhausted retries.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            RetryError::MaxRetriesExceeded { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// The last error returned by the operation, if it ran.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Operation(err)
            | RetryError::MaxRetriesExceeded { source: err, .. } => Some(err),
            RetryError::Cancelled(_) => None,
        }
    }

    /// Unwrap into the operation's own error.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Operation(err)
            | RetryError::MaxRetriesExceeded { source: err, .. } => Some(err),
            RetryError::Cancelled(_) => None,
        }
    }
}

/// Default classifier: everything is retryable except context cancellation or
/// deadline errors anywhere in the source chain.
pub fn is_retryable(err: &(dyn Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if err.downcast_ref::<ContextError>().is_some() {
            return false;
        }
        current = err.source();
    }
    true
}

/// Retry with [`RetryConfig::default`].
pub async fn retry<T, E, F, Fut>(ctx: &Context, operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Error + 'static,
{
    retry_with_config(ctx, &RetryConfig::default(), operation).await
}

/// Retry with exponential backoff starting at `initial_delay`, up to `max_attempts` attempts.
pub async fn retry_with_backoff<T, E, F, Fut>(
    ctx: &Context,
    max_attempts: u32,
    initial_delay: Duration,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Error + 'static,
{
    let config = RetryConfig {
        max_attempts,
        initial_delay,
        ..RetryConfig::default()
    };
    retry_with_config(ctx, &config, operation).await
}

/// Run `operation` up to `config.max_attempts` times.
///
/// The context is checked before every attempt, including the first. A
/// `max_attempts` of zero is treated as one.
pub async fn retry_with_config<T, E, F, Fut>(
    ctx: &Context,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Error + 'static,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 0;

    loop {
        if let Some(err) = ctx.err() {
            return Err(RetryError::Cancelled(err));
        }

        attempt += 1;
        let err = match operation().await {
            Ok(value) => {
                metrics::record_retry_attempt("success");
                return Ok(value);
            }
            Err(err) => err,
        };
        metrics::record_retry_attempt("failure");

        if !(config.retry_if)(&err) {
            tracing::debug!(attempt, error = %err, "Error is not retryable");
            return Err(RetryError::Operation(err));
        }

        if attempt >= max_attempts {
            tracing::warn!(attempts = attempt, error = %err, "Retries exhausted");
            metrics::record_retry_exhausted();
            return Err(RetryError::MaxRetriesExceeded {
                attempts: max_attempts,
                source: err,
            });
        }

        let wait = apply_jitter(delay, config.randomize_factor);
        tracing::debug!(attempt, delay = ?wait, error = %err, "Retrying after failure");
        backoff_sleep(ctx, wait).await.map_err(RetryError::Cancelled)?;

        delay = grow_delay(delay, config.multiplier, config.max_delay);
    }
}

/// Run `operation` until it succeeds or `policy` declines another attempt.
///
/// When the policy stops, the last error is returned as `Operation`.
pub async fn retry_with_policy<T, E, F, Fut, P>(
    ctx: &Context,
    policy: &P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Error + 'static,
    P: RetryPolicy + ?Sized,
{
    let mut attempt: u32 = 0;

    loop {
        if let Some(err) = ctx.err() {
            return Err(RetryError::Cancelled(err));
        }

        let err = match operation().await {
            Ok(value) => {
                metrics::record_retry_attempt("success");
                return Ok(value);
            }
            Err(err) => err,
        };
        metrics::record_retry_attempt("failure");

        if !policy.should_retry(&err, attempt) {
            tracing::debug!(attempt, error = %err, "Retry policy declined another attempt");
            return Err(RetryError::Operation(err));
        }

        let wait = policy.next_delay(attempt);
        tracing::debug!(attempt, delay = ?wait, error = %err, "Retrying after failure");
        backoff_sleep(ctx, wait).await.map_err(RetryError::Cancelled)?;

        attempt = attempt.saturating_add(1);
    }
}

/// Sleep for `delay` unless the context finishes first.
async fn backoff_sleep(ctx: &Context, delay: Duration) -> Result<(), ContextError> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        err = ctx.done() => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::backoff::{ExponentialBackoffPolicy, LinearBackoffPolicy};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[derive(Debug, thiserror::Error)]
    enum AgentError {
        #[error("agent unreachable")]
        Unreachable,
        #[error("message rejected: {0}")]
        Rejected(&'static str),
        #[error("call abandoned")]
        Abandoned(#[source] ContextError),
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            randomize_factor: 0.0,
            ..RetryConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = default_retry_config();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay, Duration::from_millis(100));
        assert_eq!(config.max_delay, Duration::from_secs(10));
        assert_eq!(config.multiplier, 2.0);
        assert_eq!(config.randomize_factor, 0.1);
        assert!((config.retry_if)(&AgentError::Unreachable));
        assert!(!(config.retry_if)(&ContextError::DeadlineExceeded));
    }

    #[test]
    fn test_is_retryable_walks_source_chain() {
        assert!(is_retryable(&AgentError::Rejected("bad signature")));
        assert!(!is_retryable(&ContextError::Canceled));
        assert!(!is_retryable(&AgentError::Abandoned(ContextError::Canceled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let result = retry(&Context::background(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, AgentError>("delivered")
        })
        .await;

        assert_eq!(result.unwrap(), "delivered");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_config(&Context::background(), &fast_config(5), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AgentError::Unreachable)
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            multiplier: 2.0,
            randomize_factor: 0.1,
            ..RetryConfig::default()
        }
        .with_retry_if(|_| true);

        let mut calls = Vec::new();
        let result = retry_with_config(&Context::background(), &config, || {
            calls.push(Instant::now());
            async { Err::<(), _>(AgentError::Unreachable) }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts(), Some(3));
        assert!(matches!(err.last_error(), Some(AgentError::Unreachable)));
        assert_eq!(err.to_string(), "max retries exceeded after 3 attempts");
        let source = err.source().expect("exhaustion keeps the last error as source");
        assert!(source.downcast_ref::<AgentError>().is_some());
        assert_eq!(source.to_string(), "agent unreachable");

        assert_eq!(calls.len(), 3);
        let first_gap = calls[1] - calls[0];
        let second_gap = calls[2] - calls[1];
        assert!(
            first_gap >= Duration::from_millis(9) && first_gap <= Duration::from_millis(12),
            "{:?}",
            first_gap
        );
        assert!(
            second_gap >= Duration::from_millis(18) && second_gap <= Duration::from_millis(23),
            "{:?}",
            second_gap
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_is_not_wrapped() {
        let config = fast_config(5).with_retry_if(|err| {
            !matches!(err.downcast_ref::<AgentError>(), Some(AgentError::Rejected(_)))
        });

        let calls = AtomicU32::new(0);
        let result = retry_with_config(&Context::background(), &config, || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err::<(), _>(AgentError::Unreachable)
            } else {
                Err(AgentError::Rejected("tampered payload"))
            }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Operation(AgentError::Rejected(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_attempt() {
        let ctx = Context::background();
        ctx.cancel();

        let calls = AtomicU32::new(0);
        let result = retry(&ctx, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, AgentError>(())
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled(ContextError::Canceled))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff_sleep() {
        let ctx = Context::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let result = retry_with_backoff(&ctx, 5, Duration::from_secs(30), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(AgentError::Unreachable)
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled(ContextError::Canceled))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_retries() {
        let ctx = Context::background().with_timeout(Duration::from_millis(25));
        let calls = AtomicU32::new(0);
        let result = retry_with_config(&ctx, &fast_config(10), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(AgentError::Unreachable)
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled(ContextError::DeadlineExceeded))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_error_from_operation_is_terminal() {
        let calls = AtomicU32::new(0);
        let result = retry_with_config(&Context::background(), &fast_config(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(AgentError::Abandoned(ContextError::DeadlineExceeded))
        })
        .await;

        assert!(matches!(result, Err(RetryError::Operation(AgentError::Abandoned(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_growth_is_capped() {
        let config = RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 100.0,
            randomize_factor: 0.0,
            ..RetryConfig::default()
        };

        let started = Instant::now();
        let result = retry_with_config(&Context::background(), &config, || async {
            Err::<(), _>(AgentError::Unreachable)
        })
        .await;

        assert_eq!(result.unwrap_err().attempts(), Some(4));
        // 10ms + 50ms + 50ms
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_millis(110) && elapsed <= Duration::from_millis(115),
            "{:?}",
            elapsed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_governs_termination() {
        let policy = ExponentialBackoffPolicy {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
            randomize_factor: 0.0,
            max_attempts: 4,
        };

        let calls = AtomicU32::new(0);
        let result = retry_with_policy(&Context::background(), &policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(AgentError::Unreachable)
        })
        .await;

        assert!(matches!(result, Err(RetryError::Operation(AgentError::Unreachable))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_as_trait_object() {
        let policy: Box<dyn RetryPolicy> = Box::new(LinearBackoffPolicy {
            initial_delay: Duration::from_millis(5),
            increment: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            max_attempts: 3,
        });

        let calls = AtomicU32::new(0);
        let result = retry_with_policy(&Context::background(), policy.as_ref(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AgentError::Unreachable)
            } else {
                Ok("ack")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ack");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_respects_cancellation() {
        struct Forever;

        impl RetryPolicy for Forever {
            fn next_delay(&self, _attempt: u32) -> Duration {
                Duration::from_millis(10)
            }

            fn should_retry(&self, _err: &(dyn Error + 'static), _attempt: u32) -> bool {
                true
            }
        }

        let ctx = Context::background().with_timeout(Duration::from_millis(35));
        let calls = AtomicU32::new(0);
        let result = retry_with_policy(&ctx, &Forever, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(AgentError::Unreachable)
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled(ContextError::DeadlineExceeded))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
