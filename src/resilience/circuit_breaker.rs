//! Circuit breaker for outbound agent calls.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: a bounded set of probe calls tests recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= max_failures
//! Open → Half-Open: first call after reset_timeout has elapsed
//! Half-Open → Closed: a probe succeeds
//! Half-Open → Open: a probe fails
//! ```
//!
//! # Design Decisions
//! - One breaker per logical dependency (see `registry.rs`)
//! - No timers: Open → Half-Open is a time comparison at call time
//! - The lock is held for admission and bookkeeping only, never while the call runs
//! - Observers are notified off the calling task and never block `execute`

use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::observability::metrics;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Admission policy of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state transition, as published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: State,
    pub to: State,
}

/// Errors returned by [`CircuitBreaker::execute`].
///
/// `Open` and `TooManyRequests` are rejections: the operation was never invoked.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open.
    #[error("circuit breaker is open")]
    Open,

    /// The half-open probe budget is used up.
    #[error("too many requests while circuit breaker is half-open")]
    TooManyRequests,

    /// The operation ran and failed.
    #[error(transparent)]
    Operation(E),
}

impl<E> BreakerError<E> {
    /// True if the breaker refused the call without running it.
    pub fn is_rejection(&self) -> bool {
        matches!(self, BreakerError::Open | BreakerError::TooManyRequests)
    }

    /// The operation's own error, if it ran.
    pub fn into_operation(self) -> Option<E> {
        match self {
            BreakerError::Operation(err) => Some(err),
            _ => None,
        }
    }
}

/// Observer invoked with `(from, to)` on every transition.
pub type StateChangeCallback = Arc<dyn Fn(State, State) + Send + Sync>;

struct Inner {
    state: State,
    failures: u32,
    last_failure_time: Option<Instant>,
    half_open_attempts: u32,
    half_open_requests: u32,
    /// Bumped on every entry into Half-Open; ties probes to their window.
    generation: u64,
    on_state_change: Option<StateChangeCallback>,
    /// Published under the lock so subscribers see transitions in state order.
    events: broadcast::Sender<StateChange>,
}

struct Transition {
    change: StateChange,
    callback: Option<StateChangeCallback>,
}

impl Inner {
    fn set_state(&mut self, to: State) -> Option<Transition> {
        let from = self.state;
        if from == to {
            return None;
        }

        self.state = to;
        if from == State::Closed || to == State::Closed {
            self.failures = 0;
        }
        if to == State::HalfOpen {
            self.half_open_attempts = 0;
            self.generation = self.generation.wrapping_add(1);
        }

        let change = StateChange { from, to };
        // Err only means nobody is subscribed.
        let _ = self.events.send(change);

        Some(Transition {
            change,
            callback: self.on_state_change.clone(),
        })
    }
}

/// A circuit breaker guarding a single logical dependency.
///
/// # Example
///
/// ```rust,no_run
/// # async fn demo() {
/// use std::time::Duration;
/// use agent_resilience::resilience::{retry_with_config, CircuitBreaker, Context, RetryConfig};
///
/// let breaker = CircuitBreaker::new(5, Duration::from_secs(30)).with_name("payment");
/// let ctx = Context::background();
/// let config = RetryConfig::default();
///
/// let result = breaker
///     .execute(|| retry_with_config(&ctx, &config, || async { Ok::<_, std::io::Error>(()) }))
///     .await;
/// # let _ = result;
/// # }
/// ```
pub struct CircuitBreaker {
    name: String,
    max_failures: u32,
    reset_timeout: Duration,
    inner: RwLock<Inner>,
}

/// Admission granted by `before_call`.
struct Permit {
    /// Half-Open window the probe was admitted in.
    probe: Option<u64>,
}

impl CircuitBreaker {
    /// Create a closed breaker that opens after `max_failures` consecutive failures
    /// and probes again once `reset_timeout` has elapsed.
    pub fn new(max_failures: u32, reset_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            name: "default".to_string(),
            max_failures: max_failures.max(1),
            reset_timeout,
            inner: RwLock::new(Inner {
                state: State::Closed,
                failures: 0,
                last_failure_time: None,
                half_open_attempts: 0,
                half_open_requests: 1,
                generation: 0,
                on_state_change: None,
                events,
            }),
        }
    }

    /// Set the name used in logs and metrics.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }

    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    /// Run `operation` if the breaker admits it, and record the outcome.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.before_call::<E>()?;
        let mut guard = ProbeGuard {
            breaker: self,
            probe: permit.probe,
        };

        let result = operation().await;

        guard.probe = None;
        self.after_call(result.is_ok());
        result.map_err(BreakerError::Operation)
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.read().state
    }

    /// Consecutive failures recorded in the current window.
    pub fn failures(&self) -> u32 {
        self.read().failures
    }

    /// Force the breaker closed and clear all counters.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.write();
            let transition = inner.set_state(State::Closed);
            inner.failures = 0;
            inner.half_open_attempts = 0;
            inner.last_failure_time = None;
            transition
        };
        tracing::info!(breaker = %self.name, "Circuit breaker reset");
        self.notify(transition);
    }

    /// Force the breaker open, as if a failure had just been recorded.
    pub fn trip(&self) {
        let transition = {
            let mut inner = self.write();
            let transition = inner.set_state(State::Open);
            inner.last_failure_time = Some(Instant::now());
            transition
        };
        tracing::warn!(breaker = %self.name, "Circuit breaker tripped manually");
        self.notify(transition);
    }

    /// Install an observer for state transitions, replacing any previous one.
    ///
    /// The callback runs on a blocking-pool thread (or a dedicated thread outside a
    /// Tokio runtime); delivery order relative to other transitions is not guaranteed.
    pub fn set_on_state_change<F>(&self, callback: F)
    where
        F: Fn(State, State) + Send + Sync + 'static,
    {
        self.write().on_state_change = Some(Arc::new(callback));
    }

    /// Maximum probes admitted while half-open. Values below 1 are raised to 1.
    pub fn set_half_open_requests(&self, requests: u32) {
        self.write().half_open_requests = requests.max(1);
    }

    /// Receive transitions in order on a bounded channel. Slow receivers lag
    /// rather than block the breaker.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.read().events.subscribe()
    }

    fn before_call<E>(&self) -> Result<Permit, BreakerError<E>> {
        let (transition, permit) = {
            let mut inner = self.write();
            let state = inner.state;
            match state {
                State::Closed => return Ok(Permit { probe: None }),
                State::Open => {
                    let cooled_down = inner
                        .last_failure_time
                        .map_or(true, |at| at.elapsed() > self.reset_timeout);
                    if !cooled_down {
                        drop(inner);
                        metrics::record_breaker_rejection(&self.name, "open");
                        return Err(BreakerError::Open);
                    }

                    let transition = inner.set_state(State::HalfOpen);
                    inner.half_open_attempts = 1;
                    (transition, Permit { probe: Some(inner.generation) })
                }
                State::HalfOpen => {
                    if inner.half_open_attempts >= inner.half_open_requests {
                        drop(inner);
                        metrics::record_breaker_rejection(&self.name, "too_many_requests");
                        return Err(BreakerError::TooManyRequests);
                    }
                    inner.half_open_attempts += 1;
                    return Ok(Permit { probe: Some(inner.generation) });
                }
            }
        };

        self.notify(transition);
        Ok(permit)
    }

    fn after_call(&self, success: bool) {
        let transition = {
            let mut inner = self.write();
            if success {
                match inner.state {
                    State::Closed => {
                        inner.failures = 0;
                        None
                    }
                    State::HalfOpen => inner.set_state(State::Closed),
                    State::Open => None,
                }
            } else {
                match inner.state {
                    State::Closed => {
                        inner.failures += 1;
                        inner.last_failure_time = Some(Instant::now());
                        if inner.failures >= self.max_failures {
                            inner.set_state(State::Open)
                        } else {
                            None
                        }
                    }
                    State::HalfOpen => {
                        let transition = inner.set_state(State::Open);
                        inner.failures = 1;
                        inner.last_failure_time = Some(Instant::now());
                        transition
                    }
                    State::Open => None,
                }
            }
        };

        self.notify(transition);
    }

    /// Return a half-open slot held by a probe that never completed.
    fn release_probe(&self, generation: u64) {
        let mut inner = self.write();
        if inner.state == State::HalfOpen && inner.generation == generation {
            inner.half_open_attempts = inner.half_open_attempts.saturating_sub(1);
        }
    }

    fn notify(&self, transition: Option<Transition>) {
        let Some(Transition { change, callback }) = transition else {
            return;
        };

        match change.to {
            State::Open => tracing::warn!(
                breaker = %self.name,
                from = %change.from,
                to = %change.to,
                "Circuit breaker state changed"
            ),
            _ => tracing::info!(
                breaker = %self.name,
                from = %change.from,
                to = %change.to,
                "Circuit breaker state changed"
            ),
        }
        metrics::record_breaker_transition(&self.name, change.from, change.to);

        if let Some(callback) = callback {
            let StateChange { from, to } = change;
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn_blocking(move || callback(from, to));
                }
                Err(_) => {
                    std::thread::spawn(move || callback(from, to));
                }
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.read();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("failures", &inner.failures)
            .field("half_open_attempts", &inner.half_open_attempts)
            .field("half_open_requests", &inner.half_open_requests)
            .field("max_failures", &self.max_failures)
            .field("reset_timeout", &self.reset_timeout)
            .finish()
    }
}

/// Frees the half-open slot if an admitted probe is dropped before finishing.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    probe: Option<u64>,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.probe.take() {
            self.breaker.release_probe(generation);
        }
    }
}
