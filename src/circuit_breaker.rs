//! Circuit breaker guarding a downstream target.
//!
//! # States
//! - `CLOSED`: calls pass through; consecutive failures are counted.
//! - `OPEN`: calls are refused without being attempted until `next_attempt_at`.
//! - `HALF_OPEN`: calls pass through as probes; consecutive successes are counted.
//!
//! # Transitions
//! ```text
//! CLOSED    → OPEN      failure_count reaches failure_threshold
//! OPEN      → HALF_OPEN first call at or after next_attempt_at
//! HALF_OPEN → CLOSED    success_count reaches half_open_max_attempts
//! HALF_OPEN → OPEN      any single failure
//! *         → CLOSED    administrative reset
//! ```
//!
//! State and counters sit behind one mutex. Admission and outcome recording are separate
//! critical sections; the lock is never held while the guarded operation runs or while
//! telemetry is emitted. Concurrent probes are allowed once the breaker is HALF_OPEN.
//!
//! Every transition starts a new generation. An outcome is only recorded if the call was
//! admitted in the current generation; calls that straddle a transition are ignored.

use crate::clock::{Clock, SystemClock};
use crate::error::{Classify, ResilienceError};
use crate::telemetry::{self, BoxedSink, CircuitBreakerEvent, NullSink, PolicyEvent};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tower::Service;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operating mode.
    Closed,
    /// Short-circuits calls until the reset timeout elapses.
    Open,
    /// Probe mode testing whether the downstream recovered.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Whether client errors (4xx) move the breaker's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClientErrorPolicy {
    /// Client errors are the caller's fault; they count as neither success nor failure.
    #[default]
    #[serde(rename = "neutral")]
    Neutral,
    /// Every non-success, client errors included, counts as a failure.
    #[serde(rename = "failure")]
    CountAsFailure,
}

/// Errors produced when validating breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitBreakerConfigError {
    #[error("failure_threshold must be > 0 (got {provided})")]
    InvalidFailureThreshold { provided: u32 },
    #[error("reset_timeout must be > 0 (got {0:?})")]
    InvalidResetTimeout(Duration),
    #[error("half_open_max_attempts must be > 0 (got {provided})")]
    InvalidHalfOpenAttempts { provided: u32 },
}

/// Validated configuration for the circuit breaker. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_attempts: u32,
    client_errors: ClientErrorPolicy,
}

impl CircuitBreakerConfig {
    /// Create a config with validation.
    pub fn new(
        failure_threshold: u32,
        reset_timeout: Duration,
        half_open_max_attempts: u32,
    ) -> Result<Self, CircuitBreakerConfigError> {
        if failure_threshold == 0 {
            return Err(CircuitBreakerConfigError::InvalidFailureThreshold { provided: 0 });
        }
        if reset_timeout.is_zero() {
            return Err(CircuitBreakerConfigError::InvalidResetTimeout(reset_timeout));
        }
        if half_open_max_attempts == 0 {
            return Err(CircuitBreakerConfigError::InvalidHalfOpenAttempts { provided: 0 });
        }
        Ok(Self {
            failure_threshold,
            reset_timeout,
            half_open_max_attempts,
            client_errors: ClientErrorPolicy::default(),
        })
    }

    /// Choose how client errors (4xx) are counted.
    pub fn with_client_error_policy(mut self, policy: ClientErrorPolicy) -> Self {
        self.client_errors = policy;
        self
    }

    /// Consecutive failures that trip CLOSED → OPEN.
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Cool-down spent OPEN before a probe is allowed.
    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    /// Consecutive probe successes that close the breaker.
    pub fn half_open_max_attempts(&self) -> u32 {
        self.half_open_max_attempts
    }

    /// How client errors are counted.
    pub fn client_error_policy(&self) -> ClientErrorPolicy {
        self.client_errors
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            half_open_max_attempts: 3,
            client_errors: ClientErrorPolicy::default(),
        }
    }
}

/// Point-in-time view of a breaker, for observability only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Milliseconds since the Unix epoch; only set while OPEN.
    #[serde(rename = "nextAttemptTime")]
    pub next_attempt_at: Option<u64>,
}

#[derive(Debug)]
struct BreakerCore {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    next_attempt_at: Option<u64>,
    generation: u64,
}

impl BreakerCore {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            next_attempt_at: None,
            generation: 0,
        }
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.next_attempt_at = None;
        self.generation = self.generation.wrapping_add(1);
    }

    fn status(&self) -> BreakerStatus {
        BreakerStatus {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            next_attempt_at: self.next_attempt_at,
        }
    }
}

enum Admission {
    Pass { generation: u64 },
    Probe { generation: u64 },
    Rejected(BreakerStatus),
}

enum Transition {
    Opened { from: CircuitState, failure_count: u32, next_attempt_at: u64 },
    Closed,
}

/// Circuit breaker guarding an async operation.
///
/// Clones share the same underlying state, so every handle observes and affects the same
/// lifecycle.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    core: Arc<Mutex<BreakerCore>>,
    clock: Arc<dyn Clock>,
    sink: BoxedSink,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("status", &self.status())
            .field("clock", &self.clock)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a CLOSED breaker for the named target.
    ///
    /// # Examples
    /// ```
    /// use breakwater::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    /// use std::time::Duration;
    ///
    /// let config = CircuitBreakerConfig::new(5, Duration::from_secs(60), 3).unwrap();
    /// let breaker = CircuitBreaker::new("user-service", config);
    /// assert_eq!(breaker.status().state, CircuitState::Closed);
    /// ```
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            config,
            core: Arc::new(Mutex::new(BreakerCore::closed())),
            clock: Arc::new(SystemClock),
            sink: telemetry::boxed(NullSink),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub(crate) fn with_shared_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Route state-change events to a telemetry sink.
    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: Service<PolicyEvent, Response = (), Error = Infallible> + Clone + Send + Sync + 'static,
        S::Future: Send + 'static,
    {
        self.sink = telemetry::boxed(sink);
        self
    }

    pub(crate) fn with_boxed_sink(mut self, sink: BoxedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Target name this breaker guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration the breaker was built with.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Executes the provided async operation under circuit breaker protection.
    ///
    /// # Behavior
    /// - **Closed**: runs the operation; consecutive failures trip the breaker.
    /// - **Open**: refuses the call with `ResilienceError::CircuitOpen` until `next_attempt_at`,
    ///   then lets the first caller through as a probe.
    /// - **HalfOpen**: runs the operation; enough consecutive successes close the breaker and a
    ///   single failure reopens it.
    ///
    /// The operation's value or error is returned unchanged. A `CircuitOpen` coming out of the
    /// operation (a nested breaker) is not counted.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        E: Classify + Send,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        let generation = match self.admit() {
            Admission::Rejected(status) => {
                tracing::debug!(
                    target_name = %self.name,
                    next_attempt_at = status.next_attempt_at,
                    "Circuit breaker: call rejected"
                );
                self.emit(CircuitBreakerEvent::Rejected {
                    target: self.name.to_string(),
                    next_attempt_at: status.next_attempt_at.unwrap_or_default(),
                })
                .await;
                return Err(ResilienceError::CircuitOpen { status });
            }
            Admission::Probe { generation } => {
                tracing::info!(target_name = %self.name, "Circuit breaker → half-open");
                self.emit(CircuitBreakerEvent::HalfOpened { target: self.name.to_string() }).await;
                generation
            }
            Admission::Pass { generation } => generation,
        };

        let result = operation().await;

        let transition = match &result {
            Ok(_) => self.on_success(generation),
            Err(ResilienceError::CircuitOpen { .. }) => None,
            Err(ResilienceError::Inner(e)) => {
                if e.is_client_error()
                    && self.config.client_errors == ClientErrorPolicy::Neutral
                {
                    None
                } else {
                    self.on_failure(generation)
                }
            }
        };

        if let Some(transition) = transition {
            self.announce(transition).await;
        }

        result
    }

    /// Snapshot of state and counters. Never changes state.
    pub fn status(&self) -> BreakerStatus {
        self.core().status()
    }

    /// Current state only.
    pub fn state(&self) -> CircuitState {
        self.core().state
    }

    /// Force CLOSED with every counter and timestamp cleared.
    pub async fn reset(&self) -> BreakerStatus {
        let status = {
            let mut core = self.core();
            core.close();
            core.status()
        };
        tracing::info!(target_name = %self.name, "Circuit breaker reset → closed");
        self.emit(CircuitBreakerEvent::Reset { target: self.name.to_string() }).await;
        status
    }

    fn admit(&self) -> Admission {
        let now = self.clock.now_millis();
        let mut core = self.core();
        match core.state {
            CircuitState::Closed | CircuitState::HalfOpen => {
                Admission::Pass { generation: core.generation }
            }
            CircuitState::Open => {
                if now < core.next_attempt_at.unwrap_or(0) {
                    Admission::Rejected(core.status())
                } else {
                    core.state = CircuitState::HalfOpen;
                    core.success_count = 0;
                    core.next_attempt_at = None;
                    core.generation = core.generation.wrapping_add(1);
                    Admission::Probe { generation: core.generation }
                }
            }
        }
    }

    /// Any success while CLOSED resets the failure streak, so only consecutive failures trip
    /// the breaker.
    fn on_success(&self, generation: u64) -> Option<Transition> {
        let mut core = self.core();
        if core.generation != generation {
            return None;
        }
        match core.state {
            CircuitState::Closed => {
                core.failure_count = 0;
                None
            }
            CircuitState::HalfOpen => {
                core.success_count = core.success_count.saturating_add(1);
                if core.success_count >= self.config.half_open_max_attempts {
                    core.close();
                    Some(Transition::Closed)
                } else {
                    tracing::debug!(
                        target_name = %self.name,
                        successes = core.success_count,
                        required = self.config.half_open_max_attempts,
                        "Circuit breaker: half-open probe succeeded"
                    );
                    None
                }
            }
            // Unreachable with a matching generation: tripping starts a new one.
            CircuitState::Open => None,
        }
    }

    fn on_failure(&self, generation: u64) -> Option<Transition> {
        let now = self.clock.now_millis();
        let mut core = self.core();
        if core.generation != generation {
            return None;
        }
        match core.state {
            CircuitState::Closed => {
                core.failure_count = core.failure_count.saturating_add(1);
                if core.failure_count >= self.config.failure_threshold {
                    Some(self.trip(&mut core, CircuitState::Closed, now))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => Some(self.trip(&mut core, CircuitState::HalfOpen, now)),
            CircuitState::Open => None,
        }
    }

    fn trip(&self, core: &mut BreakerCore, from: CircuitState, now: u64) -> Transition {
        let reset_millis = u64::try_from(self.config.reset_timeout.as_millis()).unwrap_or(u64::MAX);
        let next_attempt_at = now.saturating_add(reset_millis);
        core.state = CircuitState::Open;
        core.success_count = 0;
        core.next_attempt_at = Some(next_attempt_at);
        core.generation = core.generation.wrapping_add(1);
        Transition::Opened { from, failure_count: core.failure_count, next_attempt_at }
    }

    async fn announce(&self, transition: Transition) {
        let event = match transition {
            Transition::Opened { from, failure_count, next_attempt_at } => {
                if from == CircuitState::HalfOpen {
                    tracing::warn!(
                        target_name = %self.name,
                        next_attempt_at,
                        "Circuit breaker: probe failed → open"
                    );
                } else {
                    tracing::error!(
                        target_name = %self.name,
                        failures = failure_count,
                        threshold = self.config.failure_threshold,
                        next_attempt_at,
                        "Circuit breaker → open"
                    );
                }
                CircuitBreakerEvent::Opened {
                    target: self.name.to_string(),
                    failure_count,
                    next_attempt_at,
                }
            }
            Transition::Closed => {
                tracing::info!(target_name = %self.name, "Circuit breaker → closed");
                CircuitBreakerEvent::Closed { target: self.name.to_string() }
            }
        };
        self.emit(event).await;
    }

    async fn emit(&self, event: CircuitBreakerEvent) {
        telemetry::emit_best_effort(self.sink.clone(), PolicyEvent::CircuitBreaker(event)).await;
    }

    fn core(&self) -> MutexGuard<'_, BreakerCore> {
        // Counters are consistent between critical sections, so a poisoned lock is still usable.
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
