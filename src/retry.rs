//! Retry engine for fallible async operations.
//!
//! Semantics:
//! - `max_retries` counts retries only, so an operation runs at most `max_retries + 1` times.
//! - Client errors ([`Classify::is_client_error`]) and `ResilienceError::CircuitOpen` are returned
//!   immediately, never retried.
//! - The delay before retry `n` (0-based) is the capped geometric [`Backoff`] for `n`, perturbed by
//!   [`Jitter`] and clamped to be non-negative.
//! - When attempts run out the last observed error is returned unchanged.
//!
//! Example
//! ```rust
//! use breakwater::error::{Classify, FailureKind};
//! use breakwater::{InstantSleeper, ResilienceError, RetryConfig, RetryEngine};
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct Flaky;
//! impl Classify for Flaky {
//!     fn failure_kind(&self) -> FailureKind { FailureKind::Transient }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let config = RetryConfig::new(2, Duration::from_millis(10), Duration::from_millis(50), 2.0, 0.0)
//!     .unwrap();
//! let engine = RetryEngine::new().with_sleeper(InstantSleeper);
//! let result: Result<(), ResilienceError<Flaky>> =
//!     engine.run(|| async { Err(ResilienceError::Inner(Flaky)) }, &config).await;
//! assert!(matches!(result, Err(ResilienceError::Inner(Flaky))));
//! # });
//! ```

use crate::backoff::{Backoff, BackoffError};
use crate::error::{Classify, ResilienceError};
use crate::jitter::{Jitter, JitterError};
use crate::random::{RandomSource, ThreadRandom};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::telemetry::{self, BoxedSink, NullSink, PolicyEvent, RetryEvent};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower::Service;

/// Errors produced while validating a retry configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RetryConfigError {
    #[error(transparent)]
    Backoff(#[from] BackoffError),
    #[error(transparent)]
    Jitter(#[from] JitterError),
}

/// Immutable retry parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    max_retries: u32,
    backoff: Backoff,
    jitter: Jitter,
}

impl RetryConfig {
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
        jitter_factor: f64,
    ) -> Result<Self, RetryConfigError> {
        let backoff = Backoff::new(initial_delay, max_delay, backoff_multiplier)?;
        let jitter = Jitter::new(jitter_factor)?;
        Ok(Self { max_retries, backoff, jitter })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Initial attempt plus retries.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn initial_delay(&self) -> Duration {
        self.backoff.initial()
    }

    pub fn max_delay(&self) -> Duration {
        self.backoff.max()
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff.multiplier()
    }

    pub fn jitter_factor(&self) -> f64 {
        self.jitter.factor()
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn jitter(&self) -> Jitter {
        self.jitter
    }

    /// Delay slept before retry `attempt_index` (0 for the first retry).
    pub fn delay_for(&self, attempt_index: u32, random: &dyn RandomSource) -> Duration {
        self.jitter.apply(self.backoff.delay(attempt_index), random)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::new_unchecked(
                Duration::from_millis(1000),
                Duration::from_millis(10_000),
                2.0,
            ),
            jitter: Jitter::new_unchecked(0.3),
        }
    }
}

/// Runs operations with bounded retries.
///
/// The engine itself is stateless between runs; it only owns the injectable sleeper, random
/// source and telemetry sink, so a single instance can be shared by every request.
#[derive(Clone)]
pub struct RetryEngine {
    sleeper: Arc<dyn Sleeper>,
    random: Arc<dyn RandomSource>,
    sink: BoxedSink,
}

impl std::fmt::Debug for RetryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryEngine")
            .field("sleeper", &self.sleeper)
            .field("random", &self.random)
            .finish()
    }
}

impl Default for RetryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryEngine {
    /// Tokio timer, thread-local RNG, no telemetry.
    pub fn new() -> Self {
        Self {
            sleeper: Arc::new(TokioSleeper),
            random: Arc::new(ThreadRandom),
            sink: telemetry::boxed(NullSink),
        }
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Provide the source of jitter draws.
    pub fn with_random<R>(mut self, random: R) -> Self
    where
        R: RandomSource + 'static,
    {
        self.random = Arc::new(random);
        self
    }

    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: Service<PolicyEvent, Response = (), Error = Infallible> + Clone + Send + Sync + 'static,
        S::Future: Send + 'static,
    {
        self.sink = telemetry::boxed(sink);
        self
    }

    /// Execute `operation` until it succeeds, fails with a non-retryable error, or runs out of
    /// attempts.
    pub async fn run<T, E, Fut, Op>(
        &self,
        mut operation: Op,
        config: &RetryConfig,
    ) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        E: Classify + Send,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let max_attempts = config.max_attempts();
        let mut attempt: u32 = 1;

        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let retryable = match &error {
                ResilienceError::CircuitOpen { .. } => false,
                ResilienceError::Inner(e) => !e.is_client_error(),
            };
            if !retryable {
                return Err(error);
            }

            if attempt >= max_attempts {
                tracing::debug!(attempts = attempt, "Retry: attempts exhausted");
                self.emit(RetryEvent::Exhausted { attempts: attempt }).await;
                return Err(error);
            }

            let delay = config.delay_for(attempt - 1, self.random.as_ref());
            tracing::debug!(retry = attempt, max_retries = config.max_retries(), ?delay, "Retry: backing off");
            self.emit(RetryEvent::Attempt { attempt, delay }).await;
            self.sleeper.sleep(delay).await;
            attempt += 1;
        }
    }

    async fn emit(&self, event: RetryEvent) {
        telemetry::emit_best_effort(self.sink.clone(), PolicyEvent::Retry(event)).await;
    }
}
