#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # breakwater
//!
//! Resilient dispatch in front of an unreliable downstream service: a circuit breaker decides
//! whether a call is attempted at all, and a retry engine with exponential backoff and jitter
//! decides how often and when to try again.
//!
//! ## Features
//!
//! - **Circuit breaker** with CLOSED / OPEN / HALF_OPEN states and status introspection
//! - **Retry engine** with capped exponential backoff and symmetric jitter
//! - **Failure classification**: client errors are never retried
//! - **Per-attempt timeouts** integrated with tokio
//! - **Dispatch façade** and an axum HTTP server forwarding downstream responses verbatim
//! - **Injectable clock, sleeper and randomness** for deterministic tests
//!
//! ## Quick Start
//!
//! ```rust
//! use breakwater::error::{Classify, FailureKind};
//! use breakwater::{
//!     CircuitBreaker, CircuitBreakerConfig, InstantSleeper, ResilienceError, RetryConfig,
//!     RetryEngine,
//! };
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct Unavailable;
//! impl Classify for Unavailable {
//!     fn failure_kind(&self) -> FailureKind { FailureKind::Transient }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let breaker = CircuitBreaker::new(
//!     "user-service",
//!     CircuitBreakerConfig::new(5, Duration::from_secs(60), 3).unwrap(),
//! );
//! let retry = RetryEngine::new().with_sleeper(InstantSleeper);
//! let config = RetryConfig::default();
//!
//! let result: Result<u32, ResilienceError<Unavailable>> = breaker
//!     .execute(|| retry.run(|| async { Ok(200) }, &config))
//!     .await;
//! assert_eq!(result.unwrap(), 200);
//! # });
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod dispatch;
pub mod downstream;
pub mod error;
pub mod jitter;
pub mod logging;
pub mod random;
pub mod registry;
pub mod retry;
pub mod server;
pub mod settings;
pub mod sleeper;
pub mod telemetry;
pub mod timeout;

// Re-exports
pub use backoff::Backoff;
pub use circuit_breaker::{
    BreakerStatus, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigError, CircuitState,
    ClientErrorPolicy,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{DispatchError, Dispatcher, DispatcherBuilder, UserRoutes};
pub use downstream::{Downstream, DownstreamCall, DownstreamError, DownstreamResponse, HttpDownstream};
pub use error::ResilienceError;
pub use jitter::Jitter;
pub use random::{FixedRandom, RandomSource, SeededRandom, ThreadRandom};
pub use registry::{BreakerRegistry, RegistryError};
pub use retry::{RetryConfig, RetryConfigError, RetryEngine};
pub use settings::{ConfigError, Settings};
pub use sleeper::{InstantSleeper, RecordingSleeper, Sleeper, TokioSleeper};
pub use timeout::{TimedOut, TimeoutPolicy};
