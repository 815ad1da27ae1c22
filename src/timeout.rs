//! Per-attempt deadline.
//!
//! Every physical attempt against the downstream is bounded so a hung connection turns into a
//! retryable failure instead of pinning a request forever.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// The wrapped future did not finish in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timed out after {elapsed:?} (limit {timeout:?})")]
pub struct TimedOut {
    pub elapsed: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutError {
    #[error("timeout duration must be non-zero (got {0:?})")]
    Zero(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    duration: Duration,
}

impl TimeoutPolicy {
    pub fn new(duration: Duration) -> Result<Self, TimeoutError> {
        if duration.is_zero() {
            return Err(TimeoutError::Zero(duration));
        }
        Ok(Self { duration })
    }

    /// Inspect the configured timeout duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Run `operation`, converting expiry into `E::from(TimedOut)`.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, E>
    where
        E: From<TimedOut>,
        Fut: Future<Output = Result<T, E>>,
        Op: FnOnce() -> Fut,
    {
        let start = Instant::now();

        match tokio::time::timeout(self.duration, operation()).await {
            Ok(result) => result,
            Err(_) => Err(E::from(TimedOut { elapsed: start.elapsed(), timeout: self.duration })),
        }
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self { duration: Duration::from_secs(5) }
    }
}
