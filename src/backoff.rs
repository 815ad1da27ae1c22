//! Capped geometric backoff.
//!
//! Attempt semantics: `attempt_index` counts retries, starting at `0` for the first retry (the
//! delay slept after the initial call failed). The delay for index `n` is
//! `min(initial * multiplier^n, max)`.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use breakwater::Backoff;
//!
//! let backoff = Backoff::new(Duration::from_millis(1000), Duration::from_millis(10_000), 2.0)
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::from_millis(1000));
//! assert_eq!(backoff.delay(1), Duration::from_millis(2000));
//! assert_eq!(backoff.delay(2), Duration::from_millis(4000));
//! assert_eq!(backoff.delay(9), Duration::from_millis(10_000)); // capped
//! ```

use std::time::Duration;

/// Hard ceiling applied even when `max` is larger (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackoffError {
    #[error("backoff multiplier must be finite and >= 1.0 (got {0})")]
    InvalidMultiplier(f64),
    #[error("max delay ({max:?}) must be >= initial delay ({initial:?})")]
    MaxLessThanInitial { initial: Duration, max: Duration },
}

/// Exponential backoff with a cap.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    /// Build a validated backoff.
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Result<Self, BackoffError> {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(BackoffError::InvalidMultiplier(multiplier));
        }
        if max < initial {
            return Err(BackoffError::MaxLessThanInitial { initial, max });
        }
        Ok(Self { initial, max, multiplier })
    }

    /// Caller guarantees the invariants checked by [`Backoff::new`].
    pub(crate) const fn new_unchecked(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self { initial, max, multiplier }
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Un-jittered delay before retry number `attempt_index` (0-based).
    pub fn delay(&self, attempt_index: u32) -> Duration {
        let cap = self.max.min(MAX_BACKOFF);
        let exponent = i32::try_from(attempt_index).unwrap_or(i32::MAX);
        let nanos = self.initial.as_nanos() as f64 * self.multiplier.powi(exponent);

        if !nanos.is_finite() || nanos >= cap.as_nanos() as f64 {
            return cap;
        }
        Duration::from_nanos(nanos.round() as u64)
    }
}
