//! Symmetric multiplicative jitter.
//!
//! A delay `d` becomes `max(0, d + d * factor * u)` with `u` drawn from `U(-1, 1)`, so with
//! `factor = 0.3` every result lies in `[0.7 d, 1.3 d]`. A factor of `0` disables jitter and
//! keeps retry schedules deterministic.
//!
//! Notes:
//! - RNG: the draw comes from a [`RandomSource`] supplied by the caller; tests inject
//!   `FixedRandom` or `SeededRandom`.
//! - Factors above `1.0` are rejected: they could push the lower bound below zero and the clamp
//!   would then collapse many retries onto an immediate re-attempt.

use crate::random::RandomSource;
use std::time::Duration;

/// Errors produced when validating a jitter factor.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JitterError {
    #[error("jitter factor must be within [0, 1] (got {0})")]
    InvalidFactor(f64),
}

/// Jitter strategy for randomizing retry delays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jitter {
    factor: f64,
}

impl Jitter {
    pub fn new(factor: f64) -> Result<Self, JitterError> {
        if !(0.0..=1.0).contains(&factor) {
            return Err(JitterError::InvalidFactor(factor));
        }
        Ok(Self { factor })
    }

    /// Caller guarantees `factor` lies in `[0, 1]`.
    pub(crate) const fn new_unchecked(factor: f64) -> Self {
        Self { factor }
    }

    /// No jitter: delays pass through unchanged.
    pub fn none() -> Self {
        Self { factor: 0.0 }
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Perturb `delay` using one draw from `random`.
    pub fn apply(&self, delay: Duration, random: &dyn RandomSource) -> Duration {
        if self.factor == 0.0 || delay.is_zero() {
            return delay;
        }
        let base = delay.as_nanos() as f64;
        let jittered = base + base * self.factor * random.symmetric_unit();
        if !jittered.is_finite() {
            return delay;
        }
        Duration::from_nanos(jittered.max(0.0).round() as u64)
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self::none()
    }
}
