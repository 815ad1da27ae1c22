//! Uniform random draws for jitter.
//!
//! Every source yields values in `[-1.0, 1.0]`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};

/// Source of symmetric uniform draws.
pub trait RandomSource: Send + Sync + std::fmt::Debug {
    /// A draw from `U(-1, 1)`.
    fn symmetric_unit(&self) -> f64;
}

/// Draws from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn symmetric_unit(&self) -> f64 {
        rand::rng().random_range(-1.0..=1.0)
    }
}

/// Reproducible sequence from a fixed seed.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

impl RandomSource for SeededRandom {
    fn symmetric_unit(&self) -> f64 {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).random_range(-1.0..=1.0)
    }
}

/// Always returns the same draw, clamped into `[-1, 1]`.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(f64);

impl FixedRandom {
    pub fn new(value: f64) -> Self {
        let value = if value.is_nan() { 0.0 } else { value.clamp(-1.0, 1.0) };
        Self(value)
    }
}

impl RandomSource for FixedRandom {
    fn symmetric_unit(&self) -> f64 {
        self.0
    }
}
