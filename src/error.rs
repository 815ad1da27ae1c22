//! Error types shared by the retry engine and circuit breaker.
use crate::circuit_breaker::BreakerStatus;
use std::fmt;

/// How a failed attempt should be treated by the resilience layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The request itself is wrong (4xx). Retrying cannot help.
    Client,
    /// Server error, timeout or connection failure. Worth retrying.
    Transient,
}

/// Classification hook implemented by downstream error types.
pub trait Classify {
    fn failure_kind(&self) -> FailureKind;

    fn is_client_error(&self) -> bool {
        self.failure_kind() == FailureKind::Client
    }
}

/// Outcome error of a guarded call.
#[derive(Debug, Clone)]
pub enum ResilienceError<E> {
    /// The breaker refused the call; the operation was never invoked.
    CircuitOpen { status: BreakerStatus },
    /// The underlying operation failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitOpen { status } => match status.next_attempt_at {
                Some(at) => write!(
                    f,
                    "circuit breaker open ({} failures, next attempt at {} ms)",
                    status.failure_count, at
                ),
                None => write!(f, "circuit breaker open ({} failures)", status.failure_count),
            },
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::CircuitOpen { .. } => None,
        }
    }
}

impl<E> From<E> for ResilienceError<E> {
    fn from(e: E) -> Self {
        Self::Inner(e)
    }
}

impl<E> ResilienceError<E> {
    /// Check if this error is the breaker's own rejection.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Breaker snapshot taken at rejection time.
    pub fn circuit_status(&self) -> Option<&BreakerStatus> {
        match self {
            Self::CircuitOpen { status } => Some(status),
            Self::Inner(_) => None,
        }
    }

    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::CircuitOpen { .. } => None,
        }
    }

    /// Get the inner error if this is an Inner variant.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::CircuitOpen { .. } => None,
        }
    }
}
