//! Per-target breaker registry.
//!
//! Every downstream target gets exactly one long-lived [`CircuitBreaker`]; the registry owns them
//! and hands out clones that share state. Breakers registered here share the registry's clock
//! and telemetry sink.

use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::circuit_breaker::{BreakerStatus, CircuitBreaker, CircuitBreakerConfig};
use crate::clock::{Clock, SystemClock};
use crate::telemetry::{self, BoxedSink, NullSink, PolicyEvent};
use tower::Service;
use tracing::warn;

/// Errors from the breaker registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No breaker is registered for the target.
    #[error("circuit breaker '{target}' not found")]
    NotFound { target: String },
}

/// In-memory registry backed by an RwLock. Clones share the same map.
#[derive(Clone)]
pub struct BreakerRegistry {
    inner: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
    clock: Arc<dyn Clock>,
    sink: BoxedSink,
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry").field("targets", &self.targets()).finish()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            clock: Arc::new(SystemClock),
            sink: telemetry::boxed(NullSink),
        }
    }

    /// Clock handed to breakers registered afterwards.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Sink handed to breakers registered afterwards.
    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: Service<PolicyEvent, Response = (), Error = Infallible> + Clone + Send + Sync + 'static,
        S::Future: Send + 'static,
    {
        self.sink = telemetry::boxed(sink);
        self
    }

    /// Create a CLOSED breaker for `target`, replacing any existing one.
    ///
    /// Replacement discards the previous breaker's state; targets are expected to be unique.
    pub fn register(&self, target: impl Into<String>, config: CircuitBreakerConfig) -> CircuitBreaker {
        let target = target.into();
        let breaker = CircuitBreaker::new(target.clone(), config)
            .with_shared_clock(self.clock.clone())
            .with_boxed_sink(self.sink.clone());

        let mut map = self.write();
        if map.contains_key(&target) {
            warn!(target: "breakwater::registry", target_name = %target, "circuit breaker replaced; last registration wins");
        }
        map.insert(target, breaker.clone());
        breaker
    }

    /// Shared handle to the breaker for `target`.
    pub fn breaker(&self, target: &str) -> Result<CircuitBreaker, RegistryError> {
        self.read()
            .get(target)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound { target: target.to_string() })
    }

    pub fn status(&self, target: &str) -> Result<BreakerStatus, RegistryError> {
        self.breaker(target).map(|breaker| breaker.status())
    }

    /// Status of every breaker, ordered by target.
    pub fn snapshot(&self) -> BTreeMap<String, BreakerStatus> {
        self.read().iter().map(|(target, breaker)| (target.clone(), breaker.status())).collect()
    }

    /// Reset one breaker, erroring if missing.
    pub async fn reset(&self, target: &str) -> Result<BreakerStatus, RegistryError> {
        let breaker = self.breaker(target)?;
        Ok(breaker.reset().await)
    }

    /// Reset every breaker and return the new statuses.
    pub async fn reset_all(&self) -> BTreeMap<String, BreakerStatus> {
        let breakers: Vec<(String, CircuitBreaker)> =
            self.read().iter().map(|(target, breaker)| (target.clone(), breaker.clone())).collect();

        let mut statuses = BTreeMap::new();
        for (target, breaker) in breakers {
            statuses.insert(target, breaker.reset().await);
        }
        statuses
    }

    /// Registered targets, sorted.
    pub fn targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self.read().keys().cloned().collect();
        targets.sort();
        targets
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CircuitBreaker>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CircuitBreaker>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
