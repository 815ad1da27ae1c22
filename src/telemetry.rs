//! Structured policy events.
//!
//! The breaker and the retry engine describe what they do as [`PolicyEvent`]s. Events flow into a
//! sink, which is any `tower::Service<PolicyEvent>` that never fails. Emission is best-effort and
//! always happens outside the breaker's critical section.
//!
//! ```rust
//! use breakwater::telemetry::{CircuitBreakerEvent, PolicyEvent};
//!
//! let event = PolicyEvent::CircuitBreaker(CircuitBreakerEvent::HalfOpened {
//!     target: "user-service".into(),
//! });
//! assert_eq!(event.to_string(), "circuit_breaker.half_opened target=user-service");
//! ```

use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt;
use std::future::{ready, Ready};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::util::BoxCloneSyncService;
use tower::Service;

/// Type-erased sink shared by every policy.
pub type BoxedSink = BoxCloneSyncService<PolicyEvent, (), Infallible>;

/// Erase a concrete sink.
pub fn boxed<S>(sink: S) -> BoxedSink
where
    S: Service<PolicyEvent, Response = (), Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    BoxCloneSyncService::new(sink)
}

/// Best-effort emit helper that honors `poll_ready`.
pub async fn emit_best_effort<S>(sink: S, event: PolicyEvent)
where
    S: Service<PolicyEvent, Response = ()> + Send + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Policy events emitted during execution.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyEvent {
    CircuitBreaker(CircuitBreakerEvent),
    Retry(RetryEvent),
}

/// Events emitted by a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitBreakerEvent {
    /// CLOSED or HALF_OPEN → OPEN.
    Opened { target: String, failure_count: u32, next_attempt_at: u64 },
    /// OPEN → HALF_OPEN after the cool-down elapsed.
    HalfOpened { target: String },
    /// HALF_OPEN → CLOSED after enough consecutive probe successes.
    Closed { target: String },
    /// A call was refused without being attempted.
    Rejected { target: String, next_attempt_at: u64 },
    /// Administrative reset.
    Reset { target: String },
}

/// Events emitted by the retry engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    /// A retry is about to be made after sleeping `delay`. `attempt` is the 1-indexed retry number.
    Attempt { attempt: u32, delay: Duration },
    /// Every allowed attempt failed with a retryable error.
    Exhausted { attempts: u32 },
}

impl fmt::Display for PolicyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyEvent::CircuitBreaker(event) => match event {
                CircuitBreakerEvent::Opened { target, failure_count, next_attempt_at } => write!(
                    f,
                    "circuit_breaker.opened target={} failures={} next_attempt_at={}",
                    target, failure_count, next_attempt_at
                ),
                CircuitBreakerEvent::HalfOpened { target } => {
                    write!(f, "circuit_breaker.half_opened target={}", target)
                }
                CircuitBreakerEvent::Closed { target } => {
                    write!(f, "circuit_breaker.closed target={}", target)
                }
                CircuitBreakerEvent::Rejected { target, next_attempt_at } => write!(
                    f,
                    "circuit_breaker.rejected target={} next_attempt_at={}",
                    target, next_attempt_at
                ),
                CircuitBreakerEvent::Reset { target } => {
                    write!(f, "circuit_breaker.reset target={}", target)
                }
            },
            PolicyEvent::Retry(RetryEvent::Attempt { attempt, delay }) => {
                write!(f, "retry.attempt attempt={} delay={:?}", attempt, delay)
            }
            PolicyEvent::Retry(RetryEvent::Exhausted { attempts }) => {
                write!(f, "retry.exhausted attempts={}", attempts)
            }
        }
    }
}

/// A no-op telemetry sink that discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<PolicyEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: PolicyEvent) -> Self::Future {
        ready(Ok(()))
    }
}

/// Logs every event through `tracing`.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<PolicyEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: PolicyEvent) -> Self::Future {
        tracing::info!(target: "breakwater::telemetry", event = %event, "policy_event");
        ready(Ok(()))
    }
}

/// Keeps the most recent events in memory; the oldest are evicted once `capacity` is reached.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<PolicyEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<PolicyEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events dropped to stay within capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<PolicyEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: PolicyEvent) -> Self::Future {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() >= self.capacity {
            events.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        events.push_back(event);
        ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed(target: &str) -> PolicyEvent {
        PolicyEvent::CircuitBreaker(CircuitBreakerEvent::Closed { target: target.into() })
    }

    #[tokio::test]
    async fn memory_sink_records_through_boxed_sink() {
        let memory = MemorySink::new();
        let sink = boxed(memory.clone());

        emit_best_effort(sink.clone(), closed("a")).await;
        emit_best_effort(
            sink,
            PolicyEvent::Retry(RetryEvent::Attempt { attempt: 1, delay: Duration::from_secs(1) }),
        )
        .await;

        let events = memory.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], closed("a"));
    }

    #[tokio::test]
    async fn memory_sink_evicts_oldest() {
        let memory = MemorySink::with_capacity(2);
        for target in ["a", "b", "c"] {
            emit_best_effort(memory.clone(), closed(target)).await;
        }
        assert_eq!(memory.events(), vec![closed("b"), closed("c")]);
        assert_eq!(memory.evicted(), 1);

        memory.clear();
        assert!(memory.is_empty());
    }

    #[tokio::test]
    async fn null_and_log_sinks_accept_events() {
        emit_best_effort(NullSink, closed("x")).await;
        emit_best_effort(LogSink, closed("x")).await;
    }

    #[test]
    fn display_is_stable() {
        let opened = PolicyEvent::CircuitBreaker(CircuitBreakerEvent::Opened {
            target: "users".into(),
            failure_count: 5,
            next_attempt_at: 60_000,
        });
        assert_eq!(
            opened.to_string(),
            "circuit_breaker.opened target=users failures=5 next_attempt_at=60000"
        );
        assert_eq!(
            PolicyEvent::Retry(RetryEvent::Exhausted { attempts: 4 }).to_string(),
            "retry.exhausted attempts=4"
        );
    }
}
