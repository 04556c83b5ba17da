//! Structured events emitted by the resolver and the admission layer.
//!
//! Events flow through a [`TelemetrySink`], which is just a
//! `tower::Service<PolicyEvent>`. Emission is best effort: a sink that is not
//! ready or fails simply loses the event, it never affects the request.
//!
//! - **Resolver**: `AttemptFailed`, `Fetched`, `ServedStale`, `Unavailable`
//! - **Admission**: `Admitted`, `Rejected`
//!
//! ```rust
//! use surcharge::telemetry::{MemorySink, PolicyEvent, ResolverEvent, emit_best_effort};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let sink = MemorySink::new();
//! emit_best_effort(sink.clone(), PolicyEvent::Resolver(ResolverEvent::Fetched { attempt: 1 })).await;
//! assert_eq!(sink.len(), 1);
//! # });
//! ```

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

/// A telemetry sink that consumes policy events.
///
/// Sinks are plain [`tower::Service`]s so they compose with the usual layers.
/// Emitters call them through [`emit_best_effort`], which ignores sink errors:
/// a failing sink never fails the request that produced the event.
pub trait TelemetrySink:
    tower::Service<PolicyEvent, Response = (), Error = Self::SinkError> + Clone + Send + Sync + 'static
{
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
pub async fn emit_best_effort<S>(sink: S, event: PolicyEvent)
where
    S: tower::Service<PolicyEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Structured event emitted by the resolver and the admission layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyEvent {
    /// Emitted by [`ValueResolver`](crate::ValueResolver).
    Resolver(ResolverEvent),
    /// Emitted by [`AdmissionLayer`](crate::AdmissionLayer).
    Admission(AdmissionEvent),
}

/// Progress of one percentage resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverEvent {
    /// One provider call failed; `attempt` is 1-indexed.
    AttemptFailed { attempt: usize, error: String },
    /// A fresh value was obtained on `attempt`.
    Fetched { attempt: usize },
    /// Attempts exhausted; answered from cache.
    ServedStale { attempts: usize },
    /// Attempts exhausted and nothing cached.
    Unavailable { attempts: usize },
}

/// Outcome of one admission decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionEvent {
    /// Request let through; `remaining` admissions left in the window.
    Admitted { client_id: String, remaining: u32 },
    /// Request refused until the window ends.
    Rejected { client_id: String, retry_after: Duration },
}

impl fmt::Display for PolicyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyEvent::Resolver(event) => write!(f, "Resolver::{}", event),
            PolicyEvent::Admission(event) => write!(f, "Admission::{}", event),
        }
    }
}

impl fmt::Display for ResolverEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolverEvent::AttemptFailed { attempt, error } => {
                write!(f, "AttemptFailed(#{}, {})", attempt, error)
            }
            ResolverEvent::Fetched { attempt } => write!(f, "Fetched(#{})", attempt),
            ResolverEvent::ServedStale { attempts } => {
                write!(f, "ServedStale(attempts={})", attempts)
            }
            ResolverEvent::Unavailable { attempts } => {
                write!(f, "Unavailable(attempts={})", attempts)
            }
        }
    }
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionEvent::Admitted { client_id, remaining } => {
                write!(f, "Admitted({}, remaining={})", client_id, remaining)
            }
            AdmissionEvent::Rejected { client_id, retry_after } => {
                write!(f, "Rejected({}, retry_after={:?})", client_id, retry_after)
            }
        }
    }
}

type SinkFuture = Pin<Box<dyn Future<Output = Result<(), Infallible>> + Send>>;

/// Discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<PolicyEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: PolicyEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Forwards events to `tracing` at info level.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<PolicyEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: PolicyEvent) -> Self::Future {
        tracing::info!(event = %event, "policy_event");
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps the most recent events in memory. Oldest events are evicted once
/// `capacity` is reached.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<PolicyEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Sink holding up to 10 000 events.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Sink holding up to `capacity` events; older ones are evicted first.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Snapshot of retained events, oldest first.
    pub fn events(&self) -> Vec<PolicyEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True when no events are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events dropped to stay within capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
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
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: PolicyEvent) -> Self::Future {
        let mut guard = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}
