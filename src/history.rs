//! Fire-and-forget audit trail of served calls.
//!
//! [`HistoryRecorder::record`] never waits: records go into a bounded queue that a
//! background worker drains into a [`HistorySink`]. A full queue drops the record,
//! a failing sink is logged. Neither ever reaches the request path.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

pub mod middleware;

pub use middleware::{HistoryLayer, HistoryService, Recordable};

/// One served call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiCall {
    /// Request path.
    pub endpoint: String,
    /// HTTP method.
    pub method: String,
    /// JSON request payload, if it could be serialized.
    pub request_body: Option<String>,
    /// JSON response or error body.
    pub response_body: Option<String>,
    /// Status the call was answered with.
    pub status_code: u16,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Wall time spent in the wrapped service.
    pub duration_ms: u64,
}

/// A sink could not store a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("history sink failed: {0}")]
pub struct HistoryError(pub String);

/// Storage for call history. Where and how records are kept is up to the
/// implementation.
#[async_trait]
pub trait HistorySink: Send + Sync {
    /// Store one record.
    async fn save(&self, call: ApiCall) -> Result<(), HistoryError>;
}

/// Keeps records in memory, newest last.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHistory {
    calls: Arc<Mutex<Vec<ApiCall>>>,
}

impl InMemoryHistory {
    /// Empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of stored records in arrival order.
    pub fn records(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True when nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HistorySink for InMemoryHistory {
    async fn save(&self, call: ApiCall) -> Result<(), HistoryError> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call);
        Ok(())
    }
}

/// Producer side of the history queue. Cheap to clone; the worker stops once
/// every recorder is dropped and the queue is drained.
#[derive(Debug, Clone)]
pub struct HistoryRecorder {
    tx: mpsc::Sender<ApiCall>,
    dropped: Arc<AtomicU64>,
}

impl HistoryRecorder {
    /// Start the worker on the current tokio runtime.
    pub fn spawn<H>(sink: H, capacity: usize) -> (Self, JoinHandle<()>)
    where
        H: HistorySink + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<ApiCall>(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(call) = rx.recv().await {
                let endpoint = call.endpoint.clone();
                match sink.save(call).await {
                    Ok(()) => tracing::debug!(endpoint = %endpoint, "api call recorded"),
                    Err(e) => tracing::error!(endpoint = %endpoint, error = %e, "failed to record api call"),
                }
            }
            tracing::debug!("history worker stopped");
        });
        (Self { tx, dropped: Arc::new(AtomicU64::new(0)) }, worker)
    }

    /// Queue `call` without waiting.
    pub fn record(&self, call: ApiCall) {
        match self.tx.try_send(call) {
            Ok(()) => {}
            Err(TrySendError::Full(call)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(endpoint = %call.endpoint, "history queue full, dropping record");
            }
            Err(TrySendError::Closed(call)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(endpoint = %call.endpoint, "history worker gone, dropping record");
            }
        }
    }

    /// Records lost to a full queue or a stopped worker.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
