use crate::error::RateLimitExceeded;
use crate::rate_limit::{Decision, RateLimiter};
use crate::telemetry::{emit_best_effort, AdmissionEvent, NullSink, PolicyEvent, TelemetrySink};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

/// Requests that carry the identity admission control keys on.
pub trait ClientKey {
    /// Identity the quota is counted against.
    fn client_key(&self) -> &str;
}

/// A layer that admits or rejects each request through a [`RateLimiter`] before
/// the wrapped service sees it.
#[derive(Clone, Debug)]
pub struct AdmissionLayer<L, T = NullSink> {
    limiter: Arc<L>,
    sink: T,
}

impl<L> AdmissionLayer<L, NullSink> {
    /// Wrap `limiter` with events discarded.
    pub fn new(limiter: L) -> Self {
        Self::shared(Arc::new(limiter))
    }

    /// Use a limiter that is also referenced elsewhere (e.g. for pruning).
    pub fn shared(limiter: Arc<L>) -> Self {
        Self { limiter, sink: NullSink }
    }
}

impl<L, T> AdmissionLayer<L, T> {
    /// Send an [`AdmissionEvent`](crate::telemetry::AdmissionEvent) to `sink` for every decision.
    pub fn with_sink<U: TelemetrySink>(self, sink: U) -> AdmissionLayer<L, U> {
        AdmissionLayer { limiter: self.limiter, sink }
    }
}

impl<S, L, T> Layer<S> for AdmissionLayer<L, T>
where
    T: Clone,
{
    type Service = AdmissionService<S, L, T>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService { inner: service, limiter: self.limiter.clone(), sink: self.sink.clone() }
    }
}

/// Service produced by [`AdmissionLayer`].
#[derive(Clone, Debug)]
pub struct AdmissionService<S, L, T = NullSink> {
    inner: S,
    limiter: Arc<L>,
    sink: T,
}

/// Admission is decided in `call`, before the inner service is asked for
/// readiness. `poll_ready` is always ready; admitted requests drive a clone of the
/// inner service to readiness inside the response future, so a rejected request
/// never holds capacity the inner service reserved for it.
impl<S, L, T, Req> Service<Req> for AdmissionService<S, L, T>
where
    Req: ClientKey + Send + 'static,
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: From<RateLimitExceeded> + Send + 'static,
    S::Response: Send + 'static,
    L: RateLimiter,
    T: TelemetrySink,
    T::Future: Send,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let client_id = req.client_key().to_string();
        let sink = self.sink.clone();

        match self.limiter.check(&client_id) {
            Decision::Allowed { remaining } => {
                tracing::debug!(client_id = %client_id, remaining, "request admitted");
                let inner = self.inner.clone();
                Box::pin(async move {
                    let event = AdmissionEvent::Admitted { client_id, remaining };
                    emit_best_effort(sink, PolicyEvent::Admission(event)).await;
                    inner.oneshot(req).await
                })
            }
            Decision::Denied { retry_after } => {
                tracing::warn!(client_id = %client_id, ?retry_after, "rate limit exceeded");
                let rejection = RateLimitExceeded {
                    client_id: client_id.clone(),
                    quota: self.limiter.quota(),
                    window: self.limiter.window(),
                    retry_after,
                };
                Box::pin(async move {
                    let event = AdmissionEvent::Rejected { client_id, retry_after };
                    emit_best_effort(sink, PolicyEvent::Admission(event)).await;
                    Err(rejection.into())
                })
            }
        }
    }
}
