use crate::error::{Classify, ErrorBody};
use crate::history::{ApiCall, HistoryRecorder};
use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt::Display;
use std::task::{Context, Poll};
use std::time::Instant;
use tower_layer::Layer;
use tower_service::Service;

/// Requests that can describe themselves for the audit trail.
pub trait Recordable {
    /// Path recorded as [`ApiCall::endpoint`](crate::ApiCall::endpoint).
    fn endpoint(&self) -> &str;

    /// Method recorded as [`ApiCall::method`](crate::ApiCall::method).
    fn method(&self) -> &str;

    /// Serialized request payload, if any.
    fn body_json(&self) -> Option<String>;
}

/// Records every call that passes through into a [`HistoryRecorder`].
///
/// Successful responses are stored as their JSON form with status 200; errors as
/// an [`ErrorBody`] with the status of their kind. Recording never blocks the
/// response.
#[derive(Clone, Debug)]
pub struct HistoryLayer {
    recorder: HistoryRecorder,
}

impl HistoryLayer {
    /// Record every call through `recorder`.
    pub fn new(recorder: HistoryRecorder) -> Self {
        Self { recorder }
    }
}

impl<S> Layer<S> for HistoryLayer {
    type Service = HistoryService<S>;

    fn layer(&self, service: S) -> Self::Service {
        HistoryService { inner: service, recorder: self.recorder.clone() }
    }
}

/// Service produced by [`HistoryLayer`].
#[derive(Clone, Debug)]
pub struct HistoryService<S> {
    inner: S,
    recorder: HistoryRecorder,
}

impl<S, Req> Service<Req> for HistoryService<S>
where
    Req: Recordable,
    S: Service<Req>,
    S::Future: Send + 'static,
    S::Response: Serialize + Send + 'static,
    S::Error: Classify + Display + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let endpoint = req.endpoint().to_string();
        let method = req.method().to_string();
        let request_body = req.body_json();
        let recorder = self.recorder.clone();
        let started = Instant::now();
        let timestamp = crate::clock::unix_millis();
        let fut = self.inner.call(req);

        Box::pin(async move {
            let outcome = fut.await;
            let (status_code, response_body) = match &outcome {
                Ok(response) => (200, serde_json::to_string(response).ok()),
                Err(err) => {
                    let body = ErrorBody::from_error(err, endpoint.as_str());
                    (body.status, serde_json::to_string(&body).ok())
                }
            };
            recorder.record(ApiCall {
                endpoint,
                method,
                request_body,
                response_body,
                status_code,
                timestamp,
                duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            });
            outcome
        })
    }
}
