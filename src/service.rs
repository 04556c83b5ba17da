//! Request plumbing around the [`Calculator`]: payload validation, the tower
//! service, and the composed admission → history → calculation stack.

use crate::cache::PercentageCache;
use crate::engine::{Calculation, Calculator};
use crate::error::{CalcError, ValidationError};
use crate::history::{HistoryLayer, HistoryService, Recordable};
use crate::provider::PercentageProvider;
use crate::rate_limit::{AdmissionLayer, AdmissionService, ClientKey};
use crate::telemetry::{NullSink, TelemetrySink};
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::task::{Context, Poll};
use tower::ServiceBuilder;
use tower_service::Service;

/// Path of the calculation operation.
pub const CALCULATE_ENDPOINT: &str = "/api/v1/calculations/calculate";

/// Inbound operands. Both must be present and greater than zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationRequest {
    pub num1: Option<Decimal>,
    pub num2: Option<Decimal>,
}

impl CalculationRequest {
    /// Request with both operands set.
    pub fn new(num1: Decimal, num2: Decimal) -> Self {
        Self { num1: Some(num1), num2: Some(num2) }
    }

    /// Both operands must be present and strictly positive.
    pub fn validate(&self) -> Result<(Decimal, Decimal), ValidationError> {
        Ok((positive("num1", self.num1)?, positive("num2", self.num2)?))
    }
}

fn positive(field: &str, value: Option<Decimal>) -> Result<Decimal, ValidationError> {
    match value {
        None => Err(ValidationError::new(field, "is required")),
        Some(v) if v <= Decimal::ZERO => Err(ValidationError::new(field, "must be greater than 0")),
        Some(v) => Ok(v),
    }
}

/// Successful answer to a [`CalculationRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationResponse {
    /// `(num1 + num2)` plus the percentage, two decimal places.
    pub result: Decimal,
    /// Percentage that was applied.
    pub percentage: Decimal,
    /// Human-readable trace of the computation.
    pub details: String,
}

impl From<Calculation> for CalculationResponse {
    fn from(c: Calculation) -> Self {
        Self { result: c.result, percentage: c.percentage, details: c.details }
    }
}

/// An inbound call: who sent it, where, and the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest<T> {
    /// Caller identity used for admission.
    pub client_id: String,
    /// Request path.
    pub endpoint: String,
    /// HTTP method.
    pub method: String,
    /// Decoded payload.
    pub body: T,
}

impl<T> ApiRequest<T> {
    /// A POST to `endpoint` from `client_id`.
    pub fn post(endpoint: impl Into<String>, client_id: impl Into<String>, body: T) -> Self {
        Self { client_id: client_id.into(), endpoint: endpoint.into(), method: "POST".into(), body }
    }
}

impl ApiRequest<CalculationRequest> {
    /// A POST to [`CALCULATE_ENDPOINT`].
    pub fn calculate(client_id: impl Into<String>, body: CalculationRequest) -> Self {
        Self::post(CALCULATE_ENDPOINT, client_id, body)
    }
}

impl<T> ClientKey for ApiRequest<T> {
    fn client_key(&self) -> &str {
        &self.client_id
    }
}

impl<T: Serialize> Recordable for ApiRequest<T> {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn method(&self) -> &str {
        &self.method
    }

    fn body_json(&self) -> Option<String> {
        serde_json::to_string(&self.body).ok()
    }
}

/// Validates the payload and runs the calculation.
pub struct CalculatorService<P, C, S = NullSink> {
    calculator: Calculator<P, C, S>,
}

impl<P, C, S> Clone for CalculatorService<P, C, S> {
    fn clone(&self) -> Self {
        Self { calculator: self.calculator.clone() }
    }
}

impl<P, C, S> std::fmt::Debug for CalculatorService<P, C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalculatorService").field("calculator", &self.calculator).finish()
    }
}

impl<P, C, S> CalculatorService<P, C, S> {
    /// Serve calculations with `calculator`.
    pub fn new(calculator: Calculator<P, C, S>) -> Self {
        Self { calculator }
    }
}

impl<P, C, S> Service<ApiRequest<CalculationRequest>> for CalculatorService<P, C, S>
where
    P: PercentageProvider + 'static,
    C: PercentageCache + 'static,
    S: TelemetrySink,
    S::Future: Send,
{
    type Response = CalculationResponse;
    type Error = CalcError;
    type Future = BoxFuture<'static, Result<CalculationResponse, CalcError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ApiRequest<CalculationRequest>) -> Self::Future {
        let validated = req.body.validate();
        let calculator = self.calculator.clone();
        Box::pin(async move {
            let (first, second) = validated.map_err(|e| {
                tracing::warn!(error = %e, "rejected calculation request");
                CalcError::from(e)
            })?;
            let calculation = calculator.calculate(first, second).await?;
            Ok(calculation.into())
        })
    }
}

/// Admission outermost, then history, then the calculation. Rejected requests
/// never reach the history layer or the resolver.
pub type CalculationStack<P, C, S, L, T> =
    AdmissionService<HistoryService<CalculatorService<P, C, S>>, L, T>;

/// Compose the full request path around `calculator`.
///
/// ```ignore
/// let mut service = calculation_stack(calculator, AdmissionLayer::new(limiter), HistoryLayer::new(recorder));
/// let response = service.ready().await?.call(ApiRequest::calculate(client, body)).await?;
/// ```
pub fn calculation_stack<P, C, S, L, T>(
    calculator: Calculator<P, C, S>,
    admission: AdmissionLayer<L, T>,
    history: HistoryLayer,
) -> CalculationStack<P, C, S, L, T>
where
    T: Clone,
{
    ServiceBuilder::new()
        .layer(admission)
        .layer(history)
        .service(CalculatorService::new(calculator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn missing_and_non_positive_operands_are_rejected() {
        let missing = CalculationRequest { num1: None, num2: Some(dec!(1)) };
        assert_eq!(missing.validate().unwrap_err(), ValidationError::new("num1", "is required"));

        let zero = CalculationRequest::new(dec!(1), dec!(0));
        assert_eq!(
            zero.validate().unwrap_err(),
            ValidationError::new("num2", "must be greater than 0")
        );

        let negative = CalculationRequest::new(dec!(-2), dec!(1));
        assert_eq!(negative.validate().unwrap_err().field, "num1");
    }

    #[test]
    fn request_accepts_json_numbers() {
        let req: CalculationRequest = serde_json::from_str(r#"{"num1": 5.5, "num2": 4}"#).unwrap();
        assert_eq!(req.validate().unwrap(), (dec!(5.5), dec!(4)));

        let req: CalculationRequest = serde_json::from_str(r#"{"num1": 5}"#).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn api_request_describes_itself() {
        let req = ApiRequest::calculate("203.0.113.9", CalculationRequest::new(dec!(5), dec!(5)));
        assert_eq!(req.client_key(), "203.0.113.9");
        assert_eq!(req.endpoint(), CALCULATE_ENDPOINT);
        assert_eq!(req.method(), "POST");
        let body: serde_json::Value = serde_json::from_str(&req.body_json().unwrap()).unwrap();
        assert_eq!(body["num1"], "5");
    }
}
