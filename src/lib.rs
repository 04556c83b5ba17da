#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # surcharge
//!
//! Adds a dynamically sourced percentage to the sum of two numbers, built to keep
//! answering while the percentage source is flaky.
//!
//! ## Features
//!
//! - **Value resolution** with bounded retries, per-attempt timeouts and a
//!   last-known-good cache fallback
//! - **Half-up decimal arithmetic** (`(a + b) + p%`, two-stage rounding)
//! - **Per-client admission control** over a fixed window, as a tower layer
//! - **Non-blocking call history** through a bounded queue and background worker
//! - **Structured telemetry** via `tracing` and pluggable event sinks
//!
//! ## Quick Start
//!
//! ```rust
//! use surcharge::{Calculator, FixedPercentage, InMemoryCache, ValueResolver};
//! use rust_decimal_macros::dec;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let resolver = ValueResolver::builder(FixedPercentage(dec!(10)), InMemoryCache::new())
//!         .build()
//!         .unwrap();
//!     let calculator = Calculator::new(resolver);
//!
//!     let calc = calculator.calculate(dec!(5), dec!(5)).await.unwrap();
//!     assert_eq!(calc.result.to_string(), "11.00");
//!     assert_eq!(calc.details, "(5.0 + 5.0) + 10.0%");
//! }
//! ```

pub mod backoff;
pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod jitter;
pub mod provider;
pub mod rate_limit;
pub mod resolver;
pub mod retry;
pub mod service;
pub mod sleeper;
pub mod telemetry;

// Re-exports
pub use backoff::Backoff;
pub use cache::{CacheError, InMemoryCache, PercentageCache};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ConfigError, Settings};
pub use engine::{Calculation, Calculator, PercentageSource};
pub use error::{CalcError, Classify, ErrorBody, ErrorKind, RateLimitExceeded, ValidationError};
pub use history::{
    ApiCall, HistoryError, HistoryLayer, HistoryRecorder, HistorySink, InMemoryHistory,
};
pub use jitter::Jitter;
pub use provider::{FixedPercentage, PercentageProvider, ProviderError};
pub use rate_limit::{
    client_identity, AdmissionLayer, ClientKey, Decision, FixedWindowLimiter, RateLimiter,
};
pub use resolver::{ResolutionOutcome, ValueResolver, ValueResolverBuilder};
pub use retry::{RetryExhausted, RetryPolicy, RetryPolicyBuilder};
pub use service::{
    calculation_stack, ApiRequest, CalculationRequest, CalculationResponse, CalculatorService,
};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use telemetry::{LogSink, MemorySink, NullSink, PolicyEvent, TelemetrySink};
