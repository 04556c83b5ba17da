//! Caller-visible failures.
//!
//! Only three kinds ever reach a caller: validation, percentage unavailable and
//! rate limited. Transient provider errors stay inside the resolver (they appear
//! only as the `source` of [`CalcError::PercentageUnavailable`]) and history
//! recording failures are absorbed where they happen.
use crate::provider::ProviderError;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Stable classification of a caller-visible failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad caller input.
    Validation,
    /// No fresh or cached percentage.
    PercentageUnavailable,
    /// Client over quota.
    RateLimited,
}

impl ErrorKind {
    /// Outward-facing status code, one per kind.
    pub fn status(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::PercentageUnavailable => 503,
            ErrorKind::RateLimited => 429,
        }
    }

    /// Machine-readable identifier. Same spelling as the serialized form, so logs
    /// and response bodies agree.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::PercentageUnavailable => "percentage_unavailable",
            ErrorKind::RateLimited => "rate_limited",
        }
    }

    /// Status line text matching [`status`](Self::status).
    pub fn reason(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "Bad Request",
            ErrorKind::PercentageUnavailable => "Service Unavailable",
            ErrorKind::RateLimited => "Too Many Requests",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Errors that know which [`ErrorKind`] they surface as.
pub trait Classify {
    /// The caller-visible kind of this error.
    fn kind(&self) -> ErrorKind;
}

/// Malformed or out-of-range caller input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Offending field name.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    /// Error for `field` with a short `message`.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

/// The admission limiter rejected a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rate limit exceeded for {client_id}: at most {quota} requests per {window:?}")]
pub struct RateLimitExceeded {
    /// Identity the quota is tracked under.
    pub client_id: String,
    /// Requests allowed per window.
    pub quota: u32,
    /// Window length.
    pub window: Duration,
    /// Time until the current window ends.
    pub retry_after: Duration,
}

/// Every failure a calculation can surface to its caller.
#[derive(Debug, thiserror::Error)]
pub enum CalcError {
    /// The request was malformed.
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),
    /// The provider was exhausted and the cache was empty.
    #[error(
        "percentage unavailable: no fresh value after {attempts} attempts and no cached value"
    )]
    PercentageUnavailable {
        /// Provider calls made.
        attempts: usize,
        /// Last provider failure.
        #[source]
        source: ProviderError,
    },
    /// Admission control rejected the request.
    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),
}

impl Classify for CalcError {
    fn kind(&self) -> ErrorKind {
        match self {
            CalcError::Validation(_) => ErrorKind::Validation,
            CalcError::PercentageUnavailable { .. } => ErrorKind::PercentageUnavailable,
            CalcError::RateLimited(_) => ErrorKind::RateLimited,
        }
    }
}

/// Serializable shape of a failure as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// HTTP-style status code.
    pub status: u16,
    /// Status reason phrase.
    pub error: String,
    /// Stable kind identifier.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Endpoint the failing call was made to.
    pub path: String,
}

impl ErrorBody {
    /// Describe `err` for a call to `path`, stamped with the current time.
    pub fn from_error<E>(err: &E, path: impl Into<String>) -> Self
    where
        E: Classify + fmt::Display,
    {
        let kind = err.kind();
        Self {
            timestamp: crate::clock::unix_millis(),
            status: kind.status(),
            error: kind.reason().to_string(),
            kind,
            message: err.to_string(),
            path: path.into(),
        }
    }
}
