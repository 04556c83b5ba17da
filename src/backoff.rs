//! Delay strategies between resolver attempts.
//!
//! Attempt semantics: `delay(0)` is the initial call and is always zero; the wait
//! before the n-th retry is `delay(n)`. The default is [`Backoff::none`], which
//! retries back to back.
//!
//! ```rust
//! use std::time::Duration;
//! use surcharge::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_secs(1))
//!     .with_max(Duration::from_secs(4))
//!     .unwrap();
//! assert_eq!(backoff.delay(1), Duration::from_secs(1));
//! assert_eq!(backoff.delay(2), Duration::from_secs(2));
//! assert_eq!(backoff.delay(5), Duration::from_secs(4));
//! ```

use std::time::Duration;

/// Ceiling applied when a computation would overflow (1 hour).
pub const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// Invalid backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    /// `with_max` was called on a non-exponential strategy.
    #[error("with_max is only valid for exponential backoff")]
    MaxNotSupported,
    /// The cap would be below the first delay.
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum Kind {
    #[default]
    None,
    Constant(Duration),
    Exponential { base: Duration, max: Option<Duration> },
}

/// Delay strategy applied between provider attempts.
///
/// The delay for attempt `0` is always zero; `delay(n)` is the wait before the
/// `n`-th retry. Every strategy is clamped to [`MAX_BACKOFF`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Backoff {
    kind: Kind,
}

impl Backoff {
    /// Retry immediately.
    pub fn none() -> Self {
        Self { kind: Kind::None }
    }

    /// Wait the same `delay` before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self { kind: Kind::Constant(delay) }
    }

    /// `base * 2^(n-1)` before the n-th retry.
    pub fn exponential(base: Duration) -> Self {
        Self { kind: Kind::Exponential { base, max: None } }
    }

    /// Cap an exponential backoff.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        match &mut self.kind {
            Kind::Exponential { base, max: existing } => {
                if max < *base {
                    return Err(BackoffError::MaxLessThanBase { base: *base, max });
                }
                *existing = Some(max);
                Ok(self)
            }
            _ => Err(BackoffError::MaxNotSupported),
        }
    }

    /// Delay to apply before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match &self.kind {
            Kind::None => Duration::ZERO,
            Kind::Constant(d) => (*d).min(MAX_BACKOFF),
            Kind::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
                let nanos = base.as_nanos().saturating_mul(2u128.saturating_pow(exponent));
                let raw = Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64);
                max.map(|m| raw.min(m)).unwrap_or(raw)
            }
        }
    }
}
