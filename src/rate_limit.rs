//! Per-client admission control.
//!
//! - [`RateLimiter`]: the decision logic, consulted once per inbound request.
//! - [`FixedWindowLimiter`]: quota per client per fixed window.
//! - [`AdmissionLayer`]: tower middleware that rejects before the inner service runs.
//! - [`client_identity`]: derives the client key from request origin.
//!
//! The limiter is a fixed window, not a sliding log: a client can get up to
//! `2 × quota` requests through around a window boundary.

use std::time::Duration;

pub mod identity;
pub mod middleware;
pub mod window;

pub use identity::client_identity;
pub use middleware::{AdmissionLayer, AdmissionService, ClientKey};
pub use window::{ClientWindow, FixedWindowLimiter, FixedWindowLimiterBuilder, LimiterBuildError};

/// The outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Admitted. `remaining` requests are left in the current window.
    Allowed { remaining: u32 },
    /// Rejected until the current window ends.
    Denied { retry_after: Duration },
}

impl Decision {
    /// True for [`Decision::Allowed`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Per-client admission decisions.
///
/// Implementations must count each admitted request exactly once, even when
/// the same client calls concurrently.
pub trait RateLimiter: Send + Sync {
    /// Count one request for `client_id` and decide whether it may proceed.
    fn check(&self, client_id: &str) -> Decision;

    /// Shorthand for `check(client_id).is_allowed()`.
    fn is_allowed(&self, client_id: &str) -> bool {
        self.check(client_id).is_allowed()
    }

    /// Requests allowed per window.
    fn quota(&self) -> u32;

    /// Length of one counting window.
    fn window(&self) -> Duration;
}

impl<L> RateLimiter for std::sync::Arc<L>
where
    L: RateLimiter + ?Sized,
{
    fn check(&self, client_id: &str) -> Decision {
        (**self).check(client_id)
    }

    fn quota(&self) -> u32 {
        (**self).quota()
    }

    fn window(&self) -> Duration {
        (**self).window()
    }
}
