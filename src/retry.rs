//! Bounded retry loop.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries) and must be > 0.
//! - The loop stops at the first success; remaining budget is not spent.
//! - Every failure is retried. There is no retryable/permanent classification.
//! - Between attempts the policy waits `jitter(backoff.delay(n))` through its
//!   [`Sleeper`]; it never waits after the final attempt.
//!
//! ```rust
//! use surcharge::{RetryExhausted, RetryPolicy, InstantSleeper};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .with_sleeper(InstantSleeper)
//!     .build()
//!     .unwrap();
//! let out: Result<u32, RetryExhausted<&str>> =
//!     policy.execute(|attempt| async move { if attempt < 3 { Err("down") } else { Ok(7) } }).await;
//! assert_eq!(out.unwrap(), 7);
//! # });
//! ```

use crate::config::ConfigError;
use crate::{Backoff, Jitter, Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;

/// All attempts failed. Carries the last observed failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted<E> {
    /// Attempts made, including the first.
    pub attempts: usize,
    /// Error from the final attempt.
    pub last: E,
}

/// Invalid retry configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
    /// The [`Settings`](crate::Settings) the policy was derived from failed validation.
    #[error("invalid settings: {0}")]
    Settings(#[from] ConfigError),
}

/// Bounded retry loop with backoff and jitter between attempts.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::config::DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::none(),
            jitter: Jitter::None,
            sleeper: Arc::new(TokioSleeper),
        }
    }
}

impl RetryPolicy {
    /// Start a builder with three attempts and no backoff.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Total attempts, including the first.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Run `operation` until it succeeds or the attempt budget is spent.
    ///
    /// The operation receives the 1-based attempt number.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, RetryExhausted<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnMut(usize) -> Fut,
    {
        self.execute_observed(operation, |_, _| {}).await
    }

    /// Like [`execute`](Self::execute), reporting each failed attempt to `on_failure`
    /// before the next wait.
    pub async fn execute_observed<T, E, Fut, Op, F>(
        &self,
        mut operation: Op,
        mut on_failure: F,
    ) -> Result<T, RetryExhausted<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnMut(usize) -> Fut,
        F: FnMut(usize, &E),
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    on_failure(attempt, &e);
                    if attempt >= self.max_attempts {
                        return Err(RetryExhausted { attempts: attempt, last: e });
                    }
                    let delay = self.jitter.apply(self.backoff.delay(attempt));
                    self.sleeper.sleep(delay).await;
                }
            }
        }
    }
}

/// Builder for [`RetryPolicy`].
pub struct RetryPolicyBuilder {
    inner: RetryPolicy,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self { inner: RetryPolicy::default() }
    }
}

impl RetryPolicyBuilder {
    /// Total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.inner.max_attempts = attempts;
        self
    }

    /// Delay schedule between attempts.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.inner.backoff = backoff;
        self
    }

    /// Randomization applied on top of the backoff.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.inner.jitter = jitter;
        self
    }

    /// Replace the sleeper, e.g. with [`InstantSleeper`](crate::InstantSleeper) in tests.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.inner.sleeper = Arc::new(sleeper);
        self
    }

    /// Validate and build the policy.
    pub fn build(self) -> Result<RetryPolicy, BuildError> {
        if self.inner.max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        Ok(self.inner)
    }
}
