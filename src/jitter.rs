//! Randomizes backoff delays so concurrent resolvers hitting a failing provider
//! spread their retries out.

use rand::Rng;
use std::time::Duration;

/// Randomization applied to each backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// Use the backoff delay as is.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
}

impl Jitter {
    /// Jitter `delay` using the thread-local RNG.
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rand::rng())
    }

    /// Jitter `delay` with a caller-supplied RNG, for deterministic tests.
    pub fn apply_with_rng<R: Rng + ?Sized>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Full => {
                let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                if ms == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rng.random_range(0..=ms))
            }
        }
    }
}
