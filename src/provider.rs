//! The external percentage source.
//!
//! A provider performs a single fetch and nothing else: retries, timeouts and
//! caching all belong to the [`ValueResolver`](crate::ValueResolver).

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Duration;

/// Why a single provider call produced no percentage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The source answered with an error or could not be reached.
    #[error("percentage provider failed: {0}")]
    Failed(String),
    /// The source answered but carried no value.
    #[error("percentage provider returned no value")]
    Empty,
    /// The attempt did not finish within the per-attempt timeout.
    #[error("percentage provider timed out after {0:?}")]
    TimedOut(Duration),
}

/// Source of the current percentage.
///
/// Calls may fail or hang; the [`ValueResolver`](crate::ValueResolver) retries
/// and times them out, so implementations should not retry themselves.
#[async_trait]
pub trait PercentageProvider: Send + Sync {
    /// Fetch the current percentage. `Ok(None)` means the source had no value.
    async fn fetch(&self) -> Result<Option<Decimal>, ProviderError>;
}

#[async_trait]
impl<P> PercentageProvider for std::sync::Arc<P>
where
    P: PercentageProvider + ?Sized,
{
    async fn fetch(&self) -> Result<Option<Decimal>, ProviderError> {
        (**self).fetch().await
    }
}

/// Always answers with the same value. Stands in for the remote source in local
/// setups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPercentage(pub Decimal);

impl Default for FixedPercentage {
    fn default() -> Self {
        Self(Decimal::TEN)
    }
}

#[async_trait]
impl PercentageProvider for FixedPercentage {
    async fn fetch(&self) -> Result<Option<Decimal>, ProviderError> {
        Ok(Some(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn fixed_percentage_defaults_to_ten() {
        assert_eq!(FixedPercentage::default().fetch().await, Ok(Some(Decimal::TEN)));
    }

    #[tokio::test]
    async fn shared_provider_delegates() {
        let provider: Arc<dyn PercentageProvider> = Arc::new(FixedPercentage(Decimal::ONE));
        assert_eq!(provider.fetch().await, Ok(Some(Decimal::ONE)));
    }
}
