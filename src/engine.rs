//! Sum-plus-percentage arithmetic.
//!
//! `sum = a + b`, `amount = half_up(sum * p / 100, 4)`, `result = half_up(sum + amount, 2)`.
//! Both roundings are half-up (midpoint away from zero), so `1.005` becomes `1.01`
//! and `1.125` becomes `1.13`.

use crate::cache::PercentageCache;
use crate::error::{CalcError, ValidationError};
use crate::provider::PercentageProvider;
use crate::resolver::{ResolutionOutcome, ValueResolver};
use crate::telemetry::{NullSink, TelemetrySink};
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;

/// Decimal places kept for the percentage amount.
pub const AMOUNT_SCALE: u32 = 4;
/// Decimal places of the final result.
pub const RESULT_SCALE: u32 = 2;
const STALE_NOTE: &str = " (using last cached value)";

/// Where the percentage used in a calculation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PercentageSource {
    Fresh,
    Cached,
}

/// Outcome of one calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calculation {
    /// First operand.
    pub first: Decimal,
    /// Second operand.
    pub second: Decimal,
    /// Percentage applied, as a percent (10 means 10%).
    pub percentage: Decimal,
    /// `sum + amount`, at [`RESULT_SCALE`] places.
    pub result: Decimal,
    /// Human-readable trace, e.g. `(5.0 + 5.0) + 10.0%`.
    pub details: String,
    /// Whether `percentage` was fresh or served from cache.
    pub source: PercentageSource,
}

/// Round to `scale` places, ties away from zero, and pad to exactly `scale` places.
pub fn round_half_up(value: Decimal, scale: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(scale);
    rounded
}

/// Pure calculation. Fails only if an intermediate value leaves the decimal range.
pub fn compute(
    first: Decimal,
    second: Decimal,
    percentage: Decimal,
    source: PercentageSource,
) -> Result<Calculation, ValidationError> {
    let overflow = || ValidationError::new("result", "exceeds the supported decimal range");

    let sum = first.checked_add(second).ok_or_else(overflow)?;
    let rate = percentage.checked_div(Decimal::ONE_HUNDRED).ok_or_else(overflow)?;
    let amount = round_half_up(sum.checked_mul(rate).ok_or_else(overflow)?, AMOUNT_SCALE);
    let result = round_half_up(sum.checked_add(amount).ok_or_else(overflow)?, RESULT_SCALE);

    let mut details =
        format!("({} + {}) + {}%", one_digit(first), one_digit(second), one_digit(percentage));
    if source == PercentageSource::Cached {
        details.push_str(STALE_NOTE);
    }

    Ok(Calculation { first, second, percentage, result, details, source })
}

fn one_digit(value: Decimal) -> String {
    round_half_up(value, 1).to_string()
}

/// Resolves a percentage and applies it.
///
/// Cheap to clone; clones share the same resolver and therefore the same cache.
pub struct Calculator<P, C, S = NullSink> {
    resolver: Arc<ValueResolver<P, C, S>>,
}

impl<P, C, S> Clone for Calculator<P, C, S> {
    fn clone(&self) -> Self {
        Self { resolver: self.resolver.clone() }
    }
}

impl<P, C, S> std::fmt::Debug for Calculator<P, C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Calculator").field("resolver", &self.resolver).finish()
    }
}

impl<P, C, S> Calculator<P, C, S>
where
    P: PercentageProvider,
    C: PercentageCache,
    S: TelemetrySink,
    S::Future: Send,
{
    /// Wrap `resolver`. Clones of the calculator share it.
    pub fn new(resolver: ValueResolver<P, C, S>) -> Self {
        Self { resolver: Arc::new(resolver) }
    }

    /// The underlying resolver.
    pub fn resolver(&self) -> &ValueResolver<P, C, S> {
        &self.resolver
    }

    /// Resolve the percentage and apply it to `first + second`.
    ///
    /// Fails with [`CalcError::PercentageUnavailable`] when the provider is exhausted
    /// and nothing is cached.
    pub async fn calculate(&self, first: Decimal, second: Decimal) -> Result<Calculation, CalcError> {
        tracing::info!(%first, %second, "calculation started");
        let (percentage, source) = match self.resolver.resolve().await {
            ResolutionOutcome::Fresh(p) => (p, PercentageSource::Fresh),
            ResolutionOutcome::Stale(p) => (p, PercentageSource::Cached),
            ResolutionOutcome::Unavailable { attempts, cause } => {
                return Err(CalcError::PercentageUnavailable { attempts, source: cause });
            }
        };
        let calculation = compute(first, second, percentage, source)?;
        tracing::info!(details = %calculation.details, result = %calculation.result, "calculation completed");
        Ok(calculation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fresh(a: Decimal, b: Decimal, p: Decimal) -> Calculation {
        compute(a, b, p, PercentageSource::Fresh).unwrap()
    }

    #[test]
    fn ten_percent_of_ten() {
        let calc = fresh(dec!(5), dec!(5), dec!(10));
        assert_eq!(calc.result, dec!(11.00));
        assert_eq!(calc.result.to_string(), "11.00");
        assert_eq!(calc.details, "(5.0 + 5.0) + 10.0%");
    }

    #[test]
    fn cached_source_is_called_out_in_details() {
        let calc = compute(dec!(4), dec!(6), dec!(15), PercentageSource::Cached).unwrap();
        assert_eq!(calc.result, dec!(11.50));
        assert_eq!(calc.details, "(4.0 + 6.0) + 15.0% (using last cached value)");
    }

    #[test]
    fn result_rounds_half_up_at_two_digits() {
        // 1 + 0.005 = 1.005
        assert_eq!(fresh(dec!(0.4), dec!(0.6), dec!(0.5)).result, dec!(1.01));
        // 1 + 0.125 = 1.125
        assert_eq!(fresh(dec!(0.5), dec!(0.5), dec!(12.5)).result, dec!(1.13));
    }

    #[test]
    fn amount_is_rounded_before_it_is_added() {
        // amount 0.00495 -> 0.0050, so 1.0050 -> 1.01 (1.00495 would give 1.00)
        assert_eq!(fresh(dec!(0.5), dec!(0.5), dec!(0.495)).result, dec!(1.01));
        // amount 0.00494 -> 0.0049, 1.0049 -> 1.00
        assert_eq!(fresh(dec!(0.5), dec!(0.5), dec!(0.494)).result, dec!(1.00));
    }

    #[test]
    fn details_round_each_operand_to_one_digit() {
        let calc = fresh(dec!(1.25), dec!(2.04), dec!(7.75));
        assert_eq!(calc.details, "(1.3 + 2.0) + 7.8%");
    }

    #[test]
    fn round_half_up_pads_scale() {
        assert_eq!(round_half_up(dec!(11), 2).to_string(), "11.00");
        assert_eq!(round_half_up(dec!(0.125), 2).to_string(), "0.13");
        assert_eq!(round_half_up(dec!(0.00005), 4).to_string(), "0.0001");
    }

    #[test]
    fn overflow_is_reported() {
        let err = compute(Decimal::MAX, Decimal::MAX, dec!(10), PercentageSource::Fresh).unwrap_err();
        assert_eq!(err.field, "result");
    }
}
