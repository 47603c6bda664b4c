//! Decimal arithmetic for quantities and yields.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Funding settlements per day on Binance futures.
pub const FUNDINGS_PER_DAY: Decimal = dec!(3);

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Number of clips needed to fill `total`, rounding up.
pub fn progress_denominator(total: Decimal, clip: Decimal) -> u32 {
    safe_div(total, clip).ceil().to_u32().unwrap_or(u32::MAX)
}

/// Whole clips contained in `amount`, rounding down.
pub fn whole_clips(amount: Decimal, clip: Decimal) -> u32 {
    safe_div(amount, clip)
        .floor()
        .max(Decimal::ZERO)
        .to_u32()
        .unwrap_or(u32::MAX)
}

/// Annualized carry estimate of a funding-rate gap.
///
/// Only one leg collects the gap, so the leveraged figure is halved. A
/// negative gap is a cost and yields a negative estimate.
pub fn annualized_yield(funding_rate_gap: Decimal, leverage: u32) -> Decimal {
    funding_rate_gap * dec!(365) * FUNDINGS_PER_DAY * Decimal::from(leverage) / dec!(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_denominator_rounds_up() {
        assert_eq!(progress_denominator(dec!(3), dec!(1)), 3);
        assert_eq!(progress_denominator(dec!(1.0), dec!(0.3)), 4);
        assert_eq!(progress_denominator(dec!(0.5), dec!(1)), 1);
        assert_eq!(progress_denominator(dec!(1), Decimal::ZERO), 0);
    }

    #[test]
    fn test_whole_clips_rounds_down() {
        assert_eq!(whole_clips(dec!(2.5), dec!(1)), 2);
        assert_eq!(whole_clips(dec!(0.009), dec!(0.01)), 0);
        assert_eq!(whole_clips(dec!(-1), dec!(1)), 0);
    }

    #[test]
    fn test_annualized_yield() {
        // 0.0001 * 365 * 3 * 10 / 2
        assert_eq!(annualized_yield(dec!(0.0001), 10), dec!(0.5475));
        assert_eq!(annualized_yield(dec!(-0.0001), 10), dec!(-0.5475));
        assert!(annualized_yield(Decimal::ZERO, 20).is_zero());
    }
}
