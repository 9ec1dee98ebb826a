//! Money helpers.
//!
//! Amounts travel as `f64` in major currency units. All arithmetic that
//! produces a charged amount is done in `Decimal` and converted back rounded
//! to cents, half away from zero.

use rust_decimal::prelude::*;

/// Smallest delta that is ever charged or credited.
pub const CENT: f64 = 0.01;

const DECIMAL_PLACES: u32 = 2;

/// Day basis for simple annual interest.
const DAYS_PER_YEAR: i64 = 365;

/// Convert f64 to Decimal for calculation.
#[inline]
pub fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

/// Convert Decimal back to f64, rounded to cents.
#[inline]
pub fn to_money(value: Decimal) -> f64 {
    value
        .round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
        .to_f64()
        .unwrap_or_default()
}

/// Round half away from zero to two decimals.
pub fn round_money(value: f64) -> f64 {
    to_money(to_decimal(value))
}

/// True when the amount is too small to act on.
pub fn is_negligible(amount: f64) -> bool {
    to_decimal(amount).abs() < to_decimal(CENT)
}

/// Simple interest on `balance` at a percentage annual rate (24.0 = 24 %)
/// for `days`, rounded to cents.
pub fn simple_interest(balance: f64, annual_rate_pct: f64, days: i64) -> f64 {
    if days <= 0 || balance <= 0.0 {
        return 0.0;
    }
    let interest = to_decimal(balance) * to_decimal(annual_rate_pct) * Decimal::from(days)
        / Decimal::ONE_HUNDRED
        / Decimal::from(DAYS_PER_YEAR);
    to_money(interest)
}

/// Exact decimal sum of amounts, rounded to cents.
pub fn sum_money<I: IntoIterator<Item = f64>>(amounts: I) -> f64 {
    to_money(amounts.into_iter().map(to_decimal).sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_cents() {
        assert_eq!(round_money(1906.849315), 1906.85);
        assert_eq!(round_money(65.753424), 65.75);
        assert_eq!(round_money(1.005), 1.01);
        assert_eq!(round_money(-1.005), -1.01);
        assert_eq!(round_money(0.0), 0.0);
    }

    #[test]
    fn values_below_the_midpoint_round_down() {
        assert_eq!(round_money(1.0049999999), 1.0);
        assert_eq!(round_money(2.674999999), 2.67);
        assert_eq!(round_money(-2.674999999), -2.67);
    }

    #[test]
    fn sums_do_not_drift() {
        let tenths = std::iter::repeat(0.1).take(10);
        assert_eq!(sum_money(tenths), 1.0);
        assert_eq!(sum_money([100.10, 0.20]), 100.30);
        assert_eq!(sum_money([1906.85, -1906.85]), 0.0);
    }

    #[test]
    fn negligible_threshold_is_one_cent() {
        assert!(is_negligible(0.0099));
        assert!(is_negligible(-0.0099));
        assert!(!is_negligible(0.01));
        assert!(!is_negligible(-0.01));
    }

    #[test]
    fn simple_interest_matches_hand_calculation() {
        // 100 000 at 24 % for 29 days
        assert_eq!(simple_interest(100_000.0, 24.0, 29), 1906.85);
        assert_eq!(simple_interest(50_000.0, 24.0, 20), 657.53);
        assert_eq!(simple_interest(10_000.0, 36.5, 31), 310.0);
        assert_eq!(simple_interest(100_000.0, 24.0, 0), 0.0);
        assert_eq!(simple_interest(-5.0, 24.0, 10), 0.0);
    }
}
