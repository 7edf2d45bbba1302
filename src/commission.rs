use rust_decimal::{Decimal, RoundingStrategy};

/// Default number of decimal places a commission is rounded to (currency minor unit).
pub const DEFAULT_COMMISSION_SCALE: u32 = 2;

/// Commission owed on `amount` at `rate_percent` (2.5 means 2.5%).
///
/// Rounded half away from zero to `scale` decimal places, so 0.005 becomes
/// 0.01 and -0.005 becomes -0.01.
pub fn calculate_commission(amount: Decimal, rate_percent: Decimal, scale: u32) -> Decimal {
    (amount * rate_percent / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}
