//! Integer money arithmetic
//!
//! Fiat amounts are minor units (cents). On-chain receipts are converted to
//! micro-USD (six decimals) so token amounts, spot prices and the tolerance
//! band can be compared without floating point.

use alloy::primitives::U256;

/// Micro-USD in one cent
pub const MICRO_USD_PER_CENT: i64 = 10_000;

/// Micro-USD in one dollar, also the scale of a 6-decimal token
pub const MICRO_USD_PER_USD: i64 = 1_000_000;

/// Accepted shortfall on on-chain amounts, in percent
pub const TOLERANCE_PERCENT: i128 = 2;

pub fn cents_to_micro_usd(cents: i64) -> i64 {
    cents.saturating_mul(MICRO_USD_PER_CENT)
}

/// Whether `received` is within the tolerance band below `expected`
///
/// Exactly `expected * (100 - TOLERANCE_PERCENT) / 100` passes.
pub fn meets_tolerance(expected_micro_usd: i64, received_micro_usd: i64) -> bool {
    i128::from(received_micro_usd) * 100 >= i128::from(expected_micro_usd) * (100 - TOLERANCE_PERCENT)
}

/// Convert a raw token amount with `decimals` precision to micro-USD,
/// assuming a 1:1 USD peg. Saturates at `i64::MAX`.
pub fn token_units_to_micro_usd(amount: U256, decimals: u8) -> i64 {
    let ten = U256::from(10u64);
    let scaled = if decimals >= 6 {
        let shift = u32::from(decimals - 6);
        // 10^78 exceeds U256::MAX, so any amount divides down to zero
        if shift >= 78 {
            return 0;
        }
        let divisor = (0..shift).fold(U256::from(1u64), |acc, _| acc * ten);
        amount / divisor
    } else {
        let shift = u32::from(6 - decimals);
        let multiplier = (0..shift).fold(U256::from(1u64), |acc, _| acc * ten);
        amount.saturating_mul(multiplier)
    };
    u256_to_i64_saturating(scaled)
}

fn u256_to_i64_saturating(value: U256) -> i64 {
    if value > U256::from(i64::MAX as u64) {
        i64::MAX
    } else {
        value.as_limbs()[0] as i64
    }
}

/// Value `quantity` base units (6-decimal native asset) at `price_micro_usd`
/// per whole unit.
pub fn native_units_to_micro_usd(quantity: u128, price_micro_usd: i64) -> i64 {
    let price = u128::try_from(price_micro_usd).unwrap_or(0);
    let value = quantity.saturating_mul(price) / MICRO_USD_PER_USD as u128;
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Parse a non-negative decimal string into integer units of `10^-scale`
///
/// Fraction digits beyond `scale` are truncated. Exponent notation,
/// signs and empty input are rejected.
pub fn parse_decimal_units(value: &str, scale: u32) -> Option<i64> {
    let value = value.trim();
    let (whole, fraction) = match value.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (value, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }

    let unit = 10i64.checked_pow(scale)?;
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<i64>().ok()?.checked_mul(unit)?
    };

    let mut fraction_units = 0i64;
    let mut place = unit;
    for digit in fraction.chars().take(scale as usize) {
        place /= 10;
        fraction_units += i64::from(digit.to_digit(10)?) * place;
    }

    whole_units.checked_add(fraction_units)
}

/// Parse a USD amount into cents, rejecting sub-cent precision
pub fn usd_to_cents(value: &str) -> Option<i64> {
    if let Some((_, fraction)) = value.trim().split_once('.') {
        if fraction.len() > 2 {
            return None;
        }
    }
    parse_decimal_units(value, 2)
}
