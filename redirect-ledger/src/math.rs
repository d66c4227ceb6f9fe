//! Fixed-point helpers
//!
//! Amounts carry [`AMOUNT_DECIMALS`] fractional digits, the reward
//! accumulator [`ACCUMULATOR_DECIMALS`]. Every product and quotient is
//! truncated toward zero, so conversions never create value.

use crate::{Error, Result};
use rust_decimal::{Decimal, RoundingStrategy};

/// Fractional digits of every amount (wad precision)
pub const AMOUNT_DECIMALS: u32 = 18;

/// Fractional digits of the reward-per-share accumulator
pub const ACCUMULATOR_DECIMALS: u32 = 24;

/// Truncate to `dp` fractional digits
pub fn floor_dp(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::ToZero)
}

/// Truncate to amount precision
pub fn floor(value: Decimal) -> Decimal {
    floor_dp(value, AMOUNT_DECIMALS)
}

/// `floor(a * b)`
pub fn mul(a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_mul(b)
        .map(floor)
        .ok_or_else(|| Error::Arithmetic(format!("overflow computing {} * {}", a, b)))
}

/// `floor(a / b)`
pub fn div(a: Decimal, b: Decimal) -> Result<Decimal> {
    div_dp(a, b, AMOUNT_DECIMALS)
}

/// `a / b` truncated to `dp` digits
pub fn div_dp(a: Decimal, b: Decimal, dp: u32) -> Result<Decimal> {
    if b.is_zero() {
        return Err(Error::Arithmetic(format!("division of {} by zero", a)));
    }
    a.checked_div(b)
        .map(|q| floor_dp(q, dp))
        .ok_or_else(|| Error::Arithmetic(format!("overflow computing {} / {}", a, b)))
}

/// `floor(a * num / den)`
pub fn mul_div(a: Decimal, num: Decimal, den: Decimal) -> Result<Decimal> {
    if den.is_zero() {
        return Err(Error::Arithmetic("proportion denominator is zero".to_string()));
    }
    let product = a
        .checked_mul(num)
        .ok_or_else(|| Error::Arithmetic(format!("overflow computing {} * {}", a, num)))?;
    div(product, den)
}

/// `a + b`
pub fn add(a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_add(b)
        .ok_or_else(|| Error::Arithmetic(format!("overflow computing {} + {}", a, b)))
}

/// `a - b`
pub fn sub(a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_sub(b)
        .ok_or_else(|| Error::Arithmetic(format!("overflow computing {} - {}", a, b)))
}

/// `a - b`, floored at zero
pub fn gentle_sub(a: Decimal, b: Decimal) -> Decimal {
    if a > b {
        a - b
    } else {
        Decimal::ZERO
    }
}

/// Savings value of internal units at `rate`
pub fn to_value(units: Decimal, rate: Decimal) -> Result<Decimal> {
    mul(units, rate)
}

/// Internal units worth `value` at `rate`
pub fn to_internal(value: Decimal, rate: Decimal) -> Result<Decimal> {
    div(value, rate)
}

/// Fee rates must satisfy `0 <= fee < 1`
pub fn validate_fee(fee: Decimal) -> Result<()> {
    if fee < Decimal::ZERO || fee >= Decimal::ONE {
        return Err(Error::FeeOutOfRange(fee));
    }
    Ok(())
}
