//! Fixed-point helpers.
//!
//! All ledger amounts are `u128`. Products of two amounts (shares × assets,
//! value × underlying) routinely exceed 128 bits, so `mul_div` falls back to
//! an arbitrary-precision intermediate when the fast path overflows. The
//! result still has to fit in `u128`; if it doesn't, you get `None`.

use num_bigint::BigUint;

use crate::config::{BPS_DENOMINATOR, WAD};

/// `floor(a * b / denominator)`. `None` on division by zero or if the result
/// does not fit in `u128`.
pub fn mul_div(a: u128, b: u128, denominator: u128) -> Option<u128> {
    if denominator == 0 {
        return None;
    }
    match a.checked_mul(b) {
        Some(product) => Some(product / denominator),
        None => {
            let wide = BigUint::from(a) * BigUint::from(b) / BigUint::from(denominator);
            u128::try_from(&wide).ok()
        }
    }
}

/// `ceil(a * b / denominator)`. `None` on division by zero or overflow.
pub fn mul_div_up(a: u128, b: u128, denominator: u128) -> Option<u128> {
    if denominator == 0 {
        return None;
    }
    match a.checked_mul(b) {
        Some(product) => {
            let q = product / denominator;
            if product % denominator == 0 {
                Some(q)
            } else {
                q.checked_add(1)
            }
        }
        None => {
            let num = BigUint::from(a) * BigUint::from(b);
            let den = BigUint::from(denominator);
            let q = &num / &den;
            let rounded = if (&num % &den) == BigUint::from(0u8) {
                q
            } else {
                q + 1u8
            };
            u128::try_from(&rounded).ok()
        }
    }
}

/// `a * b / WAD`, floored.
pub fn wad_mul(a: u128, b: u128) -> Option<u128> {
    mul_div(a, b, WAD)
}

/// `a * WAD / b`, floored.
pub fn wad_div(a: u128, b: u128) -> Option<u128> {
    mul_div(a, WAD, b)
}

/// `10^exponent`, or `None` past `u128` range (exponent > 38).
pub fn ten_pow(exponent: u8) -> Option<u128> {
    10u128.checked_pow(exponent as u32)
}

/// Rescales `amount` from `from_decimals` to `to_decimals`, flooring when
/// precision is dropped.
pub fn rescale(amount: u128, from_decimals: u8, to_decimals: u8) -> Option<u128> {
    if from_decimals == to_decimals {
        Some(amount)
    } else if from_decimals < to_decimals {
        amount.checked_mul(ten_pow(to_decimals - from_decimals)?)
    } else {
        Some(amount / ten_pow(from_decimals - to_decimals)?)
    }
}

/// `part / whole` expressed in basis points, floored. Zero when `whole` is
/// zero.
pub fn ratio_bps(part: u128, whole: u128) -> Option<u128> {
    if whole == 0 {
        return Some(0);
    }
    mul_div(part, BPS_DENOMINATOR, whole)
}
