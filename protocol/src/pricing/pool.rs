//! Pool abstraction shared by every pool family.
//!
//! A pool exposes its constituent tokens and a *native* swap simulator.
//! Price discovery always goes through the simulator rather than a reserve
//! ratio: for stable and weighted curves the ratio of balances is not the
//! marginal price.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::composable::ComposableStablePool;
use super::stable::StablePool;
use super::weighted::WeightedPool;
use super::PriceError;
use crate::address::Address;
use crate::config::{MAX_TOKEN_DECIMALS, WAD};
use crate::math::rescale;

/// A constituent token of a pool together with the pool's balance of it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolToken {
    /// Token address.
    pub address: Address,
    /// Token decimals.
    pub decimals: u8,
    /// Raw balance held by the pool.
    pub balance: u128,
}

impl PoolToken {
    /// Convenience constructor.
    pub fn new(address: Address, decimals: u8, balance: u128) -> Self {
        Self {
            address,
            decimals,
            balance,
        }
    }
}

/// A liquidity pool that can be priced by unit-swap simulation.
///
/// Simulations take `&self`: whatever a pool does to compute a quote, it
/// cannot reach back into the caller's state.
pub trait LiquidityPool {
    /// The pool's own LP token address.
    fn address(&self) -> Address;

    /// Constituent tokens, in pool order. May include the pool's own LP
    /// token (composable pools list themselves).
    fn tokens(&self) -> &[PoolToken];

    /// Swap fee as a WAD fraction (0.3% = 3e15).
    fn swap_fee(&self) -> u128;

    /// LP supply relevant to pricing the pool's LP token.
    fn total_supply(&self) -> u128;

    /// Simulates swapping `amount_in` raw units of `tokens()[token_in]` into
    /// `tokens()[token_out]`, charging the swap fee on the input. Returns the
    /// raw output amount.
    fn query_swap(
        &self,
        token_in: usize,
        token_out: usize,
        amount_in: u128,
    ) -> Result<u128, PriceError>;

    /// Index of `token` among the constituents.
    fn index_of(&self, token: &Address) -> Option<usize> {
        self.tokens().iter().position(|t| t.address == *token)
    }
}

/// The three supported pool families behind one serializable type.
///
/// Dispatch is a plain `match` per call: the family is fixed when the pool
/// is constructed or deserialized. Serialized externally tagged
/// (`{"stable": {...}}`) so 128-bit balances survive JSON.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pool {
    /// Stableswap pool.
    Stable(StablePool),
    /// Weighted constant-product pool.
    Weighted(WeightedPool),
    /// Stableswap pool that lists its own LP token as a constituent.
    Composable(ComposableStablePool),
}

impl LiquidityPool for Pool {
    fn address(&self) -> Address {
        match self {
            Pool::Stable(p) => p.address(),
            Pool::Weighted(p) => p.address(),
            Pool::Composable(p) => p.address(),
        }
    }

    fn tokens(&self) -> &[PoolToken] {
        match self {
            Pool::Stable(p) => p.tokens(),
            Pool::Weighted(p) => p.tokens(),
            Pool::Composable(p) => p.tokens(),
        }
    }

    fn swap_fee(&self) -> u128 {
        match self {
            Pool::Stable(p) => p.swap_fee(),
            Pool::Weighted(p) => p.swap_fee(),
            Pool::Composable(p) => p.swap_fee(),
        }
    }

    fn total_supply(&self) -> u128 {
        match self {
            Pool::Stable(p) => p.total_supply(),
            Pool::Weighted(p) => p.total_supply(),
            Pool::Composable(p) => p.total_supply(),
        }
    }

    fn query_swap(
        &self,
        token_in: usize,
        token_out: usize,
        amount_in: u128,
    ) -> Result<u128, PriceError> {
        match self {
            Pool::Stable(p) => p.query_swap(token_in, token_out, amount_in),
            Pool::Weighted(p) => p.query_swap(token_in, token_out, amount_in),
            Pool::Composable(p) => p.query_swap(token_in, token_out, amount_in),
        }
    }
}

// ---------------------------------------------------------------------------
// Decimal conversion helpers for the simulators
// ---------------------------------------------------------------------------

/// Largest mantissa a `Decimal` can hold (96 bits).
const MAX_MANTISSA: u128 = (1 << 96) - 1;

/// Raw token amount to whole-token `Decimal`.
///
/// Balances too wide for the 96-bit mantissa at full scale lose their
/// lowest sub-unit digits; the whole-token part is always exact.
pub(crate) fn to_decimal(raw: u128, decimals: u8) -> Result<Decimal, PriceError> {
    if decimals > MAX_TOKEN_DECIMALS {
        return Err(PriceError::MathOverflow);
    }
    let mut mantissa = raw;
    let mut scale = u32::from(decimals);
    while mantissa > MAX_MANTISSA && scale > 0 {
        mantissa /= 10;
        scale -= 1;
    }
    let mantissa = i128::try_from(mantissa).map_err(|_| PriceError::MathOverflow)?;
    Decimal::try_from_i128_with_scale(mantissa, scale).map_err(|_| PriceError::MathOverflow)
}

/// Whole-token `Decimal` back to a raw amount, truncating dust.
pub(crate) fn from_decimal(value: Decimal, decimals: u8) -> Result<u128, PriceError> {
    if value.is_sign_negative() {
        return Ok(0);
    }
    let mantissa = u128::try_from(value.mantissa()).map_err(|_| PriceError::MathOverflow)?;
    let scale = u8::try_from(value.scale()).map_err(|_| PriceError::MathOverflow)?;
    rescale(mantissa, scale, decimals).ok_or(PriceError::MathOverflow)
}

/// WAD fraction to `Decimal` (0.3% fee = 0.003).
pub(crate) fn wad_to_decimal(value: u128) -> Result<Decimal, PriceError> {
    to_decimal(value, 18)
}

/// `amount_in * (1 - fee)` with the fee as a WAD fraction.
pub(crate) fn apply_fee(amount_in: Decimal, swap_fee: u128) -> Result<Decimal, PriceError> {
    if swap_fee >= WAD {
        return Err(PriceError::InvalidPool);
    }
    let keep = Decimal::ONE
        .checked_sub(wad_to_decimal(swap_fee)?)
        .ok_or(PriceError::MathOverflow)?;
    amount_in.checked_mul(keep).ok_or(PriceError::MathOverflow)
}

/// Index sanity shared by the simulators.
pub(crate) fn check_indices(
    len: usize,
    token_in: usize,
    token_out: usize,
) -> Result<(), PriceError> {
    if token_in >= len || token_out >= len || token_in == token_out {
        return Err(PriceError::InvalidToken);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_balances_keep_whole_tokens() {
        // 1e11 tokens at 18 decimals does not fit the mantissa at scale 18.
        let raw = 100_000_000_000 * WAD;
        let value = to_decimal(raw, 18).unwrap();
        assert_eq!(value, Decimal::from(100_000_000_000u64));
        assert_eq!(from_decimal(value, 18).unwrap(), raw);

        let dusty = to_decimal(raw + 7, 18).unwrap();
        assert_eq!(dusty.trunc(), Decimal::from(100_000_000_000u64));
    }

    #[test]
    fn from_decimal_truncates_and_floors_negatives() {
        assert_eq!(from_decimal(Decimal::new(123_456, 3), 2).unwrap(), 12_345);
        assert_eq!(from_decimal(Decimal::new(-5, 0), 18).unwrap(), 0);
        assert_eq!(from_decimal(Decimal::new(15, 1), 6).unwrap(), 1_500_000);
    }

    #[test]
    fn too_many_decimals_rejected() {
        assert_eq!(to_decimal(1, 29), Err(PriceError::MathOverflow));
    }
}
