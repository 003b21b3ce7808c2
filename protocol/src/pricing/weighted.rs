//! Weighted constant-product pools.
//!
//! ```text
//! out = B_out · (1 − (B_in / (B_in + A_in))^(w_in / w_out))
//! ```
//!
//! With equal weights this is the familiar `x·y = k` curve.

use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};

use super::pool::{
    apply_fee, check_indices, from_decimal, to_decimal, wad_to_decimal, LiquidityPool, PoolToken,
};
use super::PriceError;
use crate::address::Address;
use crate::config::WAD;

/// A weighted pool. Weights are WAD fractions summing to exactly one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedPool {
    /// LP token address.
    pub address: Address,
    /// Constituent tokens.
    pub tokens: Vec<PoolToken>,
    /// Normalized weights, WAD-scaled, same order as `tokens`.
    pub weights: Vec<u128>,
    /// Swap fee, WAD fraction.
    pub swap_fee: u128,
    /// LP total supply.
    pub total_supply: u128,
}

impl WeightedPool {
    fn check_weights(&self) -> Result<(), PriceError> {
        if self.weights.len() != self.tokens.len() || self.weights.iter().any(|w| *w == 0) {
            return Err(PriceError::InvalidPool);
        }
        let total = self
            .weights
            .iter()
            .try_fold(0u128, |acc, w| acc.checked_add(*w))
            .ok_or(PriceError::MathOverflow)?;
        if total != WAD {
            return Err(PriceError::InvalidPool);
        }
        Ok(())
    }
}

impl LiquidityPool for WeightedPool {
    fn address(&self) -> Address {
        self.address
    }

    fn tokens(&self) -> &[PoolToken] {
        &self.tokens
    }

    fn swap_fee(&self) -> u128 {
        self.swap_fee
    }

    fn total_supply(&self) -> u128 {
        self.total_supply
    }

    fn query_swap(
        &self,
        token_in: usize,
        token_out: usize,
        amount_in: u128,
    ) -> Result<u128, PriceError> {
        check_indices(self.tokens.len(), token_in, token_out)?;
        self.check_weights()?;

        let t_in = &self.tokens[token_in];
        let t_out = &self.tokens[token_out];
        let balance_in = to_decimal(t_in.balance, t_in.decimals)?;
        let balance_out = to_decimal(t_out.balance, t_out.decimals)?;
        if balance_in.is_zero() || balance_out.is_zero() {
            return Err(PriceError::InvalidPool);
        }

        let amount = apply_fee(to_decimal(amount_in, t_in.decimals)?, self.swap_fee)?;
        if amount.is_zero() {
            return Ok(0);
        }

        let exponent = wad_to_decimal(self.weights[token_in])?
            .checked_div(wad_to_decimal(self.weights[token_out])?)
            .ok_or(PriceError::MathOverflow)?;
        let base = balance_in
            .checked_add(amount)
            .and_then(|denominator| balance_in.checked_div(denominator))
            .ok_or(PriceError::MathOverflow)?;
        let power = base.checked_powd(exponent).ok_or(PriceError::MathOverflow)?;
        let out = Decimal::ONE
            .checked_sub(power)
            .and_then(|complement| balance_out.checked_mul(complement))
            .ok_or(PriceError::MathOverflow)?;

        from_decimal(out, t_out.decimals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_50_50() -> WeightedPool {
        WeightedPool {
            address: Address::repeat_byte(0xE0),
            tokens: vec![
                PoolToken::new(Address::repeat_byte(1), 18, 1_000 * WAD),
                PoolToken::new(Address::repeat_byte(2), 18, 2_000 * WAD),
            ],
            weights: vec![WAD / 2, WAD / 2],
            swap_fee: 0,
            total_supply: 1_000 * WAD,
        }
    }

    #[test]
    fn equal_weights_follow_constant_product() {
        let pool = pool_50_50();
        let out = pool.query_swap(0, 1, WAD).unwrap();
        // 2000 · (1 − 1000/1001) = 1.998001998...
        let expected = 1_998_001_998_001_998_001u128;
        let diff = out.abs_diff(expected);
        assert!(diff < 1_000_000_000_000, "out = {out}");
    }

    #[test]
    fn heavier_output_weight_lowers_output() {
        let mut pool = pool_50_50();
        pool.weights = vec![WAD / 5, WAD * 4 / 5];
        let out = pool.query_swap(0, 1, WAD).unwrap();
        // (1000/1001)^(0.25) → out ≈ 0.4995
        assert!(out > 490_000_000_000_000_000 && out < 510_000_000_000_000_000, "out = {out}");
    }

    #[test]
    fn pool_beyond_decimal_mantissa_still_prices() {
        let mut pool = pool_50_50();
        let whale = 500_000_000_000 * WAD;
        pool.tokens[0].balance = whale;
        pool.tokens[1].balance = whale;
        let out = pool.query_swap(0, 1, WAD).unwrap();
        // 5e11 · (1 − 5e11/(5e11 + 1)) = 0.999999999998...
        let expected = 999_999_999_998_000_000u128;
        assert!(out.abs_diff(expected) < 1_000_000_000, "out = {out}");
    }

    #[test]
    fn malformed_weights_rejected() {
        let mut pool = pool_50_50();
        pool.weights = vec![WAD / 2];
        assert_eq!(pool.query_swap(0, 1, WAD), Err(PriceError::InvalidPool));

        pool.weights = vec![WAD / 2, WAD / 3];
        assert_eq!(pool.query_swap(0, 1, WAD), Err(PriceError::InvalidPool));
    }

    #[test]
    fn full_fee_rejected() {
        let mut pool = pool_50_50();
        pool.swap_fee = WAD;
        assert_eq!(pool.query_swap(0, 1, WAD), Err(PriceError::InvalidPool));
    }
}
