//! Composable stable pools.
//!
//! Same curve as [`super::stable`], but the pool lists its own LP token
//! among its constituents and pre-mints a large LP balance to itself. Two
//! consequences for pricing:
//!
//! - the LP entry takes no part in the invariant and can never be a quote;
//! - the supply that matters is the *actual* supply: total supply minus the
//!   LP tokens still parked in the pool.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::pool::{apply_fee, check_indices, from_decimal, to_decimal, LiquidityPool, PoolToken};
use super::stable::swap_out;
use super::PriceError;
use crate::address::Address;

/// A stable pool whose constituent list includes its own LP token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposableStablePool {
    /// LP token address; also appears in `tokens`.
    pub address: Address,
    /// Constituent tokens including the LP token.
    pub tokens: Vec<PoolToken>,
    /// Amplification coefficient `A`.
    pub amplification: u64,
    /// Swap fee, WAD fraction.
    pub swap_fee: u128,
    /// Raw LP total supply, pre-minted balance included.
    pub total_supply: u128,
}

impl ComposableStablePool {
    /// Index of the pool's own LP token among `tokens`.
    pub fn lp_index(&self) -> Option<usize> {
        self.tokens.iter().position(|t| t.address == self.address)
    }

    /// Maps a full-list index to its position in the invariant balances.
    fn reduced_index(&self, index: usize, lp_index: usize) -> usize {
        if index > lp_index {
            index - 1
        } else {
            index
        }
    }
}

impl LiquidityPool for ComposableStablePool {
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
        let parked = self
            .lp_index()
            .map(|i| self.tokens[i].balance)
            .unwrap_or(0);
        self.total_supply.saturating_sub(parked)
    }

    fn query_swap(
        &self,
        token_in: usize,
        token_out: usize,
        amount_in: u128,
    ) -> Result<u128, PriceError> {
        check_indices(self.tokens.len(), token_in, token_out)?;
        let lp_index = self.lp_index().ok_or(PriceError::InvalidPool)?;
        if token_in == lp_index || token_out == lp_index {
            // Swaps against the LP token are joins/exits, not trades.
            return Err(PriceError::InvalidToken);
        }

        let balances = self
            .tokens
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != lp_index)
            .map(|(_, t)| to_decimal(t.balance, t.decimals))
            .collect::<Result<Vec<Decimal>, _>>()?;

        let dx = apply_fee(
            to_decimal(amount_in, self.tokens[token_in].decimals)?,
            self.swap_fee,
        )?;
        let dy = swap_out(
            &balances,
            self.amplification,
            self.reduced_index(token_in, lp_index),
            self.reduced_index(token_out, lp_index),
            dx,
        )?;
        from_decimal(dy, self.tokens[token_out].decimals)
    }
}
