//! Stableswap pools.
//!
//! Invariant (n tokens, amplification A, balances x_i normalized to whole
//! tokens):
//!
//! ```text
//! A·n·Σx + D = A·D·n + D^(n+1) / (n^n·Πx)
//! ```
//!
//! `D` and the post-swap balance `y` are found by Newton iteration. Both
//! solvers are shared with [`super::composable`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::pool::{apply_fee, check_indices, from_decimal, to_decimal, LiquidityPool, PoolToken};
use super::PriceError;
use crate::address::Address;
use crate::config::STABLE_MAX_ITERATIONS;

/// Convergence tolerance for the Newton solvers, in whole tokens.
fn tolerance() -> Decimal {
    Decimal::new(1, 12)
}

/// A stableswap pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StablePool {
    /// LP token address.
    pub address: Address,
    /// Constituent tokens.
    pub tokens: Vec<PoolToken>,
    /// Amplification coefficient `A`.
    pub amplification: u64,
    /// Swap fee, WAD fraction.
    pub swap_fee: u128,
    /// LP total supply.
    pub total_supply: u128,
}

impl LiquidityPool for StablePool {
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
        let balances = self
            .tokens
            .iter()
            .map(|t| to_decimal(t.balance, t.decimals))
            .collect::<Result<Vec<_>, _>>()?;

        let dx = apply_fee(
            to_decimal(amount_in, self.tokens[token_in].decimals)?,
            self.swap_fee,
        )?;
        let dy = swap_out(&balances, self.amplification, token_in, token_out, dx)?;
        from_decimal(dy, self.tokens[token_out].decimals)
    }
}

// ---------------------------------------------------------------------------
// Invariant math
// ---------------------------------------------------------------------------

fn mul(a: Decimal, b: Decimal) -> Result<Decimal, PriceError> {
    a.checked_mul(b).ok_or(PriceError::MathOverflow)
}

fn div(a: Decimal, b: Decimal) -> Result<Decimal, PriceError> {
    if b.is_zero() {
        return Err(PriceError::InvalidPool);
    }
    a.checked_div(b).ok_or(PriceError::MathOverflow)
}

fn add(a: Decimal, b: Decimal) -> Result<Decimal, PriceError> {
    a.checked_add(b).ok_or(PriceError::MathOverflow)
}

fn sub(a: Decimal, b: Decimal) -> Result<Decimal, PriceError> {
    a.checked_sub(b).ok_or(PriceError::MathOverflow)
}

/// Output of swapping `dx` (already net of fees) of token `i` into token
/// `j`, in whole tokens.
pub(crate) fn swap_out(
    balances: &[Decimal],
    amplification: u64,
    i: usize,
    j: usize,
    dx: Decimal,
) -> Result<Decimal, PriceError> {
    if balances.len() < 2 || amplification == 0 {
        return Err(PriceError::InvalidPool);
    }
    check_indices(balances.len(), i, j)?;
    if dx.is_zero() {
        return Ok(Decimal::ZERO);
    }

    let d = compute_invariant(balances, amplification)?;
    let x_new = add(balances[i], dx)?;
    let y = compute_balance_out(balances, amplification, i, j, x_new, d)?;
    let dy = sub(balances[j], y)?;
    if dy.is_sign_negative() {
        return Ok(Decimal::ZERO);
    }
    Ok(dy)
}

/// Solves for the invariant `D`.
pub(crate) fn compute_invariant(
    balances: &[Decimal],
    amplification: u64,
) -> Result<Decimal, PriceError> {
    let n = Decimal::from(balances.len() as u64);
    let mut sum = Decimal::ZERO;
    for x in balances {
        if x.is_zero() {
            return Err(PriceError::InvalidPool);
        }
        sum = add(sum, *x)?;
    }

    let ann = mul(Decimal::from(amplification), n)?;
    let mut d = sum;
    for _ in 0..STABLE_MAX_ITERATIONS {
        let mut d_p = d;
        for x in balances {
            d_p = div(mul(d_p, d)?, mul(*x, n)?)?;
        }
        let prev = d;
        let numerator = mul(add(mul(ann, sum)?, mul(d_p, n)?)?, d)?;
        let denominator = add(
            mul(sub(ann, Decimal::ONE)?, d)?,
            mul(add(n, Decimal::ONE)?, d_p)?,
        )?;
        d = div(numerator, denominator)?;
        if sub(d, prev)?.abs() <= tolerance() {
            return Ok(d);
        }
    }
    Err(PriceError::InvariantDidNotConverge)
}

/// Solves for the balance of token `j` once token `i` holds `x_new`, keeping
/// `D` constant.
pub(crate) fn compute_balance_out(
    balances: &[Decimal],
    amplification: u64,
    i: usize,
    j: usize,
    x_new: Decimal,
    d: Decimal,
) -> Result<Decimal, PriceError> {
    let n = Decimal::from(balances.len() as u64);
    let ann = mul(Decimal::from(amplification), n)?;

    let mut c = d;
    let mut partial_sum = Decimal::ZERO;
    for (k, balance) in balances.iter().enumerate() {
        if k == j {
            continue;
        }
        let x = if k == i { x_new } else { *balance };
        partial_sum = add(partial_sum, x)?;
        c = div(mul(c, d)?, mul(x, n)?)?;
    }
    c = div(mul(c, d)?, mul(ann, n)?)?;
    let b = add(partial_sum, div(d, ann)?)?;

    let mut y = d;
    for _ in 0..STABLE_MAX_ITERATIONS {
        let prev = y;
        let numerator = add(mul(y, y)?, c)?;
        let denominator = sub(add(mul(Decimal::TWO, y)?, b)?, d)?;
        y = div(numerator, denominator)?;
        if sub(y, prev)?.abs() <= tolerance() {
            return Ok(y);
        }
    }
    Err(PriceError::InvariantDidNotConverge)
}
