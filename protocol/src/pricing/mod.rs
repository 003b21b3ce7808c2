//! # Spot Price Resolution
//!
//! Prices a vault-held token against a quote token by asking the pool what
//! it would pay for one whole unit. Reserve ratios are not used: on stable
//! and weighted curves they are not the marginal price.
//!
//! ## Architecture
//!
//! ```text
//! pool.rs         LiquidityPool trait, PoolToken, the serializable Pool enum
//! stable.rs       stableswap invariant and Newton solvers
//! weighted.rs     weighted constant-product curve
//! composable.rs   stableswap that lists its own LP token as a constituent
//! ```
//!
//! ## Quote fallback
//!
//! The requested quote is honored only if the pool actually holds it, it is
//! not the token being priced, and it is not the pool's own LP token.
//! Otherwise the first constituent that is none of those is used, and the
//! caller learns which one through the returned `actual_quote`. Converting
//! from the actual quote back to the requested one is the aggregator's job.
//!
//! ## Fee handling
//!
//! `query_swap` charges the fee on the input. The reported price divides it
//! back out so that a 0.3% pool and a 0.01% pool holding the same balances
//! report the same marginal rate.

pub mod composable;
pub mod pool;
pub mod stable;
pub mod weighted;

pub use composable::ComposableStablePool;
pub use pool::{LiquidityPool, Pool, PoolToken};
pub use stable::StablePool;
pub use weighted::WeightedPool;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::Address;
use crate::config::{BPS_DENOMINATOR, MAX_PROBE_BPS_OF_BALANCE, WAD, WAD_DECIMALS};
use crate::error::{Classify, ErrorKind};
use crate::math::{mul_div, rescale, ten_pow};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while pricing a token against a pool.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PriceError {
    /// The token is not a constituent of the pool, or a swap index is bad.
    #[error("token is not priceable in this pool")]
    InvalidToken,

    /// The pool has no usable constituents, an unusable quote set, or
    /// parameters its curve cannot work with.
    #[error("pool cannot be used for pricing")]
    InvalidPool,

    /// The all-zero address was supplied as a token.
    #[error("zero address supplied")]
    ZeroAddress,

    /// An intermediate value left the representable range.
    #[error("arithmetic overflow during price simulation")]
    MathOverflow,

    /// A Newton solver hit its iteration ceiling.
    #[error("stableswap invariant did not converge")]
    InvariantDidNotConverge,
}

impl Classify for PriceError {
    fn kind(&self) -> ErrorKind {
        match self {
            PriceError::ZeroAddress => ErrorKind::Validation,
            _ => ErrorKind::Price,
        }
    }
}

// ---------------------------------------------------------------------------
// ReserveItemInfo
// ---------------------------------------------------------------------------

/// One constituent of a pool as seen by the safe-price aggregator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveItemInfo {
    /// Constituent token.
    pub token: Address,
    /// Raw pool balance of the token.
    pub reserve_amount: u128,
    /// WAD-scaled price of one token in `actual_quote_token`.
    pub raw_spot_price: u128,
    /// Quote the price is denominated in.
    pub actual_quote_token: Address,
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Picks the quote token for pricing `token` in `pool`.
fn resolve_quote<P: LiquidityPool>(
    pool: &P,
    token: Address,
    requested_quote: Address,
) -> Result<usize, PriceError> {
    let lp = pool.address();
    let usable = |candidate: &Address| *candidate != token && *candidate != lp;

    if usable(&requested_quote) {
        if let Some(index) = pool.index_of(&requested_quote) {
            return Ok(index);
        }
    }
    pool.tokens()
        .iter()
        .position(|t| usable(&t.address))
        .ok_or(PriceError::InvalidPool)
}

/// Spot price of one whole unit of `token` in `pool`, with the quote
/// actually used.
///
/// The price is WAD-scaled, quote per token, fee-free.
///
/// # Errors
///
/// - [`PriceError::ZeroAddress`] for the zero token.
/// - [`PriceError::InvalidPool`] when the pool has no constituents, no
///   usable quote, or an empty balance of `token`.
/// - [`PriceError::InvalidToken`] when `token` is not a constituent.
/// - Any simulator failure.
pub fn get_spot_price<P: LiquidityPool>(
    token: Address,
    pool: &P,
    requested_quote: Address,
) -> Result<(u128, Address), PriceError> {
    if token.is_zero() {
        return Err(PriceError::ZeroAddress);
    }
    let tokens = pool.tokens();
    if tokens.is_empty() {
        return Err(PriceError::InvalidPool);
    }
    let token_index = pool.index_of(&token).ok_or(PriceError::InvalidToken)?;
    let quote_index = resolve_quote(pool, token, requested_quote)?;

    let base = &tokens[token_index];
    let quote = &tokens[quote_index];

    // One whole unit, unless that would move a thin pool by more than the
    // probe ceiling.
    let unit = ten_pow(base.decimals).ok_or(PriceError::MathOverflow)?;
    let ceiling = mul_div(base.balance, MAX_PROBE_BPS_OF_BALANCE, BPS_DENOMINATOR)
        .ok_or(PriceError::MathOverflow)?;
    let probe = unit.min(ceiling);
    if probe == 0 {
        return Err(PriceError::InvalidPool);
    }

    let mut out = pool.query_swap(token_index, quote_index, probe)?;
    if probe < unit {
        out = mul_div(out, unit, probe).ok_or(PriceError::MathOverflow)?;
    }

    let out_wad = rescale(out, quote.decimals, WAD_DECIMALS).ok_or(PriceError::MathOverflow)?;
    let keep = WAD
        .checked_sub(pool.swap_fee())
        .filter(|k| *k > 0)
        .ok_or(PriceError::InvalidPool)?;
    let price = mul_div(out_wad, WAD, keep).ok_or(PriceError::MathOverflow)?;

    tracing::debug!(
        pool = %pool.address(),
        token = %token,
        quote = %quote.address,
        probe,
        price,
        "spot price resolved"
    );
    Ok((price, quote.address))
}

/// LP total supply and per-constituent reserves with spot prices, the raw
/// inputs for a safe LP-token price.
///
/// The pool's own LP token is skipped when it is listed as a constituent.
///
/// # Errors
///
/// [`PriceError::InvalidPool`] when the pool has no constituents or
/// `lp_token` is not the pool's LP address; otherwise whatever pricing any
/// constituent raises.
pub fn get_safe_spot_price_info<P: LiquidityPool>(
    pool: &P,
    lp_token: Address,
    quote: Address,
) -> Result<(u128, Vec<ReserveItemInfo>), PriceError> {
    if pool.tokens().is_empty() || lp_token != pool.address() {
        return Err(PriceError::InvalidPool);
    }

    let mut reserves = Vec::with_capacity(pool.tokens().len());
    for constituent in pool.tokens() {
        if constituent.address == lp_token {
            continue;
        }
        let (raw_spot_price, actual_quote_token) =
            get_spot_price(constituent.address, pool, quote)?;
        reserves.push(ReserveItemInfo {
            token: constituent.address,
            reserve_amount: constituent.balance,
            raw_spot_price,
            actual_quote_token,
        });
    }
    Ok((pool.total_supply(), reserves))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    fn three_pool(fee: u128) -> StablePool {
        StablePool {
            address: addr(0xAA),
            tokens: vec![
                PoolToken::new(addr(1), 18, 1_000_000 * WAD),
                PoolToken::new(addr(2), 18, 1_000_000 * WAD),
                PoolToken::new(addr(3), 6, 1_000_000 * 1_000_000),
            ],
            amplification: 100,
            swap_fee: fee,
            total_supply: 3_000_000 * WAD,
        }
    }

    fn composable() -> ComposableStablePool {
        let lp = addr(0xBB);
        ComposableStablePool {
            address: lp,
            tokens: vec![
                PoolToken::new(lp, 18, 2_000_000 * WAD),
                PoolToken::new(addr(1), 18, 1_000_000 * WAD),
                PoolToken::new(addr(2), 18, 1_000_000 * WAD),
            ],
            amplification: 100,
            swap_fee: 0,
            total_supply: 4_000_000 * WAD,
        }
    }

    #[test]
    fn constituent_quote_is_returned_unchanged() {
        let pool = three_pool(0);
        let (price, quote) = get_spot_price(addr(1), &pool, addr(3)).unwrap();
        assert_eq!(quote, addr(3));
        // Balanced pool: price within 0.1% of parity, WAD-scaled.
        assert!(price > 999 * WAD / 1_000 && price <= WAD, "price = {price}");
    }

    #[test]
    fn absent_quote_falls_back_to_another_constituent() {
        let pool = three_pool(0);
        let (_, quote) = get_spot_price(addr(2), &pool, addr(0x77)).unwrap();
        assert_ne!(quote, addr(2));
        assert_ne!(quote, pool.address);
        assert!(pool.index_of(&quote).is_some());
    }

    #[test]
    fn self_quote_falls_back() {
        let pool = three_pool(0);
        let (_, quote) = get_spot_price(addr(1), &pool, addr(1)).unwrap();
        assert_eq!(quote, addr(2));
    }

    #[test]
    fn lp_token_is_never_a_quote() {
        let pool = composable();
        let (_, quote) = get_spot_price(addr(1), &pool, pool.address).unwrap();
        assert_eq!(quote, addr(2));
    }

    #[test]
    fn absent_token_is_invalid_token() {
        let pool = three_pool(0);
        assert_eq!(
            get_spot_price(addr(9), &pool, addr(1)),
            Err(PriceError::InvalidToken)
        );
    }

    #[test]
    fn zero_token_rejected() {
        let pool = three_pool(0);
        let err = get_spot_price(Address::ZERO, &pool, addr(1)).unwrap_err();
        assert_eq!(err, PriceError::ZeroAddress);
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn empty_pool_is_invalid_pool() {
        let mut pool = three_pool(0);
        pool.tokens.clear();
        assert_eq!(
            get_spot_price(addr(1), &pool, addr(2)),
            Err(PriceError::InvalidPool)
        );
        assert_eq!(
            get_safe_spot_price_info(&pool, pool.address, addr(2)),
            Err(PriceError::InvalidPool)
        );
    }

    #[test]
    fn single_constituent_has_no_quote() {
        let mut pool = three_pool(0);
        pool.tokens.truncate(1);
        assert_eq!(
            get_spot_price(addr(1), &pool, addr(2)),
            Err(PriceError::InvalidPool)
        );
    }

    #[test]
    fn fee_is_divided_back_out() {
        let (no_fee, _) = get_spot_price(addr(1), &three_pool(0), addr(2)).unwrap();
        let (with_fee, _) = get_spot_price(addr(1), &three_pool(WAD / 100), addr(2)).unwrap();
        // Both report the same marginal rate up to rounding.
        assert!(no_fee.abs_diff(with_fee) < 1_000_000_000, "{no_fee} vs {with_fee}");
    }

    #[test]
    fn thin_pool_uses_scaled_probe() {
        let mut pool = three_pool(0);
        // Half a token of liquidity on each side: a full-unit probe would
        // exceed the balance.
        pool.tokens[0].balance = WAD / 2;
        pool.tokens[1].balance = WAD / 2;
        pool.tokens[2].balance = 500_000;
        let (price, _) = get_spot_price(addr(1), &pool, addr(2)).unwrap();
        assert!(price > 9 * WAD / 10 && price <= WAD, "price = {price}");
    }

    #[test]
    fn empty_balance_is_invalid_pool() {
        let mut pool = three_pool(0);
        pool.tokens[0].balance = 0;
        assert_eq!(
            get_spot_price(addr(1), &pool, addr(2)),
            Err(PriceError::InvalidPool)
        );
    }

    #[test]
    fn safe_info_skips_lp_token() {
        let pool = composable();
        let (supply, reserves) = get_safe_spot_price_info(&pool, pool.address, addr(2)).unwrap();
        assert_eq!(supply, 2_000_000 * WAD);
        assert_eq!(reserves.len(), 2);
        assert_eq!(reserves[0].token, addr(1));
        assert_eq!(reserves[0].actual_quote_token, addr(2));
        assert_eq!(reserves[0].reserve_amount, 1_000_000 * WAD);
        // The quote cannot price itself; it falls back to the other side.
        assert_eq!(reserves[1].token, addr(2));
        assert_eq!(reserves[1].actual_quote_token, addr(1));
    }

    #[test]
    fn safe_info_requires_matching_lp() {
        let pool = three_pool(0);
        assert_eq!(
            get_safe_spot_price_info(&pool, addr(0x55), addr(1)),
            Err(PriceError::InvalidPool)
        );
    }

    #[test]
    fn pool_enum_dispatches_and_roundtrips() {
        let pool = Pool::Composable(composable());
        let json = serde_json::to_string(&pool).unwrap();
        assert!(json.starts_with("{\"composable\":"));
        let back: Pool = serde_json::from_str(&json).unwrap();
        let (price, quote) = get_spot_price(addr(1), &back, addr(2)).unwrap();
        assert_eq!(quote, addr(2));
        assert!(price > 999 * WAD / 1_000 && price <= WAD + WAD / 1_000);
    }
}
