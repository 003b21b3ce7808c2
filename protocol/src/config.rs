//! # Protocol Configuration & Constants
//!
//! Every magic number in the accounting core lives here. The NAV capacity
//! and the fixed-point scale are part of the persisted layout: changing them
//! after deployment means migrating every snapshot ever written.

// ---------------------------------------------------------------------------
// Fixed Point
// ---------------------------------------------------------------------------

/// 18-decimal fixed-point unit. Prices, NAV per share and fee fractions are
/// all expressed against this scale.
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// Decimals implied by [`WAD`].
pub const WAD_DECIMALS: u8 = 18;

/// Basis-point denominator. 10_000 bps = 100%.
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Version of the persisted snapshot layout. Vault snapshots carry it and
/// are refused on load when it differs. Bump on any change to a serialized
/// field.
pub const LAYOUT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// NAV Tracking
// ---------------------------------------------------------------------------

/// Capacity of the NAV ring buffer. One quarter of daily samples plus the
/// current one, so that a 90-samples-ago lookup is always addressable.
pub const MAX_NAV_TRACKING: usize = 91;

/// NAV timestamps are stored in 40 bits. Good until the year 36812.
pub const MAX_NAV_TIMESTAMP: u64 = (1 << 40) - 1;

/// Seconds in a day, the nominal sampling cadence of the NAV history.
pub const ONE_DAY_SECS: u64 = 86_400;

// ---------------------------------------------------------------------------
// Pricing
// ---------------------------------------------------------------------------

/// Upper bound on Newton iterations for the stableswap invariant solvers.
/// Balanced pools converge in a handful; 255 is the classic ceiling.
pub const STABLE_MAX_ITERATIONS: usize = 255;

/// Largest fraction of a token's pool balance a price simulation will swap,
/// in basis points. Thin pools get a scaled-down probe.
pub const MAX_PROBE_BPS_OF_BALANCE: u128 = 1_000;

/// Decimal precision above which token amounts cannot be represented in the
/// pool simulators.
pub const MAX_TOKEN_DECIMALS: u8 = 28;
