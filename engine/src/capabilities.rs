//! External collaborator capabilities (spec §1, §6). The engine never talks
//! to a ledger, an oracle, or a referral directory directly — these traits
//! are the seam, generalizing the teacher's Anchor `CpiContext`/account-info
//! boundary (where a transfer or an oracle read is a cross-program call)
//! into a plain trait object the host wires up however it likes (on-chain
//! CPI, an HTTP client, an in-memory fake for tests).

use crate::error::EngineResult;
use crate::math::U256;
use crate::state::{AssetId, MarketId, UserId};

/// Holds and transfers collateral in/out of engine custody. Transfers are
/// exact and fail (rather than partially apply) on insufficient funds.
pub trait Ledger {
    fn transfer_in(&mut self, asset: AssetId, from: UserId, amount: U256) -> EngineResult;
    fn transfer_out(&mut self, asset: AssetId, to: UserId, amount: U256) -> EngineResult;
}

/// Raw oracle reading before confidence-interval bias or decimal
/// normalization is applied (spec §4.5 `get_oracle_price`).
#[derive(Clone, Copy, Debug)]
pub struct OraclePriceData {
    /// Signed mantissa; normalized by `10^(18 + expo)` before use.
    pub price: i64,
    pub confidence: u64,
    pub expo: i32,
    pub publish_time: i64,
}

/// Returns the current oracle reading for a market, and applies a paid
/// update payload (spec §6: `update(payload) -> fee_consumed`).
pub trait PriceFeed {
    fn get_unsafe(&self, market: MarketId) -> EngineResult<OraclePriceData>;
    fn update(&mut self, payload: &[u8]) -> EngineResult<U256>;
}

/// A second, independent price used to bound the primary oracle reading
/// (spec §4.5's reference-price deviation check). `0` means "no reference
/// available", per spec §6.
pub trait ReferencePriceFeed {
    fn get(&self, market: MarketId) -> EngineResult<U256>;
}

/// Referral code directory (spec §6). Out of scope for the core's own
/// accounting — the engine only records and reads through this seam.
pub trait ReferralDirectory {
    fn info(&self, user: UserId) -> EngineResult<(u64, Option<UserId>)>;
    fn set(&mut self, user: UserId, code: u64) -> EngineResult;
}
