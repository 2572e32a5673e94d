//! The event log (spec §6): every state mutation emits exactly one event
//! from this set. The engine appends to a caller-supplied `Vec<Event>`
//! rather than owning a subscriber registry — the host decides whether
//! that means an on-chain log, a message bus publish, or a test assertion.

use crate::math::{I256, U256};
use crate::state::{AssetId, MarketId, UserId};

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum Event {
    OrderCreated { order_id: u32, user: UserId, asset: AssetId, market: MarketId },
    OrderCancelled { order_id: u32, reason: &'static str },
    PositionIncreased { user: UserId, asset: AssetId, market: MarketId, size: U256, avg_price: U256 },
    PositionDecreased { user: UserId, asset: AssetId, market: MarketId, executed: U256, pnl: I256 },
    MarginIncreased { user: UserId, asset: AssetId, market: MarketId, amount: U256 },
    MarginDecreased { user: UserId, asset: AssetId, market: MarketId, amount: U256 },
    FeePaid { order_id: u32, pool_share: U256, treasury_share: U256, keeper_share: U256 },
    PositionLiquidated { user: UserId, asset: AssetId, market: MarketId, pnl: I256 },
    PoolDeposit { order_id: u32, user: UserId, asset: AssetId, amount: U256, lp_minted: U256 },
    PoolWithdrawal { order_id: u32, user: UserId, asset: AssetId, amount: U256, lp_burned: U256 },
    DirectPoolDeposit { user: UserId, asset: AssetId, amount: U256 },
    PoolPayIn { asset: AssetId, amount: U256 },
    PoolPayOut { asset: AssetId, amount: U256 },
    BufferToPool { asset: AssetId, amount: U256 },
    FundingUpdated { asset: AssetId, market: MarketId, cumulative_index: I256 },
    IncrementOI { asset: AssetId, market: MarketId, is_long: bool, amount: U256 },
    DecrementOI { asset: AssetId, market: MarketId, is_long: bool, amount: U256 },
    GlobalUPLSet { asset: AssetId, upl: I256 },
    OrderExecuted { order_id: u32, price: U256 },
    OrderSkipped { order_id: u32, reason: &'static str },
    LiquidationError { user: UserId, asset: AssetId, market: MarketId, reason: &'static str },
    TrailingStopOrderExecuted { order_id: u32, price: U256, trailing_ref: U256 },
}

/// Outcome of a single item within a keeper batch (spec §4.5, §7): batch
/// processing never aborts, so per-item failures are data rather than a
/// thrown `EngineError`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Order executed or otherwise resolved; remove it.
    Executed,
    /// Hard failure; cancel the order with the given reason.
    Cancelled,
    /// Transient non-match; keep the order in place.
    Kept,
}
