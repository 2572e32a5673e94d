//! Deterministic core state machine for an oracle-priced perpetual futures
//! exchange (spec §1–§9). `Engine` is the top-level struct that owns the
//! five subsystems (§2's C4–C8) and exposes the command surface of §6; it
//! plays the role the teacher's `#[program] mod spot_margin { ... }`
//! Anchor entrypoint plays for its instructions, minus the Anchor
//! account-context machinery, since this crate has no on-chain host —
//! every command is a plain method taking the capabilities (`Ledger`,
//! `PriceFeed`, `ReferencePriceFeed`, `ReferralDirectory`) it needs as
//! arguments, per spec §9's "invert the cycle, pass context in" resolution.
//!
//! Access control over *which* callers may invoke governance setters is
//! explicitly out of scope (spec §1: "governance / timelock / access
//! control" is an external collaborator this core does not model) — those
//! methods trust the caller the way the subsystems trust `keeper`/`sender`
//! arguments already authenticated by a host-level capability.

pub mod capabilities;
pub mod config;
pub mod error;
pub mod events;
pub mod execution_engine;
pub mod funding_tracker;
pub mod id_set;
pub mod liquidity_pool;
pub mod math;
pub mod order_book;
pub mod position_manager;
pub mod risk_validator;
pub mod state;

use std::collections::HashMap;

use capabilities::{Ledger, PriceFeed, ReferencePriceFeed, ReferralDirectory};
use config::GovernanceConfig;
use error::{EngineError, EngineResult};
use events::Event;
use funding_tracker::FundingTracker;
use liquidity_pool::LiquidityPool;
use math::{I256, U256};
use order_book::OrderBook;
use position_manager::PositionManager;
use risk_validator::RiskValidator;
use state::{Asset, AssetId, LiquidityOrder, Market, MarketId, Order, Position, PositionKey, UserId};

pub use execution_engine::ExecutionEngine;

/// The value a command produces alongside the events it emitted. Every
/// mutating method on `Engine` returns one of these rather than appending to
/// a subscriber the engine owns (spec §6's event log is the host's to
/// collect, per `events.rs`'s doc comment).
#[derive(Clone, Debug)]
pub struct Outcome<T> {
    pub value: T,
    pub events: Vec<Event>,
}

/// Top-level engine state: the five subsystems of §2 (C4–C8) plus the
/// market/asset registries and governance parameters that glue them
/// together. `ExecutionEngine` (C9) is stateless and invoked as a bare
/// value, matching `execution_engine.rs`'s own design.
#[derive(Clone, Debug, Default)]
pub struct Engine {
    pub governance: GovernanceConfig,
    pub markets: HashMap<MarketId, Market>,
    pub assets: HashMap<AssetId, Asset>,
    pub order_book: OrderBook,
    pub position_manager: PositionManager,
    pub liquidity_pool: LiquidityPool,
    pub funding: FundingTracker,
    pub risk: RiskValidator,
}

impl Engine {
    pub fn new() -> Self {
        Engine::default()
    }

    fn market(&self, id: MarketId) -> EngineResult<Market> {
        self.markets.get(&id).copied().ok_or(EngineError::InvalidInput)
    }

    fn asset(&self, id: AssetId) -> EngineResult<Asset> {
        self.assets.get(&id).copied().ok_or(EngineError::InvalidInput)
    }

    // ---- Read-only queries (spec §5: "may run concurrently with the
    // writer given a consistent snapshot") ----

    pub fn order(&self, id: u32) -> Option<&Order> {
        self.order_book.order(id)
    }

    pub fn open_orders_of(&self, user: UserId) -> impl Iterator<Item = u32> + '_ {
        self.order_book.orders_of(user)
    }

    pub fn liquidity_order(&self, id: u32) -> Option<&LiquidityOrder> {
        self.liquidity_pool.order(id)
    }

    pub fn position_of(&self, user: UserId, asset: AssetId, market: MarketId) -> Option<&Position> {
        self.position_manager.position(PositionKey { user, asset, market })
    }

    pub fn pool_state(&self, asset: AssetId) -> state::Pool {
        self.liquidity_pool.pool_state(asset)
    }

    pub fn funding_index(&self, asset: AssetId, market: MarketId) -> I256 {
        self.funding.current(asset, market)
    }

    pub fn open_interest(&self, asset: AssetId, market: MarketId) -> state::OpenInterest {
        self.position_manager.open_interest(asset, market)
    }

    // ---- Trader commands ----

    /// `submit_order` (spec §6). `order.user` must already carry the
    /// intended end-user (the funding-account/reduce-only checks inside
    /// `OrderBook::submit` read it before it is resolved against `sender`,
    /// per spec §4.4's listed step order) — for a plain trader submission
    /// the caller sets `order.user = sender`.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_order(
        &mut self,
        sender: UserId,
        order: Order,
        tp_price: U256,
        sl_price: U256,
        trailing_stop_bps: u32,
        referral_code: u64,
        sender_is_approved_or_signed: bool,
        now: i64,
        referrals: &mut dyn ReferralDirectory,
        ledger: &mut dyn Ledger,
    ) -> EngineResult<Outcome<(u32, Option<u32>, Option<u32>)>> {
        let market = self.market(order.market)?;
        let asset = self.asset(order.asset)?;
        let opposite_key = PositionKey { user: order.user, asset: order.asset, market: order.market };
        let opposite_position = self.position_manager.position(opposite_key).copied();
        let current_total_oi = self.position_manager.open_interest(order.asset, order.market).total();

        let mut events = Vec::new();
        let value = self.order_book.submit(
            sender,
            order,
            tp_price,
            sl_price,
            trailing_stop_bps,
            referral_code,
            sender_is_approved_or_signed,
            now,
            &asset,
            &market,
            &mut self.governance,
            &mut self.risk,
            opposite_position.as_ref(),
            current_total_oi,
            referrals,
            ledger,
            &mut events,
        )?;
        Ok(Outcome { value, events })
    }

    pub fn cancel_order(&mut self, id: u32, caller: UserId, ledger: &mut dyn Ledger) -> EngineResult<Outcome<()>> {
        let mut events = Vec::new();
        self.order_book.cancel(id, caller, ledger, &mut events)?;
        Ok(Outcome { value: (), events })
    }

    /// `cancel_orders([id])` (spec §6). Not atomic across ids (spec §1
    /// Non-goal: "no atomic multi-order transactions") — each id is
    /// cancelled independently and a failure on one aborts only the
    /// remainder of the batch, leaving already-processed cancellations in
    /// place.
    pub fn cancel_orders(&mut self, ids: &[u32], caller: UserId, ledger: &mut dyn Ledger) -> EngineResult<Outcome<()>> {
        let mut events = Vec::new();
        for &id in ids {
            self.order_book.cancel(id, caller, ledger, &mut events)?;
        }
        Ok(Outcome { value: (), events })
    }

    pub fn add_margin(
        &mut self,
        user: UserId,
        asset: AssetId,
        market: MarketId,
        margin: U256,
        ledger: &mut dyn Ledger,
    ) -> EngineResult<Outcome<()>> {
        let mut events = Vec::new();
        self.position_manager.add_margin(user, asset, market, margin, ledger, &mut events)?;
        Ok(Outcome { value: (), events })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn remove_margin(
        &mut self,
        user: UserId,
        asset: AssetId,
        market_id: MarketId,
        margin: U256,
        now: i64,
        reference_price_feed: &dyn ReferencePriceFeed,
        ledger: &mut dyn Ledger,
    ) -> EngineResult<Outcome<()>> {
        let market = self.market(market_id)?;
        let reference_price = reference_price_feed.get(market_id)?;
        let mut events = Vec::new();
        self.position_manager.remove_margin(
            user,
            asset,
            market_id,
            margin,
            market.max_leverage,
            self.governance.remove_margin_buffer_bps,
            market.funding_factor_bps,
            reference_price,
            &self.funding,
            now,
            ledger,
            &mut events,
        )?;
        Ok(Outcome { value: (), events })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn deposit_request(
        &mut self,
        sender: UserId,
        requested_user: UserId,
        asset: AssetId,
        amount: U256,
        min_amount_after_tax: U256,
        now: i64,
        ledger: &mut dyn Ledger,
    ) -> EngineResult<Outcome<u32>> {
        let is_funding_account = self.governance.is_funding_account(&sender);
        let execution_fee = self.governance.order_execution_fee;
        let value = self.liquidity_pool.deposit_request(
            sender,
            requested_user,
            is_funding_account,
            asset,
            amount,
            min_amount_after_tax,
            execution_fee,
            now,
            ledger,
        )?;
        Ok(Outcome { value, events: Vec::new() })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn withdraw_request(
        &mut self,
        sender: UserId,
        requested_user: UserId,
        asset: AssetId,
        amount: U256,
        min_amount_after_tax: U256,
        now: i64,
        ledger: &mut dyn Ledger,
    ) -> EngineResult<Outcome<u32>> {
        let is_funding_account = self.governance.is_funding_account(&sender);
        let execution_fee = self.governance.order_execution_fee;
        let value = self.liquidity_pool.withdraw_request(
            sender,
            requested_user,
            is_funding_account,
            asset,
            amount,
            min_amount_after_tax,
            execution_fee,
            now,
            ledger,
        )?;
        Ok(Outcome { value, events: Vec::new() })
    }

    pub fn cancel_liquidity_order(&mut self, id: u32, caller: UserId, ledger: &mut dyn Ledger) -> EngineResult<Outcome<()>> {
        let mut events = Vec::new();
        self.liquidity_pool.cancel_liquidity_order(id, caller, ledger, &mut events)?;
        Ok(Outcome { value: (), events })
    }

    pub fn direct_pool_deposit(
        &mut self,
        user: UserId,
        asset: AssetId,
        amount: U256,
        now: i64,
        ledger: &mut dyn Ledger,
    ) -> EngineResult<Outcome<()>> {
        self.asset(asset)?;
        let mut events = Vec::new();
        self.liquidity_pool.direct_pool_deposit(user, asset, amount, now, self.governance.buffer_payout_period_s, ledger, &mut events)?;
        Ok(Outcome { value: (), events })
    }

    // ---- Keeper commands ----

    /// `execute_orders` for trading orders (spec §4.5, §6).
    #[allow(clippy::too_many_arguments)]
    pub fn execute_trading_orders(
        &mut self,
        ids: &[u32],
        oracle_payload: &[u8],
        max_oracle_fee: U256,
        trailing_refs: &HashMap<u32, U256>,
        keeper: UserId,
        now: i64,
        price_feed: &mut dyn PriceFeed,
        reference_price_feed: &dyn ReferencePriceFeed,
        ledger: &mut dyn Ledger,
    ) -> EngineResult<Outcome<()>> {
        let mut events = Vec::new();
        ExecutionEngine.execute_orders(
            ids,
            oracle_payload,
            max_oracle_fee,
            trailing_refs,
            keeper,
            now,
            &self.markets,
            &self.assets,
            &self.governance,
            &mut self.order_book,
            &mut self.position_manager,
            &mut self.liquidity_pool,
            &mut self.funding,
            &mut self.risk,
            price_feed,
            reference_price_feed,
            ledger,
            &mut events,
        )?;
        Ok(Outcome { value: (), events })
    }

    /// `execute_orders` for liquidity orders (spec §4.2, §6): distinct
    /// entry point from the trading-order batch above, taking per-asset
    /// `global_upl` readings instead of an oracle payload.
    pub fn execute_liquidity_orders(
        &mut self,
        ids: &[u32],
        asset_upls: &[(AssetId, I256)],
        keeper: UserId,
        now: i64,
        ledger: &mut dyn Ledger,
    ) -> EngineResult<Outcome<()>> {
        self.governance.require_keeper(&keeper)?;
        self.governance.require_not_paused_for_processing()?;
        let asset_total_oi: HashMap<AssetId, u128> =
            self.assets.keys().map(|&a| (a, self.position_manager.asset_open_interest_total(a))).collect();
        let mut events = Vec::new();
        self.liquidity_pool.execute_orders(
            ids,
            asset_upls,
            &asset_total_oi,
            now,
            self.governance.buffer_payout_period_s,
            self.governance.max_liquidity_order_ttl_s,
            self.governance.utilization_multiplier_bps,
            keeper,
            ledger,
            &mut events,
        )?;
        Ok(Outcome { value: (), events })
    }

    pub fn set_global_upls(&mut self, keeper: UserId, asset_upls: &[(AssetId, I256)], now: i64) -> EngineResult<Outcome<()>> {
        self.governance.require_keeper(&keeper)?;
        let mut events = Vec::new();
        self.liquidity_pool.set_global_upls(asset_upls, now, self.governance.buffer_payout_period_s, &mut events)?;
        Ok(Outcome { value: (), events })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn liquidate_positions(
        &mut self,
        rows: &[(UserId, AssetId, MarketId)],
        keeper: UserId,
        now: i64,
        price_feed: &dyn PriceFeed,
        reference_price_feed: &dyn ReferencePriceFeed,
        ledger: &mut dyn Ledger,
    ) -> EngineResult<Outcome<()>> {
        let mut events = Vec::new();
        ExecutionEngine.liquidate_positions(
            rows,
            keeper,
            now,
            &self.markets,
            &self.governance,
            &mut self.position_manager,
            &mut self.liquidity_pool,
            &mut self.funding,
            price_feed,
            reference_price_feed,
            ledger,
            &mut events,
        )?;
        Ok(Outcome { value: (), events })
    }

    // ---- Governance (spec §6; caller authorization is out of scope, §1) ----

    pub fn set_market(&mut self, market: Market) -> EngineResult {
        market.validate()?;
        self.markets.insert(market.id, market);
        Ok(())
    }

    pub fn set_asset(&mut self, asset: Asset) -> EngineResult {
        self.assets.insert(asset.id, asset);
        Ok(())
    }

    pub fn set_fee_share(&mut self, pool_share_bps: u32) -> EngineResult {
        self.governance.set_fee_share(pool_share_bps)
    }

    pub fn set_buffer_payout_period(&mut self, period_s: i64) -> EngineResult {
        self.governance.set_buffer_payout_period(period_s)
    }

    pub fn set_utilization_multiplier(&mut self, bps: u32) -> EngineResult {
        self.governance.set_utilization_multiplier(bps)
    }

    pub fn set_max_liquidity_order_ttl(&mut self, ttl_s: i64) -> EngineResult {
        self.governance.set_max_liquidity_order_ttl(ttl_s)
    }

    pub fn set_order_execution_fee(&mut self, fee: U256) -> EngineResult {
        self.governance.set_order_execution_fee(fee)
    }

    pub fn set_max_market_order_ttl(&mut self, ttl_s: i64) -> EngineResult {
        self.governance.set_max_market_order_ttl(ttl_s)
    }

    pub fn set_max_trigger_order_ttl(&mut self, ttl_s: i64) -> EngineResult {
        self.governance.set_max_trigger_order_ttl(ttl_s)
    }

    pub fn set_min_position_hold_time(&mut self, hold_s: i64) -> EngineResult {
        self.governance.set_min_position_hold_time(hold_s)
    }

    pub fn set_remove_margin_buffer(&mut self, bps: u32) -> EngineResult {
        self.governance.set_remove_margin_buffer(bps)
    }

    pub fn set_keeper_fee_share(&mut self, bps: u32) -> EngineResult {
        self.governance.set_keeper_fee_share(bps)
    }

    pub fn set_trailing_stop_fee(&mut self, bps: u32) -> EngineResult {
        self.governance.set_trailing_stop_fee(bps)
    }

    pub fn set_liquidation_fee(&mut self, bps: u32) -> EngineResult {
        self.governance.set_liquidation_fee(bps)
    }

    pub fn set_pool_hourly_decay(&mut self, bps: u32) -> EngineResult {
        self.governance.set_pool_hourly_decay(bps)
    }

    pub fn set_pool_profit_limit(&mut self, asset: AssetId, bps: u32) -> EngineResult {
        self.risk.set_profit_limit(asset, bps)
    }

    pub fn set_max_oi(&mut self, asset: AssetId, market: MarketId, cap: u128) {
        self.risk.set_max_oi(asset, market, cap);
    }

    pub fn whitelist_keeper(&mut self, keeper: UserId) {
        self.governance.whitelist_keeper(keeper);
    }

    pub fn whitelist_funding_account(&mut self, account: UserId) {
        self.governance.whitelist_funding_account(account);
    }

    pub fn set_new_orders_paused(&mut self, paused: bool) {
        self.governance.are_new_orders_paused = paused;
    }

    pub fn set_processing_paused(&mut self, paused: bool) {
        self.governance.is_processing_paused = paused;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use state::{MarketCategory, OrderDetail, OrderKind};

    struct FakeLedger;
    impl Ledger for FakeLedger {
        fn transfer_in(&mut self, _asset: AssetId, _from: UserId, _amount: U256) -> EngineResult {
            Ok(())
        }
        fn transfer_out(&mut self, _asset: AssetId, _to: UserId, _amount: U256) -> EngineResult {
            Ok(())
        }
    }

    struct FakeReferrals;
    impl ReferralDirectory for FakeReferrals {
        fn info(&self, _user: UserId) -> EngineResult<(u64, Option<UserId>)> {
            Ok((0, None))
        }
        fn set(&mut self, _user: UserId, _code: u64) -> EngineResult {
            Ok(())
        }
    }

    fn user(byte: u8) -> UserId {
        UserId([byte; 32])
    }

    fn market_id() -> MarketId {
        MarketId::from_str_padded("ETH-USD")
    }

    fn market() -> Market {
        Market {
            id: market_id(),
            category: MarketCategory::Crypto,
            reference_feed_id: 0,
            oracle_feed_id: 0,
            max_leverage: 50,
            max_deviation_bps: 500,
            fee_bps: 10,
            liq_threshold_bps: 8_000,
            funding_factor_bps: 1_000,
            min_order_age_s: 0,
            oracle_max_age_s: 60,
            is_reduce_only: false,
            price_conf_threshold_bps: 0,
            price_conf_multiplier_bps: 0,
        }
    }

    fn asset() -> Asset {
        Asset { id: AssetId::NATIVE, decimals: 6, min_size: U256::from(1u64), reference_feed_id: 0 }
    }

    #[test]
    fn engine_wires_order_submission_end_to_end() {
        let mut engine = Engine::new();
        engine.set_market(market()).unwrap();
        engine.set_asset(asset()).unwrap();

        let mut ledger = FakeLedger;
        let mut referrals = FakeReferrals;
        let order = Order {
            id: 0,
            user: user(1),
            asset: AssetId::NATIVE,
            market: market_id(),
            is_long: true,
            margin: U256::from(10_000u64),
            size: U256::from(100_000u64),
            fee: U256::zero(),
            timestamp: 0,
            detail: OrderDetail {
                kind: OrderKind::Market,
                reduce_only: false,
                trigger_price: U256::zero(),
                expiry: 0,
                cancel_on_execute_id: None,
                execution_fee: U256::zero(),
                trailing_stop_bps: 0,
            },
        };
        let outcome = engine
            .submit_order(user(1), order, U256::zero(), U256::zero(), 0, 0, true, 0, &mut referrals, &mut ledger)
            .unwrap();
        let (id, sl, tp) = outcome.value;
        assert!(sl.is_none() && tp.is_none());
        assert!(engine.order(id).is_some());
    }

    #[test]
    fn unknown_market_is_rejected_before_touching_order_book() {
        let mut engine = Engine::new();
        engine.set_asset(asset()).unwrap();
        let mut ledger = FakeLedger;
        let mut referrals = FakeReferrals;
        let order = Order {
            id: 0,
            user: user(1),
            asset: AssetId::NATIVE,
            market: market_id(),
            is_long: true,
            margin: U256::from(10_000u64),
            size: U256::from(100_000u64),
            fee: U256::zero(),
            timestamp: 0,
            detail: OrderDetail {
                kind: OrderKind::Market,
                reduce_only: false,
                trigger_price: U256::zero(),
                expiry: 0,
                cancel_on_execute_id: None,
                execution_fee: U256::zero(),
                trailing_stop_bps: 0,
            },
        };
        let err = engine
            .submit_order(user(1), order, U256::zero(), U256::zero(), 0, 0, true, 0, &mut referrals, &mut ledger)
            .unwrap_err();
        assert_eq!(err, EngineError::InvalidInput);
    }
}
