//! End-to-end scenario tests driving the public `Engine` surface, covering
//! the six worked scenarios and the custody invariant.
//!
//! Each capability (`Ledger`, `PriceFeed`, `ReferencePriceFeed`,
//! `ReferralDirectory`) is faked in-memory here rather than mocked with a
//! framework, matching the teacher's own test style of hand-written stub
//! structs beside `#[cfg(test)]` modules.

use std::collections::HashMap;

use perp_engine_core::capabilities::{Ledger, OraclePriceData, PriceFeed, ReferencePriceFeed, ReferralDirectory};
use perp_engine_core::error::EngineResult;
use perp_engine_core::events::Event;
use perp_engine_core::math::{I256, SafeMath, U256};
use perp_engine_core::state::{
    Asset, AssetId, Market, MarketCategory, MarketId, Order, OrderDetail, OrderKind, UserId,
};
use perp_engine_core::Engine;

#[derive(Default)]
struct RecordingLedger {
    total_in: HashMap<AssetId, U256>,
    total_out: HashMap<AssetId, U256>,
}

impl Ledger for RecordingLedger {
    fn transfer_in(&mut self, asset: AssetId, _from: UserId, amount: U256) -> EngineResult {
        let entry = self.total_in.entry(asset).or_insert_with(U256::zero);
        *entry = entry.safe_add(amount)?;
        Ok(())
    }
    fn transfer_out(&mut self, asset: AssetId, _to: UserId, amount: U256) -> EngineResult {
        let entry = self.total_out.entry(asset).or_insert_with(U256::zero);
        *entry = entry.safe_add(amount)?;
        Ok(())
    }
}

impl RecordingLedger {
    fn net_custody(&self, asset: AssetId) -> U256 {
        let inflow = self.total_in.get(&asset).copied().unwrap_or_default();
        let outflow = self.total_out.get(&asset).copied().unwrap_or_default();
        inflow.safe_sub(outflow).expect("ledger paid out more than it ever took in")
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

struct FakeReferencePriceFeed;
impl ReferencePriceFeed for FakeReferencePriceFeed {
    fn get(&self, _market: MarketId) -> EngineResult<U256> {
        Ok(U256::zero())
    }
}

/// Oracle mantissa fixed at `expo = -18`, so `price` is reported directly in
/// the same unscaled units the worked scenarios in spec §8 use (e.g. `2000`
/// means "2000", not `2000 * 10^18`).
struct FakePriceFeed {
    price: i64,
    publish_time: i64,
}

impl FakePriceFeed {
    fn new(price: i64, publish_time: i64) -> Self {
        FakePriceFeed { price, publish_time }
    }

    fn set(&mut self, price: i64, publish_time: i64) {
        self.price = price;
        self.publish_time = publish_time;
    }
}

impl PriceFeed for FakePriceFeed {
    fn get_unsafe(&self, _market: MarketId) -> EngineResult<OraclePriceData> {
        Ok(OraclePriceData { price: self.price, confidence: 0, expo: -18, publish_time: self.publish_time })
    }
    fn update(&mut self, _payload: &[u8]) -> EngineResult<U256> {
        Ok(U256::zero())
    }
}

fn user(byte: u8) -> UserId {
    UserId([byte; 32])
}

fn market_id() -> MarketId {
    MarketId::from_str_padded("ETH-USD")
}

/// Matches the fixture spec §8's worked scenarios use: 6-decimal asset,
/// `fee_bps=10`, `max_leverage=50`, `liq_threshold_bps=8000`,
/// `funding_factor_bps=1000` annualized.
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

fn market_order(sender: UserId, is_long: bool, margin: u64, size: u64) -> Order {
    Order {
        id: 0,
        user: sender,
        asset: AssetId::NATIVE,
        market: market_id(),
        is_long,
        margin: U256::from(margin),
        size: U256::from(size),
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
    }
}

fn new_engine() -> (Engine, UserId) {
    let mut engine = Engine::new();
    engine.set_market(market()).unwrap();
    engine.set_asset(asset()).unwrap();
    let keeper = user(99);
    engine.whitelist_keeper(keeper);
    (engine, keeper)
}

/// Opens a 10x long (margin 10_000, size 100_000) for `trader` at price 2000
/// and returns the order id that was executed.
fn open_long(engine: &mut Engine, trader: UserId, keeper: UserId, ledger: &mut RecordingLedger, price_feed: &mut FakePriceFeed, now: i64) -> u32 {
    let mut referrals = FakeReferrals;
    let order = market_order(trader, true, 10_000, 100_000);
    let outcome =
        engine.submit_order(trader, order, U256::zero(), U256::zero(), 0, 0, true, now, &mut referrals, ledger).unwrap();
    let (id, _, _) = outcome.value;
    price_feed.set(2_000, now);
    engine
        .execute_trading_orders(&[id], &[], U256::zero(), &HashMap::new(), keeper, now, price_feed, &FakeReferencePriceFeed, ledger)
        .unwrap();
    id
}

#[test]
fn custody_invariant_holds_after_deposit_and_open() {
    let (mut engine, keeper) = new_engine();
    let trader = user(1);
    let mut ledger = RecordingLedger::default();
    let mut price_feed = FakePriceFeed::new(2_000, 0);

    let outcome = engine.deposit_request(trader, UserId::ZERO, AssetId::NATIVE, U256::from(1_000_000u64), U256::zero(), 0, &mut ledger).unwrap();
    engine.execute_liquidity_orders(&[outcome.value], &[], keeper, 0, &mut ledger).unwrap();

    open_long(&mut engine, trader, keeper, &mut ledger, &mut price_feed, 0);

    let pool = engine.pool_state(AssetId::NATIVE);
    let position = engine.position_of(trader, AssetId::NATIVE, market_id()).copied().unwrap();

    // no open non-reduce-only orders and no execution fees in this scenario,
    // so the custody invariant (spec §3) reduces to balance + buffer +
    // position margin + fee reserve.
    let rhs = pool.balance.safe_add(pool.buffer_balance).unwrap().safe_add(position.margin).unwrap().safe_add(pool.fee_reserve).unwrap();
    assert_eq!(ledger.net_custody(AssetId::NATIVE), rhs);
}

#[test]
fn open_close_round_trip_emits_symmetric_fees_and_profit() {
    let (mut engine, keeper) = new_engine();
    let trader = user(1);
    let mut ledger = RecordingLedger::default();
    let mut price_feed = FakePriceFeed::new(2_000, 0);
    let mut referrals = FakeReferrals;

    // fund the pool so it can pay out the trader's profit on close.
    let deposit = engine.deposit_request(trader, UserId::ZERO, AssetId::NATIVE, U256::from(1_000_000u64), U256::zero(), 0, &mut ledger).unwrap();
    engine.execute_liquidity_orders(&[deposit.value], &[], keeper, 0, &mut ledger).unwrap();

    open_long(&mut engine, trader, keeper, &mut ledger, &mut price_feed, 0);
    assert!(engine.position_of(trader, AssetId::NATIVE, market_id()).unwrap().is_open());

    let close_order = market_order(trader, false, 10_000, 100_000);
    let submit_outcome = engine
        .submit_order(trader, close_order, U256::zero(), U256::zero(), 0, 0, true, 1, &mut referrals, &mut ledger)
        .unwrap();
    let (close_id, _, _) = submit_outcome.value;

    price_feed.set(2_040, 1);
    let outcome = engine
        .execute_trading_orders(&[close_id], &[], U256::zero(), &HashMap::new(), keeper, 1, &mut price_feed, &FakeReferencePriceFeed, &mut ledger)
        .unwrap();

    assert!(engine.position_of(trader, AssetId::NATIVE, market_id()).is_none());

    let fee_events: Vec<_> = outcome.events.iter().filter(|e| matches!(e, Event::FeePaid { .. })).collect();
    assert_eq!(fee_events.len(), 1);
    if let Event::FeePaid { pool_share, treasury_share, keeper_share, .. } = fee_events[0] {
        assert_eq!(*pool_share + *treasury_share + *keeper_share, U256::from(100u64));
    }

    let decreased = outcome.events.iter().find_map(|e| match e {
        Event::PositionDecreased { pnl, executed, .. } => Some((*pnl, *executed)),
        _ => None,
    });
    let (pnl, executed) = decreased.expect("close must emit PositionDecreased");
    assert_eq!(executed, U256::from(100_000u64));
    assert_eq!(pnl, I256::from(2_000i128));
}

#[test]
fn liquidation_at_exact_threshold_closes_with_loss() {
    let (mut engine, keeper) = new_engine();
    let trader = user(1);
    let mut ledger = RecordingLedger::default();
    let mut price_feed = FakePriceFeed::new(2_000, 0);

    let deposit = engine.deposit_request(trader, UserId::ZERO, AssetId::NATIVE, U256::from(1_000_000u64), U256::zero(), 0, &mut ledger).unwrap();
    engine.execute_liquidity_orders(&[deposit.value], &[], keeper, 0, &mut ledger).unwrap();
    open_long(&mut engine, trader, keeper, &mut ledger, &mut price_feed, 0);

    // threshold: margin(10_000) * liq_threshold_bps(8000) / BPS = 8_000,
    // reached at price 2000 * (1 - 0.08) = 1840 (spec §8 scenario 2).
    price_feed.set(1_840, 100);
    let rows = [(trader, AssetId::NATIVE, market_id())];
    let outcome = engine.liquidate_positions(&rows, keeper, 100, &price_feed, &FakeReferencePriceFeed, &mut ledger).unwrap();

    assert!(engine.position_of(trader, AssetId::NATIVE, market_id()).is_none());
    let pnl = outcome.events.iter().find_map(|e| match e {
        Event::PositionLiquidated { pnl, .. } => Some(*pnl),
        _ => None,
    });
    let pnl = pnl.expect("liquidation must emit PositionLiquidated");
    assert!(pnl.is_negative());
    assert_eq!(pnl.magnitude(), U256::from(8_000u64));
}

#[test]
fn liquidation_below_threshold_is_rejected() {
    let (mut engine, keeper) = new_engine();
    let trader = user(1);
    let mut ledger = RecordingLedger::default();
    let mut price_feed = FakePriceFeed::new(2_000, 0);

    let deposit = engine.deposit_request(trader, UserId::ZERO, AssetId::NATIVE, U256::from(1_000_000u64), U256::zero(), 0, &mut ledger).unwrap();
    engine.execute_liquidity_orders(&[deposit.value], &[], keeper, 0, &mut ledger).unwrap();
    open_long(&mut engine, trader, keeper, &mut ledger, &mut price_feed, 0);

    // well above the liquidation threshold — position must survive.
    price_feed.set(1_900, 100);
    let rows = [(trader, AssetId::NATIVE, market_id())];
    let outcome = engine.liquidate_positions(&rows, keeper, 100, &price_feed, &FakeReferencePriceFeed, &mut ledger).unwrap();

    assert!(engine.position_of(trader, AssetId::NATIVE, market_id()).is_some());
    assert!(outcome.events.iter().any(|e| matches!(e, Event::LiquidationError { .. })));
}

#[test]
fn oco_take_profit_cancels_stop_loss() {
    let (mut engine, keeper) = new_engine();
    let trader = user(1);
    let mut ledger = RecordingLedger::default();
    let mut price_feed = FakePriceFeed::new(2_000, 0);
    let mut referrals = FakeReferrals;

    let deposit = engine.deposit_request(trader, UserId::ZERO, AssetId::NATIVE, U256::from(1_000_000u64), U256::zero(), 0, &mut ledger).unwrap();
    engine.execute_liquidity_orders(&[deposit.value], &[], keeper, 0, &mut ledger).unwrap();

    let main_order = market_order(trader, true, 10_000, 100_000);
    let submit_outcome = engine
        .submit_order(trader, main_order, U256::from(2_100u64), U256::from(1_950u64), 0, 0, true, 0, &mut referrals, &mut ledger)
        .unwrap();
    let (main_id, sl_id, tp_id) = submit_outcome.value;
    let sl_id = sl_id.unwrap();
    let tp_id = tp_id.unwrap();

    price_feed.set(2_000, 0);
    engine
        .execute_trading_orders(&[main_id], &[], U256::zero(), &HashMap::new(), keeper, 0, &mut price_feed, &FakeReferencePriceFeed, &mut ledger)
        .unwrap();
    assert!(engine.position_of(trader, AssetId::NATIVE, market_id()).unwrap().is_open());

    price_feed.set(2_100, 1);
    let outcome = engine
        .execute_trading_orders(&[tp_id], &[], U256::zero(), &HashMap::new(), keeper, 1, &mut price_feed, &FakeReferencePriceFeed, &mut ledger)
        .unwrap();

    assert!(engine.order(sl_id).is_none());
    assert!(engine.order(tp_id).is_none());
    assert!(outcome.events.iter().any(|e| matches!(e, Event::OrderCancelled { reason: "!oco", .. })));
    assert!(engine.position_of(trader, AssetId::NATIVE, market_id()).is_none());
}

#[test]
fn trailing_stop_gates_execution_on_exact_bound() {
    let (mut engine, keeper) = new_engine();
    let trader = user(1);
    let mut ledger = RecordingLedger::default();
    let mut price_feed = FakePriceFeed::new(2_000, 0);
    let mut referrals = FakeReferrals;

    let deposit = engine.deposit_request(trader, UserId::ZERO, AssetId::NATIVE, U256::from(1_000_000u64), U256::zero(), 0, &mut ledger).unwrap();
    engine.execute_liquidity_orders(&[deposit.value], &[], keeper, 0, &mut ledger).unwrap();

    let main_order = market_order(trader, true, 10_000, 100_000);
    let submit_outcome = engine
        .submit_order(trader, main_order, U256::zero(), U256::zero(), 300, 0, true, 0, &mut referrals, &mut ledger)
        .unwrap();
    let (main_id, ts_id, _) = submit_outcome.value;
    let ts_id = ts_id.unwrap();

    price_feed.set(2_000, 0);
    engine
        .execute_trading_orders(&[main_id], &[], U256::zero(), &HashMap::new(), keeper, 0, &mut price_feed, &FakeReferencePriceFeed, &mut ledger)
        .unwrap();

    let mut trailing_refs = HashMap::new();
    trailing_refs.insert(ts_id, U256::from(2_000u64));

    // required bound for a long's trailing stop: price <= ref * (BPS-300)/BPS = 1940.
    price_feed.set(1_941, 10);
    let outcome = engine
        .execute_trading_orders(&[ts_id], &[], U256::zero(), &trailing_refs, keeper, 10, &mut price_feed, &FakeReferencePriceFeed, &mut ledger)
        .unwrap();
    assert!(engine.order(ts_id).is_some());
    assert!(outcome.events.iter().any(|e| matches!(e, Event::OrderSkipped { reason: "!no-trailing-stop-execution", .. })));

    price_feed.set(1_940, 11);
    let outcome = engine
        .execute_trading_orders(&[ts_id], &[], U256::zero(), &trailing_refs, keeper, 11, &mut price_feed, &FakeReferencePriceFeed, &mut ledger)
        .unwrap();
    assert!(engine.order(ts_id).is_none());
    assert!(outcome.events.iter().any(|e| matches!(e, Event::TrailingStopOrderExecuted { .. })));
    assert!(engine.position_of(trader, AssetId::NATIVE, market_id()).is_none());
}

#[test]
fn deposit_under_negative_upl_is_taxed_matching_scenario_three() {
    let (mut engine, keeper) = new_engine();
    let trader = user(1);
    let mut ledger = RecordingLedger::default();
    let mut events = Vec::new();

    engine.liquidity_pool.credit_balance(AssetId::NATIVE, U256::from(1_000_000u64)).unwrap();
    engine.liquidity_pool.credit_trader_loss(AssetId::NATIVE, U256::from(50_000u64), 0, 86_400, &mut events).unwrap();
    engine.liquidity_pool.set_global_upls(&[(AssetId::NATIVE, I256::from(-20_000i128))], 0, 86_400, &mut events).unwrap();

    let deposit = engine.deposit_request(trader, UserId::ZERO, AssetId::NATIVE, U256::from(100_000u64), U256::zero(), 0, &mut ledger).unwrap();
    engine.execute_liquidity_orders(&[deposit.value], &[], keeper, 0, &mut ledger).unwrap();

    let pool = engine.pool_state(AssetId::NATIVE);
    // amount_after_tax = 100_000 * (10_000 - 636) / 10_000 = 93_640; the
    // pool had no LP supply yet, so shares mint 1:1 against that amount.
    assert_eq!(pool.lp_supply, U256::from(93_640u64));
    assert_eq!(pool.balance, U256::from(1_100_000u64));
}
