//! Governance-configurable parameters (spec §6), generalized from the
//! teacher's `state/config.rs` state-account into a plain struct owned by
//! `Engine`. Every setter enforces the bound spec §6 names for it.

use std::collections::HashSet;

use crate::error::{EngineError, EngineResult};
use crate::math::constants::{
    BPS, MAX_BUFFER_PAYOUT_PERIOD_S, MAX_KEEPER_FEE_SHARE_BPS, MAX_LIQUIDITY_ORDER_TTL_S,
    MAX_MIN_POSITION_HOLD_TIME_S, MAX_TRAILING_STOP_FEE_BPS,
};
use crate::state::UserId;

#[derive(Clone, Debug)]
pub struct GovernanceConfig {
    pub keeper_fee_share_bps: u32,
    pub pool_fee_share_bps: u32,
    pub buffer_payout_period_s: i64,
    pub utilization_multiplier_bps: u32,
    pub max_liquidity_order_ttl_s: i64,
    pub order_execution_fee: crate::math::U256,
    pub max_market_order_ttl_s: i64,
    pub max_trigger_order_ttl_s: i64,
    pub min_position_hold_time_s: i64,
    pub remove_margin_buffer_bps: u32,
    pub trailing_stop_fee_bps: u32,
    pub liquidation_fee_bps: u32,
    pub pool_hourly_decay_bps: u32,

    pub whitelisted_keepers: HashSet<UserId>,
    pub whitelisted_funding_accounts: HashSet<UserId>,
    pub approved_accounts: HashSet<UserId>,

    pub are_new_orders_paused: bool,
    pub is_processing_paused: bool,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        GovernanceConfig {
            keeper_fee_share_bps: 1_000,
            pool_fee_share_bps: 7_000,
            buffer_payout_period_s: 86_400,
            utilization_multiplier_bps: BPS,
            max_liquidity_order_ttl_s: MAX_LIQUIDITY_ORDER_TTL_S,
            order_execution_fee: crate::math::U256::zero(),
            max_market_order_ttl_s: 60,
            max_trigger_order_ttl_s: 7 * 86_400,
            min_position_hold_time_s: 0,
            remove_margin_buffer_bps: 1_000,
            trailing_stop_fee_bps: 0,
            liquidation_fee_bps: 0,
            pool_hourly_decay_bps: 0,
            whitelisted_keepers: HashSet::new(),
            whitelisted_funding_accounts: HashSet::new(),
            approved_accounts: HashSet::new(),
            are_new_orders_paused: false,
            is_processing_paused: false,
        }
    }
}

impl GovernanceConfig {
    pub fn set_keeper_fee_share(&mut self, bps: u32) -> EngineResult {
        if bps > MAX_KEEPER_FEE_SHARE_BPS {
            return Err(EngineError::InvalidInput);
        }
        self.keeper_fee_share_bps = bps;
        Ok(())
    }

    pub fn set_fee_share(&mut self, pool_share_bps: u32) -> EngineResult {
        if pool_share_bps >= BPS {
            return Err(EngineError::InvalidInput);
        }
        self.pool_fee_share_bps = pool_share_bps;
        Ok(())
    }

    pub fn set_buffer_payout_period(&mut self, period_s: i64) -> EngineResult {
        if period_s <= 0 || period_s > MAX_BUFFER_PAYOUT_PERIOD_S {
            return Err(EngineError::InvalidInput);
        }
        self.buffer_payout_period_s = period_s;
        Ok(())
    }

    pub fn set_utilization_multiplier(&mut self, bps: u32) -> EngineResult {
        self.utilization_multiplier_bps = bps.max(BPS);
        Ok(())
    }

    pub fn set_max_liquidity_order_ttl(&mut self, ttl_s: i64) -> EngineResult {
        if ttl_s <= 0 || ttl_s > MAX_LIQUIDITY_ORDER_TTL_S {
            return Err(EngineError::InvalidInput);
        }
        self.max_liquidity_order_ttl_s = ttl_s;
        Ok(())
    }

    pub fn set_order_execution_fee(&mut self, fee: crate::math::U256) -> EngineResult {
        self.order_execution_fee = fee;
        Ok(())
    }

    pub fn set_max_market_order_ttl(&mut self, ttl_s: i64) -> EngineResult {
        if ttl_s <= 0 {
            return Err(EngineError::InvalidInput);
        }
        self.max_market_order_ttl_s = ttl_s;
        Ok(())
    }

    pub fn set_max_trigger_order_ttl(&mut self, ttl_s: i64) -> EngineResult {
        if ttl_s <= 0 {
            return Err(EngineError::InvalidInput);
        }
        self.max_trigger_order_ttl_s = ttl_s;
        Ok(())
    }

    pub fn set_min_position_hold_time(&mut self, hold_s: i64) -> EngineResult {
        if hold_s < 0 || hold_s > MAX_MIN_POSITION_HOLD_TIME_S {
            return Err(EngineError::InvalidInput);
        }
        self.min_position_hold_time_s = hold_s;
        Ok(())
    }

    pub fn set_remove_margin_buffer(&mut self, bps: u32) -> EngineResult {
        if bps >= BPS {
            return Err(EngineError::InvalidInput);
        }
        self.remove_margin_buffer_bps = bps;
        Ok(())
    }

    pub fn set_trailing_stop_fee(&mut self, bps: u32) -> EngineResult {
        if bps > MAX_TRAILING_STOP_FEE_BPS {
            return Err(EngineError::InvalidInput);
        }
        self.trailing_stop_fee_bps = bps;
        Ok(())
    }

    pub fn set_liquidation_fee(&mut self, bps: u32) -> EngineResult {
        if bps >= BPS {
            return Err(EngineError::InvalidInput);
        }
        self.liquidation_fee_bps = bps;
        Ok(())
    }

    pub fn set_pool_hourly_decay(&mut self, bps: u32) -> EngineResult {
        if bps >= BPS {
            return Err(EngineError::InvalidInput);
        }
        self.pool_hourly_decay_bps = bps;
        Ok(())
    }

    pub fn whitelist_keeper(&mut self, keeper: UserId) {
        self.whitelisted_keepers.insert(keeper);
    }

    pub fn whitelist_funding_account(&mut self, account: UserId) {
        self.whitelisted_funding_accounts.insert(account);
    }

    pub fn is_keeper(&self, who: &UserId) -> bool {
        self.whitelisted_keepers.contains(who)
    }

    pub fn is_funding_account(&self, who: &UserId) -> bool {
        self.whitelisted_funding_accounts.contains(who)
    }

    pub fn require_keeper(&self, who: &UserId) -> EngineResult {
        if self.is_keeper(who) {
            Ok(())
        } else {
            Err(EngineError::Unauthorized)
        }
    }

    pub fn require_not_paused_for_orders(&self) -> EngineResult {
        if self.are_new_orders_paused {
            Err(EngineError::Paused)
        } else {
            Ok(())
        }
    }

    pub fn require_not_paused_for_processing(&self) -> EngineResult {
        if self.is_processing_paused {
            Err(EngineError::Paused)
        } else {
            Ok(())
        }
    }
}
