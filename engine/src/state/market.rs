//! Market configuration (spec §3). Immutable per id except through the
//! governance setters in `config.rs`; generalized from the teacher's
//! `state/market.rs`, trimmed to the fields this spec actually names (no
//! spot-lending fields — funding rate, not borrow APR, drives this market).

use crate::error::{EngineError, EngineResult};
use crate::math::constants::{
    MAX_DEVIATION_BPS, MAX_FEE_BPS, MAX_LIQ_THRESHOLD_BPS, MAX_MIN_ORDER_AGE_S,
    MIN_ORACLE_MAX_AGE_S,
};
use crate::state::ids::MarketId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub category: MarketCategory,
    pub reference_feed_id: u32,
    pub oracle_feed_id: u32,
    pub max_leverage: u32,
    pub max_deviation_bps: u32,
    pub fee_bps: u32,
    pub liq_threshold_bps: u32,
    pub funding_factor_bps: u32,
    pub min_order_age_s: i64,
    pub oracle_max_age_s: i64,
    pub is_reduce_only: bool,
    pub price_conf_threshold_bps: u32,
    pub price_conf_multiplier_bps: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MarketCategory {
    Crypto,
    Forex,
    Commodity,
    Index,
}

impl Market {
    /// Validates the bounds spec §3/§6 place on a market definition. Called
    /// by governance's `set_market` before the record is accepted.
    pub fn validate(&self) -> EngineResult {
        if self.max_leverage < 1 {
            return Err(EngineError::InvalidInput);
        }
        if self.max_deviation_bps > MAX_DEVIATION_BPS {
            return Err(EngineError::InvalidInput);
        }
        if self.fee_bps > MAX_FEE_BPS {
            return Err(EngineError::InvalidInput);
        }
        if self.liq_threshold_bps > MAX_LIQ_THRESHOLD_BPS {
            return Err(EngineError::InvalidInput);
        }
        if self.min_order_age_s < 0 || self.min_order_age_s > MAX_MIN_ORDER_AGE_S {
            return Err(EngineError::InvalidInput);
        }
        if self.oracle_max_age_s < MIN_ORACLE_MAX_AGE_S {
            return Err(EngineError::InvalidInput);
        }
        Ok(())
    }
}
