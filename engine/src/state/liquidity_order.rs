//! Deposit/withdraw request records (spec §3, §4.2).

use crate::math::U256;
use crate::state::ids::{AssetId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LiquidityOrderKind {
    Deposit,
    Withdraw,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct LiquidityOrder {
    pub id: u32,
    pub user: UserId,
    pub asset: AssetId,
    pub kind: LiquidityOrderKind,
    pub amount: U256,
    pub min_amount_after_tax: U256,
    pub timestamp: i64,
    pub execution_fee: U256,
}
