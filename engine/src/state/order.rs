//! Order and trigger-detail types (spec §3, §4.4). Generalized from the
//! teacher's `state/order.rs`: the teacher's CLOB-oriented fields
//! (`base_asset_filled`, `post_only`, `fill_or_kill`, ...) drop away, since
//! this is an oracle-priced book (spec §1 Non-goals: "no order matching
//! against other orders"), replaced by the trigger/TP-SL/OCO fields this
//! spec's order lifecycle actually needs.

use crate::math::U256;
use crate::state::ids::{AssetId, MarketId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OrderKind {
    Market = 0,
    Limit = 1,
    Stop = 2,
    TrailingStop = 3,
}

impl OrderKind {
    pub fn from_u8(v: u8) -> Option<OrderKind> {
        match v {
            0 => Some(OrderKind::Market),
            1 => Some(OrderKind::Limit),
            2 => Some(OrderKind::Stop),
            3 => Some(OrderKind::TrailingStop),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct OrderDetail {
    pub kind: OrderKind,
    pub reduce_only: bool,
    pub trigger_price: U256,
    pub expiry: i64,
    pub cancel_on_execute_id: Option<u32>,
    pub execution_fee: U256,
    pub trailing_stop_bps: u32,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Order {
    pub id: u32,
    pub user: UserId,
    pub asset: AssetId,
    pub market: MarketId,
    pub is_long: bool,
    pub margin: U256,
    pub size: U256,
    pub fee: U256,
    pub timestamp: i64,
    pub detail: OrderDetail,
}

impl Order {
    pub fn ttl_kind_is_market(&self) -> bool {
        matches!(self.detail.kind, OrderKind::Market)
    }
}
