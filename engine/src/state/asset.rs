//! Collateral asset configuration (spec §3).

use crate::math::U256;
use crate::state::ids::AssetId;

#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub decimals: u8,
    pub min_size: U256,
    pub reference_feed_id: u32,
}
