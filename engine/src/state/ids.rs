//! Identifier types. The teacher keys everything by Solana `Pubkey`; without
//! a blockchain host underneath, a plain fixed-width byte identifier plays
//! the same role for users and assets, and spec §3 already specifies the
//! market id's shape directly ("a fixed 10-byte tag").

use std::fmt;

/// Opaque account identifier (the engine never interprets its bytes beyond
/// equality/hashing — address derivation and signature verification are the
/// `Ledger` capability's concern, per spec §1).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct UserId(pub [u8; 32]);

impl UserId {
    pub const ZERO: UserId = UserId([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        *self == UserId::ZERO
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "User({:02x?})", &self.0[..4])
    }
}

/// Collateral asset identifier. `NATIVE` is the sentinel for the chain-native
/// coin asset `A0` (spec §3); every other value names a fungible token.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct AssetId(pub [u8; 32]);

impl AssetId {
    pub const NATIVE: AssetId = AssetId([0u8; 32]);

    pub fn is_native(&self) -> bool {
        *self == AssetId::NATIVE
    }
}

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_native() {
            write!(f, "Asset(native)")
        } else {
            write!(f, "Asset({:02x?})", &self.0[..4])
        }
    }
}

/// Fixed 10-byte market tag, e.g. `"ETH-USD\0\0\0"` (spec §3).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct MarketId(pub [u8; 10]);

impl MarketId {
    pub const fn from_str_padded(tag: &str) -> MarketId {
        let bytes = tag.as_bytes();
        let mut out = [0u8; 10];
        let mut i = 0;
        while i < bytes.len() && i < 10 {
            out[i] = bytes[i];
            i += 1;
        }
        MarketId(out)
    }
}

impl fmt::Debug for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(10);
        write!(f, "{}", String::from_utf8_lossy(&self.0[..end]))
    }
}

/// Key identifying a position: the hash of `(user, asset, market)` in the
/// source becomes a plain `(UserId, AssetId, MarketId)` struct key here —
/// spec §9's design note calls this out directly as the preferable
/// substitution in a typed-map host.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PositionKey {
    pub user: UserId,
    pub asset: AssetId,
    pub market: MarketId,
}
