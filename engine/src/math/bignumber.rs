//! Big number types used for principal and LP share accounting.

#![allow(clippy::assign_op_pattern)]

use std::cmp::Ordering;

use uint::construct_uint;

construct_uint! {
    /// 256-bit unsigned integer. Used for every monetary quantity the spec
    /// calls out as "unsigned 256-bit" in its data model: pool principal and
    /// buffer, LP supply and shares, order/position margin, size and fees.
    pub struct U256(4);
}

/// Signed counterpart of [`U256`], used for funding indices, unrealized P&L
/// and the other quantities §3 marks "signed". `uint`'s `construct_uint!`
/// only generates unsigned types, so this pairs a sign bit with a `U256`
/// magnitude rather than pulling in a second bignum crate for one extra bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct I256 {
    negative: bool,
    magnitude: U256,
}

impl I256 {
    pub const ZERO: I256 = I256 { negative: false, magnitude: U256([0, 0, 0, 0]) };

    pub fn from_u256(magnitude: U256) -> Self {
        I256 { negative: false, magnitude }
    }

    pub fn neg_from_u256(magnitude: U256) -> Self {
        if magnitude.is_zero() {
            I256::ZERO
        } else {
            I256 { negative: true, magnitude }
        }
    }

    pub fn is_negative(&self) -> bool {
        self.negative && !self.magnitude.is_zero()
    }

    pub fn is_zero(&self) -> bool {
        self.magnitude.is_zero()
    }

    pub fn magnitude(&self) -> U256 {
        self.magnitude
    }

    pub fn checked_add(&self, rhs: I256) -> Option<I256> {
        match (self.negative, rhs.negative) {
            (false, false) => self.magnitude.checked_add(rhs.magnitude).map(I256::from_u256),
            (true, true) => self.magnitude.checked_add(rhs.magnitude).map(I256::neg_from_u256),
            (false, true) => Some(sub_signed(self.magnitude, rhs.magnitude)),
            (true, false) => Some(sub_signed(rhs.magnitude, self.magnitude)),
        }
    }

    pub fn checked_sub(&self, rhs: I256) -> Option<I256> {
        self.checked_add(rhs.checked_neg()?)
    }

    pub fn checked_neg(&self) -> Option<I256> {
        Some(I256 { negative: !self.negative, magnitude: self.magnitude })
    }

    pub fn cmp_magnitude_signed(&self) -> (bool, U256) {
        (self.negative, self.magnitude)
    }
}

fn sub_signed(a: U256, b: U256) -> I256 {
    if a >= b {
        I256::from_u256(a - b)
    } else {
        I256::neg_from_u256(b - a)
    }
}

impl PartialOrd for I256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for I256 {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_negative(), other.is_negative()) {
            (false, false) => self.magnitude.cmp(&other.magnitude),
            (true, true) => other.magnitude.cmp(&self.magnitude),
            (false, true) => Ordering::Greater,
            (true, false) => Ordering::Less,
        }
    }
}

impl std::fmt::Display for I256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_negative() {
            write!(f, "-{}", self.magnitude)
        } else {
            write!(f, "{}", self.magnitude)
        }
    }
}

impl From<i128> for I256 {
    fn from(v: i128) -> Self {
        if v < 0 {
            I256::neg_from_u256(U256::from(v.unsigned_abs()))
        } else {
            I256::from_u256(U256::from(v as u128))
        }
    }
}

// `uint::construct_uint!` does not derive serde impls on its own; events and
// persisted state need `U256`/`I256` to round-trip through `serde_json` for
// the integration tests in `tests/scenarios.rs`, so both get a manual decimal
// string encoding (mirrors how `primitive-types` serializes its big
// integers, minus the hex convention since nothing here needs EVM-style
// wire compatibility).
impl serde::Serialize for U256 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for U256 {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_dec_str(&s).map_err(serde::de::Error::custom)
    }
}

impl serde::Serialize for I256 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for I256 {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.as_str()),
        };
        let magnitude = U256::from_dec_str(digits).map_err(serde::de::Error::custom)?;
        Ok(if negative { I256::neg_from_u256(magnitude) } else { I256::from_u256(magnitude) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_add_sub() {
        let a = I256::from(100i128);
        let b = I256::from(-40i128);
        assert_eq!(a.checked_add(b).unwrap(), I256::from(60i128));
        assert_eq!(b.checked_add(a).unwrap(), I256::from(60i128));
        assert_eq!(a.checked_sub(a).unwrap(), I256::ZERO);
    }

    #[test]
    fn ordering() {
        assert!(I256::from(-5i128) < I256::from(5i128));
        assert!(I256::from(-10i128) < I256::from(-5i128));
        assert!(I256::from(5i128) > I256::ZERO);
    }
}
