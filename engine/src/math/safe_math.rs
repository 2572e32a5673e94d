//! Checked arithmetic that turns over/underflow into a typed `EngineError`
//! instead of panicking. Generalized from the teacher's `math/safe_math.rs`
//! — same trait, same per-op checked_* dispatch, logged through the `log`
//! crate instead of Anchor's `msg!` since there is no on-chain host here.

use std::panic::Location;

use crate::error::{EngineError, EngineResult};
use crate::math::bignumber::U256;
use crate::math::ceil_div::CheckedCeilDiv;
use crate::math::floor_div::CheckedFloorDiv;

pub trait SafeMath: Sized {
    fn safe_add(self, rhs: Self) -> EngineResult<Self>;
    fn safe_sub(self, rhs: Self) -> EngineResult<Self>;
    fn safe_mul(self, rhs: Self) -> EngineResult<Self>;
    fn safe_div(self, rhs: Self) -> EngineResult<Self>;
    fn safe_ceil_div(self, rhs: Self) -> EngineResult<Self>;
}

macro_rules! checked_impl {
    ($t:ty) => {
        impl SafeMath for $t {
            #[track_caller]
            #[inline(always)]
            fn safe_add(self, v: $t) -> EngineResult<$t> {
                self.checked_add(v).ok_or_else(|| math_error("add"))
            }

            #[track_caller]
            #[inline(always)]
            fn safe_sub(self, v: $t) -> EngineResult<$t> {
                self.checked_sub(v).ok_or_else(|| math_error("sub"))
            }

            #[track_caller]
            #[inline(always)]
            fn safe_mul(self, v: $t) -> EngineResult<$t> {
                self.checked_mul(v).ok_or_else(|| math_error("mul"))
            }

            #[track_caller]
            #[inline(always)]
            fn safe_div(self, v: $t) -> EngineResult<$t> {
                self.checked_div(v).ok_or_else(|| math_error("div"))
            }

            #[track_caller]
            #[inline(always)]
            fn safe_ceil_div(self, v: $t) -> EngineResult<$t> {
                self.checked_ceil_div(v).ok_or_else(|| math_error("ceil_div"))
            }
        }
    };
}

checked_impl!(U256);
checked_impl!(u128);
checked_impl!(u64);
checked_impl!(u32);
checked_impl!(u16);
checked_impl!(i128);
checked_impl!(i64);

pub trait SafeFloorDiv: Sized {
    fn safe_floor_div(self, rhs: Self) -> EngineResult<Self>;
}

macro_rules! div_floor_impl {
    ($t:ty) => {
        impl SafeFloorDiv for $t {
            #[track_caller]
            #[inline(always)]
            fn safe_floor_div(self, v: $t) -> EngineResult<$t> {
                self.checked_floor_div(v).ok_or_else(|| math_error("floor_div"))
            }
        }
    };
}

div_floor_impl!(i128);
div_floor_impl!(i64);

#[track_caller]
fn math_error(op: &'static str) -> EngineError {
    let caller = Location::caller();
    log::warn!(target: "perp_engine_core", "{op} error at {}:{}", caller.file(), caller.line());
    EngineError::MathError
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn safe_add() {
        assert_eq!(1_u128.safe_add(1).unwrap(), 2);
        assert_eq!(1_u128.safe_add(u128::MAX), Err(EngineError::MathError));
    }

    #[test]
    fn safe_sub() {
        assert_eq!(1_u128.safe_sub(1).unwrap(), 0);
        assert_eq!(0_u128.safe_sub(1), Err(EngineError::MathError));
    }

    #[test]
    fn safe_mul() {
        assert_eq!(8_u128.safe_mul(8).unwrap(), 64);
        assert_eq!(2_u128.safe_mul(u128::MAX), Err(EngineError::MathError));
    }

    #[test]
    fn safe_div() {
        assert_eq!(155_u128.safe_div(8).unwrap(), 19);
        assert_eq!(1_u128.safe_div(0), Err(EngineError::MathError));
    }

    #[test]
    fn safe_ceil_div_u256() {
        assert_eq!(U256::from(10u8).safe_ceil_div(U256::from(3u8)).unwrap(), U256::from(4u8));
    }
}
