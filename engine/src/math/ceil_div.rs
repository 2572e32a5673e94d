//! Ceiling division, generalized from the teacher's `math/ceil_div.rs`.

use num_traits::{One, Zero};

use super::bignumber::U256;

pub trait CheckedCeilDiv: Sized {
    fn checked_ceil_div(&self, rhs: Self) -> Option<Self>;
}

macro_rules! checked_impl {
    ($t:ty) => {
        impl CheckedCeilDiv for $t {
            #[inline]
            fn checked_ceil_div(&self, rhs: $t) -> Option<$t> {
                let quotient = self.checked_div(rhs)?;
                let remainder = self.checked_rem(rhs)?;
                if remainder > <$t>::zero() {
                    quotient.checked_add(<$t>::one())
                } else {
                    Some(quotient)
                }
            }
        }
    };
}

checked_impl!(u128);
checked_impl!(u64);
checked_impl!(u32);

impl CheckedCeilDiv for U256 {
    #[inline]
    fn checked_ceil_div(&self, rhs: U256) -> Option<U256> {
        if rhs.is_zero() {
            return None;
        }
        let quotient = self.checked_div(rhs)?;
        let remainder = self.checked_rem(rhs)?;
        if !remainder.is_zero() {
            quotient.checked_add(U256::from(1u8))
        } else {
            Some(quotient)
        }
    }
}
