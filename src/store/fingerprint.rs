//! Argument fingerprints: "is this the same call?"
//!
//! Values compare by value, shared references (`Arc`) by identity. Compound
//! argument lists (tuples, `Vec`, `Option`) compare element-wise with the same
//! rule and must have the same length. Nothing is hashed and nothing is
//! compared through an `Arc`.

use std::sync::Arc;
use std::time::Duration;

/// Strict identity of one argument or argument list
pub trait Fingerprint {
    fn same_call(&self, other: &Self) -> bool;
}

macro_rules! fingerprint_by_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Fingerprint for $ty {
                #[inline]
                fn same_call(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

fingerprint_by_value!(
    (), bool, char,
    u8, u16, u32, u64, u128, usize,
    i8, i16, i32, i64, i128, isize,
    f32, f64,
    String, &'static str, Duration,
);

impl<T: ?Sized> Fingerprint for Arc<T> {
    #[inline]
    fn same_call(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<T: Fingerprint> Fingerprint for Option<T> {
    fn same_call(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same_call(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: Fingerprint> Fingerprint for Vec<T> {
    fn same_call(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.same_call(b))
    }
}

impl<T: Fingerprint, const N: usize> Fingerprint for [T; N] {
    fn same_call(&self, other: &Self) -> bool {
        self.iter().zip(other).all(|(a, b)| a.same_call(b))
    }
}

macro_rules! fingerprint_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Fingerprint),+> Fingerprint for ($($name,)+) {
            fn same_call(&self, other: &Self) -> bool {
                $(self.$idx.same_call(&other.$idx))&&+
            }
        }
    };
}

fingerprint_tuple!(A: 0);
fingerprint_tuple!(A: 0, B: 1);
fingerprint_tuple!(A: 0, B: 1, C: 2);
fingerprint_tuple!(A: 0, B: 1, C: 2, D: 3);
fingerprint_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4);
fingerprint_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
fingerprint_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
fingerprint_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);
