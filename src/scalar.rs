//! Element type for tensor buffers.

use crate::error::Error;
use num_traits::{Float, ToPrimitive};
use std::fmt::{Debug, Display};
use std::iter::Sum;
use std::ops::{AddAssign, DivAssign, MulAssign, SubAssign};

/// Floating-point element stored in tensor data and gradient buffers.
///
/// Implemented for `f32` and `f64`; the precision is chosen at compile time by
/// the type parameter of [`Tensor`](crate::Tensor).
pub trait Real:
    Float
    + AddAssign
    + SubAssign
    + MulAssign
    + DivAssign
    + Sum
    + Default
    + Debug
    + Display
    + 'static
{
    /// Converts from `f64`, rounding to the nearest representable value.
    fn from_f64(value: f64) -> Self;

    /// Widens to `f64`.
    fn as_f64(self) -> f64;

    /// Converts any primitive numeric value.
    fn cast<U: ToPrimitive + Debug>(value: U) -> Result<Self, Error> {
        let repr = format!("{:?}", value);
        <Self as num_traits::NumCast>::from(value).ok_or_else(|| {
            Error::InvalidOperation(format!("Cannot represent {} as a tensor element", repr))
        })
    }

    /// Converts a native numeric slice element by element.
    fn cast_slice<U: ToPrimitive + Copy + Debug>(values: &[U]) -> Result<Vec<Self>, Error> {
        values.iter().map(|&v| Self::cast(v)).collect()
    }
}

impl Real for f32 {
    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl Real for f64 {
    fn from_f64(value: f64) -> Self {
        value
    }

    fn as_f64(self) -> f64 {
        self
    }
}
