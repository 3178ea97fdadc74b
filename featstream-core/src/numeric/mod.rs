//! Numeric backend.
//!
//! The detector, normalizer and derivative code is written once against
//! [`Scalar`] and instantiated either with `f32` or with the scaled-integer
//! [`Fixed`] type. Inputs and configuration stay `f32` and are converted at
//! the boundary with [`Scalar::from_f32`].

pub mod fixed;

pub use fixed::Fixed;

use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// Arithmetic needed by the front-end.
pub trait Scalar:
    Copy
    + Debug
    + Default
    + PartialEq
    + PartialOrd
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
{
    const ZERO: Self;
    const ONE: Self;

    fn from_f32(v: f32) -> Self;

    fn to_f32(self) -> f32;

    /// Square root; negative inputs yield zero.
    fn sqrt(self) -> Self;

    fn max(self, other: Self) -> Self {
        if other > self {
            other
        } else {
            self
        }
    }

    fn min(self, other: Self) -> Self {
        if other < self {
            other
        } else {
            self
        }
    }

    fn abs(self) -> Self {
        if self < Self::ZERO {
            -self
        } else {
            self
        }
    }

    fn from_count(n: usize) -> Self {
        Self::from_f32(n as f32)
    }
}

impl Scalar for f32 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn sqrt(self) -> Self {
        if self <= 0.0 {
            0.0
        } else {
            f32::sqrt(self)
        }
    }
}

/// Converts a slice of `f32` into the backend type.
pub fn convert_slice<S: Scalar>(values: &[f32]) -> Vec<S> {
    values.iter().map(|&v| S::from_f32(v)).collect()
}

/// Converts backend values back to `f32`.
pub fn to_f32_vec<S: Scalar>(values: &[S]) -> Vec<f32> {
    values.iter().map(|v| v.to_f32()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mean_of<S: Scalar>(values: &[f32]) -> f32 {
        let mut acc = S::ZERO;
        for &v in values {
            acc += S::from_f32(v);
        }
        (acc / S::from_count(values.len())).to_f32()
    }

    #[test]
    fn generic_code_agrees_across_backends() {
        let values = [1.5, -2.25, 3.0, 0.125];
        let a = mean_of::<f32>(&values);
        let b = mean_of::<Fixed>(&values);
        assert!((a - b).abs() < 1e-4, "f32={a} fixed={b}");
    }

    #[test]
    fn provided_max_min_abs() {
        assert_eq!(Scalar::max(2.0f32, 3.0), 3.0);
        assert_eq!(Scalar::min(2.0f32, 3.0), 2.0);
        assert_eq!(Scalar::abs(-4.0f32), 4.0);
        assert_eq!(Scalar::sqrt(-1.0f32), 0.0);
    }
}
