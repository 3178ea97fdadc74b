use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

use super::Scalar;

const FRAC_BITS: u32 = 16;
const SCALE: f64 = (1u64 << FRAC_BITS) as f64;

/// Signed fixed-point number with 16 fractional bits in an `i64`.
///
/// All operations saturate instead of wrapping. Division by zero saturates
/// towards the sign of the dividend.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Hash)]
pub struct Fixed(i64);

impl Fixed {
    pub const MAX: Fixed = Fixed(i64::MAX);
    pub const MIN: Fixed = Fixed(i64::MIN);

    pub const fn from_raw(raw: i64) -> Self {
        Fixed(raw)
    }

    pub const fn raw(self) -> i64 {
        self.0
    }

    fn clamp_wide(v: i128) -> Self {
        Fixed(v.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }
}

/// Integer square root by Newton iteration.
fn isqrt(n: u128) -> u128 {
    if n < 2 {
        return n;
    }
    let mut x = n;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

impl Scalar for Fixed {
    const ZERO: Self = Fixed(0);
    const ONE: Self = Fixed(1 << FRAC_BITS);

    fn from_f32(v: f32) -> Self {
        // `as` saturates on overflow and maps NaN to zero.
        Fixed((v as f64 * SCALE).round() as i64)
    }

    fn to_f32(self) -> f32 {
        (self.0 as f64 / SCALE) as f32
    }

    fn sqrt(self) -> Self {
        if self.0 <= 0 {
            return Fixed(0);
        }
        let root = isqrt((self.0 as u128) << FRAC_BITS);
        Fixed(root.min(i64::MAX as u128) as i64)
    }
}

impl Add for Fixed {
    type Output = Fixed;
    fn add(self, rhs: Fixed) -> Fixed {
        Fixed(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Fixed {
    type Output = Fixed;
    fn sub(self, rhs: Fixed) -> Fixed {
        Fixed(self.0.saturating_sub(rhs.0))
    }
}

impl Mul for Fixed {
    type Output = Fixed;
    fn mul(self, rhs: Fixed) -> Fixed {
        Fixed::clamp_wide((self.0 as i128 * rhs.0 as i128) >> FRAC_BITS)
    }
}

impl Div for Fixed {
    type Output = Fixed;
    fn div(self, rhs: Fixed) -> Fixed {
        if rhs.0 == 0 {
            return match self.0.signum() {
                1 => Fixed::MAX,
                -1 => Fixed::MIN,
                _ => Fixed(0),
            };
        }
        Fixed::clamp_wide(((self.0 as i128) << FRAC_BITS) / rhs.0 as i128)
    }
}

impl Neg for Fixed {
    type Output = Fixed;
    fn neg(self) -> Fixed {
        Fixed(self.0.saturating_neg())
    }
}

impl AddAssign for Fixed {
    fn add_assign(&mut self, rhs: Fixed) {
        *self = *self + rhs;
    }
}

impl SubAssign for Fixed {
    fn sub_assign(&mut self, rhs: Fixed) {
        *self = *self - rhs;
    }
}

impl fmt::Debug for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fixed({})", self.to_f32())
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f32())
    }
}
