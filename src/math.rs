pub(crate) use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use rand::distributions::uniform::SampleUniform;

/// Trait for the identity element `zero`.
pub trait Zero {
    /// `zero` value of the type.
    const ZERO: Self;
}

/// Trait for the identity element `one`.
pub trait One {
    /// `one` value of the type.
    const ONE: Self;
}

/// Trait for operations on floating-point numbers.
pub trait FloatOps:
    Sized
    + Neg<Output = Self>
    + Add<Output = Self>
    + AddAssign
    + Sub<Output = Self>
    + SubAssign
    + Mul<Output = Self>
    + MulAssign
    + Div<Output = Self>
    + DivAssign
{
}
impl<F> FloatOps for F where
    F: Sized
        + Neg<Output = Self>
        + Add<Output = Self>
        + AddAssign
        + Sub<Output = Self>
        + SubAssign
        + Mul<Output = Self>
        + MulAssign
        + Div<Output = Self>
        + DivAssign
{
}

/// Trait for the floating-point precision a particle store is kept in.
///
/// Implemented for [`f32`] and [`f64`]. Besides arithmetic, it knows its little-endian encoding
/// so snapshots can be written with the store's own precision.
pub trait Float:
    Zero
    + One
    + FloatOps
    + Copy
    + Default
    + PartialOrd
    + std::fmt::Debug
    + std::str::FromStr
    + SampleUniform
    + Send
    + Sync
    + 'static
{
    /// Number of bytes of the little-endian encoding.
    const BYTES: usize;

    /// Returns the square root of a float.
    fn sqrt(self) -> Self;

    /// Returns the largest integer less than or equal to a float.
    fn floor(self) -> Self;

    /// Returns the minimum between two floats.
    fn min(self, rhs: Self) -> Self;

    /// Returns the maximum between two floats.
    fn max(self, rhs: Self) -> Self;

    /// Returns `true` if the float is neither infinite nor NaN.
    fn is_finite(self) -> bool;

    /// Lossy conversion from [`f64`].
    fn from_f64(value: f64) -> Self;

    /// Lossy conversion to [`f64`].
    fn to_f64(self) -> f64;

    /// Appends the little-endian bytes of the float to `out`.
    fn write_le(self, out: &mut Vec<u8>);

    /// Decodes a float from exactly [`Self::BYTES`] little-endian bytes.
    fn read_le(bytes: &[u8]) -> Option<Self>;
}

macro_rules! impl_floats {
    ($s: ty) => {
        impl Zero for $s {
            const ZERO: Self = 0.0;
        }

        impl One for $s {
            const ONE: Self = 1.0;
        }

        impl Float for $s {
            const BYTES: usize = std::mem::size_of::<$s>();

            #[inline]
            fn sqrt(self) -> Self {
                self.sqrt()
            }

            #[inline]
            fn floor(self) -> Self {
                self.floor()
            }

            #[inline]
            fn min(self, rhs: Self) -> Self {
                self.min(rhs)
            }

            #[inline]
            fn max(self, rhs: Self) -> Self {
                self.max(rhs)
            }

            #[inline]
            fn is_finite(self) -> bool {
                self.is_finite()
            }

            #[inline]
            fn from_f64(value: f64) -> Self {
                value as $s
            }

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn read_le(bytes: &[u8]) -> Option<Self> {
                bytes.try_into().ok().map(<$s>::from_le_bytes)
            }
        }
    };
}

impl_floats!(f32);
impl_floats!(f64);

/// Fixed-size vector of `D` components.
pub type Vector<S, const D: usize> = [S; D];

/// Returns the vector with all components set to zero.
#[inline]
pub fn zero<S: Float, const D: usize>() -> Vector<S, D> {
    [S::ZERO; D]
}

/// Returns `lhs + rhs`.
#[inline]
pub fn add<S: Float, const D: usize>(lhs: Vector<S, D>, rhs: Vector<S, D>) -> Vector<S, D> {
    std::array::from_fn(|k| lhs[k] + rhs[k])
}

/// Returns `lhs - rhs`.
#[inline]
pub fn sub<S: Float, const D: usize>(lhs: Vector<S, D>, rhs: Vector<S, D>) -> Vector<S, D> {
    std::array::from_fn(|k| lhs[k] - rhs[k])
}

/// Returns `v * s`.
#[inline]
pub fn scale<S: Float, const D: usize>(v: Vector<S, D>, s: S) -> Vector<S, D> {
    v.map(|c| c * s)
}

/// Returns `-v`.
#[inline]
pub fn neg<S: Float, const D: usize>(v: Vector<S, D>) -> Vector<S, D> {
    v.map(|c| -c)
}

/// Adds `rhs` to `lhs` in place.
#[inline]
pub fn add_assign<S: Float, const D: usize>(lhs: &mut Vector<S, D>, rhs: Vector<S, D>) {
    for (l, r) in lhs.iter_mut().zip(rhs) {
        *l += r;
    }
}

/// Returns the squared euclidean norm of `v`.
#[inline]
pub fn norm_squared<S: Float, const D: usize>(v: Vector<S, D>) -> S {
    v.iter().fold(S::ZERO, |acc, &c| acc + c * c)
}

/// Returns the euclidean norm of `v`.
#[inline]
pub fn norm<S: Float, const D: usize>(v: Vector<S, D>) -> S {
    norm_squared(v).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_ops() {
        let a = [1.0, 2.0, 3.0];
        let b = [0.5, -1.0, 2.0];

        assert_eq!(add(a, b), [1.5, 1.0, 5.0]);
        assert_eq!(sub(a, b), [0.5, 3.0, 1.0]);
        assert_eq!(scale(a, 2.0), [2.0, 4.0, 6.0]);
        assert_eq!(neg(b), [-0.5, 1.0, -2.0]);
        assert_eq!(norm_squared(a), 14.0);
        assert_eq!(norm([3.0f32, 4.0]), 5.0);
    }

    #[test]
    fn little_endian_encoding() {
        let mut out = Vec::new();
        1.5f32.write_le(&mut out);
        (-2.25f64).write_le(&mut out);

        assert_eq!(out.len(), f32::BYTES + f64::BYTES);
        assert_eq!(f32::read_le(&out[..4]), Some(1.5));
        assert_eq!(f64::read_le(&out[4..]), Some(-2.25));
        assert_eq!(f64::read_le(&out[..4]), None);
    }
}
