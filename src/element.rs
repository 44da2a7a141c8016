//! Element type abstraction for the uniform-width argument buffers.
//!
//! The facade is instantiated at one of two element widths, mirroring the
//! float/double entry points of the boundary it models. All positional fields
//! (handles, counts, flags, scalars) travel as `T` and are converted here.

use num_traits::Float;

/// Numeric element type carried by argument and result buffers.
///
/// Implemented for `f32` and `f64`. The `Float` bound supplies the
/// transcendental functions used by the reference kernels; the conversion
/// methods below are infallible by construction (handles and counts are
/// small integers that both widths represent exactly).
pub trait Element:
    Float + Default + std::fmt::Debug + std::fmt::Display + Send + 'static
{
    /// Convert from `f64`, saturating at the width limit.
    fn from_f64(v: f64) -> Self;

    /// Widen to `f64`.
    fn to_f64(self) -> f64;

    /// Decode an integer field (handle, count, index).
    fn to_i64(self) -> i64 {
        self.to_f64() as i64
    }

    /// Encode an integer field.
    fn from_i64(v: i64) -> Self {
        Self::from_f64(v as f64)
    }

    /// Encode a usize count.
    fn from_usize(v: usize) -> Self {
        Self::from_f64(v as f64)
    }
}

impl Element for f32 {
    fn from_f64(v: f64) -> Self {
        v as f32
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }
}

impl Element for f64 {
    fn from_f64(v: f64) -> Self {
        v
    }

    fn to_f64(self) -> f64 {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_fields_round_trip_both_widths() {
        for h in [0_i64, 1, 42, 1_000_000, -1] {
            assert_eq!(<f32 as Element>::from_i64(h).to_i64(), h);
            assert_eq!(<f64 as Element>::from_i64(h).to_i64(), h);
        }
    }

    #[test]
    fn scalar_fields_survive_widening() {
        let v = 0.125_f32;
        assert_eq!(v.to_f64(), 0.125);
        assert_eq!(<f64 as Element>::from_f64(0.125).to_f64(), 0.125);
    }
}
