//! Argument validation, positional decoding, and result packing.
//!
//! Every operation declares a fixed `[min, max]` argument arity. The arity is
//! checked before any element is read; reading past the declared count is a
//! programming error in the handler, not a runtime condition, so accessors
//! index directly once the check has passed.

use crate::element::Element;
use crate::error::{DeviceError, Result};
use crate::handle::Handle;

/// Declared argument-count bounds for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    /// Minimum accepted count.
    pub min: usize,
    /// Maximum accepted count (`usize::MAX` for open tails).
    pub max: usize,
    /// When set, only `min` or `max` exactly are accepted.
    pub exact: bool,
}

impl Arity {
    /// Exactly `n` arguments.
    #[must_use]
    pub const fn exact(n: usize) -> Self {
        Self {
            min: n,
            max: n,
            exact: false,
        }
    }

    /// Any count in `[min, max]`.
    #[must_use]
    pub const fn range(min: usize, max: usize) -> Self {
        Self {
            min,
            max,
            exact: false,
        }
    }

    /// Exactly `a` or exactly `b` arguments, nothing in between.
    #[must_use]
    pub const fn either(a: usize, b: usize) -> Self {
        Self {
            min: a,
            max: b,
            exact: true,
        }
    }

    /// `min` or more arguments, unbounded above.
    #[must_use]
    pub const fn at_least(min: usize) -> Self {
        Self {
            min,
            max: usize::MAX,
            exact: false,
        }
    }

    /// No arguments.
    pub const NONE: Self = Self::exact(0);
}

/// Validated view over one call's argument buffer.
///
/// Construction performs the mandatory arity check; accessors then decode
/// fields by fixed position. Optional-tail accessors return the documented
/// default when the caller omitted the trailing argument.
pub struct ArgPack<'a, T> {
    args: &'a [T],
}

impl<'a, T: Element> ArgPack<'a, T> {
    /// Validate `args` against `arity` and wrap it for decoding.
    ///
    /// # Errors
    ///
    /// `ParamOutOfRange` when the count is outside the declared bounds, or
    /// when `arity.exact` is set and the count matches neither bound.
    pub fn new(args: &'a [T], arity: Arity) -> Result<Self> {
        let n = args.len();
        if n < arity.min || n > arity.max {
            return Err(DeviceError::ParamOutOfRange(format!(
                "argument count {n} outside [{}, {}]",
                arity.min,
                if arity.max == usize::MAX {
                    "inf".to_string()
                } else {
                    arity.max.to_string()
                }
            )));
        }
        if arity.exact && n != arity.min && n != arity.max {
            return Err(DeviceError::ParamOutOfRange(format!(
                "argument count {n} must be exactly {} or {}",
                arity.min, arity.max
            )));
        }
        Ok(Self { args })
    }

    /// Number of arguments actually supplied.
    #[must_use]
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Whether the call carried no arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Handle field at `i` (may be zero, meaning "none").
    #[must_use]
    pub fn handle(&self, i: usize) -> Handle {
        self.args[i].to_i64()
    }

    /// Handle field at `i` that the operation requires to be present.
    ///
    /// # Errors
    ///
    /// `ParamNull` when the handle is zero.
    pub fn req_handle(&self, i: usize) -> Result<Handle> {
        let h = self.handle(i);
        if h == 0 {
            return Err(DeviceError::ParamNull);
        }
        Ok(h)
    }

    /// Signed integer field at `i`.
    #[must_use]
    pub fn int(&self, i: usize) -> i32 {
        self.args[i].to_i64() as i32
    }

    /// Unsigned integer field at `i`.
    #[must_use]
    pub fn uint(&self, i: usize) -> u32 {
        self.args[i].to_i64() as u32
    }

    /// Wide integer field at `i`.
    #[must_use]
    pub fn long(&self, i: usize) -> i64 {
        self.args[i].to_i64()
    }

    /// Count/offset field at `i`, clamped at zero.
    #[must_use]
    pub fn size(&self, i: usize) -> usize {
        self.args[i].to_i64().max(0) as usize
    }

    /// Scalar field at `i`, in the element width.
    #[must_use]
    pub fn val(&self, i: usize) -> T {
        self.args[i]
    }

    /// Flag field at `i`: true when the value is exactly 1.
    #[must_use]
    pub fn flag(&self, i: usize) -> bool {
        self.args[i].to_f64() == 1.0
    }

    /// Flag field at `i`: true on any nonzero value.
    #[must_use]
    pub fn nonzero(&self, i: usize) -> bool {
        self.args[i].to_f64() != 0.0
    }

    /// Optional handle with default for an omitted tail position.
    #[must_use]
    pub fn opt_handle(&self, i: usize, default: Handle) -> Handle {
        if i < self.args.len() {
            self.handle(i)
        } else {
            default
        }
    }

    /// Optional signed integer with default.
    #[must_use]
    pub fn opt_int(&self, i: usize, default: i32) -> i32 {
        if i < self.args.len() {
            self.int(i)
        } else {
            default
        }
    }

    /// Optional wide integer with default.
    #[must_use]
    pub fn opt_long(&self, i: usize, default: i64) -> i64 {
        if i < self.args.len() {
            self.long(i)
        } else {
            default
        }
    }

    /// Optional count/offset with default.
    #[must_use]
    pub fn opt_size(&self, i: usize, default: usize) -> usize {
        if i < self.args.len() {
            self.size(i)
        } else {
            default
        }
    }

    /// Optional scalar with default.
    #[must_use]
    pub fn opt_val(&self, i: usize, default: f64) -> T {
        if i < self.args.len() {
            self.args[i]
        } else {
            T::from_f64(default)
        }
    }

    /// Optional flag (value exactly 1) with default false.
    #[must_use]
    pub fn opt_flag(&self, i: usize) -> bool {
        i < self.args.len() && self.flag(i)
    }

    /// Variable-length suffix starting at position `from`.
    #[must_use]
    pub fn tail(&self, from: usize) -> &'a [T] {
        &self.args[from.min(self.args.len())..]
    }
}

/// Result-buffer construction helpers.
///
/// Results are freshly allocated per call and owned by the caller. The three
/// shapes match the boundary contract: single handle (cast to the element
/// width), single scalar, and fixed small vector in declared order.
pub struct Reply;

impl Reply {
    /// No result.
    #[must_use]
    pub fn none<T: Element>() -> Vec<T> {
        Vec::new()
    }

    /// Single-handle result.
    #[must_use]
    pub fn handle<T: Element>(h: Handle) -> Vec<T> {
        vec![T::from_i64(h)]
    }

    /// Single-scalar result.
    #[must_use]
    pub fn scalar<T: Element>(v: T) -> Vec<T> {
        vec![v]
    }

    /// Fixed-vector result, already in declared order.
    #[must_use]
    pub fn vec<T: Element>(values: Vec<T>) -> Vec<T> {
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(args: &[f32], arity: Arity) -> Result<ArgPack<'_, f32>> {
        ArgPack::new(args, arity)
    }

    #[test]
    fn rejects_below_min_and_above_max() {
        assert!(pack(&[1.0], Arity::exact(2)).is_err());
        assert!(pack(&[1.0, 2.0, 3.0], Arity::exact(2)).is_err());
        assert!(pack(&[1.0, 2.0], Arity::exact(2)).is_ok());
    }

    #[test]
    fn exact_pair_excludes_interior_counts() {
        let arity = Arity::either(5, 9);
        assert!(pack(&[0.0; 5], arity).is_ok());
        assert!(pack(&[0.0; 9], arity).is_ok());
        for n in 6..9 {
            assert!(pack(&vec![0.0; n], arity).is_err(), "count {n}");
        }
    }

    #[test]
    fn open_tail_accepts_large_counts() {
        let arity = Arity::at_least(3);
        assert!(pack(&[0.0; 2], arity).is_err());
        assert!(pack(&[0.0; 3], arity).is_ok());
        assert!(pack(&vec![0.0; 4096], arity).is_ok());
    }

    #[test]
    fn zero_arity_accepts_empty() {
        assert!(pack(&[], Arity::NONE).is_ok());
        assert!(pack(&[1.0], Arity::NONE).is_err());
    }

    #[test]
    fn positional_decoding() {
        let p = pack(&[42.0, -1.0, 0.5, 1.0], Arity::exact(4)).unwrap();
        assert_eq!(p.handle(0), 42);
        assert_eq!(p.int(1), -1);
        assert_eq!(p.val(2), 0.5);
        assert!(p.flag(3));
        assert!(!p.flag(2));
        assert!(p.nonzero(2));
    }

    #[test]
    fn required_handle_rejects_zero() {
        let p = pack(&[0.0], Arity::exact(1)).unwrap();
        assert!(matches!(p.req_handle(0), Err(DeviceError::ParamNull)));
    }

    #[test]
    fn optional_tail_defaults() {
        let p = pack(&[8.0, 3.0], Arity::range(2, 4)).unwrap();
        assert_eq!(p.opt_int(2, -1), -1);
        assert_eq!(p.opt_size(3, 0), 0);
        assert_eq!(p.opt_handle(2, 0), 0);
        assert_eq!(p.opt_val(2, 0.8), 0.8_f32);
        let q = pack(&[8.0, 3.0, 7.0], Arity::range(2, 4)).unwrap();
        assert_eq!(q.opt_int(2, -1), 7);
    }

    #[test]
    fn tail_slices_variable_suffix() {
        let p = pack(&[1.0, 2.0, 9.0, 8.0], Arity::at_least(2)).unwrap();
        assert_eq!(p.tail(2), &[9.0, 8.0]);
        assert!(p.tail(4).is_empty());
    }

    #[test]
    fn reply_shapes() {
        assert!(Reply::none::<f32>().is_empty());
        assert_eq!(Reply::handle::<f32>(7), vec![7.0]);
        assert_eq!(Reply::scalar(2.5_f64), vec![2.5]);
        assert_eq!(Reply::vec(vec![1.0_f32, 2.0]), vec![1.0, 2.0]);
    }
}
