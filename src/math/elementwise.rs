//! Elementwise, BLAS-style, reduction, and channel kernels.

use super::{binary, fold, unary};
use crate::element::Element;
use crate::error::{DeviceError, Result};
use crate::handle::Handle;
use crate::memory::MemoryBank;

/// Fill `n` elements of y with `value`, or poke the single element `idx`.
pub fn set<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    hy: Handle,
    value: T,
    idx: i32,
    y_off: usize,
) -> Result<()> {
    if idx < 0 {
        mem.fill(hy, y_off, n, value)
    } else {
        mem.write(hy, y_off + idx as usize, &[value])
    }
}

/// Read `n` elements of x, or the single element `idx`.
pub fn get<T: Element>(mem: &MemoryBank<T>, n: usize, hx: Handle, idx: i32) -> Result<Vec<T>> {
    if idx < 0 {
        mem.read(hx, 0, n)
    } else {
        mem.read(hx, idx as usize, 1)
    }
}

/// Copy `n` elements from src to dst; `stream > 0` must name a live stream.
pub fn copy<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    src: Handle,
    dst: Handle,
    src_off: usize,
    dst_off: usize,
    stream: Handle,
) -> Result<()> {
    if stream > 0 && !mem.stream_exists(stream) {
        return Err(DeviceError::InvalidHandle {
            kind: "stream",
            handle: stream,
        });
    }
    mem.copy(n, src, dst, src_off, dst_off)
}

/// C = alpha * op(A) * op(B) + beta * C, row-major, C is m x n.
#[allow(clippy::too_many_arguments)]
pub fn gemm<T: Element>(
    mem: &mut MemoryBank<T>,
    trans_a: bool,
    trans_b: bool,
    m: usize,
    n: usize,
    k: usize,
    alpha: T,
    ha: Handle,
    hb: Handle,
    beta: T,
    hc: Handle,
    a_off: usize,
    b_off: usize,
    c_off: usize,
) -> Result<()> {
    let a = mem.read(ha, a_off, m * k)?;
    let b = mem.read(hb, b_off, k * n)?;
    let mut c = mem.read(hc, c_off, m * n)?;
    for i in 0..m {
        for j in 0..n {
            let mut acc = T::zero();
            for p in 0..k {
                let av = if trans_a { a[p * m + i] } else { a[i * k + p] };
                let bv = if trans_b { b[j * k + p] } else { b[p * n + j] };
                acc = acc + av * bv;
            }
            c[i * n + j] = alpha * acc + beta * c[i * n + j];
        }
    }
    mem.write(hc, c_off, &c)
}

/// Gemm with explicit leading dimensions.
#[allow(clippy::too_many_arguments)]
pub fn gemm_ld<T: Element>(
    mem: &mut MemoryBank<T>,
    trans_a: bool,
    trans_b: bool,
    m: usize,
    n: usize,
    k: usize,
    alpha: T,
    ha: Handle,
    hb: Handle,
    beta: T,
    hc: Handle,
    lda: usize,
    ldb: usize,
    ldc: usize,
) -> Result<()> {
    let a = mem.read_all(ha)?;
    let b = mem.read_all(hb)?;
    let mut c = mem.read_all(hc)?;
    let a_need = if trans_a { (k - 1) * lda + m } else { (m - 1) * lda + k };
    let b_need = if trans_b { (n - 1) * ldb + k } else { (k - 1) * ldb + n };
    let c_need = (m - 1) * ldc + n;
    if a.len() < a_need || b.len() < b_need || c.len() < c_need {
        return Err(DeviceError::ShapeMismatch(format!(
            "gemm2 needs a>={a_need} b>={b_need} c>={c_need}, have {}/{}/{}",
            a.len(),
            b.len(),
            c.len()
        )));
    }
    for i in 0..m {
        for j in 0..n {
            let mut acc = T::zero();
            for p in 0..k {
                let av = if trans_a { a[p * lda + i] } else { a[i * lda + p] };
                let bv = if trans_b { b[j * ldb + p] } else { b[p * ldb + j] };
                acc = acc + av * bv;
            }
            c[i * ldc + j] = alpha * acc + beta * c[i * ldc + j];
        }
    }
    mem.write(hc, 0, &c)
}

/// y = alpha * op(A) * x + beta * y; A is m x n row-major.
#[allow(clippy::too_many_arguments)]
pub fn gemv<T: Element>(
    mem: &mut MemoryBank<T>,
    trans_a: bool,
    m: usize,
    n: usize,
    alpha: T,
    ha: Handle,
    hx: Handle,
    beta: T,
    hy: Handle,
    a_off: usize,
    x_off: usize,
    y_off: usize,
) -> Result<()> {
    let (rows, cols) = if trans_a { (n, m) } else { (m, n) };
    let a = mem.read(ha, a_off, m * n)?;
    let x = mem.read(hx, x_off, cols)?;
    let mut y = mem.read(hy, y_off, rows)?;
    for i in 0..rows {
        let mut acc = T::zero();
        for j in 0..cols {
            let av = if trans_a { a[j * n + i] } else { a[i * n + j] };
            acc = acc + av * x[j];
        }
        y[i] = alpha * acc + beta * y[i];
    }
    mem.write(hy, y_off, &y)
}

/// y += alpha * x.
pub fn axpy<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    alpha: T,
    hx: Handle,
    hy: Handle,
    x_off: usize,
    y_off: usize,
) -> Result<()> {
    let x = mem.read(hx, x_off, n)?;
    let mut y = mem.read(hy, y_off, n)?;
    for i in 0..n {
        y[i] = y[i] + alpha * x[i];
    }
    mem.write(hy, y_off, &y)
}

/// y = alpha * x + beta * y.
pub fn axpby<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    alpha: T,
    hx: Handle,
    beta: T,
    hy: Handle,
) -> Result<()> {
    let x = mem.read(hx, 0, n)?;
    let mut y = mem.read(hy, 0, n)?;
    for i in 0..n {
        y[i] = alpha * x[i] + beta * y[i];
    }
    mem.write(hy, 0, &y)
}

/// x *= alpha.
pub fn scal<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    alpha: T,
    hx: Handle,
    x_off: usize,
) -> Result<()> {
    unary(mem, n, hx, x_off, hx, x_off, |v| v * alpha)
}

/// Inner product of x and y.
pub fn dot<T: Element>(
    mem: &MemoryBank<T>,
    n: usize,
    hx: Handle,
    hy: Handle,
    x_off: usize,
    y_off: usize,
) -> Result<T> {
    let x = mem.read(hx, x_off, n)?;
    let y = mem.read(hy, y_off, n)?;
    let mut acc = T::zero();
    for i in 0..n {
        acc = acc + x[i] * y[i];
    }
    Ok(acc)
}

/// Sum of absolute values.
pub fn asum<T: Element>(mem: &MemoryBank<T>, n: usize, hx: Handle, x_off: usize) -> Result<T> {
    fold(mem, n, hx, x_off, T::zero(), |acc, v| acc + v.abs())
}

/// y = alpha * x.
pub fn scale<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    alpha: T,
    hx: Handle,
    hy: Handle,
    x_off: usize,
    y_off: usize,
) -> Result<()> {
    unary(mem, n, hx, x_off, hy, y_off, |v| v * alpha)
}

/// y += alpha.
pub fn add_scalar<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    alpha: T,
    hy: Handle,
    y_off: usize,
) -> Result<()> {
    unary(mem, n, hy, y_off, hy, y_off, |v| v + alpha)
}

/// y = a + b.
pub fn add<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    ha: Handle,
    hb: Handle,
    hy: Handle,
) -> Result<()> {
    binary(mem, n, ha, hb, hy, |p, q| p + q)
}

/// y = alpha_a * a + alpha_b * b.
pub fn add2<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    ha: Handle,
    hb: Handle,
    hy: Handle,
    alpha_a: T,
    alpha_b: T,
) -> Result<()> {
    binary(mem, n, ha, hb, hy, |p, q| alpha_a * p + alpha_b * q)
}

/// y = a - b.
pub fn sub<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    ha: Handle,
    hb: Handle,
    hy: Handle,
) -> Result<()> {
    binary(mem, n, ha, hb, hy, |p, q| p - q)
}

/// y = a * b.
pub fn mul<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    ha: Handle,
    hb: Handle,
    hy: Handle,
) -> Result<()> {
    binary(mem, n, ha, hb, hy, |p, q| p * q)
}

/// y *= alpha.
pub fn mul_scalar<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    alpha: T,
    hy: Handle,
) -> Result<()> {
    unary(mem, n, hy, 0, hy, 0, |v| v * alpha)
}

/// y = a / b.
pub fn div<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    ha: Handle,
    hb: Handle,
    hy: Handle,
) -> Result<()> {
    binary(mem, n, ha, hb, hy, |p, q| p / q)
}

/// y = a - b; returns the sum of squares of y.
pub fn sub_and_dot<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    ha: Handle,
    hb: Handle,
    hy: Handle,
) -> Result<T> {
    sub(mem, n, ha, hb, hy)?;
    dot(mem, n, hy, hy, 0, 0)
}

/// y = |x|.
pub fn abs<T: Element>(mem: &mut MemoryBank<T>, n: usize, hx: Handle, hy: Handle) -> Result<()> {
    unary(mem, n, hx, 0, hy, 0, num_traits::Float::abs)
}

/// y = exp(x).
pub fn exp<T: Element>(mem: &mut MemoryBank<T>, n: usize, hx: Handle, hy: Handle) -> Result<()> {
    unary(mem, n, hx, 0, hy, 0, num_traits::Float::exp)
}

/// y = ln(x).
pub fn log<T: Element>(mem: &mut MemoryBank<T>, n: usize, hx: Handle, hy: Handle) -> Result<()> {
    unary(mem, n, hx, 0, hy, 0, num_traits::Float::ln)
}

/// y = x ^ alpha.
pub fn powx<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    hx: Handle,
    alpha: T,
    hy: Handle,
) -> Result<()> {
    unary(mem, n, hx, 0, hy, 0, |v| v.powf(alpha))
}

/// y = sign(x), zero preserved.
pub fn sign<T: Element>(mem: &mut MemoryBank<T>, n: usize, hx: Handle, hy: Handle) -> Result<()> {
    unary(mem, n, hx, 0, hy, 0, |v| {
        if v > T::zero() {
            T::one()
        } else if v < T::zero() {
            -T::one()
        } else {
            T::zero()
        }
    })
}

/// y = sqrt(x).
pub fn sqrt<T: Element>(mem: &mut MemoryBank<T>, n: usize, hx: Handle, hy: Handle) -> Result<()> {
    unary(mem, n, hx, 0, hy, 0, num_traits::Float::sqrt)
}

/// y = 1 / x.
pub fn reciprocol<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    hx: Handle,
    hy: Handle,
) -> Result<()> {
    unary(mem, n, hx, 0, hy, 0, |v| T::one() / v)
}

/// Student-t kernel y = 1 / (1 + x).
pub fn student<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    hx: Handle,
    hy: Handle,
) -> Result<()> {
    unary(mem, n, hx, 0, hy, 0, |v| T::one() / (T::one() + v))
}

/// y = 1 / (1 + exp(-x)).
pub fn logistic1<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    hx: Handle,
    hy: Handle,
) -> Result<()> {
    unary(mem, n, hx, 0, hy, 0, |v| T::one() / (T::one() + (-v).exp()))
}

/// y = 1 / (1 + exp(-2x)).
pub fn logistic2<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    hx: Handle,
    hy: Handle,
) -> Result<()> {
    let two = T::from_f64(2.0);
    unary(mem, n, hx, 0, hy, 0, move |v| {
        T::one() / (T::one() + (-(two * v)).exp())
    })
}

/// y = 1 where a and b share sign (zero counts as positive), else 0.
pub fn compare_signs<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    ha: Handle,
    hb: Handle,
    hy: Handle,
) -> Result<()> {
    binary(mem, n, ha, hb, hy, |p, q| {
        let sp = p >= T::zero();
        let sq = q >= T::zero();
        if sp == sq {
            T::one()
        } else {
            T::zero()
        }
    })
}

/// Maximum element.
pub fn maxval<T: Element>(mem: &MemoryBank<T>, n: usize, ha: Handle, a_off: usize) -> Result<T> {
    fold(mem, n, ha, a_off, T::neg_infinity(), |acc, v| acc.max(v))
}

/// Minimum element.
pub fn minval<T: Element>(mem: &MemoryBank<T>, n: usize, ha: Handle, a_off: usize) -> Result<T> {
    fold(mem, n, ha, a_off, T::infinity(), |acc, v| acc.min(v))
}

/// Minimum and maximum in one pass.
pub fn minmaxval<T: Element>(
    mem: &MemoryBank<T>,
    n: usize,
    ha: Handle,
    a_off: usize,
) -> Result<(T, T)> {
    fold(
        mem,
        n,
        ha,
        a_off,
        (T::infinity(), T::neg_infinity()),
        |(lo, hi), v| (lo.min(v), hi.max(v)),
    )
}

/// Sum of squares. The work buffer mirrors the device contract and must be
/// at least `n` elements.
pub fn sumsq<T: Element>(
    mem: &MemoryBank<T>,
    n: usize,
    h_work: Handle,
    ha: Handle,
    a_off: usize,
) -> Result<T> {
    if mem.len_of(h_work)? < n {
        return Err(DeviceError::ShapeMismatch(format!(
            "work buffer shorter than {n}"
        )));
    }
    fold(mem, n, ha, a_off, T::zero(), |acc, v| acc + v * v)
}

/// Sum of squared differences.
#[allow(clippy::too_many_arguments)]
pub fn sumsqdiff<T: Element>(
    mem: &MemoryBank<T>,
    n: usize,
    h_work: Handle,
    ha: Handle,
    hb: Handle,
    a_off: usize,
    b_off: usize,
) -> Result<T> {
    if mem.len_of(h_work)? < n {
        return Err(DeviceError::ShapeMismatch(format!(
            "work buffer shorter than {n}"
        )));
    }
    let a = mem.read(ha, a_off, n)?;
    let b = mem.read(hb, b_off, n)?;
    let mut acc = T::zero();
    for i in 0..n {
        let d = a[i] - b[i];
        acc = acc + d * d;
    }
    Ok(acc)
}

/// width[i] = alpha * (max[i] - min[i]); the mean buffer anchors the span and
/// is validated for length.
pub fn width<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_mean: Handle,
    h_min: Handle,
    h_max: Handle,
    alpha: T,
    h_width: Handle,
) -> Result<()> {
    let _ = mem.read(h_mean, 0, n)?;
    let lo = mem.read(h_min, 0, n)?;
    let hi = mem.read(h_max, 0, n)?;
    let w: Vec<T> = lo
        .iter()
        .zip(hi.iter())
        .map(|(&l, &h)| alpha * (h - l))
        .collect();
    mem.write(h_width, 0, &w)
}

/// Flags each point outside mean +- width into the work buffer, returning the
/// count outside.
pub fn contains_point<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_mean: Handle,
    h_width: Handle,
    hx: Handle,
    h_work: Handle,
) -> Result<T> {
    let mean = mem.read(h_mean, 0, n)?;
    let w = mem.read(h_width, 0, n)?;
    let x = mem.read(hx, 0, n)?;
    let mut out = vec![T::zero(); n];
    let mut outside = 0_i64;
    for i in 0..n {
        if (x[i] - mean[i]).abs() > w[i] {
            out[i] = T::one();
            outside += 1;
        }
    }
    mem.write(h_work, 0, &out)?;
    Ok(T::from_i64(outside))
}

/// Replace NaN and infinities with `replacement`.
pub fn denan<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    hx: Handle,
    replacement: T,
) -> Result<()> {
    unary(mem, n, hx, 0, hx, 0, |v| {
        if v.is_finite() {
            v
        } else {
            replacement
        }
    })
}

// =============================================================================
// Channel kernels: data laid out as outer x channels x inner
// =============================================================================

/// y[o,i] = max over channels of x[o,c,i]; `n` is the reduced count.
pub fn channel_max<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    outer: usize,
    channels: usize,
    inner: usize,
    hx: Handle,
    hy: Handle,
) -> Result<()> {
    channel_shape(n, outer, inner, "channel_max")?;
    let x = mem.read(hx, 0, outer * channels * inner)?;
    let mut y = vec![T::neg_infinity(); n];
    for o in 0..outer {
        for c in 0..channels {
            for i in 0..inner {
                let v = x[(o * channels + c) * inner + i];
                let slot = &mut y[o * inner + i];
                *slot = slot.max(v);
            }
        }
    }
    mem.write(hy, 0, &y)
}

/// y[o,c,i] -= a[o,i] in place; `n` is the full count.
pub fn channel_sub<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    outer: usize,
    channels: usize,
    inner: usize,
    ha: Handle,
    hy: Handle,
) -> Result<()> {
    channel_shape(n, outer * channels, inner, "channel_sub")?;
    let a = mem.read(ha, 0, outer * inner)?;
    let mut y = mem.read(hy, 0, n)?;
    for o in 0..outer {
        for c in 0..channels {
            for i in 0..inner {
                y[(o * channels + c) * inner + i] =
                    y[(o * channels + c) * inner + i] - a[o * inner + i];
            }
        }
    }
    mem.write(hy, 0, &y)
}

/// y[o,i] = sum over channels of x[o,c,i]; `n` is the reduced count.
pub fn channel_sum<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    outer: usize,
    channels: usize,
    inner: usize,
    hx: Handle,
    hy: Handle,
) -> Result<()> {
    channel_shape(n, outer, inner, "channel_sum")?;
    let x = mem.read(hx, 0, outer * channels * inner)?;
    let mut y = vec![T::zero(); n];
    for o in 0..outer {
        for c in 0..channels {
            for i in 0..inner {
                y[o * inner + i] = y[o * inner + i] + x[(o * channels + c) * inner + i];
            }
        }
    }
    mem.write(hy, 0, &y)
}

/// y[o,c,i] /= a[o,i] in place; `n` is the full count.
pub fn channel_div<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    outer: usize,
    channels: usize,
    inner: usize,
    ha: Handle,
    hy: Handle,
) -> Result<()> {
    channel_shape(n, outer * channels, inner, "channel_div")?;
    let a = mem.read(ha, 0, outer * inner)?;
    let mut y = mem.read(hy, 0, n)?;
    for o in 0..outer {
        for c in 0..channels {
            for i in 0..inner {
                y[(o * channels + c) * inner + i] =
                    y[(o * channels + c) * inner + i] / a[o * inner + i];
            }
        }
    }
    mem.write(hy, 0, &y)
}

/// y[o,c,i] *= a[o,i] in place; `n` is the full count.
pub fn channel_mul<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    outer: usize,
    channels: usize,
    inner: usize,
    ha: Handle,
    hy: Handle,
) -> Result<()> {
    channel_shape(n, outer * channels, inner, "channel_mul")?;
    let a = mem.read(ha, 0, outer * inner)?;
    let mut y = mem.read(hy, 0, n)?;
    for o in 0..outer {
        for c in 0..channels {
            for i in 0..inner {
                y[(o * channels + c) * inner + i] =
                    y[(o * channels + c) * inner + i] * a[o * inner + i];
            }
        }
    }
    mem.write(hy, 0, &y)
}

/// y[o,i] = dot over channels of x1[o,c,i] and x2[o,c,i]; `n` is the reduced
/// count.
#[allow(clippy::too_many_arguments)]
pub fn channel_dot<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    outer: usize,
    channels: usize,
    inner: usize,
    hx1: Handle,
    hx2: Handle,
    hy: Handle,
) -> Result<()> {
    channel_shape(n, outer, inner, "channel_dot")?;
    let x1 = mem.read(hx1, 0, outer * channels * inner)?;
    let x2 = mem.read(hx2, 0, outer * channels * inner)?;
    let mut y = vec![T::zero(); n];
    for o in 0..outer {
        for c in 0..channels {
            for i in 0..inner {
                let idx = (o * channels + c) * inner + i;
                y[o * inner + i] = y[o * inner + i] + x1[idx] * x2[idx];
            }
        }
    }
    mem.write(hy, 0, &y)
}

fn channel_shape(n: usize, outer: usize, inner: usize, what: &str) -> Result<()> {
    if n != outer * inner {
        return Err(DeviceError::ShapeMismatch(format!(
            "{what}: count {n} != {outer} * {inner}"
        )));
    }
    Ok(())
}
