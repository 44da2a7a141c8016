//! t-SNE math kernels: gains-based updates, Q matrices, exact gradients,
//! sparse symmetrization, and embedding bounds.

use crate::element::Element;
use crate::error::{DeviceError, Result};
use crate::handle::Handle;
use crate::memory::MemoryBank;

/// Gradient-descent update with per-dimension gains; `n` is the total
/// element count of the embedding (points x dims).
#[allow(clippy::too_many_arguments)]
pub fn update<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    momentum: T,
    learning_rate: T,
    h_dy: Handle,
    h_uy: Handle,
    h_gains: Handle,
    hy: Handle,
    gain_mul: T,
    gain_add: T,
) -> Result<()> {
    let dy = mem.read(h_dy, 0, n)?;
    let mut uy = mem.read(h_uy, 0, n)?;
    let mut gains = mem.read(h_gains, 0, n)?;
    let mut y = mem.read(hy, 0, n)?;
    let floor = T::from_f64(0.01);
    for i in 0..n {
        let opposed = (dy[i] > T::zero()) != (uy[i] > T::zero());
        gains[i] = if opposed {
            gains[i] + gain_add
        } else {
            gains[i] * gain_mul
        };
        if gains[i] < floor {
            gains[i] = floor;
        }
        uy[i] = momentum * uy[i] - learning_rate * gains[i] * dy[i];
        y[i] = y[i] + uy[i];
    }
    mem.write(h_gains, 0, &gains)?;
    mem.write(h_uy, 0, &uy)?;
    mem.write(hy, 0, &y)
}

/// dC = posF - negF / sum_q, elementwise over `n` entries.
pub fn update_grad<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_pos: Handle,
    h_neg: Handle,
    sum_q: T,
    h_dc: Handle,
) -> Result<()> {
    if sum_q == T::zero() {
        return Err(DeviceError::ParamOutOfRange("sum_q is zero".to_string()));
    }
    let pos = mem.read(h_pos, 0, n)?;
    let neg = mem.read(h_neg, 0, n)?;
    let dc: Vec<T> = (0..n).map(|i| pos[i] - neg[i] / sum_q).collect();
    mem.write(h_dc, 0, &dc)
}

/// Dense n x n squared euclidean distance matrix of an n x d point set.
pub fn squared_euclidean_distance<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    d: usize,
    hx: Handle,
    h_dd: Handle,
) -> Result<()> {
    let x = mem.read(hx, 0, n * d)?;
    let mut dd = vec![T::zero(); n * n];
    for i in 0..n {
        for j in i + 1..n {
            let mut acc = T::zero();
            for k in 0..d {
                let diff = x[i * d + k] - x[j * d + k];
                acc = acc + diff * diff;
            }
            dd[i * n + j] = acc;
            dd[j * n + i] = acc;
        }
    }
    mem.write(h_dd, 0, &dd)
}

/// Student-t numerators q_ij = 1 / (1 + dd_ij) with a zero diagonal.
/// Returns the normalizer sum; when `keep_unnormalized` is false the matrix
/// is divided by it in place.
pub fn compute_q_matrix<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_dd: Handle,
    h_q: Handle,
    keep_unnormalized: bool,
) -> Result<T> {
    let dd = mem.read(h_dd, 0, n * n)?;
    let mut q = vec![T::zero(); n * n];
    let mut sum = T::zero();
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            let v = T::one() / (T::one() + dd[i * n + j]);
            q[i * n + j] = v;
            sum = sum + v;
        }
    }
    if !keep_unnormalized && sum > T::zero() {
        for v in &mut q {
            *v = *v / sum;
        }
    }
    mem.write(h_q, 0, &q)?;
    Ok(sum)
}

/// KL error sum p * ln(p / q) over the dense matrices, staged through the
/// work buffer.
pub fn compute_exact_error<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_p: Handle,
    h_q: Handle,
    h_work: Handle,
) -> Result<T> {
    let p = mem.read(h_p, 0, n * n)?;
    let q = mem.read(h_q, 0, n * n)?;
    let eps = T::from_f64(f64::MIN_POSITIVE);
    let mut work = vec![T::zero(); n * n];
    let mut total = T::zero();
    for i in 0..n * n {
        let term = p[i] * ((p[i] + eps) / (q[i] + eps)).ln();
        work[i] = term;
        total = total + term;
    }
    mem.write(h_work, 0, &work)?;
    Ok(total)
}

/// Exact KL gradient into dC; q holds unnormalized student-t numerators and
/// `sum_q` their total.
#[allow(clippy::too_many_arguments)]
pub fn compute_exact_gradient<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    d: usize,
    hy: Handle,
    h_p: Handle,
    h_q: Handle,
    h_dc: Handle,
    sum_q: T,
) -> Result<()> {
    if sum_q == T::zero() {
        return Err(DeviceError::ParamOutOfRange("sum_q is zero".to_string()));
    }
    let y = mem.read(hy, 0, n * d)?;
    let p = mem.read(h_p, 0, n * n)?;
    let q = mem.read(h_q, 0, n * n)?;
    let mut dc = vec![T::zero(); n * d];
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            let num = q[i * n + j];
            let mult = (p[i * n + j] - num / sum_q) * num;
            for k in 0..d {
                dc[i * d + k] = dc[i * d + k] + mult * (y[i * d + k] - y[j * d + k]);
            }
        }
    }
    mem.write(h_dc, 0, &dc)
}

/// Symmetrize a CSR affinity matrix in place: every stored (i, j) entry is
/// averaged with its transpose counterpart when present, then the matrix is
/// normalized to sum to one. Returns the stored entry count.
pub fn symmetrize_matrix<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_row_p: Handle,
    h_col_p: Handle,
    h_val_p: Handle,
) -> Result<i64> {
    let rows = mem.read(h_row_p, 0, n + 1)?;
    let row_ptr: Vec<usize> = rows.iter().map(|v| (*v).to_i64().max(0) as usize).collect();
    let nnz = row_ptr[n];
    let cols = mem.read(h_col_p, 0, nnz)?;
    let col_idx: Vec<usize> = cols.iter().map(|v| (*v).to_i64().max(0) as usize).collect();
    let mut vals = mem.read(h_val_p, 0, nnz)?;

    let find = |row: usize, col: usize, col_idx: &[usize]| -> Option<usize> {
        (row_ptr[row]..row_ptr[row + 1]).find(|&e| col_idx[e] == col)
    };
    let half = T::from_f64(0.5);
    for i in 0..n {
        for e in row_ptr[i]..row_ptr[i + 1] {
            let j = col_idx[e];
            if j >= n {
                return Err(DeviceError::ParamOutOfRange(format!(
                    "column index {j} outside [0, {n})"
                )));
            }
            if let Some(back) = find(j, i, &col_idx) {
                let avg = (vals[e] + vals[back]) * half;
                vals[e] = avg;
                vals[back] = avg;
            }
        }
    }
    let mut total = T::zero();
    for &v in &vals {
        total = total + v;
    }
    if total > T::zero() {
        for v in &mut vals {
            *v = *v / total;
        }
    }
    mem.write(h_val_p, 0, &vals)?;
    Ok(nnz as i64)
}

/// Axis-aligned box holding the central `pct` of a 2-D embedding per axis.
/// Returns (min_x, min_y, max_x, max_y).
pub fn compute_knn_bounds<T: Element>(
    mem: &MemoryBank<T>,
    n: usize,
    h_data: Handle,
    pct_in_circle: f64,
) -> Result<(T, T, T, T)> {
    let data = mem.read(h_data, 0, n * 2)?;
    let mut xs: Vec<f64> = (0..n).map(|i| data[i * 2].to_f64()).collect();
    let mut ys: Vec<f64> = (0..n).map(|i| data[i * 2 + 1].to_f64()).collect();
    xs.sort_by(f64::total_cmp);
    ys.sort_by(f64::total_cmp);
    let trim = if (0.0..1.0).contains(&pct_in_circle) && pct_in_circle > 0.0 {
        (((1.0 - pct_in_circle) / 2.0) * n as f64).floor() as usize
    } else {
        0
    };
    let lo = trim.min(n.saturating_sub(1));
    let hi = n.saturating_sub(1 + trim).max(lo);
    Ok((
        T::from_f64(xs[lo]),
        T::from_f64(ys[lo]),
        T::from_f64(xs[hi]),
        T::from_f64(ys[hi]),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank() -> MemoryBank<f64> {
        MemoryBank::new(vec![1 << 22])
    }

    fn buf(m: &mut MemoryBank<f64>, values: &[f64]) -> Handle {
        let h = m.alloc(0, values.len()).unwrap();
        m.write(h, 0, values).unwrap();
        h
    }

    #[test]
    fn distance_matrix_is_symmetric_zero_diag() {
        let mut m = bank();
        let hx = buf(&mut m, &[0.0, 0.0, 3.0, 4.0, 0.0, 1.0]);
        let hdd = m.alloc(0, 9).unwrap();
        squared_euclidean_distance(&mut m, 3, 2, hx, hdd).unwrap();
        let dd = m.read_all(hdd).unwrap();
        assert_eq!(dd[0], 0.0);
        assert_eq!(dd[1], 25.0);
        assert_eq!(dd[3], 25.0);
        assert_eq!(dd[2], 1.0);
    }

    #[test]
    fn q_matrix_normalizes_and_reports_sum() {
        let mut m = bank();
        let hdd = buf(&mut m, &[0.0, 1.0, 1.0, 0.0]);
        let hq = m.alloc(0, 4).unwrap();
        let sum = compute_q_matrix(&mut m, 2, hdd, hq, false).unwrap();
        assert!((sum - 1.0).abs() < 1e-12);
        let q = m.read_all(hq).unwrap();
        assert!((q[1] - 0.5).abs() < 1e-12);
        assert_eq!(q[0], 0.0);
    }

    #[test]
    fn exact_error_is_zero_when_p_equals_q() {
        let mut m = bank();
        let hp = buf(&mut m, &[0.0, 0.5, 0.5, 0.0]);
        let hq = buf(&mut m, &[0.0, 0.5, 0.5, 0.0]);
        let hw = m.alloc(0, 4).unwrap();
        let e = compute_exact_error(&mut m, 2, hp, hq, hw).unwrap();
        assert!(e.abs() < 1e-9);
    }

    #[test]
    fn gradient_pulls_matching_points_nowhere() {
        let mut m = bank();
        // two coincident points: gradient must vanish
        let hy = buf(&mut m, &[1.0, 1.0, 1.0, 1.0]);
        let hp = buf(&mut m, &[0.0, 0.5, 0.5, 0.0]);
        let hdd = m.alloc(0, 4).unwrap();
        squared_euclidean_distance(&mut m, 2, 2, hy, hdd).unwrap();
        let hq = m.alloc(0, 4).unwrap();
        let sum = compute_q_matrix(&mut m, 2, hdd, hq, true).unwrap();
        let hdc = m.alloc(0, 4).unwrap();
        compute_exact_gradient(&mut m, 2, 2, hy, hp, hq, hdc, sum).unwrap();
        for v in m.read_all(hdc).unwrap() {
            assert!(v.abs() < 1e-12);
        }
    }

    #[test]
    fn gains_update_moves_embedding() {
        let mut m = bank();
        let hdy = buf(&mut m, &[1.0, -1.0]);
        let huy = buf(&mut m, &[0.0, 0.0]);
        let hg = buf(&mut m, &[1.0, 1.0]);
        let hy = buf(&mut m, &[0.0, 0.0]);
        update(&mut m, 2, 0.5, 100.0, hdy, huy, hg, hy, 0.8, 0.2).unwrap();
        let y = m.read_all(hy).unwrap();
        assert!(y[0] < 0.0);
        assert!(y[1] > 0.0);
    }

    #[test]
    fn symmetrize_averages_and_normalizes() {
        let mut m = bank();
        // 2x2 CSR: row 0 -> (0,1)=0.6 ; row 1 -> (1,0)=0.2
        let hrow = buf(&mut m, &[0.0, 1.0, 2.0]);
        let hcol = buf(&mut m, &[1.0, 0.0]);
        let hval = buf(&mut m, &[0.6, 0.2]);
        let nnz = symmetrize_matrix(&mut m, 2, hrow, hcol, hval).unwrap();
        assert_eq!(nnz, 2);
        let vals = m.read_all(hval).unwrap();
        assert!((vals[0] - 0.5).abs() < 1e-12);
        assert!((vals[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn knn_bounds_trim_outliers() {
        let mut m = bank();
        let mut pts = Vec::new();
        for i in 0..10 {
            pts.push(f64::from(i));
            pts.push(f64::from(i) * 2.0);
        }
        let h = buf(&mut m, &pts);
        let (min_x, min_y, max_x, max_y) = compute_knn_bounds(&m, 10, h, 1.0).unwrap();
        assert_eq!((min_x, min_y, max_x, max_y), (0.0, 0.0, 9.0, 18.0));
        let (tx, _, tx2, _) = compute_knn_bounds(&m, 10, h, 0.6).unwrap();
        assert!(tx > 0.0 && tx2 < 9.0);
    }
}
