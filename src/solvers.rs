//! Stateful solver instances: iterative PCA, the t-SNE gaussian-perplexity
//! search, and the t-SNE gradient stepper.
//!
//! Solvers are resources behind handles; callers advance them in bounded
//! steps and poll (running, iteration, progress) tuples, so a UI thread can
//! interleave solver work with other dispatch calls.

use crate::element::Element;
use crate::error::{DeviceError, Result};
use crate::handle::{Handle, HandleTable};
use crate::memory::MemoryBank;

/// Points processed per perplexity-search step.
const PERPLEXITY_CHUNK: usize = 64;
/// Binary-search iterations per point.
const PERPLEXITY_SEARCH_ITERS: usize = 50;
/// NIPALS convergence tolerance.
const PCA_TOL: f64 = 1e-9;

/// Iterative PCA over a row-major m x n matrix, extracting k components by
/// NIPALS with deflation.
#[derive(Debug)]
pub struct PcaSolver {
    max_iterations: usize,
    m: usize,
    n: usize,
    k: usize,
    h_scores: Handle,
    h_loads: Handle,
    h_residuals: Handle,
    h_eigenvalues: Handle,
    residual: Vec<f64>,
    current_k: usize,
    current_iteration: usize,
    done: bool,
}

impl PcaSolver {
    fn extract_component<T: Element>(&mut self, mem: &mut MemoryBank<T>) -> Result<()> {
        let (m, n) = (self.m, self.n);
        // seed t with the column of largest variance
        let mut best_col = 0;
        let mut best_var = -1.0_f64;
        for j in 0..n {
            let mean: f64 = (0..m).map(|i| self.residual[i * n + j]).sum::<f64>() / m as f64;
            let var: f64 = (0..m)
                .map(|i| {
                    let d = self.residual[i * n + j] - mean;
                    d * d
                })
                .sum();
            if var > best_var {
                best_var = var;
                best_col = j;
            }
        }
        let mut t: Vec<f64> = (0..m).map(|i| self.residual[i * n + best_col]).collect();
        let mut p = vec![0.0_f64; n];
        for _ in 0..self.max_iterations {
            self.current_iteration += 1;
            let tt: f64 = t.iter().map(|v| v * v).sum();
            if tt == 0.0 {
                break;
            }
            for (j, slot) in p.iter_mut().enumerate() {
                *slot = (0..m).map(|i| self.residual[i * n + j] * t[i]).sum::<f64>() / tt;
            }
            let norm = p.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm == 0.0 {
                break;
            }
            for v in &mut p {
                *v /= norm;
            }
            let t_new: Vec<f64> = (0..m)
                .map(|i| (0..n).map(|j| self.residual[i * n + j] * p[j]).sum())
                .collect();
            let delta: f64 = t_new
                .iter()
                .zip(t.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            t = t_new;
            if delta < PCA_TOL {
                break;
            }
        }
        // deflate and publish
        for i in 0..m {
            for j in 0..n {
                self.residual[i * n + j] -= t[i] * p[j];
            }
        }
        let col = self.current_k;
        let scores: Vec<T> = t.iter().map(|&v| T::from_f64(v)).collect();
        for (i, v) in scores.iter().enumerate() {
            mem.write(self.h_scores, i * self.k + col, &[*v])?;
        }
        let loads: Vec<T> = p.iter().map(|&v| T::from_f64(v)).collect();
        for (j, v) in loads.iter().enumerate() {
            mem.write(self.h_loads, j * self.k + col, &[*v])?;
        }
        if self.h_eigenvalues != 0 {
            let ev = t.iter().map(|v| v * v).sum::<f64>() / (m.max(2) - 1) as f64;
            mem.write(self.h_eigenvalues, col, &[T::from_f64(ev)])?;
        }
        if self.h_residuals != 0 {
            let res: Vec<T> = self.residual.iter().map(|&v| T::from_f64(v)).collect();
            mem.write(self.h_residuals, 0, &res)?;
        }
        Ok(())
    }
}

/// Gaussian-perplexity search over each point's nearest-neighbour set,
/// producing sparse conditional affinities.
#[derive(Debug)]
pub struct TsnePerplexitySolver {
    n: usize,
    k: usize,
    h_cur_p: Handle,
    h_val_p: Handle,
    h_row_p: Handle,
    h_col_p: Handle,
    perplexity: f64,
    points: Vec<f64>,
    d: usize,
    neighbors: Vec<usize>,
    current: usize,
}

impl TsnePerplexitySolver {
    fn search_point<T: Element>(&self, mem: &mut MemoryBank<T>, i: usize) -> Result<()> {
        let k = self.k;
        let target = self.perplexity.max(1.0).ln();
        let dist: Vec<f64> = (0..k)
            .map(|e| {
                let j = self.neighbors[i * k + e];
                (0..self.d)
                    .map(|a| {
                        let diff = self.points[i * self.d + a] - self.points[j * self.d + a];
                        diff * diff
                    })
                    .sum()
            })
            .collect();
        let mut beta = 1.0_f64;
        let mut beta_min = f64::NEG_INFINITY;
        let mut beta_max = f64::INFINITY;
        let mut probs = vec![0.0_f64; k];
        for _ in 0..PERPLEXITY_SEARCH_ITERS {
            let mut sum = 0.0;
            for (e, &d2) in dist.iter().enumerate() {
                probs[e] = (-beta * d2).exp();
                sum += probs[e];
            }
            if sum <= 0.0 {
                break;
            }
            let mut entropy = 0.0;
            for p in &mut probs {
                *p /= sum;
                if *p > 0.0 {
                    entropy -= *p * p.ln();
                }
            }
            let diff = entropy - target;
            if diff.abs() < 1e-5 {
                break;
            }
            if diff > 0.0 {
                beta_min = beta;
                beta = if beta_max.is_finite() {
                    (beta + beta_max) / 2.0
                } else {
                    beta * 2.0
                };
            } else {
                beta_max = beta;
                beta = if beta_min.is_finite() {
                    (beta + beta_min) / 2.0
                } else {
                    beta / 2.0
                };
            }
        }
        let row: Vec<T> = probs.iter().map(|&p| T::from_f64(p)).collect();
        mem.write(self.h_cur_p, i * k, &row)?;
        mem.write(self.h_val_p, i * k, &row)?;
        let cols: Vec<T> = (0..k)
            .map(|e| T::from_i64(self.neighbors[i * k + e] as i64))
            .collect();
        mem.write(self.h_col_p, i * k, &cols)?;
        Ok(())
    }
}

/// t-SNE gradient stepper over a sparse affinity matrix.
#[derive(Debug)]
pub struct TsneSolver {
    n: usize,
    d: usize,
    h_y: Handle,
    h_val_p: Handle,
    h_row_p: Handle,
    h_col_p: Handle,
    h_dc: Handle,
    theta: f64,
}

/// Progress tuple reported by stepwise solvers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Whether more work remains.
    pub running: bool,
    /// Iterations consumed so far.
    pub iteration: usize,
    /// Family-specific progress figure (components done, point budget).
    pub figure: usize,
}

/// Handle tables for the three solver families.
#[derive(Debug)]
pub struct SolverBank {
    pca: HandleTable<PcaSolver>,
    perplexity: HandleTable<TsnePerplexitySolver>,
    tsne: HandleTable<TsneSolver>,
}

impl Default for SolverBank {
    fn default() -> Self {
        Self::new()
    }
}

impl SolverBank {
    /// Empty tables.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pca: HandleTable::new("pca solver"),
            perplexity: HandleTable::new("tsne perplexity solver"),
            tsne: HandleTable::new("tsne solver"),
        }
    }

    /// Number of live solver handles.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.pca.len() + self.perplexity.len() + self.tsne.len()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.pca.clear();
        self.perplexity.clear();
        self.tsne.clear();
    }

    // =========================================================================
    // PCA
    // =========================================================================

    /// Create a PCA solver over the m x n data buffer.
    ///
    /// # Errors
    ///
    /// Handle/range errors on the data and result buffers.
    #[allow(clippy::too_many_arguments)]
    pub fn create_pca<T: Element>(
        &mut self,
        mem: &MemoryBank<T>,
        max_iterations: usize,
        m: usize,
        n: usize,
        k: usize,
        h_data: Handle,
        h_scores: Handle,
        h_loads: Handle,
        h_residuals: Handle,
        h_eigenvalues: Handle,
    ) -> Result<Handle> {
        if k == 0 || k > n {
            return Err(DeviceError::ParamOutOfRange(format!(
                "pca components {k} outside [1, {n}]"
            )));
        }
        let data = mem.read(h_data, 0, m * n)?;
        if mem.len_of(h_scores)? < m * k {
            return Err(DeviceError::ShapeMismatch(format!(
                "scores buffer shorter than {}",
                m * k
            )));
        }
        if mem.len_of(h_loads)? < n * k {
            return Err(DeviceError::ShapeMismatch(format!(
                "loads buffer shorter than {}",
                n * k
            )));
        }
        let residual: Vec<f64> = data.iter().map(|v| (*v).to_f64()).collect();
        Ok(self.pca.insert(PcaSolver {
            max_iterations: max_iterations.max(1),
            m,
            n,
            k,
            h_scores,
            h_loads,
            h_residuals,
            h_eigenvalues,
            residual,
            current_k: 0,
            current_iteration: 0,
            done: false,
        }))
    }

    /// Free a PCA solver.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn free_pca(&mut self, h: Handle) -> Result<()> {
        self.pca.remove(h).map(|_| ())
    }

    /// Advance a PCA solver by up to `steps` component extractions.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`, buffer errors while publishing results.
    pub fn run_pca<T: Element>(
        &mut self,
        mem: &mut MemoryBank<T>,
        h: Handle,
        steps: usize,
    ) -> Result<Progress> {
        let solver = self.pca.get_mut(h)?;
        for _ in 0..steps.max(1) {
            if solver.done {
                break;
            }
            solver.extract_component(mem)?;
            solver.current_k += 1;
            if solver.current_k >= solver.k {
                solver.done = true;
            }
        }
        Ok(Progress {
            running: !solver.done,
            iteration: solver.current_iteration,
            figure: solver.current_k,
        })
    }

    // =========================================================================
    // t-SNE gaussian perplexity
    // =========================================================================

    /// Create a perplexity search over an n x d point set with k neighbours
    /// per point.
    ///
    /// # Errors
    ///
    /// Handle/range errors on the point and output buffers.
    #[allow(clippy::too_many_arguments)]
    pub fn create_perplexity<T: Element>(
        &mut self,
        mem: &mut MemoryBank<T>,
        n: usize,
        d: usize,
        k: usize,
        h_x: Handle,
        h_cur_p: Handle,
        h_val_p: Handle,
        h_row_p: Handle,
        h_col_p: Handle,
        perplexity: f64,
    ) -> Result<Handle> {
        if k == 0 || k >= n {
            return Err(DeviceError::ParamOutOfRange(format!(
                "neighbour count {k} outside [1, {n})"
            )));
        }
        let x = mem.read(h_x, 0, n * d)?;
        let points: Vec<f64> = x.iter().map(|v| (*v).to_f64()).collect();
        for h in [h_cur_p, h_val_p, h_col_p] {
            if mem.len_of(h)? < n * k {
                return Err(DeviceError::ShapeMismatch(format!(
                    "affinity buffer shorter than {}",
                    n * k
                )));
            }
        }
        if mem.len_of(h_row_p)? < n + 1 {
            return Err(DeviceError::ShapeMismatch(format!(
                "row buffer shorter than {}",
                n + 1
            )));
        }
        // k nearest neighbours by squared distance, computed up front
        let mut neighbors = Vec::with_capacity(n * k);
        for i in 0..n {
            let mut dists: Vec<(f64, usize)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| {
                    let d2: f64 = (0..d)
                        .map(|a| {
                            let diff = points[i * d + a] - points[j * d + a];
                            diff * diff
                        })
                        .sum();
                    (d2, j)
                })
                .collect();
            dists.sort_by(|a, b| a.0.total_cmp(&b.0));
            neighbors.extend(dists.iter().take(k).map(|&(_, j)| j));
        }
        // CSR rows are fixed-width k
        let rows: Vec<T> = (0..=n).map(|i| T::from_usize(i * k)).collect();
        mem.write(h_row_p, 0, &rows)?;
        Ok(self.perplexity.insert(TsnePerplexitySolver {
            n,
            k,
            h_cur_p,
            h_val_p,
            h_row_p,
            h_col_p,
            perplexity,
            points,
            d,
            neighbors,
            current: 0,
        }))
    }

    /// Free a perplexity search.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn free_perplexity(&mut self, h: Handle) -> Result<()> {
        self.perplexity.remove(h).map(|_| ())
    }

    /// Advance the search by one chunk of points.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`, buffer errors while publishing rows.
    pub fn find_perplexity<T: Element>(
        &mut self,
        mem: &mut MemoryBank<T>,
        h: Handle,
    ) -> Result<Progress> {
        let solver = self.perplexity.get_mut(h)?;
        let end = (solver.current + PERPLEXITY_CHUNK).min(solver.n);
        for i in solver.current..end {
            solver.search_point(mem, i)?;
        }
        solver.current = end;
        Ok(Progress {
            running: solver.current < solver.n,
            iteration: solver.current,
            figure: solver.n,
        })
    }

    // =========================================================================
    // t-SNE gradient stepper
    // =========================================================================

    /// Create a gradient stepper over an n x d embedding and sparse
    /// affinities.
    ///
    /// # Errors
    ///
    /// Handle/range errors on the embedding and affinity buffers.
    #[allow(clippy::too_many_arguments)]
    pub fn create_tsne<T: Element>(
        &mut self,
        mem: &MemoryBank<T>,
        n: usize,
        d: usize,
        h_y: Handle,
        h_val_p: Handle,
        h_row_p: Handle,
        h_col_p: Handle,
        h_dc: Handle,
        theta: f64,
    ) -> Result<Handle> {
        mem.read(h_y, 0, n * d)?;
        mem.len_of(h_val_p)?;
        if mem.len_of(h_row_p)? < n + 1 {
            return Err(DeviceError::ShapeMismatch(format!(
                "row buffer shorter than {}",
                n + 1
            )));
        }
        mem.len_of(h_col_p)?;
        if mem.len_of(h_dc)? < n * d {
            return Err(DeviceError::ShapeMismatch(format!(
                "gradient buffer shorter than {}",
                n * d
            )));
        }
        if !(0.0..=1.0).contains(&theta) {
            return Err(DeviceError::ParamOutOfRange(format!("theta {theta}")));
        }
        Ok(self.tsne.insert(TsneSolver {
            n,
            d,
            h_y,
            h_val_p,
            h_row_p,
            h_col_p,
            h_dc,
            theta,
        }))
    }

    /// Free a gradient stepper.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn free_tsne(&mut self, h: Handle) -> Result<()> {
        self.tsne.remove(h).map(|_| ())
    }

    fn sparse<T: Element>(
        mem: &MemoryBank<T>,
        solver: &TsneSolver,
    ) -> Result<(Vec<usize>, Vec<usize>, Vec<f64>)> {
        let rows = mem.read(solver.h_row_p, 0, solver.n + 1)?;
        let row_ptr: Vec<usize> = rows.iter().map(|v| (*v).to_i64().max(0) as usize).collect();
        let nnz = row_ptr[solver.n];
        let cols = mem.read(solver.h_col_p, 0, nnz)?;
        let col_idx: Vec<usize> = cols.iter().map(|v| (*v).to_i64().max(0) as usize).collect();
        let vals = mem.read(solver.h_val_p, 0, nnz)?;
        Ok((
            row_ptr,
            col_idx,
            vals.iter().map(|v| (*v).to_f64()).collect(),
        ))
    }

    /// Compute the KL gradient of the current embedding into the solver's
    /// gradient buffer. The reference path is exact regardless of theta;
    /// `val_p_updated` acknowledges refreshed affinities.
    pub fn tsne_gradient<T: Element>(
        &mut self,
        mem: &mut MemoryBank<T>,
        h: Handle,
        _val_p_updated: bool,
    ) -> Result<()> {
        let solver = self.tsne.get(h)?;
        let (n, d) = (solver.n, solver.d);
        let y_raw = mem.read(solver.h_y, 0, n * d)?;
        let y: Vec<f64> = y_raw.iter().map(|v| (*v).to_f64()).collect();
        let (row_ptr, col_idx, vals) = Self::sparse(mem, solver)?;

        // repulsive normalizer over all pairs
        let mut sum_q = 0.0_f64;
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let mut d2 = 0.0;
                for a in 0..d {
                    let diff = y[i * d + a] - y[j * d + a];
                    d2 += diff * diff;
                }
                sum_q += 1.0 / (1.0 + d2);
            }
        }
        let mut dc = vec![0.0_f64; n * d];
        // attractive forces over stored affinities
        for i in 0..n {
            for e in row_ptr[i]..row_ptr[i + 1] {
                let j = col_idx[e];
                if j >= n || j == i {
                    continue;
                }
                let mut d2 = 0.0;
                for a in 0..d {
                    let diff = y[i * d + a] - y[j * d + a];
                    d2 += diff * diff;
                }
                let num = 1.0 / (1.0 + d2);
                for a in 0..d {
                    dc[i * d + a] += vals[e] * num * (y[i * d + a] - y[j * d + a]);
                }
            }
        }
        // repulsive forces over all pairs
        if sum_q > 0.0 {
            for i in 0..n {
                for j in 0..n {
                    if i == j {
                        continue;
                    }
                    let mut d2 = 0.0;
                    for a in 0..d {
                        let diff = y[i * d + a] - y[j * d + a];
                        d2 += diff * diff;
                    }
                    let num = 1.0 / (1.0 + d2);
                    let rep = num * num / sum_q;
                    for a in 0..d {
                        dc[i * d + a] -= rep * (y[i * d + a] - y[j * d + a]);
                    }
                }
            }
        }
        let out: Vec<T> = dc.iter().map(|&v| T::from_f64(4.0 * v)).collect();
        mem.write(solver.h_dc, 0, &out)
    }

    /// KL divergence of the current embedding against the stored affinities.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`, buffer errors.
    pub fn tsne_error<T: Element>(&self, mem: &MemoryBank<T>, h: Handle) -> Result<T> {
        let solver = self.tsne.get(h)?;
        let (n, d) = (solver.n, solver.d);
        let y_raw = mem.read(solver.h_y, 0, n * d)?;
        let y: Vec<f64> = y_raw.iter().map(|v| (*v).to_f64()).collect();
        let (row_ptr, col_idx, vals) = Self::sparse(mem, solver)?;
        let mut sum_q = 0.0_f64;
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let mut d2 = 0.0;
                for a in 0..d {
                    let diff = y[i * d + a] - y[j * d + a];
                    d2 += diff * diff;
                }
                sum_q += 1.0 / (1.0 + d2);
            }
        }
        let mut err = 0.0_f64;
        for i in 0..n {
            for e in row_ptr[i]..row_ptr[i + 1] {
                let j = col_idx[e];
                if j >= n || j == i {
                    continue;
                }
                let p = vals[e];
                if p <= 0.0 {
                    continue;
                }
                let mut d2 = 0.0;
                for a in 0..d {
                    let diff = y[i * d + a] - y[j * d + a];
                    d2 += diff * diff;
                }
                let q = (1.0 / (1.0 + d2)) / sum_q.max(f64::MIN_POSITIVE);
                err += p * (p / q.max(f64::MIN_POSITIVE)).ln();
            }
        }
        Ok(T::from_f64(err))
    }
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
    fn pca_extracts_dominant_direction() {
        let mut m = bank();
        let mut solvers = SolverBank::new();
        // 4 points along the x axis, tiny y noise
        let data = buf(
            &mut m,
            &[-2.0, 0.01, -1.0, -0.01, 1.0, 0.01, 2.0, -0.01],
        );
        let scores = m.alloc(0, 4).unwrap();
        let loads = m.alloc(0, 2).unwrap();
        let h = solvers
            .create_pca(&m, 100, 4, 2, 1, data, scores, loads, 0, 0)
            .unwrap();
        let p1 = solvers.run_pca(&mut m, h, 1).unwrap();
        assert!(!p1.running);
        assert_eq!(p1.figure, 1);
        let l = m.read_all(loads).unwrap();
        // first loading should be dominated by the x axis
        assert!(l[0].abs() > 0.99, "loads {l:?}");
        assert!(l[1].abs() < 0.1);
        solvers.free_pca(h).unwrap();
        assert!(solvers.run_pca(&mut m, h, 1).is_err());
    }

    #[test]
    fn pca_rejects_bad_component_count() {
        let mut m = bank();
        let mut solvers = SolverBank::new();
        let data = buf(&mut m, &[1.0, 2.0, 3.0, 4.0]);
        let s = m.alloc(0, 8).unwrap();
        let l = m.alloc(0, 8).unwrap();
        assert!(solvers.create_pca(&m, 10, 2, 2, 3, data, s, l, 0, 0).is_err());
        assert!(solvers.create_pca(&m, 10, 2, 2, 0, data, s, l, 0, 0).is_err());
    }

    #[test]
    fn perplexity_search_fills_rows() {
        let mut m = bank();
        let mut solvers = SolverBank::new();
        let n = 5;
        let k = 2;
        let x = buf(&mut m, &[0.0, 0.1, 1.0, 2.0, 4.0]);
        let cur = m.alloc(0, n * k).unwrap();
        let val = m.alloc(0, n * k).unwrap();
        let row = m.alloc(0, n + 1).unwrap();
        let col = m.alloc(0, n * k).unwrap();
        let h = solvers
            .create_perplexity(&mut m, n, 1, k, x, cur, val, row, col, 2.0)
            .unwrap();
        let p = solvers.find_perplexity(&mut m, h).unwrap();
        assert!(!p.running, "n below chunk size finishes in one step");
        assert_eq!(p.iteration, n);
        // each row sums to one
        let vals = m.read_all(val).unwrap();
        for i in 0..n {
            let s: f64 = vals[i * k..(i + 1) * k].iter().sum();
            assert!((s - 1.0).abs() < 1e-6, "row {i} sums to {s}");
        }
        // rows are fixed-width CSR offsets
        let rows = m.read_all(row).unwrap();
        assert_eq!(rows, vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
        solvers.free_perplexity(h).unwrap();
    }

    #[test]
    fn tsne_gradient_vanishes_for_matched_pair() {
        let mut m = bank();
        let mut solvers = SolverBank::new();
        // symmetric two-point system
        let y = buf(&mut m, &[0.0, 0.0, 1.0, 0.0]);
        let row = buf(&mut m, &[0.0, 1.0, 2.0]);
        let col = buf(&mut m, &[1.0, 0.0]);
        let val = buf(&mut m, &[0.5, 0.5]);
        let dc = m.alloc(0, 4).unwrap();
        let h = solvers
            .create_tsne(&m, 2, 2, y, val, row, col, dc, 0.5)
            .unwrap();
        solvers.tsne_gradient(&mut m, h, true).unwrap();
        let g = m.read_all(dc).unwrap();
        // p matches q exactly for two points, so the gradient vanishes
        for v in &g {
            assert!(v.abs() < 1e-9, "gradient {g:?}");
        }
        let err = solvers.tsne_error(&m, h).unwrap();
        assert!(err.abs() < 1e-9);
        solvers.free_tsne(h).unwrap();
    }

    #[test]
    fn tsne_theta_is_validated() {
        let mut m = bank();
        let mut solvers = SolverBank::new();
        let y = buf(&mut m, &[0.0, 0.0]);
        let row = buf(&mut m, &[0.0, 0.0]);
        let col = m.alloc(0, 1).unwrap();
        let val = m.alloc(0, 1).unwrap();
        let dc = m.alloc(0, 2).unwrap();
        assert!(solvers
            .create_tsne(&m, 1, 2, y, val, row, col, dc, 1.5)
            .is_err());
    }
}
