//! Per-layer forward/backward kernels and optimizer updates.
//!
//! Layouts follow the classic NCHW convention: an index decomposes as
//! `((n * channels + c) * height + h) * width + w`, and channel-major gate
//! blocks for the recurrent kernels.

use super::unary;
use crate::element::Element;
use crate::error::{DeviceError, Result};
use crate::handle::Handle;
use crate::memory::MemoryBank;

/// Pooling method selector shared by the raw pooling kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMethod {
    /// Max pooling with winner masks.
    Max,
    /// Average pooling over the (clipped) window.
    Ave,
}

impl PoolMethod {
    /// Decode the wire discriminant.
    ///
    /// # Errors
    ///
    /// `Unsupported` for stochastic modes, `ParamOutOfRange` otherwise.
    pub fn from_wire(v: i32) -> Result<Self> {
        match v {
            0 => Ok(Self::Max),
            1 => Ok(Self::Ave),
            2 | 3 => Err(DeviceError::Unsupported(
                "stochastic pooling".to_string(),
            )),
            other => Err(DeviceError::ParamOutOfRange(format!(
                "pooling method {other}"
            ))),
        }
    }
}

/// top[i] = bottom[perm[i / inner] * inner + i % inner].
pub fn batchreidx_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    inner: usize,
    h_bottom: Handle,
    h_perm: Handle,
    h_top: Handle,
) -> Result<()> {
    let perm = mem.read_all(h_perm)?;
    let bottom = mem.read_all(h_bottom)?;
    let mut top = vec![T::zero(); n];
    for i in 0..n {
        let p = perm[i / inner].to_i64().max(0) as usize;
        let src = p * inner + i % inner;
        if src >= bottom.len() {
            return Err(DeviceError::MemoryRange {
                offset: src,
                count: 1,
                len: bottom.len(),
            });
        }
        top[i] = bottom[src];
    }
    mem.write(h_top, 0, &top)
}

/// Scatter top gradients back through the reindex permutation.
#[allow(clippy::too_many_arguments)]
pub fn batchreidx_bwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    inner: usize,
    h_top_diff: Handle,
    h_top_idx: Handle,
    h_begins: Handle,
    h_counts: Handle,
    h_bottom_diff: Handle,
) -> Result<()> {
    let top_diff = mem.read_all(h_top_diff)?;
    let top_idx = mem.read_all(h_top_idx)?;
    let begins = mem.read_all(h_begins)?;
    let counts = mem.read_all(h_counts)?;
    let mut bottom = vec![T::zero(); n];
    for (i, slot) in bottom.iter_mut().enumerate() {
        let b = i / inner;
        let begin = begins[b].to_i64().max(0) as usize;
        let cnt = counts[b].to_i64().max(0) as usize;
        for j in begin..begin + cnt {
            let t = top_idx[j].to_i64().max(0) as usize;
            *slot = *slot + top_diff[t * inner + i % inner];
        }
    }
    mem.write(h_bottom_diff, 0, &bottom)
}

/// Embedding lookup: top is m x n rows gathered from the weight table.
#[allow(clippy::too_many_arguments)]
pub fn embed_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    count: usize,
    h_bottom: Handle,
    h_weight: Handle,
    _m: usize,
    n: usize,
    k: usize,
    h_top: Handle,
) -> Result<()> {
    let bottom = mem.read_all(h_bottom)?;
    let weight = mem.read_all(h_weight)?;
    let mut top = vec![T::zero(); count];
    for (i, slot) in top.iter_mut().enumerate() {
        let index = bottom[i / n].to_i64();
        if index < 0 || index as usize >= k {
            return Err(DeviceError::ParamOutOfRange(format!(
                "embedding index {index} outside [0, {k})"
            )));
        }
        *slot = weight[index as usize * n + i % n];
    }
    mem.write(h_top, 0, &top)
}

/// Accumulate embedding gradients into the weight table.
#[allow(clippy::too_many_arguments)]
pub fn embed_bwd<T: Element>(
    mem: &mut MemoryBank<T>,
    count: usize,
    h_bottom: Handle,
    h_top_diff: Handle,
    _m: usize,
    n: usize,
    k: usize,
    h_weight_diff: Handle,
) -> Result<()> {
    let bottom = mem.read_all(h_bottom)?;
    let top_diff = mem.read_all(h_top_diff)?;
    let mut wd = mem.read_all(h_weight_diff)?;
    for i in 0..count {
        let index = bottom[i / n].to_i64();
        if index < 0 || index as usize >= k {
            return Err(DeviceError::ParamOutOfRange(format!(
                "embedding index {index} outside [0, {k})"
            )));
        }
        let slot = index as usize * n + i % n;
        wd[slot] = wd[slot] + top_diff[i];
    }
    mem.write(h_weight_diff, 0, &wd)
}

/// Geometry shared by the raw pooling/unpooling kernels.
#[derive(Debug, Clone, Copy)]
pub struct PoolGeometry {
    /// Batch size.
    pub num: usize,
    /// Channels.
    pub channels: usize,
    /// Input height.
    pub height: usize,
    /// Input width.
    pub width: usize,
    /// Output (pooled/unpooled) height.
    pub out_h: usize,
    /// Output (pooled/unpooled) width.
    pub out_w: usize,
    /// Kernel height.
    pub kernel_h: usize,
    /// Kernel width.
    pub kernel_w: usize,
    /// Stride height.
    pub stride_h: usize,
    /// Stride width.
    pub stride_w: usize,
    /// Pad height.
    pub pad_h: usize,
    /// Pad width.
    pub pad_w: usize,
}

/// Raw pooling forward; winner indices go to whichever mask handle is set.
#[allow(clippy::too_many_arguments)]
pub fn pooling_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    method: PoolMethod,
    count: usize,
    h_bottom: Handle,
    g: PoolGeometry,
    h_top: Handle,
    h_mask: Handle,
    h_top_mask: Handle,
) -> Result<()> {
    let bottom = mem.read_all(h_bottom)?;
    let mut top = vec![T::zero(); count];
    let mut mask = vec![T::from_i64(-1); count];
    let plane = g.height * g.width;
    for (index, slot) in top.iter_mut().enumerate() {
        let pw = index % g.out_w;
        let ph = (index / g.out_w) % g.out_h;
        let c = (index / g.out_w / g.out_h) % g.channels;
        let n = index / g.out_w / g.out_h / g.channels;
        let hstart = (ph * g.stride_h) as isize - g.pad_h as isize;
        let wstart = (pw * g.stride_w) as isize - g.pad_w as isize;
        let hend = (hstart + g.kernel_h as isize).min(g.height as isize + g.pad_h as isize);
        let wend = (wstart + g.kernel_w as isize).min(g.width as isize + g.pad_w as isize);
        let pool_size = ((hend - hstart) * (wend - wstart)) as usize;
        let h0 = hstart.max(0) as usize;
        let w0 = wstart.max(0) as usize;
        let h1 = (hend.min(g.height as isize)).max(0) as usize;
        let w1 = (wend.min(g.width as isize)).max(0) as usize;
        let base = (n * g.channels + c) * plane;
        match method {
            PoolMethod::Max => {
                let mut best = T::neg_infinity();
                let mut best_idx = -1_i64;
                for hh in h0..h1 {
                    for ww in w0..w1 {
                        let v = bottom[base + hh * g.width + ww];
                        if v > best {
                            best = v;
                            best_idx = (hh * g.width + ww) as i64;
                        }
                    }
                }
                *slot = best;
                mask[index] = T::from_i64(best_idx);
            }
            PoolMethod::Ave => {
                let mut acc = T::zero();
                for hh in h0..h1 {
                    for ww in w0..w1 {
                        acc = acc + bottom[base + hh * g.width + ww];
                    }
                }
                *slot = acc / T::from_usize(pool_size.max(1));
            }
        }
    }
    mem.write(h_top, 0, &top)?;
    if method == PoolMethod::Max {
        let target = if h_mask != 0 { h_mask } else { h_top_mask };
        if target == 0 {
            return Err(DeviceError::ParamNull);
        }
        mem.write(target, 0, &mask)?;
    }
    Ok(())
}

/// Raw pooling backward; `count` is the bottom element count.
#[allow(clippy::too_many_arguments)]
pub fn pooling_bwd<T: Element>(
    mem: &mut MemoryBank<T>,
    method: PoolMethod,
    count: usize,
    h_top_diff: Handle,
    g: PoolGeometry,
    h_bottom_diff: Handle,
    h_mask: Handle,
    h_top_mask: Handle,
) -> Result<()> {
    let top_diff = mem.read_all(h_top_diff)?;
    let mut bottom = vec![T::zero(); count];
    let plane = g.height * g.width;
    let top_plane = g.out_h * g.out_w;
    match method {
        PoolMethod::Max => {
            let source = if h_mask != 0 { h_mask } else { h_top_mask };
            if source == 0 {
                return Err(DeviceError::ParamNull);
            }
            let mask = mem.read_all(source)?;
            for n in 0..g.num {
                for c in 0..g.channels {
                    let tbase = (n * g.channels + c) * top_plane;
                    let bbase = (n * g.channels + c) * plane;
                    for t in 0..top_plane {
                        let m = mask[tbase + t].to_i64();
                        if m >= 0 && (m as usize) < plane {
                            bottom[bbase + m as usize] =
                                bottom[bbase + m as usize] + top_diff[tbase + t];
                        }
                    }
                }
            }
        }
        PoolMethod::Ave => {
            for n in 0..g.num {
                for c in 0..g.channels {
                    let tbase = (n * g.channels + c) * top_plane;
                    let bbase = (n * g.channels + c) * plane;
                    for ph in 0..g.out_h {
                        for pw in 0..g.out_w {
                            let hstart = (ph * g.stride_h) as isize - g.pad_h as isize;
                            let wstart = (pw * g.stride_w) as isize - g.pad_w as isize;
                            let hend = (hstart + g.kernel_h as isize)
                                .min(g.height as isize + g.pad_h as isize);
                            let wend = (wstart + g.kernel_w as isize)
                                .min(g.width as isize + g.pad_w as isize);
                            let pool_size = ((hend - hstart) * (wend - wstart)).max(1) as usize;
                            let share = top_diff[tbase + ph * g.out_w + pw]
                                / T::from_usize(pool_size);
                            let h0 = hstart.max(0) as usize;
                            let w0 = wstart.max(0) as usize;
                            let h1 = (hend.min(g.height as isize)).max(0) as usize;
                            let w1 = (wend.min(g.width as isize)).max(0) as usize;
                            for hh in h0..h1 {
                                for ww in w0..w1 {
                                    bottom[bbase + hh * g.width + ww] =
                                        bottom[bbase + hh * g.width + ww] + share;
                                }
                            }
                        }
                    }
                }
            }
        }
    }
    mem.write(h_bottom_diff, 0, &bottom)
}

/// Unpooling forward through a bottom mask; `count` is the bottom count and
/// the output geometry in `g.out_*` is the enlarged plane.
pub fn unpooling_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    method: PoolMethod,
    count: usize,
    h_bottom: Handle,
    g: PoolGeometry,
    h_top: Handle,
    h_bottom_mask: Handle,
) -> Result<()> {
    let bottom = mem.read_all(h_bottom)?;
    let out_plane = g.out_h * g.out_w;
    let in_plane = g.height * g.width;
    let mut top = vec![T::zero(); g.num * g.channels * out_plane];
    match method {
        PoolMethod::Max => {
            if h_bottom_mask == 0 {
                return Err(DeviceError::ParamNull);
            }
            let mask = mem.read_all(h_bottom_mask)?;
            for i in 0..count {
                let chan = i / in_plane;
                let m = mask[i].to_i64();
                if m >= 0 && (m as usize) < out_plane {
                    top[chan * out_plane + m as usize] = bottom[i];
                }
            }
        }
        PoolMethod::Ave => {
            for i in 0..count {
                let w = i % g.width;
                let h = (i / g.width) % g.height;
                let chan = i / in_plane;
                let share = bottom[i] / T::from_usize(g.kernel_h * g.kernel_w);
                let hstart = (h * g.stride_h) as isize - g.pad_h as isize;
                let wstart = (w * g.stride_w) as isize - g.pad_w as isize;
                for kh in 0..g.kernel_h {
                    for kw in 0..g.kernel_w {
                        let hh = hstart + kh as isize;
                        let ww = wstart + kw as isize;
                        if hh >= 0 && ww >= 0 && (hh as usize) < g.out_h && (ww as usize) < g.out_w
                        {
                            let t = chan * out_plane + hh as usize * g.out_w + ww as usize;
                            top[t] = top[t] + share;
                        }
                    }
                }
            }
        }
    }
    mem.write(h_top, 0, &top)
}

/// Unpooling backward: gather top gradients back through the bottom mask.
pub fn unpooling_bwd<T: Element>(
    mem: &mut MemoryBank<T>,
    method: PoolMethod,
    count: usize,
    h_top_diff: Handle,
    g: PoolGeometry,
    h_bottom_diff: Handle,
    h_bottom_mask: Handle,
) -> Result<()> {
    let top_diff = mem.read_all(h_top_diff)?;
    let out_plane = g.out_h * g.out_w;
    let in_plane = g.height * g.width;
    let mut bottom = vec![T::zero(); count];
    match method {
        PoolMethod::Max => {
            if h_bottom_mask == 0 {
                return Err(DeviceError::ParamNull);
            }
            let mask = mem.read_all(h_bottom_mask)?;
            for i in 0..count {
                let chan = i / in_plane;
                let m = mask[i].to_i64();
                if m >= 0 && (m as usize) < out_plane {
                    bottom[i] = top_diff[chan * out_plane + m as usize];
                }
            }
        }
        PoolMethod::Ave => {
            for (i, slot) in bottom.iter_mut().enumerate() {
                let w = i % g.width;
                let h = (i / g.width) % g.height;
                let chan = i / in_plane;
                let hstart = (h * g.stride_h) as isize - g.pad_h as isize;
                let wstart = (w * g.stride_w) as isize - g.pad_w as isize;
                let mut acc = T::zero();
                for kh in 0..g.kernel_h {
                    for kw in 0..g.kernel_w {
                        let hh = hstart + kh as isize;
                        let ww = wstart + kw as isize;
                        if hh >= 0 && ww >= 0 && (hh as usize) < g.out_h && (ww as usize) < g.out_w
                        {
                            acc = acc + top_diff[chan * out_plane + hh as usize * g.out_w
                                + ww as usize];
                        }
                    }
                }
                *slot = acc / T::from_usize(g.kernel_h * g.kernel_w);
            }
        }
    }
    mem.write(h_bottom_diff, 0, &bottom)
}

// =============================================================================
// Elementwise activations
// =============================================================================

/// y = tanh(x).
pub fn tanh_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_bottom: Handle,
    h_top: Handle,
) -> Result<()> {
    unary(mem, n, h_bottom, 0, h_top, 0, num_traits::Float::tanh)
}

/// bottom_diff = top_diff * (1 - top^2).
pub fn tanh_bwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_top_diff: Handle,
    h_top: Handle,
    h_bottom_diff: Handle,
) -> Result<()> {
    let td = mem.read(h_top_diff, 0, n)?;
    let y = mem.read(h_top, 0, n)?;
    let bd: Vec<T> = (0..n).map(|i| td[i] * (T::one() - y[i] * y[i])).collect();
    mem.write(h_bottom_diff, 0, &bd)
}

/// y = sigmoid(x).
pub fn sigmoid_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_bottom: Handle,
    h_top: Handle,
) -> Result<()> {
    unary(mem, n, h_bottom, 0, h_top, 0, |v| {
        T::one() / (T::one() + (-v).exp())
    })
}

/// bottom_diff = top_diff * top * (1 - top).
pub fn sigmoid_bwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_top_diff: Handle,
    h_top: Handle,
    h_bottom_diff: Handle,
) -> Result<()> {
    let td = mem.read(h_top_diff, 0, n)?;
    let y = mem.read(h_top, 0, n)?;
    let bd: Vec<T> = (0..n).map(|i| td[i] * y[i] * (T::one() - y[i])).collect();
    mem.write(h_bottom_diff, 0, &bd)
}

/// Leaky ReLU forward.
pub fn relu_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_bottom: Handle,
    h_top: Handle,
    negative_slope: T,
) -> Result<()> {
    unary(mem, n, h_bottom, 0, h_top, 0, move |v| {
        if v > T::zero() {
            v
        } else {
            v * negative_slope
        }
    })
}

/// Leaky ReLU backward against the forward output's sign.
pub fn relu_bwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_top_diff: Handle,
    h_top: Handle,
    h_bottom_diff: Handle,
    negative_slope: T,
) -> Result<()> {
    let td = mem.read(h_top_diff, 0, n)?;
    let y = mem.read(h_top, 0, n)?;
    let bd: Vec<T> = (0..n)
        .map(|i| {
            if y[i] > T::zero() {
                td[i]
            } else {
                td[i] * negative_slope
            }
        })
        .collect();
    mem.write(h_bottom_diff, 0, &bd)
}

/// ELU forward.
pub fn elu_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_bottom: Handle,
    h_top: Handle,
    alpha: T,
) -> Result<()> {
    unary(mem, n, h_bottom, 0, h_top, 0, move |v| {
        if v > T::zero() {
            v
        } else {
            alpha * (v.exp() - T::one())
        }
    })
}

/// ELU backward.
#[allow(clippy::too_many_arguments)]
pub fn elu_bwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_top_diff: Handle,
    h_top: Handle,
    h_bottom: Handle,
    h_bottom_diff: Handle,
    alpha: T,
) -> Result<()> {
    let td = mem.read(h_top_diff, 0, n)?;
    let y = mem.read(h_top, 0, n)?;
    let x = mem.read(h_bottom, 0, n)?;
    let bd: Vec<T> = (0..n)
        .map(|i| {
            if x[i] > T::zero() {
                td[i]
            } else {
                td[i] * (y[i] + alpha)
            }
        })
        .collect();
    mem.write(h_bottom_diff, 0, &bd)
}

/// Mask-threshold dropout: keep where the mask value exceeds the threshold.
#[allow(clippy::too_many_arguments)]
pub fn dropout_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_bottom: Handle,
    h_mask: Handle,
    threshold: u32,
    scale: T,
    h_top: Handle,
) -> Result<()> {
    let x = mem.read(h_bottom, 0, n)?;
    let mask = mem.read(h_mask, 0, n)?;
    let y: Vec<T> = (0..n)
        .map(|i| {
            if mask[i].to_i64() as u32 > threshold {
                x[i] * scale
            } else {
                T::zero()
            }
        })
        .collect();
    mem.write(h_top, 0, &y)
}

/// Dropout backward through the same mask.
#[allow(clippy::too_many_arguments)]
pub fn dropout_bwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_top_diff: Handle,
    h_mask: Handle,
    threshold: u32,
    scale: T,
    h_bottom_diff: Handle,
) -> Result<()> {
    let td = mem.read(h_top_diff, 0, n)?;
    let mask = mem.read(h_mask, 0, n)?;
    let bd: Vec<T> = (0..n)
        .map(|i| {
            if mask[i].to_i64() as u32 > threshold {
                td[i] * scale
            } else {
                T::zero()
            }
        })
        .collect();
    mem.write(h_bottom_diff, 0, &bd)
}

/// BNLL forward: ln(1 + exp(x)), stable on both tails.
pub fn bnll_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_bottom: Handle,
    h_top: Handle,
) -> Result<()> {
    unary(mem, n, h_bottom, 0, h_top, 0, |v| {
        if v > T::zero() {
            v + (T::one() + (-v).exp()).ln()
        } else {
            (T::one() + v.exp()).ln()
        }
    })
}

/// BNLL backward: top_diff * sigmoid(bottom).
pub fn bnll_bwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_top_diff: Handle,
    h_bottom: Handle,
    h_bottom_diff: Handle,
) -> Result<()> {
    let td = mem.read(h_top_diff, 0, n)?;
    let x = mem.read(h_bottom, 0, n)?;
    let bd: Vec<T> = (0..n)
        .map(|i| td[i] * (T::one() / (T::one() + (-x[i]).exp())))
        .collect();
    mem.write(h_bottom_diff, 0, &bd)
}

/// PReLU forward with per-channel (or shared) slopes.
#[allow(clippy::too_many_arguments)]
pub fn prelu_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    channels: usize,
    dim: usize,
    h_bottom: Handle,
    h_top: Handle,
    h_slope: Handle,
    div_factor: usize,
) -> Result<()> {
    let x = mem.read(h_bottom, 0, n)?;
    let slope = mem.read_all(h_slope)?;
    let y: Vec<T> = (0..n)
        .map(|i| {
            let c = (i / dim) % channels / div_factor.max(1);
            if x[i] > T::zero() {
                x[i]
            } else {
                x[i] * slope[c]
            }
        })
        .collect();
    mem.write(h_top, 0, &y)
}

/// PReLU data gradient.
#[allow(clippy::too_many_arguments)]
pub fn prelu_bwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    channels: usize,
    dim: usize,
    h_top_diff: Handle,
    h_bottom: Handle,
    h_bottom_diff: Handle,
    h_slope: Handle,
    div_factor: usize,
) -> Result<()> {
    let td = mem.read(h_top_diff, 0, n)?;
    let x = mem.read(h_bottom, 0, n)?;
    let slope = mem.read_all(h_slope)?;
    let bd: Vec<T> = (0..n)
        .map(|i| {
            let c = (i / dim) % channels / div_factor.max(1);
            if x[i] > T::zero() {
                td[i]
            } else {
                td[i] * slope[c]
            }
        })
        .collect();
    mem.write(h_bottom_diff, 0, &bd)
}

/// PReLU slope gradient: buff[i] = sum over the batch of
/// top_diff * bottom where bottom <= 0.
#[allow(clippy::too_many_arguments)]
pub fn prelu_bwd_param<T: Element>(
    mem: &mut MemoryBank<T>,
    cdim: usize,
    num: usize,
    top_offset: usize,
    h_top_diff: Handle,
    h_bottom: Handle,
    h_back_buff: Handle,
) -> Result<()> {
    let td = mem.read_all(h_top_diff)?;
    let x = mem.read_all(h_bottom)?;
    let mut buff = vec![T::zero(); cdim];
    for (i, slot) in buff.iter_mut().enumerate() {
        for n0 in 0..num {
            let idx = n0 * top_offset + i;
            if x[idx] <= T::zero() {
                *slot = *slot + td[idx] * x[idx];
            }
        }
    }
    mem.write(h_back_buff, 0, &buff)
}

/// Softmax loss forward over (outer, dim, inner) probabilities.
#[allow(clippy::too_many_arguments)]
pub fn softmaxloss_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_prob: Handle,
    h_labels: Handle,
    h_loss: Handle,
    outer: usize,
    dim: usize,
    inner: usize,
    h_counts: Handle,
    ignore_label: i32,
) -> Result<()> {
    if n != outer * inner {
        return Err(DeviceError::ShapeMismatch(format!(
            "softmax loss count {n} != {outer} * {inner}"
        )));
    }
    let prob = mem.read_all(h_prob)?;
    let labels = mem.read_all(h_labels)?;
    let mut loss = vec![T::zero(); n];
    let mut counts = vec![T::zero(); n];
    let floor = T::from_f64(f64::MIN_POSITIVE);
    for o in 0..outer {
        for i in 0..inner {
            let idx = o * inner + i;
            let label = labels[idx].to_i64() as i32;
            if label == ignore_label {
                continue;
            }
            let p = prob[o * dim + label.max(0) as usize * inner + i];
            loss[idx] = -(p.max(floor)).ln();
            counts[idx] = T::one();
        }
    }
    mem.write(h_loss, 0, &loss)?;
    mem.write(h_counts, 0, &counts)
}

/// Softmax loss backward: bottom_diff holds the probabilities on entry.
#[allow(clippy::too_many_arguments)]
pub fn softmaxloss_bwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_top: Handle,
    h_labels: Handle,
    h_bottom_diff: Handle,
    outer: usize,
    dim: usize,
    inner: usize,
    h_counts: Handle,
    ignore_label: i32,
) -> Result<()> {
    if n != outer * inner {
        return Err(DeviceError::ShapeMismatch(format!(
            "softmax loss count {n} != {outer} * {inner}"
        )));
    }
    let _ = mem.read(h_top, 0, outer * dim)?;
    let labels = mem.read_all(h_labels)?;
    // bottom_diff arrives pre-filled with the probabilities
    let mut bd = mem.read(h_bottom_diff, 0, outer * dim)?;
    let channels = dim / inner.max(1);
    let mut counts = vec![T::zero(); n];
    for o in 0..outer {
        for i in 0..inner {
            let idx = o * inner + i;
            let label = labels[idx].to_i64() as i32;
            if label == ignore_label {
                for c in 0..channels {
                    bd[o * dim + c * inner + i] = T::zero();
                }
            } else {
                let slot = o * dim + label.max(0) as usize * inner + i;
                bd[slot] = bd[slot] - T::one();
                counts[idx] = T::one();
            }
        }
    }
    mem.write(h_bottom_diff, 0, &bd)?;
    mem.write(h_counts, 0, &counts)
}

/// Elementwise max of two inputs, recording the winning input index.
#[allow(clippy::too_many_arguments)]
pub fn max_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    ha: Handle,
    hb: Handle,
    blob_idx: i32,
    hy: Handle,
    h_mask: Handle,
) -> Result<()> {
    let a = mem.read(ha, 0, n)?;
    let b = mem.read(hb, 0, n)?;
    let mut y = vec![T::zero(); n];
    let mut mask = vec![T::zero(); n];
    for i in 0..n {
        if a[i] > b[i] {
            y[i] = a[i];
            mask[i] = T::from_i64(i64::from(blob_idx));
        } else {
            y[i] = b[i];
            mask[i] = T::from_i64(i64::from(blob_idx) + 1);
        }
    }
    mem.write(hy, 0, &y)?;
    mem.write(h_mask, 0, &mask)
}

/// Route gradient to positions the recorded winner owns.
pub fn max_bwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_top_diff: Handle,
    blob_idx: i32,
    h_mask: Handle,
    h_bottom_diff: Handle,
) -> Result<()> {
    let td = mem.read(h_top_diff, 0, n)?;
    let mask = mem.read(h_mask, 0, n)?;
    let bd: Vec<T> = (0..n)
        .map(|i| {
            if mask[i].to_i64() == i64::from(blob_idx) {
                td[i]
            } else {
                T::zero()
            }
        })
        .collect();
    mem.write(h_bottom_diff, 0, &bd)
}

fn strided_remap<T: Element>(
    count: usize,
    num_axes: usize,
    src_strides: &[T],
    dst_strides: &[T],
    offsets: &[T],
) -> Vec<(usize, usize)> {
    let mut map = Vec::with_capacity(count);
    for index in 0..count {
        let mut rem = index;
        let mut src = 0_usize;
        for a in 0..num_axes {
            let ds = dst_strides[a].to_i64().max(1) as usize;
            let coord = rem / ds;
            rem %= ds;
            let ss = src_strides[a].to_i64().max(1) as usize;
            let off = offsets[a].to_i64().max(0) as usize;
            src += (coord + off) * ss;
        }
        map.push((index, src));
    }
    map
}

/// Strided crop forward: top index decomposed by dst strides, offset, and
/// recomposed by src strides.
#[allow(clippy::too_many_arguments)]
pub fn crop_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    num_axes: usize,
    h_src_strides: Handle,
    h_dst_strides: Handle,
    h_offsets: Handle,
    h_bottom: Handle,
    h_top: Handle,
) -> Result<()> {
    let ss = mem.read(h_src_strides, 0, num_axes)?;
    let ds = mem.read(h_dst_strides, 0, num_axes)?;
    let off = mem.read(h_offsets, 0, num_axes)?;
    let bottom = mem.read_all(h_bottom)?;
    let mut top = vec![T::zero(); n];
    for (dst, src) in strided_remap::<T>(n, num_axes, &ss, &ds, &off) {
        if src >= bottom.len() {
            return Err(DeviceError::MemoryRange {
                offset: src,
                count: 1,
                len: bottom.len(),
            });
        }
        top[dst] = bottom[src];
    }
    mem.write(h_top, 0, &top)
}

/// Strided crop backward: scatter top gradient back to source positions.
#[allow(clippy::too_many_arguments)]
pub fn crop_bwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    num_axes: usize,
    h_src_strides: Handle,
    h_dst_strides: Handle,
    h_offsets: Handle,
    h_bottom_diff: Handle,
    h_top_diff: Handle,
) -> Result<()> {
    let ss = mem.read(h_src_strides, 0, num_axes)?;
    let ds = mem.read(h_dst_strides, 0, num_axes)?;
    let off = mem.read(h_offsets, 0, num_axes)?;
    let td = mem.read_all(h_top_diff)?;
    let mut bd = vec![T::zero(); mem.len_of(h_bottom_diff)?];
    for (dst, src) in strided_remap::<T>(n, num_axes, &ss, &ds, &off) {
        if src >= bd.len() {
            return Err(DeviceError::MemoryRange {
                offset: src,
                count: 1,
                len: bd.len(),
            });
        }
        bd[src] = td[dst];
    }
    mem.write(h_bottom_diff, 0, &bd)
}

/// Concatenation forward; `n` is the bottom element count.
#[allow(clippy::too_many_arguments)]
pub fn concat_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_bottom: Handle,
    num_concats: usize,
    concat_size: usize,
    top_concat_axis: usize,
    bottom_concat_axis: usize,
    offset_concat_axis: usize,
    h_top: Handle,
) -> Result<()> {
    let _ = num_concats;
    let bottom = mem.read(h_bottom, 0, n)?;
    let mut top = mem.read_all(h_top)?;
    let total = bottom_concat_axis * concat_size;
    for (index, &v) in bottom.iter().enumerate() {
        let concat_num = index / total;
        let concat_index = index % total;
        let top_index =
            concat_index + (concat_num * top_concat_axis + offset_concat_axis) * concat_size;
        if top_index >= top.len() {
            return Err(DeviceError::MemoryRange {
                offset: top_index,
                count: 1,
                len: top.len(),
            });
        }
        top[top_index] = v;
    }
    mem.write(h_top, 0, &top)
}

/// Concatenation backward; `n` is the bottom element count.
#[allow(clippy::too_many_arguments)]
pub fn concat_bwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_top_diff: Handle,
    num_concats: usize,
    concat_size: usize,
    top_concat_axis: usize,
    bottom_concat_axis: usize,
    offset_concat_axis: usize,
    h_bottom_diff: Handle,
) -> Result<()> {
    let _ = num_concats;
    let td = mem.read_all(h_top_diff)?;
    let mut bd = vec![T::zero(); n];
    let total = bottom_concat_axis * concat_size;
    for (index, slot) in bd.iter_mut().enumerate() {
        let concat_num = index / total;
        let concat_index = index % total;
        let top_index =
            concat_index + (concat_num * top_concat_axis + offset_concat_axis) * concat_size;
        if top_index >= td.len() {
            return Err(DeviceError::MemoryRange {
                offset: top_index,
                count: 1,
                len: td.len(),
            });
        }
        *slot = td[top_index];
    }
    mem.write(h_bottom_diff, 0, &bd)
}

/// Slice forward; `n` is the top element count.
#[allow(clippy::too_many_arguments)]
pub fn slice_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_bottom: Handle,
    num_slices: usize,
    slice_size: usize,
    bottom_slice_axis: usize,
    top_slice_axis: usize,
    offset_slice_axis: usize,
    h_top: Handle,
) -> Result<()> {
    let _ = num_slices;
    let bottom = mem.read_all(h_bottom)?;
    let mut top = vec![T::zero(); n];
    let total = slice_size * top_slice_axis;
    for (index, slot) in top.iter_mut().enumerate() {
        let slice_num = index / total;
        let slice_index = index % total;
        let bottom_index =
            slice_index + (slice_num * bottom_slice_axis + offset_slice_axis) * slice_size;
        if bottom_index >= bottom.len() {
            return Err(DeviceError::MemoryRange {
                offset: bottom_index,
                count: 1,
                len: bottom.len(),
            });
        }
        *slot = bottom[bottom_index];
    }
    mem.write(h_top, 0, &top)
}

/// Slice backward; `n` is the top element count.
#[allow(clippy::too_many_arguments)]
pub fn slice_bwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_top_diff: Handle,
    num_slices: usize,
    slice_size: usize,
    bottom_slice_axis: usize,
    top_slice_axis: usize,
    offset_slice_axis: usize,
    h_bottom_diff: Handle,
) -> Result<()> {
    let _ = num_slices;
    let td = mem.read(h_top_diff, 0, n)?;
    let mut bd = mem.read_all(h_bottom_diff)?;
    let total = slice_size * top_slice_axis;
    for (index, &v) in td.iter().enumerate() {
        let slice_num = index / total;
        let slice_index = index % total;
        let bottom_index =
            slice_index + (slice_num * bottom_slice_axis + offset_slice_axis) * slice_size;
        if bottom_index >= bd.len() {
            return Err(DeviceError::MemoryRange {
                offset: bottom_index,
                count: 1,
                len: bd.len(),
            });
        }
        bd[bottom_index] = v;
    }
    mem.write(h_bottom_diff, 0, &bd)
}

/// Tile forward; `n` is the top element count.
#[allow(clippy::too_many_arguments)]
pub fn tile_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_bottom: Handle,
    tile_size: usize,
    num_tiles: usize,
    bottom_tile_axis: usize,
    h_top: Handle,
) -> Result<()> {
    let bottom = mem.read_all(h_bottom)?;
    let mut top = vec![T::zero(); n];
    for (index, slot) in top.iter_mut().enumerate() {
        let d = index % tile_size;
        let b = (index / tile_size / num_tiles) % bottom_tile_axis;
        let outer = index / tile_size / num_tiles / bottom_tile_axis;
        let bottom_index = (outer * bottom_tile_axis + b) * tile_size + d;
        if bottom_index >= bottom.len() {
            return Err(DeviceError::MemoryRange {
                offset: bottom_index,
                count: 1,
                len: bottom.len(),
            });
        }
        *slot = bottom[bottom_index];
    }
    mem.write(h_top, 0, &top)
}

/// Tile backward (sum over tiles); `n` is the bottom element count.
#[allow(clippy::too_many_arguments)]
pub fn tile_bwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_top_diff: Handle,
    tile_size: usize,
    num_tiles: usize,
    bottom_tile_axis: usize,
    h_bottom_diff: Handle,
) -> Result<()> {
    let td = mem.read_all(h_top_diff)?;
    let mut bd = vec![T::zero(); n];
    for (index, slot) in bd.iter_mut().enumerate() {
        let d = index % tile_size;
        let b = (index / tile_size) % bottom_tile_axis;
        let outer = index / tile_size / bottom_tile_axis;
        let mut top_index = (outer * num_tiles * bottom_tile_axis + b) * tile_size + d;
        for _ in 0..num_tiles {
            if top_index >= td.len() {
                return Err(DeviceError::MemoryRange {
                    offset: top_index,
                    count: 1,
                    len: td.len(),
                });
            }
            *slot = *slot + td[top_index];
            top_index += bottom_tile_axis * tile_size;
        }
    }
    mem.write(h_bottom_diff, 0, &bd)
}

/// Broadcast bias add: top = bottom + bias[(i / inner) % bias_dim].
#[allow(clippy::too_many_arguments)]
pub fn bias_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_bottom: Handle,
    h_bias: Handle,
    bias_dim: usize,
    inner: usize,
    h_top: Handle,
) -> Result<()> {
    let x = mem.read(h_bottom, 0, n)?;
    let bias = mem.read_all(h_bias)?;
    let y: Vec<T> = (0..n)
        .map(|i| x[i] + bias[(i / inner) % bias_dim])
        .collect();
    mem.write(h_top, 0, &y)
}

/// Broadcast scale, optionally fused with a bias term.
#[allow(clippy::too_many_arguments)]
pub fn scale_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    hx: Handle,
    h_scale: Handle,
    scale_dim: usize,
    inner: usize,
    hy: Handle,
    h_bias: Handle,
) -> Result<()> {
    let x = mem.read(hx, 0, n)?;
    let scale = mem.read_all(h_scale)?;
    let bias = if h_bias != 0 {
        Some(mem.read_all(h_bias)?)
    } else {
        None
    };
    let y: Vec<T> = (0..n)
        .map(|i| {
            let c = (i / inner) % scale_dim;
            let v = x[i] * scale[c];
            match &bias {
                Some(b) => v + b[c],
                None => v,
            }
        })
        .collect();
    mem.write(hy, 0, &y)
}

/// Step threshold: y = 1 where x > threshold else 0.
pub fn threshold_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    threshold: T,
    hx: Handle,
    hy: Handle,
) -> Result<()> {
    unary(mem, n, hx, 0, hy, 0, move |v| {
        if v > threshold {
            T::one()
        } else {
            T::zero()
        }
    })
}

/// Contrastive loss backward.
#[allow(clippy::too_many_arguments)]
pub fn cll_bwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    channels: usize,
    margin: T,
    legacy: bool,
    alpha: T,
    hy: Handle,
    h_diff: Handle,
    h_dist_sq: Handle,
    h_bottom_diff: Handle,
) -> Result<()> {
    let y = mem.read_all(hy)?;
    let diff = mem.read(h_diff, 0, n)?;
    let dist_sq = mem.read_all(h_dist_sq)?;
    let eps = T::from_f64(1e-4);
    let mut bd = vec![T::zero(); n];
    for i in 0..n {
        let pair = i / channels;
        if y[pair].to_i64() == 1 {
            bd[i] = alpha * diff[i];
        } else {
            let mdist = if legacy {
                margin - dist_sq[pair]
            } else {
                margin - dist_sq[pair].sqrt()
            };
            if mdist > T::zero() {
                if legacy {
                    bd[i] = -alpha * diff[i];
                } else {
                    let beta = -alpha * mdist / (dist_sq[pair].sqrt() + eps);
                    bd[i] = beta * diff[i];
                }
            }
        }
    }
    mem.write(h_bottom_diff, 0, &bd)
}

// =============================================================================
// Cross-channel LRN internals
// =============================================================================

/// scale[i] = k + alpha_over_size * sum of squares over the channel window;
/// `n` is the full element count.
#[allow(clippy::too_many_arguments)]
pub fn lrn_fillscale<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_bottom: Handle,
    num: usize,
    channels: usize,
    height: usize,
    width: usize,
    size: usize,
    alpha_over_size: T,
    k: T,
    h_scale: Handle,
) -> Result<()> {
    let x = mem.read(h_bottom, 0, n)?;
    let mut scale = vec![T::zero(); n];
    let plane = height * width;
    let pre = (size - 1) / 2;
    for n0 in 0..num {
        for c in 0..channels {
            let lo = c.saturating_sub(pre);
            let hi = (c + size - pre).min(channels);
            for s in 0..plane {
                let mut acc = T::zero();
                for cc in lo..hi {
                    let v = x[(n0 * channels + cc) * plane + s];
                    acc = acc + v * v;
                }
                scale[(n0 * channels + c) * plane + s] = k + alpha_over_size * acc;
            }
        }
    }
    mem.write(h_scale, 0, &scale)
}

/// out = in * scale^negative_beta.
pub fn lrn_computeoutput<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_bottom: Handle,
    h_scale: Handle,
    negative_beta: T,
    h_top: Handle,
) -> Result<()> {
    let x = mem.read(h_bottom, 0, n)?;
    let scale = mem.read(h_scale, 0, n)?;
    let y: Vec<T> = (0..n).map(|i| x[i] * scale[i].powf(negative_beta)).collect();
    mem.write(h_top, 0, &y)
}

/// LRN gradient with the sliding cache-ratio accumulation.
#[allow(clippy::too_many_arguments)]
pub fn lrn_computediff<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_bottom: Handle,
    h_top: Handle,
    h_scale: Handle,
    h_top_diff: Handle,
    num: usize,
    channels: usize,
    height: usize,
    width: usize,
    size: usize,
    negative_beta: T,
    cache_ratio: T,
    h_bottom_diff: Handle,
) -> Result<()> {
    let x = mem.read(h_bottom, 0, n)?;
    let y = mem.read(h_top, 0, n)?;
    let scale = mem.read(h_scale, 0, n)?;
    let td = mem.read(h_top_diff, 0, n)?;
    let mut bd = vec![T::zero(); n];
    let plane = height * width;
    let pre = (size - 1) / 2;
    for n0 in 0..num {
        for c in 0..channels {
            let lo = c.saturating_sub(pre);
            let hi = (c + size - pre).min(channels);
            for s in 0..plane {
                let idx = (n0 * channels + c) * plane + s;
                let mut accum = T::zero();
                for cc in lo..hi {
                    let j = (n0 * channels + cc) * plane + s;
                    accum = accum + td[j] * y[j] / scale[j];
                }
                bd[idx] = td[idx] * scale[idx].powf(negative_beta) - cache_ratio * x[idx] * accum;
            }
        }
    }
    mem.write(h_bottom_diff, 0, &bd)
}

// =============================================================================
// Recurrent kernels
// =============================================================================

/// Gate block order within a 4H row: input, forget, output, candidate.
const GATES: usize = 4;

fn sig<T: Element>(v: T) -> T {
    T::one() / (T::one() + (-v).exp())
}

/// Recurrent LSTM step forward at timestep `t`.
///
/// Adds the hidden-to-gate projection to the precomputed input projection,
/// applies the gate nonlinearities, and advances cell and hidden state.
/// `h_weight_i` rides along for layout compatibility and is validated only.
#[allow(clippy::too_many_arguments)]
pub fn lstm_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    t: usize,
    batch: usize,
    hidden: usize,
    h_weight_h: Handle,
    h_weight_i: Handle,
    h_clip: Handle,
    clip_off: usize,
    h_top: Handle,
    top_off: usize,
    h_cell: Handle,
    cell_off: usize,
    h_pre_gate: Handle,
    pre_gate_off: usize,
    h_gate: Handle,
    gate_off: usize,
    h_ht1: Handle,
    ht1_off: usize,
    h_ct1: Handle,
    ct1_off: usize,
    h_h_to_gate: Handle,
) -> Result<()> {
    let _ = mem.len_of(h_weight_i)?;
    let w_h = mem.read(h_weight_h, 0, GATES * hidden * hidden)?;
    let h_prev = mem.read(h_ht1, ht1_off, batch * hidden)?;
    let c_prev = mem.read(h_ct1, ct1_off, batch * hidden)?;
    let pre_gate = mem.read(h_pre_gate, pre_gate_off, batch * GATES * hidden)?;
    let clip = if h_clip != 0 {
        Some(mem.read(h_clip, clip_off, batch)?)
    } else {
        None
    };

    // h_to_gate = h(t-1) x W_h^T, row per batch sample
    let mut h_to_gate = vec![T::zero(); batch * GATES * hidden];
    for b in 0..batch {
        for j in 0..GATES * hidden {
            let mut acc = T::zero();
            for k in 0..hidden {
                acc = acc + w_h[j * hidden + k] * h_prev[b * hidden + k];
            }
            h_to_gate[b * GATES * hidden + j] = acc;
        }
    }

    let mut gate = vec![T::zero(); batch * GATES * hidden];
    let mut cell = vec![T::zero(); batch * hidden];
    let mut top = vec![T::zero(); batch * hidden];
    for b in 0..batch {
        let cont = match &clip {
            Some(cl) => cl[b].to_f64() != 0.0,
            None => t > 0,
        };
        for d in 0..hidden {
            let row = b * GATES * hidden;
            let mut g = [T::zero(); GATES];
            for (q, slot) in g.iter_mut().enumerate() {
                let mut v = pre_gate[row + q * hidden + d];
                if cont {
                    v = v + h_to_gate[row + q * hidden + d];
                }
                *slot = v;
            }
            let i_g = sig(g[0]);
            let f_g = sig(g[1]);
            let o_g = sig(g[2]);
            let c_g = g[3].tanh();
            gate[row + d] = i_g;
            gate[row + hidden + d] = f_g;
            gate[row + 2 * hidden + d] = o_g;
            gate[row + 3 * hidden + d] = c_g;
            let prev = if cont { c_prev[b * hidden + d] } else { T::zero() };
            let c = f_g * prev + i_g * c_g;
            cell[b * hidden + d] = c;
            top[b * hidden + d] = o_g * c.tanh();
        }
    }

    mem.write(h_h_to_gate, 0, &h_to_gate)?;
    mem.write(h_gate, gate_off, &gate)?;
    mem.write(h_cell, cell_off, &cell)?;
    mem.write(h_top, top_off, &top)
}

/// Recurrent LSTM step backward at timestep `t`.
#[allow(clippy::too_many_arguments)]
pub fn lstm_bwd<T: Element>(
    mem: &mut MemoryBank<T>,
    t: usize,
    batch: usize,
    hidden: usize,
    clip_threshold: T,
    h_weight_h: Handle,
    h_clip: Handle,
    clip_off: usize,
    h_top_diff: Handle,
    top_off: usize,
    h_cell: Handle,
    h_cell_diff: Handle,
    cell_off: usize,
    h_pre_gate_diff: Handle,
    pre_gate_off: usize,
    h_gate: Handle,
    h_gate_diff: Handle,
    gate_off: usize,
    h_ct1: Handle,
    ct1_off: usize,
    h_dht1: Handle,
    dht1_off: usize,
    h_dct1: Handle,
    dct1_off: usize,
    h_h_to_h: Handle,
) -> Result<()> {
    let w_h = mem.read(h_weight_h, 0, GATES * hidden * hidden)?;
    let top_diff = mem.read(h_top_diff, top_off, batch * hidden)?;
    let cell = mem.read(h_cell, cell_off, batch * hidden)?;
    let cell_diff_in = mem.read(h_cell_diff, cell_off, batch * hidden)?;
    let gate = mem.read(h_gate, gate_off, batch * GATES * hidden)?;
    let c_prev = mem.read(h_ct1, ct1_off, batch * hidden)?;
    let clip = if h_clip != 0 {
        Some(mem.read(h_clip, clip_off, batch)?)
    } else {
        None
    };

    let mut gate_diff = vec![T::zero(); batch * GATES * hidden];
    let mut pre_gate_diff = vec![T::zero(); batch * GATES * hidden];
    let mut dct1 = vec![T::zero(); batch * hidden];
    let mut cell_diff_out = vec![T::zero(); batch * hidden];
    for b in 0..batch {
        let cont = match &clip {
            Some(cl) => cl[b].to_f64() != 0.0,
            None => t > 0,
        };
        for d in 0..hidden {
            let row = b * GATES * hidden;
            let i_g = gate[row + d];
            let f_g = gate[row + hidden + d];
            let o_g = gate[row + 2 * hidden + d];
            let c_g = gate[row + 3 * hidden + d];
            let c = cell[b * hidden + d];
            let tc = c.tanh();
            let dh = top_diff[b * hidden + d];
            let dc = cell_diff_in[b * hidden + d] + dh * o_g * (T::one() - tc * tc);
            cell_diff_out[b * hidden + d] = dc;
            let prev = if cont { c_prev[b * hidden + d] } else { T::zero() };
            let di = dc * c_g;
            let df = dc * prev;
            let do_ = dh * tc;
            let dg = dc * i_g;
            if cont {
                dct1[b * hidden + d] = dc * f_g;
            }
            gate_diff[row + d] = di;
            gate_diff[row + hidden + d] = df;
            gate_diff[row + 2 * hidden + d] = do_;
            gate_diff[row + 3 * hidden + d] = dg;
            let mut pi = di * i_g * (T::one() - i_g);
            let mut pf = df * f_g * (T::one() - f_g);
            let mut po = do_ * o_g * (T::one() - o_g);
            let mut pg = dg * (T::one() - c_g * c_g);
            if clip_threshold > T::zero() {
                let clamp = |v: T| {
                    if v > clip_threshold {
                        clip_threshold
                    } else if v < -clip_threshold {
                        -clip_threshold
                    } else {
                        v
                    }
                };
                pi = clamp(pi);
                pf = clamp(pf);
                po = clamp(po);
                pg = clamp(pg);
            }
            pre_gate_diff[row + d] = pi;
            pre_gate_diff[row + hidden + d] = pf;
            pre_gate_diff[row + 2 * hidden + d] = po;
            pre_gate_diff[row + 3 * hidden + d] = pg;
        }
    }

    // dh(t-1) = pre_gate_diff x W_h
    let mut dht1 = vec![T::zero(); batch * hidden];
    for b in 0..batch {
        for k in 0..hidden {
            let mut acc = T::zero();
            for j in 0..GATES * hidden {
                acc = acc + pre_gate_diff[b * GATES * hidden + j] * w_h[j * hidden + k];
            }
            dht1[b * hidden + k] = acc;
        }
    }

    mem.write(h_gate_diff, gate_off, &gate_diff)?;
    mem.write(h_pre_gate_diff, pre_gate_off, &pre_gate_diff)?;
    mem.write(h_cell_diff, cell_off, &cell_diff_out)?;
    mem.write(h_dct1, dct1_off, &dct1)?;
    mem.write(h_h_to_h, 0, &dht1)?;
    mem.write(h_dht1, dht1_off, &dht1)
}

/// LSTM unit forward: gate pre-activations in X, activations cached in
/// X_acts; `count` is batch x hidden.
#[allow(clippy::too_many_arguments)]
pub fn lstm_unit_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    count: usize,
    hidden: usize,
    x_count: usize,
    hx: Handle,
    h_x_acts: Handle,
    h_c_prev: Handle,
    h_cont: Handle,
    h_c: Handle,
    h_h: Handle,
) -> Result<()> {
    let x = mem.read(hx, 0, x_count)?;
    let mut x_acts = vec![T::zero(); x_count];
    let dim = GATES * hidden;
    for (i, &v) in x.iter().enumerate() {
        let within = i % dim;
        x_acts[i] = if within < 3 * hidden { sig(v) } else { v.tanh() };
    }
    let c_prev = mem.read(h_c_prev, 0, count)?;
    let cont = if h_cont != 0 {
        Some(mem.read(h_cont, 0, count / hidden)?)
    } else {
        None
    };
    let mut c = vec![T::zero(); count];
    let mut h = vec![T::zero(); count];
    for i in 0..count {
        let b = i / hidden;
        let d = i % hidden;
        let row = b * dim;
        let i_g = x_acts[row + d];
        let f_g = x_acts[row + hidden + d];
        let o_g = x_acts[row + 2 * hidden + d];
        let g_g = x_acts[row + 3 * hidden + d];
        let keep = match &cont {
            Some(cv) => cv[b],
            None => T::one(),
        };
        c[i] = keep * f_g * c_prev[i] + i_g * g_g;
        h[i] = o_g * c[i].tanh();
    }
    mem.write(h_x_acts, 0, &x_acts)?;
    mem.write(h_c, 0, &c)?;
    mem.write(h_h, 0, &h)
}

/// LSTM unit backward; produces gate-activation diffs and pre-activation
/// diffs.
#[allow(clippy::too_many_arguments)]
pub fn lstm_unit_bwd<T: Element>(
    mem: &mut MemoryBank<T>,
    count: usize,
    hidden: usize,
    x_count: usize,
    h_c_prev: Handle,
    h_x_acts: Handle,
    h_c: Handle,
    h_h: Handle,
    h_cont: Handle,
    h_c_diff: Handle,
    h_h_diff: Handle,
    h_c_prev_diff: Handle,
    h_x_acts_diff: Handle,
    h_x_diff: Handle,
) -> Result<()> {
    let _ = mem.len_of(h_h)?;
    let c_prev = mem.read(h_c_prev, 0, count)?;
    let x_acts = mem.read(h_x_acts, 0, x_count)?;
    let c = mem.read(h_c, 0, count)?;
    let c_diff = mem.read(h_c_diff, 0, count)?;
    let h_diff = mem.read(h_h_diff, 0, count)?;
    let cont = if h_cont != 0 {
        Some(mem.read(h_cont, 0, count / hidden)?)
    } else {
        None
    };
    let dim = GATES * hidden;
    let mut c_prev_diff = vec![T::zero(); count];
    let mut x_acts_diff = vec![T::zero(); x_count];
    for i in 0..count {
        let b = i / hidden;
        let d = i % hidden;
        let row = b * dim;
        let i_g = x_acts[row + d];
        let f_g = x_acts[row + hidden + d];
        let o_g = x_acts[row + 2 * hidden + d];
        let g_g = x_acts[row + 3 * hidden + d];
        let keep = match &cont {
            Some(cv) => cv[b],
            None => T::one(),
        };
        let tc = c[i].tanh();
        let dc = c_diff[i] + h_diff[i] * o_g * (T::one() - tc * tc);
        c_prev_diff[i] = dc * keep * f_g;
        x_acts_diff[row + d] = dc * g_g;
        x_acts_diff[row + hidden + d] = dc * keep * c_prev[i];
        x_acts_diff[row + 2 * hidden + d] = h_diff[i] * tc;
        x_acts_diff[row + 3 * hidden + d] = dc * i_g;
    }
    let mut x_diff = vec![T::zero(); x_count];
    for i in 0..x_count {
        let within = i % dim;
        let a = x_acts[i];
        x_diff[i] = if within < 3 * hidden {
            x_acts_diff[i] * a * (T::one() - a)
        } else {
            x_acts_diff[i] * (T::one() - a * a)
        };
    }
    mem.write(h_c_prev_diff, 0, &c_prev_diff)?;
    mem.write(h_x_acts_diff, 0, &x_acts_diff)?;
    mem.write(h_x_diff, 0, &x_diff)
}

// =============================================================================
// Weighted sums and losses
// =============================================================================

/// top[d] = sum over items of coeff_i * bottom[i, d]; `count` is the bottom
/// element count (items x dim).
#[allow(clippy::too_many_arguments)]
pub fn coeff_sum_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    count: usize,
    dim: usize,
    num_offset: usize,
    coeff: T,
    h_coeff: Handle,
    h_bottom: Handle,
    h_top: Handle,
) -> Result<()> {
    let bottom = mem.read(h_bottom, 0, count)?;
    let coeffs = if h_coeff != 0 {
        Some(mem.read_all(h_coeff)?)
    } else {
        None
    };
    let mut top = vec![T::zero(); dim];
    for (i, &v) in bottom.iter().enumerate() {
        let item = i / dim;
        let c = match &coeffs {
            Some(cv) => coeff * cv[num_offset + item],
            None => coeff,
        };
        top[i % dim] = top[i % dim] + c * v;
    }
    mem.write(h_top, 0, &top)
}

/// bottom_diff[i, d] = coeff_i * top_diff[d].
#[allow(clippy::too_many_arguments)]
pub fn coeff_sum_bwd<T: Element>(
    mem: &mut MemoryBank<T>,
    count: usize,
    dim: usize,
    num_offset: usize,
    coeff: T,
    h_coeff: Handle,
    h_top_diff: Handle,
    h_bottom_diff: Handle,
) -> Result<()> {
    let td = mem.read(h_top_diff, 0, dim)?;
    let coeffs = if h_coeff != 0 {
        Some(mem.read_all(h_coeff)?)
    } else {
        None
    };
    let mut bd = vec![T::zero(); count];
    for (i, slot) in bd.iter_mut().enumerate() {
        let item = i / dim;
        let c = match &coeffs {
            Some(cv) => coeff * cv[num_offset + item],
            None => coeff,
        };
        *slot = c * td[i % dim];
    }
    mem.write(h_bottom_diff, 0, &bd)
}

/// Numerically stable sigmoid cross-entropy loss with optional ignore label.
#[allow(clippy::too_many_arguments)]
pub fn sigmoid_cross_entropy_fwd<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_input: Handle,
    h_target: Handle,
    h_loss: Handle,
    has_ignore: bool,
    ignore_label: i32,
    h_counts: Handle,
) -> Result<()> {
    let input = mem.read(h_input, 0, n)?;
    let target = mem.read(h_target, 0, n)?;
    let mut loss = vec![T::zero(); n];
    let mut counts = vec![T::zero(); n];
    for i in 0..n {
        if has_ignore && target[i].to_i64() == i64::from(ignore_label) {
            continue;
        }
        let x = input[i];
        let pos = if x >= T::zero() { T::one() } else { T::zero() };
        loss[i] = -(x * (target[i] - pos)
            - (T::one() + (x - T::from_f64(2.0) * x * pos).exp()).ln());
        counts[i] = T::one();
    }
    mem.write(h_loss, 0, &loss)?;
    mem.write(h_counts, 0, &counts)
}

/// Zero the running gradient wherever the target carries the ignore label.
pub fn sigmoid_cross_entropy_ignore<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    ignore_label: i32,
    h_target: Handle,
    h_data: Handle,
) -> Result<()> {
    let target = mem.read(h_target, 0, n)?;
    let mut data = mem.read(h_data, 0, n)?;
    for i in 0..n {
        if target[i].to_i64() == i64::from(ignore_label) {
            data[i] = T::zero();
        }
    }
    mem.write(h_data, 0, &data)
}

// =============================================================================
// Optimizer updates: gradient in-place, history buffers advance
// =============================================================================

/// SGD with momentum: h = momentum * h + rate * g; g = h.
pub fn sgd_update<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_diff: Handle,
    h_history: Handle,
    momentum: T,
    rate: T,
) -> Result<()> {
    let mut g = mem.read(h_diff, 0, n)?;
    let mut h = mem.read(h_history, 0, n)?;
    for i in 0..n {
        h[i] = momentum * h[i] + rate * g[i];
        g[i] = h[i];
    }
    mem.write(h_history, 0, &h)?;
    mem.write(h_diff, 0, &g)
}

/// Nesterov momentum update.
pub fn nesterov_update<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_diff: Handle,
    h_history: Handle,
    momentum: T,
    rate: T,
) -> Result<()> {
    let mut g = mem.read(h_diff, 0, n)?;
    let mut h = mem.read(h_history, 0, n)?;
    for i in 0..n {
        let prev = h[i];
        h[i] = momentum * h[i] + rate * g[i];
        g[i] = (T::one() + momentum) * h[i] - momentum * prev;
    }
    mem.write(h_history, 0, &h)?;
    mem.write(h_diff, 0, &g)
}

/// Adagrad: h += g^2; g = rate * g / (sqrt(h) + delta).
pub fn adagrad_update<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_diff: Handle,
    h_history: Handle,
    delta: T,
    rate: T,
) -> Result<()> {
    let mut g = mem.read(h_diff, 0, n)?;
    let mut h = mem.read(h_history, 0, n)?;
    for i in 0..n {
        h[i] = h[i] + g[i] * g[i];
        g[i] = rate * g[i] / (h[i].sqrt() + delta);
    }
    mem.write(h_history, 0, &h)?;
    mem.write(h_diff, 0, &g)
}

/// Adadelta with two accumulators.
#[allow(clippy::too_many_arguments)]
pub fn adadelta_update<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_diff: Handle,
    h_history1: Handle,
    h_history2: Handle,
    momentum: T,
    delta: T,
    rate: T,
) -> Result<()> {
    let mut g = mem.read(h_diff, 0, n)?;
    let mut h1 = mem.read(h_history1, 0, n)?;
    let mut h2 = mem.read(h_history2, 0, n)?;
    for i in 0..n {
        h1[i] = momentum * h1[i] + (T::one() - momentum) * g[i] * g[i];
        let v = g[i] * ((h2[i] + delta) / (h1[i] + delta)).sqrt();
        h2[i] = momentum * h2[i] + (T::one() - momentum) * v * v;
        g[i] = rate * v;
    }
    mem.write(h_history1, 0, &h1)?;
    mem.write(h_history2, 0, &h2)?;
    mem.write(h_diff, 0, &g)
}

/// Adam with externally corrected rate.
#[allow(clippy::too_many_arguments)]
pub fn adam_update<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_diff: Handle,
    h_m: Handle,
    h_v: Handle,
    beta1: T,
    beta2: T,
    eps_hat: T,
    corrected_rate: T,
) -> Result<()> {
    let mut g = mem.read(h_diff, 0, n)?;
    let mut m = mem.read(h_m, 0, n)?;
    let mut v = mem.read(h_v, 0, n)?;
    for i in 0..n {
        m[i] = beta1 * m[i] + (T::one() - beta1) * g[i];
        v[i] = beta2 * v[i] + (T::one() - beta2) * g[i] * g[i];
        g[i] = corrected_rate * m[i] / (v[i].sqrt() + eps_hat);
    }
    mem.write(h_m, 0, &m)?;
    mem.write(h_v, 0, &v)?;
    mem.write(h_diff, 0, &g)
}

/// RMSProp update.
#[allow(clippy::too_many_arguments)]
pub fn rmsprop_update<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_diff: Handle,
    h_history: Handle,
    decay: T,
    delta: T,
    rate: T,
) -> Result<()> {
    let mut g = mem.read(h_diff, 0, n)?;
    let mut h = mem.read(h_history, 0, n)?;
    for i in 0..n {
        h[i] = decay * h[i] + (T::one() - decay) * g[i] * g[i];
        g[i] = rate * g[i] / (h[i].sqrt() + delta);
    }
    mem.write(h_history, 0, &h)?;
    mem.write(h_diff, 0, &g)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank() -> MemoryBank<f32> {
        MemoryBank::new(vec![1 << 22])
    }

    fn buf(m: &mut MemoryBank<f32>, values: &[f32]) -> Handle {
        let h = m.alloc(0, values.len()).unwrap();
        m.write(h, 0, values).unwrap();
        h
    }

    #[test]
    fn relu_fwd_bwd_roundtrip() {
        let mut m = bank();
        let hx = buf(&mut m, &[-2.0, 3.0]);
        let hy = m.alloc(0, 2).unwrap();
        relu_fwd(&mut m, 2, hx, hy, 0.1).unwrap();
        let y = m.read_all(hy).unwrap();
        assert!((y[0] - -0.2).abs() < 1e-6);
        assert_eq!(y[1], 3.0);

        let htd = buf(&mut m, &[1.0, 1.0]);
        let hbd = m.alloc(0, 2).unwrap();
        relu_bwd(&mut m, 2, htd, hy, hbd, 0.1).unwrap();
        let bd = m.read_all(hbd).unwrap();
        assert!((bd[0] - 0.1).abs() < 1e-6);
        assert_eq!(bd[1], 1.0);
    }

    #[test]
    fn max_pool_fwd_bwd() {
        let mut m = bank();
        // 1x1x2x2 input, 2x2 kernel, stride 1
        let hx = buf(&mut m, &[1.0, 4.0, 3.0, 2.0]);
        let hy = m.alloc(0, 1).unwrap();
        let hmask = m.alloc(0, 1).unwrap();
        let g = PoolGeometry {
            num: 1,
            channels: 1,
            height: 2,
            width: 2,
            out_h: 1,
            out_w: 1,
            kernel_h: 2,
            kernel_w: 2,
            stride_h: 1,
            stride_w: 1,
            pad_h: 0,
            pad_w: 0,
        };
        pooling_fwd(&mut m, PoolMethod::Max, 1, hx, g, hy, hmask, 0).unwrap();
        assert_eq!(m.read_all(hy).unwrap(), vec![4.0]);
        assert_eq!(m.read_all(hmask).unwrap(), vec![1.0]);

        let htd = buf(&mut m, &[2.0]);
        let hbd = m.alloc(0, 4).unwrap();
        pooling_bwd(&mut m, PoolMethod::Max, 4, htd, g, hbd, hmask, 0).unwrap();
        assert_eq!(m.read_all(hbd).unwrap(), vec![0.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn ave_pool_divides_by_window() {
        let mut m = bank();
        let hx = buf(&mut m, &[1.0, 3.0, 5.0, 7.0]);
        let hy = m.alloc(0, 1).unwrap();
        let g = PoolGeometry {
            num: 1,
            channels: 1,
            height: 2,
            width: 2,
            out_h: 1,
            out_w: 1,
            kernel_h: 2,
            kernel_w: 2,
            stride_h: 1,
            stride_w: 1,
            pad_h: 0,
            pad_w: 0,
        };
        pooling_fwd(&mut m, PoolMethod::Ave, 1, hx, g, hy, 0, 0).unwrap();
        assert_eq!(m.read_all(hy).unwrap(), vec![4.0]);
    }

    #[test]
    fn embed_gathers_rows() {
        let mut m = bank();
        let h_idx = buf(&mut m, &[1.0, 0.0]);
        let h_w = buf(&mut m, &[10.0, 11.0, 20.0, 21.0]);
        let h_top = m.alloc(0, 4).unwrap();
        embed_fwd(&mut m, 4, h_idx, h_w, 2, 2, 2, h_top).unwrap();
        assert_eq!(m.read_all(h_top).unwrap(), vec![20.0, 21.0, 10.0, 11.0]);
        // out-of-vocabulary index is rejected
        let h_bad = buf(&mut m, &[5.0]);
        let h_top2 = m.alloc(0, 2).unwrap();
        assert!(embed_fwd(&mut m, 2, h_bad, h_w, 1, 2, 2, h_top2).is_err());
    }

    #[test]
    fn concat_slice_are_inverse() {
        let mut m = bank();
        // two bottoms of shape (1, 2) concatenated along axis 1 into (1, 4)
        let b0 = buf(&mut m, &[1.0, 2.0]);
        let top = m.alloc(0, 4).unwrap();
        concat_fwd(&mut m, 2, b0, 1, 1, 4, 2, 0, top).unwrap();
        let b1 = buf(&mut m, &[3.0, 4.0]);
        concat_fwd(&mut m, 2, b1, 1, 1, 4, 2, 2, top).unwrap();
        assert_eq!(m.read_all(top).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);

        let s0 = m.alloc(0, 2).unwrap();
        slice_fwd(&mut m, 2, top, 1, 1, 4, 2, 2, s0).unwrap();
        assert_eq!(m.read_all(s0).unwrap(), vec![3.0, 4.0]);
    }

    #[test]
    fn tile_fwd_bwd() {
        let mut m = bank();
        let hb = buf(&mut m, &[1.0, 2.0]);
        let ht = m.alloc(0, 6).unwrap();
        // tile_size=1, tiles=3, bottom axis=2
        tile_fwd(&mut m, 6, hb, 1, 3, 2, ht).unwrap();
        assert_eq!(
            m.read_all(ht).unwrap(),
            vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]
        );
        let hbd = m.alloc(0, 2).unwrap();
        tile_bwd(&mut m, 2, ht, 1, 3, 2, hbd).unwrap();
        assert_eq!(m.read_all(hbd).unwrap(), vec![3.0, 6.0]);
    }

    #[test]
    fn softmax_loss_ignores_label() {
        let mut m = bank();
        // outer=2, dim=2 (2 classes, inner=1)
        let probs = buf(&mut m, &[0.9, 0.1, 0.4, 0.6]);
        let labels = buf(&mut m, &[0.0, -1.0]);
        let loss = m.alloc(0, 2).unwrap();
        let counts = m.alloc(0, 2).unwrap();
        softmaxloss_fwd(&mut m, 2, probs, labels, loss, 2, 2, 1, counts, -1).unwrap();
        let l = m.read_all(loss).unwrap();
        assert!((l[0] - (-(0.9_f32).ln())).abs() < 1e-6);
        assert_eq!(l[1], 0.0);
        assert_eq!(m.read_all(counts).unwrap(), vec![1.0, 0.0]);
    }

    #[test]
    fn lstm_unit_forward_gates() {
        let mut m = bank();
        let hidden = 1;
        // batch 1: pre-activations [i, f, o, g]
        let hx = buf(&mut m, &[100.0, -100.0, 100.0, 100.0]);
        let h_acts = m.alloc(0, 4).unwrap();
        let h_cprev = buf(&mut m, &[5.0]);
        let h_c = m.alloc(0, 1).unwrap();
        let h_h = m.alloc(0, 1).unwrap();
        lstm_unit_fwd(&mut m, 1, hidden, 4, hx, h_acts, h_cprev, 0, h_c, h_h).unwrap();
        let c = m.read_all(h_c).unwrap()[0];
        // i ~ 1, f ~ 0, g ~ 1 -> c ~ 1, h ~ tanh(1)
        assert!((c - 1.0).abs() < 1e-3);
        let h = m.read_all(h_h).unwrap()[0];
        assert!((h - 1.0_f32.tanh()).abs() < 1e-3);
    }

    #[test]
    fn sgd_update_advances_history() {
        let mut m = bank();
        let hd = buf(&mut m, &[1.0, 2.0]);
        let hh = buf(&mut m, &[0.5, 0.5]);
        sgd_update(&mut m, 2, hd, hh, 0.9, 0.1).unwrap();
        let h = m.read_all(hh).unwrap();
        assert!((h[0] - 0.55).abs() < 1e-6);
        assert_eq!(m.read_all(hd).unwrap(), h);
    }

    #[test]
    fn adam_moves_toward_gradient() {
        let mut m = bank();
        let hd = buf(&mut m, &[1.0]);
        let hm = m.alloc(0, 1).unwrap();
        let hv = m.alloc(0, 1).unwrap();
        adam_update(&mut m, 1, hd, hm, hv, 0.9, 0.999, 1e-8, 0.001).unwrap();
        let g = m.read_all(hd).unwrap()[0];
        assert!(g > 0.0 && g < 0.1);
    }

    #[test]
    fn coeff_sum_weights_items() {
        let mut m = bank();
        let hb = buf(&mut m, &[1.0, 2.0, 3.0, 4.0]);
        let hc = buf(&mut m, &[1.0, 0.5]);
        let ht = m.alloc(0, 2).unwrap();
        coeff_sum_fwd(&mut m, 4, 2, 0, 2.0, hc, hb, ht).unwrap();
        // item 0 coeff 2.0, item 1 coeff 1.0
        assert_eq!(m.read_all(ht).unwrap(), vec![2.0 + 3.0, 4.0 + 4.0]);
    }

    #[test]
    fn stochastic_pooling_is_unsupported() {
        assert!(PoolMethod::from_wire(2).is_err());
        assert!(PoolMethod::from_wire(9).is_err());
        assert_eq!(PoolMethod::from_wire(0).unwrap(), PoolMethod::Max);
    }
}
