//! Descriptor tables and descriptor-driven tensor operations.
//!
//! Mirrors the vendor-library surface the facade marshals for: opaque
//! contexts, shape descriptors, and forward/backward ops that combine a
//! scaling pair (alpha, beta) with data behind buffer handles. The reference
//! kernels run on host memory; algorithm ids and workspace sizes are computed
//! but direct loops do the work.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::element::Element;
use crate::error::{DeviceError, Result};
use crate::handle::{Handle, HandleTable};
use crate::memory::MemoryBank;

/// Four-dimensional tensor shape with explicit strides.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TensorDesc {
    /// Batch dimension.
    pub n: usize,
    /// Channel dimension.
    pub c: usize,
    /// Height.
    pub h: usize,
    /// Width.
    pub w: usize,
    /// Strides for (n, c, h, w).
    pub strides: [usize; 4],
}

impl TensorDesc {
    /// Dense NCHW descriptor.
    #[must_use]
    pub fn dense(n: usize, c: usize, h: usize, w: usize) -> Self {
        Self {
            n,
            c,
            h,
            w,
            strides: [c * h * w, h * w, w, 1],
        }
    }

    /// Element count addressed by the descriptor.
    #[must_use]
    pub fn count(&self) -> usize {
        self.n * self.c * self.h * self.w
    }

    /// Linear offset of (n, c, h, w) under the descriptor's strides.
    #[must_use]
    pub fn offset(&self, n: usize, c: usize, h: usize, w: usize) -> usize {
        n * self.strides[0] + c * self.strides[1] + h * self.strides[2] + w * self.strides[3]
    }

    /// Dimensions as an array.
    #[must_use]
    pub fn dims(&self) -> [usize; 4] {
        [self.n, self.c, self.h, self.w]
    }
}

/// Filter shape: output channels, input channels, kernel height/width.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FilterDesc {
    /// Output channels.
    pub k: usize,
    /// Input channels.
    pub c: usize,
    /// Kernel height.
    pub h: usize,
    /// Kernel width.
    pub w: usize,
}

/// Convolution padding and stride.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ConvDesc {
    /// Pad height.
    pub pad_h: usize,
    /// Pad width.
    pub pad_w: usize,
    /// Stride height.
    pub stride_h: usize,
    /// Stride width.
    pub stride_w: usize,
}

/// Pooling window configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolingDesc {
    /// 0 max, 1 average.
    pub method: i32,
    /// Window height.
    pub h: usize,
    /// Window width.
    pub w: usize,
    /// Pad height.
    pub pad_h: usize,
    /// Pad width.
    pub pad_w: usize,
    /// Stride height.
    pub stride_h: usize,
    /// Stride width.
    pub stride_w: usize,
}

/// Dropout ratio plus RNG state binding.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DropoutDesc {
    /// Drop probability.
    pub ratio: f64,
    /// Seed applied to the mask stream.
    pub seed: u64,
    /// States buffer handle bound at configuration time.
    pub states: Handle,
}

/// Local response normalization window parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LrnDesc {
    /// Window size across channels.
    pub size: usize,
    /// Alpha (pre-division by window size).
    pub alpha: f64,
    /// Exponent.
    pub beta: f64,
    /// Additive constant.
    pub k: f64,
}

impl Default for LrnDesc {
    fn default() -> Self {
        Self {
            size: 5,
            alpha: 1e-4,
            beta: 0.75,
            k: 2.0,
        }
    }
}

/// Library context; holds the optional stream binding.
#[derive(Debug, Clone, Copy)]
pub struct DnnContext {
    /// Stream the context was created against (0 = default).
    pub stream: Handle,
}

/// Elements reserved for dropout RNG states.
const DROPOUT_STATES_LEN: usize = 256;

/// Descriptor and context tables plus the ops defined over them.
#[derive(Debug)]
pub struct Dnn {
    contexts: HandleTable<DnnContext>,
    tensors: HandleTable<TensorDesc>,
    filters: HandleTable<FilterDesc>,
    convs: HandleTable<ConvDesc>,
    pools: HandleTable<PoolingDesc>,
    dropouts: HandleTable<DropoutDesc>,
    lrns: HandleTable<LrnDesc>,
}

impl Default for Dnn {
    fn default() -> Self {
        Self::new()
    }
}

impl Dnn {
    /// Empty tables.
    #[must_use]
    pub fn new() -> Self {
        Self {
            contexts: HandleTable::new("dnn context"),
            tensors: HandleTable::new("tensor descriptor"),
            filters: HandleTable::new("filter descriptor"),
            convs: HandleTable::new("convolution descriptor"),
            pools: HandleTable::new("pooling descriptor"),
            dropouts: HandleTable::new("dropout descriptor"),
            lrns: HandleTable::new("lrn descriptor"),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create a context bound to `stream` (0 = default).
    pub fn create_context(&mut self, stream: Handle) -> Handle {
        self.contexts.insert(DnnContext { stream })
    }

    /// Free a context.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn free_context(&mut self, h: Handle) -> Result<()> {
        self.contexts.remove(h).map(|_| ())
    }

    /// Validate a context handle.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn context(&self, h: Handle) -> Result<DnnContext> {
        self.contexts.get(h).copied()
    }

    /// Create an unset tensor descriptor.
    pub fn create_tensor(&mut self) -> Handle {
        self.tensors.insert(TensorDesc::default())
    }

    /// Free a tensor descriptor.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn free_tensor(&mut self, h: Handle) -> Result<()> {
        self.tensors.remove(h).map(|_| ())
    }

    /// Configure a tensor descriptor; `strides` defaults to dense NCHW.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn set_tensor(
        &mut self,
        h: Handle,
        n: usize,
        c: usize,
        hh: usize,
        w: usize,
        strides: Option<[usize; 4]>,
    ) -> Result<()> {
        let desc = self.tensors.get_mut(h)?;
        *desc = TensorDesc::dense(n, c, hh, w);
        if let Some(s) = strides {
            desc.strides = s;
        }
        Ok(())
    }

    /// Look up a tensor descriptor.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn tensor(&self, h: Handle) -> Result<TensorDesc> {
        self.tensors.get(h).copied()
    }

    /// Create an unset filter descriptor.
    pub fn create_filter(&mut self) -> Handle {
        self.filters.insert(FilterDesc::default())
    }

    /// Free a filter descriptor.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn free_filter(&mut self, h: Handle) -> Result<()> {
        self.filters.remove(h).map(|_| ())
    }

    /// Configure a filter descriptor.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn set_filter(&mut self, h: Handle, k: usize, c: usize, hh: usize, w: usize) -> Result<()> {
        *self.filters.get_mut(h)? = FilterDesc { k, c, h: hh, w };
        Ok(())
    }

    /// Create an unset convolution descriptor.
    pub fn create_conv(&mut self) -> Handle {
        self.convs.insert(ConvDesc::default())
    }

    /// Free a convolution descriptor.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn free_conv(&mut self, h: Handle) -> Result<()> {
        self.convs.remove(h).map(|_| ())
    }

    /// Configure a convolution descriptor.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn set_conv(
        &mut self,
        h: Handle,
        pad_h: usize,
        pad_w: usize,
        stride_h: usize,
        stride_w: usize,
    ) -> Result<()> {
        *self.convs.get_mut(h)? = ConvDesc {
            pad_h,
            pad_w,
            stride_h: stride_h.max(1),
            stride_w: stride_w.max(1),
        };
        Ok(())
    }

    /// Create an unset pooling descriptor.
    pub fn create_pooling(&mut self) -> Handle {
        self.pools.insert(PoolingDesc {
            method: 0,
            h: 1,
            w: 1,
            pad_h: 0,
            pad_w: 0,
            stride_h: 1,
            stride_w: 1,
        })
    }

    /// Free a pooling descriptor.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn free_pooling(&mut self, h: Handle) -> Result<()> {
        self.pools.remove(h).map(|_| ())
    }

    /// Configure a pooling descriptor.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`, `ParamOutOfRange` for an unknown method.
    #[allow(clippy::too_many_arguments)]
    pub fn set_pooling(
        &mut self,
        h: Handle,
        method: i32,
        hh: usize,
        w: usize,
        pad_h: usize,
        pad_w: usize,
        stride_h: usize,
        stride_w: usize,
    ) -> Result<()> {
        if !(0..=1).contains(&method) {
            return Err(DeviceError::ParamOutOfRange(format!(
                "pooling method {method}"
            )));
        }
        *self.pools.get_mut(h)? = PoolingDesc {
            method,
            h: hh,
            w,
            pad_h,
            pad_w,
            stride_h: stride_h.max(1),
            stride_w: stride_w.max(1),
        };
        Ok(())
    }

    /// Create a dropout descriptor.
    pub fn create_dropout(&mut self) -> Handle {
        self.dropouts.insert(DropoutDesc::default())
    }

    /// Free a dropout descriptor.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn free_dropout(&mut self, h: Handle) -> Result<()> {
        self.dropouts.remove(h).map(|_| ())
    }

    /// Configure a dropout descriptor against a context and states buffer.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`, `ParamOutOfRange` for a ratio outside [0, 1).
    pub fn set_dropout<T: Element>(
        &mut self,
        mem: &MemoryBank<T>,
        h_ctx: Handle,
        h: Handle,
        ratio: f64,
        states: Handle,
        seed: u64,
    ) -> Result<()> {
        self.context(h_ctx)?;
        if !(0.0..1.0).contains(&ratio) {
            return Err(DeviceError::ParamOutOfRange(format!(
                "dropout ratio {ratio}"
            )));
        }
        if states != 0 {
            mem.len_of(states)?;
        }
        *self.dropouts.get_mut(h)? = DropoutDesc {
            ratio,
            seed,
            states,
        };
        Ok(())
    }

    /// State and reserve sizes (in elements) for dropout over `bottom`.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn dropout_info(&self, h_ctx: Handle, h_bottom_desc: Handle) -> Result<(usize, usize)> {
        self.context(h_ctx)?;
        let bottom = self.tensor(h_bottom_desc)?;
        Ok((DROPOUT_STATES_LEN, bottom.count()))
    }

    /// Create an LRN descriptor with library defaults.
    pub fn create_lrn(&mut self) -> Handle {
        self.lrns.insert(LrnDesc::default())
    }

    /// Free an LRN descriptor.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn free_lrn(&mut self, h: Handle) -> Result<()> {
        self.lrns.remove(h).map(|_| ())
    }

    /// Configure an LRN descriptor.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`, `ParamOutOfRange` for a zero window.
    pub fn set_lrn(&mut self, h: Handle, size: usize, alpha: f64, beta: f64, k: f64) -> Result<()> {
        if size == 0 {
            return Err(DeviceError::ParamOutOfRange("lrn size 0".to_string()));
        }
        *self.lrns.get_mut(h)? = LrnDesc {
            size,
            alpha,
            beta,
            k,
        };
        Ok(())
    }

    /// Number of live handles across every table.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.contexts.len()
            + self.tensors.len()
            + self.filters.len()
            + self.convs.len()
            + self.pools.len()
            + self.dropouts.len()
            + self.lrns.len()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.contexts.clear();
        self.tensors.clear();
        self.filters.clear();
        self.convs.clear();
        self.pools.clear();
        self.dropouts.clear();
        self.lrns.clear();
    }

    // =========================================================================
    // Descriptor-driven ops
    // =========================================================================

    /// y = alpha * x + beta * y with per-dimension broadcast where a source
    /// dimension is 1.
    #[allow(clippy::too_many_arguments)]
    pub fn add_tensor<T: Element>(
        &self,
        mem: &mut MemoryBank<T>,
        h_ctx: Handle,
        alpha: T,
        h_src_desc: Handle,
        h_src: Handle,
        src_off: usize,
        beta: T,
        h_dst_desc: Handle,
        h_dst: Handle,
        dst_off: usize,
    ) -> Result<()> {
        self.context(h_ctx)?;
        let sd = self.tensor(h_src_desc)?;
        let dd = self.tensor(h_dst_desc)?;
        for (s, d) in sd.dims().iter().zip(dd.dims().iter()) {
            if *s != *d && *s != 1 {
                return Err(DeviceError::ShapeMismatch(format!(
                    "add tensor: source dims {:?} do not broadcast to {:?}",
                    sd.dims(),
                    dd.dims()
                )));
            }
        }
        let src = mem.read(h_src, src_off, sd.count())?;
        let mut dst = mem.read(h_dst, dst_off, dd.count())?;
        for n in 0..dd.n {
            for c in 0..dd.c {
                for hh in 0..dd.h {
                    for w in 0..dd.w {
                        let s = sd.offset(
                            if sd.n == 1 { 0 } else { n },
                            if sd.c == 1 { 0 } else { c },
                            if sd.h == 1 { 0 } else { hh },
                            if sd.w == 1 { 0 } else { w },
                        );
                        let d = dd.offset(n, c, hh, w);
                        dst[d] = alpha * src[s] + beta * dst[d];
                    }
                }
            }
        }
        mem.write(h_dst, dst_off, &dst)
    }

    fn conv_out_dims(
        bottom: &TensorDesc,
        filter: &FilterDesc,
        conv: &ConvDesc,
    ) -> Result<(usize, usize)> {
        if bottom.c != filter.c {
            return Err(DeviceError::ShapeMismatch(format!(
                "conv: bottom channels {} != filter channels {}",
                bottom.c, filter.c
            )));
        }
        let oh = (bottom.h + 2 * conv.pad_h).saturating_sub(filter.h) / conv.stride_h + 1;
        let ow = (bottom.w + 2 * conv.pad_w).saturating_sub(filter.w) / conv.stride_w + 1;
        Ok((oh, ow))
    }

    /// Algorithm and workspace query; returns
    /// (fwd algo, fwd ws, bwd-filter algo, bwd-filter ws, bwd-data algo,
    /// bwd-data ws) with workspace sizes in bytes.
    #[allow(clippy::too_many_arguments)]
    pub fn conv_info<T: Element>(
        &self,
        h_ctx: Handle,
        h_bottom_desc: Handle,
        h_filter_desc: Handle,
        h_conv_desc: Handle,
        h_top_desc: Handle,
        ws_limit: usize,
    ) -> Result<[i64; 6]> {
        self.context(h_ctx)?;
        let bottom = self.tensor(h_bottom_desc)?;
        let filter = *self.filters.get(h_filter_desc)?;
        let conv = *self.convs.get(h_conv_desc)?;
        let top = self.tensor(h_top_desc)?;
        let (oh, ow) = Self::conv_out_dims(&bottom, &filter, &conv)?;
        if top.h != oh || top.w != ow || top.c != filter.k {
            return Err(DeviceError::ShapeMismatch(format!(
                "conv: top descriptor ({}, {}, {}) does not match computed ({}, {}, {})",
                top.c, top.h, top.w, filter.k, oh, ow
            )));
        }
        let col_bytes =
            (filter.c * filter.h * filter.w * oh * ow * std::mem::size_of::<T>()) as i64;
        let (algo, ws) = if ws_limit > 0 && col_bytes > ws_limit as i64 {
            (0_i64, 0_i64)
        } else {
            (1_i64, col_bytes)
        };
        Ok([algo, ws, algo, ws, algo, ws])
    }

    /// Convolution forward.
    #[allow(clippy::too_many_arguments)]
    pub fn conv_forward<T: Element>(
        &self,
        mem: &mut MemoryBank<T>,
        h_ctx: Handle,
        alpha: T,
        h_bottom_desc: Handle,
        h_bottom: Handle,
        bottom_off: usize,
        h_filter_desc: Handle,
        h_weight: Handle,
        weight_off: usize,
        h_conv_desc: Handle,
        _algo: i64,
        h_workspace: Handle,
        _ws_off: usize,
        _ws_size: usize,
        beta: T,
        h_top_desc: Handle,
        h_top: Handle,
        top_off: usize,
    ) -> Result<()> {
        self.context(h_ctx)?;
        if h_workspace != 0 {
            mem.len_of(h_workspace)?;
        }
        let bd = self.tensor(h_bottom_desc)?;
        let filter = *self.filters.get(h_filter_desc)?;
        let conv = *self.convs.get(h_conv_desc)?;
        let td = self.tensor(h_top_desc)?;
        let (oh, ow) = Self::conv_out_dims(&bd, &filter, &conv)?;
        if td.c != filter.k || td.h != oh || td.w != ow || td.n != bd.n {
            return Err(DeviceError::ShapeMismatch(format!(
                "conv forward: top ({}, {}, {}, {}) != ({}, {}, {}, {})",
                td.n, td.c, td.h, td.w, bd.n, filter.k, oh, ow
            )));
        }
        let x = mem.read(h_bottom, bottom_off, bd.count())?;
        let w = mem.read(h_weight, weight_off, filter.k * filter.c * filter.h * filter.w)?;
        let mut y = mem.read(h_top, top_off, td.count())?;
        for n in 0..bd.n {
            for k in 0..filter.k {
                for yh in 0..oh {
                    for yw in 0..ow {
                        let mut acc = T::zero();
                        for c in 0..filter.c {
                            for fh in 0..filter.h {
                                for fw in 0..filter.w {
                                    let ih = (yh * conv.stride_h + fh) as isize
                                        - conv.pad_h as isize;
                                    let iw = (yw * conv.stride_w + fw) as isize
                                        - conv.pad_w as isize;
                                    if ih >= 0
                                        && iw >= 0
                                        && (ih as usize) < bd.h
                                        && (iw as usize) < bd.w
                                    {
                                        let xi =
                                            bd.offset(n, c, ih as usize, iw as usize);
                                        let wi = ((k * filter.c + c) * filter.h + fh)
                                            * filter.w
                                            + fw;
                                        acc = acc + x[xi] * w[wi];
                                    }
                                }
                            }
                        }
                        let yi = td.offset(n, k, yh, yw);
                        y[yi] = alpha * acc + beta * y[yi];
                    }
                }
            }
        }
        mem.write(h_top, top_off, &y)
    }

    /// Convolution backward, bias gradient.
    #[allow(clippy::too_many_arguments)]
    pub fn conv_backward_bias<T: Element>(
        &self,
        mem: &mut MemoryBank<T>,
        h_ctx: Handle,
        alpha: T,
        h_top_desc: Handle,
        h_top_diff: Handle,
        top_off: usize,
        beta: T,
        h_bias_desc: Handle,
        h_bias_diff: Handle,
        bias_off: usize,
    ) -> Result<()> {
        self.context(h_ctx)?;
        let td = self.tensor(h_top_desc)?;
        let bias = self.tensor(h_bias_desc)?;
        if bias.count() != td.c {
            return Err(DeviceError::ShapeMismatch(format!(
                "bias descriptor holds {} elements for {} channels",
                bias.count(),
                td.c
            )));
        }
        let diff = mem.read(h_top_diff, top_off, td.count())?;
        let mut b = mem.read(h_bias_diff, bias_off, td.c)?;
        for (c, slot) in b.iter_mut().enumerate() {
            let mut acc = T::zero();
            for n in 0..td.n {
                for hh in 0..td.h {
                    for w in 0..td.w {
                        acc = acc + diff[td.offset(n, c, hh, w)];
                    }
                }
            }
            *slot = alpha * acc + beta * *slot;
        }
        mem.write(h_bias_diff, bias_off, &b)
    }

    /// Convolution backward, filter gradient.
    #[allow(clippy::too_many_arguments)]
    pub fn conv_backward_filter<T: Element>(
        &self,
        mem: &mut MemoryBank<T>,
        h_ctx: Handle,
        alpha: T,
        h_bottom_desc: Handle,
        h_bottom: Handle,
        bottom_off: usize,
        h_top_desc: Handle,
        h_top_diff: Handle,
        top_off: usize,
        h_conv_desc: Handle,
        _algo: i64,
        h_workspace: Handle,
        _ws_off: usize,
        _ws_size: usize,
        beta: T,
        h_filter_desc: Handle,
        h_weight_diff: Handle,
        weight_off: usize,
    ) -> Result<()> {
        self.context(h_ctx)?;
        if h_workspace != 0 {
            mem.len_of(h_workspace)?;
        }
        let bd = self.tensor(h_bottom_desc)?;
        let td = self.tensor(h_top_desc)?;
        let filter = *self.filters.get(h_filter_desc)?;
        let conv = *self.convs.get(h_conv_desc)?;
        let x = mem.read(h_bottom, bottom_off, bd.count())?;
        let diff = mem.read(h_top_diff, top_off, td.count())?;
        let mut wd =
            mem.read(h_weight_diff, weight_off, filter.k * filter.c * filter.h * filter.w)?;
        for k in 0..filter.k {
            for c in 0..filter.c {
                for fh in 0..filter.h {
                    for fw in 0..filter.w {
                        let mut acc = T::zero();
                        for n in 0..bd.n {
                            for yh in 0..td.h {
                                for yw in 0..td.w {
                                    let ih = (yh * conv.stride_h + fh) as isize
                                        - conv.pad_h as isize;
                                    let iw = (yw * conv.stride_w + fw) as isize
                                        - conv.pad_w as isize;
                                    if ih >= 0
                                        && iw >= 0
                                        && (ih as usize) < bd.h
                                        && (iw as usize) < bd.w
                                    {
                                        acc = acc
                                            + x[bd.offset(n, c, ih as usize, iw as usize)]
                                                * diff[td.offset(n, k, yh, yw)];
                                    }
                                }
                            }
                        }
                        let wi = ((k * filter.c + c) * filter.h + fh) * filter.w + fw;
                        wd[wi] = alpha * acc + beta * wd[wi];
                    }
                }
            }
        }
        mem.write(h_weight_diff, weight_off, &wd)
    }

    /// Convolution backward, data gradient.
    #[allow(clippy::too_many_arguments)]
    pub fn conv_backward_data<T: Element>(
        &self,
        mem: &mut MemoryBank<T>,
        h_ctx: Handle,
        alpha: T,
        h_filter_desc: Handle,
        h_weight: Handle,
        weight_off: usize,
        h_top_desc: Handle,
        h_top_diff: Handle,
        top_off: usize,
        h_conv_desc: Handle,
        _algo: i64,
        h_workspace: Handle,
        _ws_off: usize,
        _ws_size: usize,
        beta: T,
        h_bottom_desc: Handle,
        h_bottom_diff: Handle,
        bottom_off: usize,
    ) -> Result<()> {
        self.context(h_ctx)?;
        if h_workspace != 0 {
            mem.len_of(h_workspace)?;
        }
        let filter = *self.filters.get(h_filter_desc)?;
        let td = self.tensor(h_top_desc)?;
        let conv = *self.convs.get(h_conv_desc)?;
        let bd = self.tensor(h_bottom_desc)?;
        let w = mem.read(h_weight, weight_off, filter.k * filter.c * filter.h * filter.w)?;
        let diff = mem.read(h_top_diff, top_off, td.count())?;
        let mut x = mem.read(h_bottom_diff, bottom_off, bd.count())?;
        for v in &mut x {
            *v = beta * *v;
        }
        for n in 0..bd.n {
            for k in 0..filter.k {
                for yh in 0..td.h {
                    for yw in 0..td.w {
                        let g = alpha * diff[td.offset(n, k, yh, yw)];
                        for c in 0..filter.c {
                            for fh in 0..filter.h {
                                for fw in 0..filter.w {
                                    let ih = (yh * conv.stride_h + fh) as isize
                                        - conv.pad_h as isize;
                                    let iw = (yw * conv.stride_w + fw) as isize
                                        - conv.pad_w as isize;
                                    if ih >= 0
                                        && iw >= 0
                                        && (ih as usize) < bd.h
                                        && (iw as usize) < bd.w
                                    {
                                        let xi =
                                            bd.offset(n, c, ih as usize, iw as usize);
                                        let wi = ((k * filter.c + c) * filter.h + fh)
                                            * filter.w
                                            + fw;
                                        x[xi] = x[xi] + g * w[wi];
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        mem.write(h_bottom_diff, bottom_off, &x)
    }

    /// Pooling forward over descriptors.
    #[allow(clippy::too_many_arguments)]
    pub fn pooling_forward<T: Element>(
        &self,
        mem: &mut MemoryBank<T>,
        h_ctx: Handle,
        h_pool_desc: Handle,
        alpha: T,
        h_bottom_desc: Handle,
        h_bottom: Handle,
        beta: T,
        h_top_desc: Handle,
        h_top: Handle,
    ) -> Result<()> {
        self.context(h_ctx)?;
        let pool = *self.pools.get(h_pool_desc)?;
        let bd = self.tensor(h_bottom_desc)?;
        let td = self.tensor(h_top_desc)?;
        let x = mem.read(h_bottom, 0, bd.count())?;
        let mut y = mem.read(h_top, 0, td.count())?;
        for n in 0..td.n {
            for c in 0..td.c {
                for ph in 0..td.h {
                    for pw in 0..td.w {
                        let v = pool_window(&pool, &bd, &x, n, c, ph, pw).0;
                        let yi = td.offset(n, c, ph, pw);
                        y[yi] = alpha * v + beta * y[yi];
                    }
                }
            }
        }
        mem.write(h_top, 0, &y)
    }

    /// Pooling backward over descriptors; the max path recomputes winners
    /// from the forward data.
    #[allow(clippy::too_many_arguments)]
    pub fn pooling_backward<T: Element>(
        &self,
        mem: &mut MemoryBank<T>,
        h_ctx: Handle,
        h_pool_desc: Handle,
        alpha: T,
        h_top_desc: Handle,
        h_top: Handle,
        h_top_diff_desc: Handle,
        h_top_diff: Handle,
        h_bottom_desc: Handle,
        h_bottom: Handle,
        beta: T,
        h_bottom_diff_desc: Handle,
        h_bottom_diff: Handle,
    ) -> Result<()> {
        self.context(h_ctx)?;
        let pool = *self.pools.get(h_pool_desc)?;
        let td = self.tensor(h_top_desc)?;
        let tdd = self.tensor(h_top_diff_desc)?;
        let bd = self.tensor(h_bottom_desc)?;
        let bdd = self.tensor(h_bottom_diff_desc)?;
        let _ = mem.read(h_top, 0, td.count())?;
        let x = mem.read(h_bottom, 0, bd.count())?;
        let diff = mem.read(h_top_diff, 0, tdd.count())?;
        let mut out = mem.read(h_bottom_diff, 0, bdd.count())?;
        for v in &mut out {
            *v = beta * *v;
        }
        for n in 0..td.n {
            for c in 0..td.c {
                for ph in 0..td.h {
                    for pw in 0..td.w {
                        let g = alpha * diff[tdd.offset(n, c, ph, pw)];
                        let (_, targets) = pool_window(&pool, &bd, &x, n, c, ph, pw);
                        let share = T::from_usize(targets.len().max(1));
                        if pool.method == 0 {
                            if let Some(&t) = targets.first() {
                                out[t] = out[t] + g;
                            }
                        } else {
                            for &t in &targets {
                                out[t] = out[t] + g / share;
                            }
                        }
                    }
                }
            }
        }
        mem.write(h_bottom_diff, 0, &out)
    }

    /// Dropout forward; the keep mask is written to the reserve buffer.
    #[allow(clippy::too_many_arguments)]
    pub fn dropout_forward<T: Element>(
        &self,
        mem: &mut MemoryBank<T>,
        h_ctx: Handle,
        h_dropout_desc: Handle,
        h_bottom_desc: Handle,
        h_bottom: Handle,
        h_top_desc: Handle,
        h_top: Handle,
        h_reserved: Handle,
    ) -> Result<()> {
        self.context(h_ctx)?;
        let desc = *self.dropouts.get(h_dropout_desc)?;
        let bd = self.tensor(h_bottom_desc)?;
        let td = self.tensor(h_top_desc)?;
        if bd.count() != td.count() {
            return Err(DeviceError::ShapeMismatch(format!(
                "dropout: bottom {} != top {}",
                bd.count(),
                td.count()
            )));
        }
        if h_reserved == 0 {
            return Err(DeviceError::ParamNull);
        }
        let n = bd.count();
        let x = mem.read(h_bottom, 0, n)?;
        let mut rng = StdRng::seed_from_u64(desc.seed);
        let scale = T::from_f64(1.0 / (1.0 - desc.ratio));
        let mut mask = vec![T::zero(); n];
        let mut y = vec![T::zero(); n];
        for i in 0..n {
            if rng.gen::<f64>() >= desc.ratio {
                mask[i] = T::one();
                y[i] = x[i] * scale;
            }
        }
        mem.write(h_reserved, 0, &mask)?;
        mem.write(h_top, 0, &y)
    }

    /// Dropout backward through the reserve-buffer mask.
    #[allow(clippy::too_many_arguments)]
    pub fn dropout_backward<T: Element>(
        &self,
        mem: &mut MemoryBank<T>,
        h_ctx: Handle,
        h_dropout_desc: Handle,
        h_top_desc: Handle,
        h_top_diff: Handle,
        h_bottom_desc: Handle,
        h_bottom_diff: Handle,
        h_reserved: Handle,
    ) -> Result<()> {
        self.context(h_ctx)?;
        let desc = *self.dropouts.get(h_dropout_desc)?;
        let td = self.tensor(h_top_desc)?;
        let bd = self.tensor(h_bottom_desc)?;
        if bd.count() != td.count() {
            return Err(DeviceError::ShapeMismatch(format!(
                "dropout: bottom {} != top {}",
                bd.count(),
                td.count()
            )));
        }
        if h_reserved == 0 {
            return Err(DeviceError::ParamNull);
        }
        let n = td.count();
        let diff = mem.read(h_top_diff, 0, n)?;
        let mask = mem.read(h_reserved, 0, n)?;
        let scale = T::from_f64(1.0 / (1.0 - desc.ratio));
        let bd_vals: Vec<T> = (0..n)
            .map(|i| {
                if mask[i] == T::one() {
                    diff[i] * scale
                } else {
                    T::zero()
                }
            })
            .collect();
        mem.write(h_bottom_diff, 0, &bd_vals)
    }

    /// Activation selector used by the shared forward/backward paths.
    fn activation_fn<T: Element>(kind: Activation) -> (fn(T) -> T, fn(T, T, T) -> T) {
        match kind {
            Activation::Tanh => (
                |x| x.tanh(),
                |_x, y, dy| dy * (T::one() - y * y),
            ),
            Activation::Sigmoid => (
                |x| T::one() / (T::one() + (-x).exp()),
                |_x, y, dy| dy * y * (T::one() - y),
            ),
            Activation::Relu => (
                |x| if x > T::zero() { x } else { T::zero() },
                |x, _y, dy| if x > T::zero() { dy } else { T::zero() },
            ),
        }
    }

    /// Activation forward: y = alpha * f(x) + beta * y.
    #[allow(clippy::too_many_arguments)]
    pub fn activation_forward<T: Element>(
        &self,
        mem: &mut MemoryBank<T>,
        kind: Activation,
        h_ctx: Handle,
        alpha: T,
        h_bottom_desc: Handle,
        h_bottom: Handle,
        beta: T,
        h_top_desc: Handle,
        h_top: Handle,
    ) -> Result<()> {
        self.context(h_ctx)?;
        let bd = self.tensor(h_bottom_desc)?;
        let td = self.tensor(h_top_desc)?;
        if bd.count() != td.count() {
            return Err(DeviceError::ShapeMismatch(format!(
                "activation: bottom {} != top {}",
                bd.count(),
                td.count()
            )));
        }
        let (f, _) = Self::activation_fn::<T>(kind);
        let x = mem.read(h_bottom, 0, bd.count())?;
        let mut y = mem.read(h_top, 0, td.count())?;
        for i in 0..y.len() {
            y[i] = alpha * f(x[i]) + beta * y[i];
        }
        mem.write(h_top, 0, &y)
    }

    /// Activation backward:
    /// bottom_diff = alpha * f'(x, y) * top_diff + beta * bottom_diff.
    #[allow(clippy::too_many_arguments)]
    pub fn activation_backward<T: Element>(
        &self,
        mem: &mut MemoryBank<T>,
        kind: Activation,
        h_ctx: Handle,
        alpha: T,
        h_top_desc: Handle,
        h_top: Handle,
        h_top_diff_desc: Handle,
        h_top_diff: Handle,
        h_bottom_desc: Handle,
        h_bottom: Handle,
        beta: T,
        h_bottom_diff_desc: Handle,
        h_bottom_diff: Handle,
    ) -> Result<()> {
        self.context(h_ctx)?;
        let td = self.tensor(h_top_desc)?;
        let _ = self.tensor(h_top_diff_desc)?;
        let bd = self.tensor(h_bottom_desc)?;
        let _ = self.tensor(h_bottom_diff_desc)?;
        if bd.count() != td.count() {
            return Err(DeviceError::ShapeMismatch(format!(
                "activation: bottom {} != top {}",
                bd.count(),
                td.count()
            )));
        }
        let (_, df) = Self::activation_fn::<T>(kind);
        let y = mem.read(h_top, 0, td.count())?;
        let dy = mem.read(h_top_diff, 0, td.count())?;
        let x = mem.read(h_bottom, 0, bd.count())?;
        let mut out = mem.read(h_bottom_diff, 0, bd.count())?;
        for i in 0..out.len() {
            out[i] = alpha * df(x[i], y[i], dy[i]) + beta * out[i];
        }
        mem.write(h_bottom_diff, 0, &out)
    }

    /// Channel softmax forward: y = alpha * softmax_c(x) + beta * y.
    #[allow(clippy::too_many_arguments)]
    pub fn softmax_forward<T: Element>(
        &self,
        mem: &mut MemoryBank<T>,
        h_ctx: Handle,
        alpha: T,
        h_bottom_desc: Handle,
        h_bottom: Handle,
        beta: T,
        h_top_desc: Handle,
        h_top: Handle,
    ) -> Result<()> {
        self.context(h_ctx)?;
        let bd = self.tensor(h_bottom_desc)?;
        let td = self.tensor(h_top_desc)?;
        if bd.count() != td.count() {
            return Err(DeviceError::ShapeMismatch(format!(
                "softmax: bottom {} != top {}",
                bd.count(),
                td.count()
            )));
        }
        let x = mem.read(h_bottom, 0, bd.count())?;
        let mut y = mem.read(h_top, 0, td.count())?;
        for n in 0..bd.n {
            for hh in 0..bd.h {
                for w in 0..bd.w {
                    let mut mx = T::neg_infinity();
                    for c in 0..bd.c {
                        mx = mx.max(x[bd.offset(n, c, hh, w)]);
                    }
                    let mut sum = T::zero();
                    for c in 0..bd.c {
                        sum = sum + (x[bd.offset(n, c, hh, w)] - mx).exp();
                    }
                    for c in 0..bd.c {
                        let sm = (x[bd.offset(n, c, hh, w)] - mx).exp() / sum;
                        let yi = td.offset(n, c, hh, w);
                        y[yi] = alpha * sm + beta * y[yi];
                    }
                }
            }
        }
        mem.write(h_top, 0, &y)
    }

    /// Channel softmax backward:
    /// bottom_diff = alpha * y * (dy - sum_c(dy * y)) + beta * bottom_diff.
    #[allow(clippy::too_many_arguments)]
    pub fn softmax_backward<T: Element>(
        &self,
        mem: &mut MemoryBank<T>,
        h_ctx: Handle,
        alpha: T,
        h_top_desc: Handle,
        h_top: Handle,
        h_top_diff_desc: Handle,
        h_top_diff: Handle,
        beta: T,
        h_bottom_diff_desc: Handle,
        h_bottom_diff: Handle,
    ) -> Result<()> {
        self.context(h_ctx)?;
        let td = self.tensor(h_top_desc)?;
        let _ = self.tensor(h_top_diff_desc)?;
        let bdd = self.tensor(h_bottom_diff_desc)?;
        let y = mem.read(h_top, 0, td.count())?;
        let dy = mem.read(h_top_diff, 0, td.count())?;
        let mut out = mem.read(h_bottom_diff, 0, bdd.count())?;
        for n in 0..td.n {
            for hh in 0..td.h {
                for w in 0..td.w {
                    let mut dotp = T::zero();
                    for c in 0..td.c {
                        let i = td.offset(n, c, hh, w);
                        dotp = dotp + y[i] * dy[i];
                    }
                    for c in 0..td.c {
                        let i = td.offset(n, c, hh, w);
                        let o = bdd.offset(n, c, hh, w);
                        out[o] = alpha * y[i] * (dy[i] - dotp) + beta * out[o];
                    }
                }
            }
        }
        mem.write(h_bottom_diff, 0, &out)
    }

    fn lrn_scale<T: Element>(desc: &LrnDesc, td: &TensorDesc, x: &[T]) -> Vec<T> {
        let mut scale = vec![T::zero(); td.count()];
        let pre = (desc.size - 1) / 2;
        let alpha_over = T::from_f64(desc.alpha / desc.size as f64);
        let k = T::from_f64(desc.k);
        for n in 0..td.n {
            for c in 0..td.c {
                let lo = c.saturating_sub(pre);
                let hi = (c + desc.size - pre).min(td.c);
                for hh in 0..td.h {
                    for w in 0..td.w {
                        let mut acc = T::zero();
                        for cc in lo..hi {
                            let v = x[td.offset(n, cc, hh, w)];
                            acc = acc + v * v;
                        }
                        scale[td.offset(n, c, hh, w)] = k + alpha_over * acc;
                    }
                }
            }
        }
        scale
    }

    /// Cross-channel LRN forward.
    #[allow(clippy::too_many_arguments)]
    pub fn lrn_forward<T: Element>(
        &self,
        mem: &mut MemoryBank<T>,
        h_ctx: Handle,
        h_norm_desc: Handle,
        alpha: T,
        h_bottom_desc: Handle,
        h_bottom: Handle,
        beta: T,
        h_top_desc: Handle,
        h_top: Handle,
    ) -> Result<()> {
        self.context(h_ctx)?;
        let desc = *self.lrns.get(h_norm_desc)?;
        let bd = self.tensor(h_bottom_desc)?;
        let td = self.tensor(h_top_desc)?;
        let x = mem.read(h_bottom, 0, bd.count())?;
        let scale = Self::lrn_scale(&desc, &bd, &x);
        let nb = T::from_f64(-desc.beta);
        let mut y = mem.read(h_top, 0, td.count())?;
        for i in 0..y.len() {
            y[i] = alpha * x[i] * scale[i].powf(nb) + beta * y[i];
        }
        mem.write(h_top, 0, &y)
    }

    /// Cross-channel LRN backward.
    #[allow(clippy::too_many_arguments)]
    pub fn lrn_backward<T: Element>(
        &self,
        mem: &mut MemoryBank<T>,
        h_ctx: Handle,
        h_norm_desc: Handle,
        alpha: T,
        h_top_desc: Handle,
        h_top: Handle,
        h_top_diff_desc: Handle,
        h_top_diff: Handle,
        h_bottom_desc: Handle,
        h_bottom: Handle,
        beta: T,
        h_bottom_diff_desc: Handle,
        h_bottom_diff: Handle,
    ) -> Result<()> {
        self.context(h_ctx)?;
        let desc = *self.lrns.get(h_norm_desc)?;
        let _ = self.tensor(h_top_desc)?;
        let _ = self.tensor(h_top_diff_desc)?;
        let bd = self.tensor(h_bottom_desc)?;
        let _ = self.tensor(h_bottom_diff_desc)?;
        let x = mem.read(h_bottom, 0, bd.count())?;
        let y = mem.read(h_top, 0, bd.count())?;
        let dy = mem.read(h_top_diff, 0, bd.count())?;
        let scale = Self::lrn_scale(&desc, &bd, &x);
        let nb = T::from_f64(-desc.beta);
        let cache_ratio = T::from_f64(2.0 * desc.alpha * desc.beta / desc.size as f64);
        let pre = (desc.size - 1) / 2;
        let mut out = mem.read(h_bottom_diff, 0, bd.count())?;
        for n in 0..bd.n {
            for c in 0..bd.c {
                let lo = c.saturating_sub(pre);
                let hi = (c + desc.size - pre).min(bd.c);
                for hh in 0..bd.h {
                    for w in 0..bd.w {
                        let i = bd.offset(n, c, hh, w);
                        let mut accum = T::zero();
                        for cc in lo..hi {
                            let j = bd.offset(n, cc, hh, w);
                            accum = accum + dy[j] * y[j] / scale[j];
                        }
                        let g = dy[i] * scale[i].powf(nb) - cache_ratio * x[i] * accum;
                        out[i] = alpha * g + beta * out[i];
                    }
                }
            }
        }
        mem.write(h_bottom_diff, 0, &out)
    }

    fn lcn_stats<T: Element>(
        desc: &LrnDesc,
        td: &TensorDesc,
        x: &[T],
    ) -> (Vec<T>, Vec<T>) {
        let pre = (desc.size - 1) / 2;
        let mut centered = vec![T::zero(); td.count()];
        let mut var = vec![T::zero(); td.count()];
        for n in 0..td.n {
            for c in 0..td.c {
                let lo = c.saturating_sub(pre);
                let hi = (c + desc.size - pre).min(td.c);
                let window = T::from_usize(hi - lo);
                for hh in 0..td.h {
                    for w in 0..td.w {
                        let i = td.offset(n, c, hh, w);
                        let mut mean = T::zero();
                        for cc in lo..hi {
                            mean = mean + x[td.offset(n, cc, hh, w)];
                        }
                        mean = mean / window;
                        centered[i] = x[i] - mean;
                    }
                }
            }
        }
        for n in 0..td.n {
            for c in 0..td.c {
                let lo = c.saturating_sub(pre);
                let hi = (c + desc.size - pre).min(td.c);
                let window = T::from_usize(hi - lo);
                for hh in 0..td.h {
                    for w in 0..td.w {
                        let i = td.offset(n, c, hh, w);
                        let mut acc = T::zero();
                        for cc in lo..hi {
                            let v = centered[td.offset(n, cc, hh, w)];
                            acc = acc + v * v;
                        }
                        var[i] = acc / window;
                    }
                }
            }
        }
        (centered, var)
    }

    /// Cross-channel local contrast (divisive) normalization forward; the
    /// two temp buffers receive the centered data and the window variance.
    #[allow(clippy::too_many_arguments)]
    pub fn lcn_forward<T: Element>(
        &self,
        mem: &mut MemoryBank<T>,
        h_ctx: Handle,
        h_norm_desc: Handle,
        alpha: T,
        h_bottom_desc: Handle,
        h_bottom: Handle,
        h_temp1: Handle,
        h_temp2: Handle,
        beta: T,
        h_top_desc: Handle,
        h_top: Handle,
    ) -> Result<()> {
        self.context(h_ctx)?;
        let desc = *self.lrns.get(h_norm_desc)?;
        let bd = self.tensor(h_bottom_desc)?;
        let td = self.tensor(h_top_desc)?;
        let x = mem.read(h_bottom, 0, bd.count())?;
        let (centered, var) = Self::lcn_stats(&desc, &bd, &x);
        let k = T::from_f64(desc.k);
        let a = T::from_f64(desc.alpha);
        let b = T::from_f64(desc.beta);
        let mut y = mem.read(h_top, 0, td.count())?;
        for i in 0..y.len() {
            let denom = (k + a * var[i]).powf(b);
            y[i] = alpha * centered[i] / denom + beta * y[i];
        }
        mem.write(h_temp1, 0, &centered)?;
        mem.write(h_temp2, 0, &var)?;
        mem.write(h_top, 0, &y)
    }

    /// Divisive normalization backward; denominators are treated as locally
    /// constant, with the mean-subtraction path propagated exactly.
    #[allow(clippy::too_many_arguments)]
    pub fn lcn_backward<T: Element>(
        &self,
        mem: &mut MemoryBank<T>,
        h_ctx: Handle,
        h_norm_desc: Handle,
        alpha: T,
        h_bottom_desc: Handle,
        h_bottom: Handle,
        h_top_diff: Handle,
        h_temp1: Handle,
        h_temp2: Handle,
        beta: T,
        h_bottom_diff_desc: Handle,
        h_bottom_diff: Handle,
    ) -> Result<()> {
        self.context(h_ctx)?;
        let desc = *self.lrns.get(h_norm_desc)?;
        let bd = self.tensor(h_bottom_desc)?;
        let bdd = self.tensor(h_bottom_diff_desc)?;
        let _ = mem.read(h_bottom, 0, bd.count())?;
        let dy = mem.read(h_top_diff, 0, bd.count())?;
        let _ = mem.read(h_temp1, 0, bd.count())?;
        let var = mem.read(h_temp2, 0, bd.count())?;
        let k = T::from_f64(desc.k);
        let a = T::from_f64(desc.alpha);
        let b = T::from_f64(desc.beta);
        let pre = (desc.size - 1) / 2;
        let mut term = vec![T::zero(); bd.count()];
        for i in 0..term.len() {
            term[i] = dy[i] / (k + a * var[i]).powf(b);
        }
        let mut out = mem.read(h_bottom_diff, 0, bdd.count())?;
        for n in 0..bd.n {
            for c in 0..bd.c {
                let lo = c.saturating_sub(pre);
                let hi = (c + desc.size - pre).min(bd.c);
                let window = T::from_usize(hi - lo);
                for hh in 0..bd.h {
                    for w in 0..bd.w {
                        let i = bd.offset(n, c, hh, w);
                        let mut mean = T::zero();
                        for cc in lo..hi {
                            mean = mean + term[bd.offset(n, cc, hh, w)];
                        }
                        mean = mean / window;
                        out[i] = alpha * (term[i] - mean) + beta * out[i];
                    }
                }
            }
        }
        mem.write(h_bottom_diff, 0, &out)
    }
}

/// Activation kinds exposed through descriptor-driven forward/backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    /// Hyperbolic tangent.
    Tanh,
    /// Logistic sigmoid.
    Sigmoid,
    /// Rectified linear.
    Relu,
}

/// Evaluate one pooling window; returns the pooled value and the bottom
/// indices it covers (winner first for max).
fn pool_window<T: Element>(
    pool: &PoolingDesc,
    bd: &TensorDesc,
    x: &[T],
    n: usize,
    c: usize,
    ph: usize,
    pw: usize,
) -> (T, Vec<usize>) {
    let hstart = (ph * pool.stride_h) as isize - pool.pad_h as isize;
    let wstart = (pw * pool.stride_w) as isize - pool.pad_w as isize;
    let h0 = hstart.max(0) as usize;
    let w0 = wstart.max(0) as usize;
    let h1 = ((hstart + pool.h as isize).min(bd.h as isize)).max(0) as usize;
    let w1 = ((wstart + pool.w as isize).min(bd.w as isize)).max(0) as usize;
    let mut indices = Vec::new();
    if pool.method == 0 {
        let mut best = T::neg_infinity();
        let mut best_i = None;
        for hh in h0..h1 {
            for ww in w0..w1 {
                let i = bd.offset(n, c, hh, ww);
                if x[i] > best {
                    best = x[i];
                    best_i = Some(i);
                }
            }
        }
        if let Some(i) = best_i {
            indices.push(i);
        }
        (best, indices)
    } else {
        let mut acc = T::zero();
        for hh in h0..h1 {
            for ww in w0..w1 {
                let i = bd.offset(n, c, hh, ww);
                acc = acc + x[i];
                indices.push(i);
            }
        }
        let hend = (hstart + pool.h as isize).min(bd.h as isize + pool.pad_h as isize);
        let wend = (wstart + pool.w as isize).min(bd.w as isize + pool.pad_w as isize);
        let size = ((hend - hstart) * (wend - wstart)).max(1) as usize;
        (acc / T::from_usize(size), indices)
    }
}
