//! Matrix utilities, im2col/col2im, and image/distance kernels.

use crate::element::Element;
use crate::error::{DeviceError, Result};
use crate::handle::Handle;
use crate::memory::MemoryBank;

/// Elementwise combiner for [`transpose_op`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransposeOp {
    /// a + b
    Add,
    /// a - b
    Sub,
    /// a * b
    Mul,
    /// a / b
    Div,
}

impl TransposeOp {
    /// Decode the wire discriminant.
    ///
    /// # Errors
    ///
    /// `ParamOutOfRange` outside 0..=3.
    pub fn from_wire(v: i32) -> Result<Self> {
        match v {
            0 => Ok(Self::Add),
            1 => Ok(Self::Sub),
            2 => Ok(Self::Mul),
            3 => Ok(Self::Div),
            other => Err(DeviceError::ParamOutOfRange(format!(
                "transpose op {other}"
            ))),
        }
    }
}

/// Row/column reducer for the aggregate kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    /// Sum of entries.
    Sum,
    /// Maximum entry.
    Max,
    /// Minimum entry.
    Min,
}

impl AggregateOp {
    /// Decode the wire discriminant.
    ///
    /// # Errors
    ///
    /// `ParamOutOfRange` outside 0..=2.
    pub fn from_wire(v: i32) -> Result<Self> {
        match v {
            0 => Ok(Self::Sum),
            1 => Ok(Self::Max),
            2 => Ok(Self::Min),
            other => Err(DeviceError::ParamOutOfRange(format!(
                "aggregate op {other}"
            ))),
        }
    }

    fn fold<T: Element>(self, acc: T, v: T) -> T {
        match self {
            Self::Sum => acc + v,
            Self::Max => acc.max(v),
            Self::Min => acc.min(v),
        }
    }

    fn seed<T: Element>(self) -> T {
        match self {
            Self::Sum => T::zero(),
            Self::Max => T::neg_infinity(),
            Self::Min => T::infinity(),
        }
    }
}

/// Convolution window geometry for the im2col family.
#[derive(Debug, Clone, Copy)]
pub struct ColGeometry {
    /// Input channels.
    pub channels: usize,
    /// Input height.
    pub height: usize,
    /// Input width.
    pub width: usize,
    /// Kernel height.
    pub kernel_h: usize,
    /// Kernel width.
    pub kernel_w: usize,
    /// Pad height.
    pub pad_h: usize,
    /// Pad width.
    pub pad_w: usize,
    /// Stride height.
    pub stride_h: usize,
    /// Stride width.
    pub stride_w: usize,
    /// Dilation height.
    pub dilation_h: usize,
    /// Dilation width.
    pub dilation_w: usize,
}

impl ColGeometry {
    /// Output spatial height.
    #[must_use]
    pub fn out_h(&self) -> usize {
        let eff = self.dilation_h * (self.kernel_h - 1) + 1;
        (self.height + 2 * self.pad_h).saturating_sub(eff) / self.stride_h + 1
    }

    /// Output spatial width.
    #[must_use]
    pub fn out_w(&self) -> usize {
        let eff = self.dilation_w * (self.kernel_w - 1) + 1;
        (self.width + 2 * self.pad_w).saturating_sub(eff) / self.stride_w + 1
    }

    /// Column buffer element count.
    #[must_use]
    pub fn col_len(&self) -> usize {
        self.channels * self.kernel_h * self.kernel_w * self.out_h() * self.out_w()
    }
}

/// Unroll an image into the column buffer.
pub fn im2col<T: Element>(
    mem: &mut MemoryBank<T>,
    h_image: Handle,
    im_off: usize,
    g: ColGeometry,
    h_col: Handle,
    col_off: usize,
) -> Result<()> {
    let im = mem.read(h_image, im_off, g.channels * g.height * g.width)?;
    let (out_h, out_w) = (g.out_h(), g.out_w());
    let mut col = vec![T::zero(); g.col_len()];
    let mut idx = 0;
    for c in 0..g.channels {
        for kh in 0..g.kernel_h {
            for kw in 0..g.kernel_w {
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        let ih = (oh * g.stride_h + kh * g.dilation_h) as isize
                            - g.pad_h as isize;
                        let iw = (ow * g.stride_w + kw * g.dilation_w) as isize
                            - g.pad_w as isize;
                        if ih >= 0
                            && iw >= 0
                            && (ih as usize) < g.height
                            && (iw as usize) < g.width
                        {
                            col[idx] =
                                im[(c * g.height + ih as usize) * g.width + iw as usize];
                        }
                        idx += 1;
                    }
                }
            }
        }
    }
    mem.write(h_col, col_off, &col)
}

/// Accumulate a column buffer back into an image.
pub fn col2im<T: Element>(
    mem: &mut MemoryBank<T>,
    h_col: Handle,
    col_off: usize,
    g: ColGeometry,
    h_image: Handle,
    im_off: usize,
) -> Result<()> {
    let col = mem.read(h_col, col_off, g.col_len())?;
    let (out_h, out_w) = (g.out_h(), g.out_w());
    let mut im = vec![T::zero(); g.channels * g.height * g.width];
    let mut idx = 0;
    for c in 0..g.channels {
        for kh in 0..g.kernel_h {
            for kw in 0..g.kernel_w {
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        let ih = (oh * g.stride_h + kh * g.dilation_h) as isize
                            - g.pad_h as isize;
                        let iw = (ow * g.stride_w + kw * g.dilation_w) as isize
                            - g.pad_w as isize;
                        if ih >= 0
                            && iw >= 0
                            && (ih as usize) < g.height
                            && (iw as usize) < g.width
                        {
                            let slot = (c * g.height + ih as usize) * g.width + iw as usize;
                            im[slot] = im[slot] + col[idx];
                        }
                        idx += 1;
                    }
                }
            }
        }
    }
    mem.write(h_image, im_off, &im)
}

fn read_dims<T: Element>(mem: &MemoryBank<T>, h: Handle, n: usize) -> Result<Vec<usize>> {
    Ok(mem
        .read(h, 0, n)?
        .into_iter()
        .map(|v| v.to_i64().max(0) as usize)
        .collect())
}

/// N-dimensional im2col over shape buffers.
#[allow(clippy::too_many_arguments)]
pub fn im2col_nd<T: Element>(
    mem: &mut MemoryBank<T>,
    h_image: Handle,
    im_off: usize,
    spatial_axes: usize,
    kernel_count: usize,
    h_im_shape: Handle,
    h_col_shape: Handle,
    h_kernel_shape: Handle,
    h_pad: Handle,
    h_stride: Handle,
    h_dilation: Handle,
    h_col: Handle,
    col_off: usize,
) -> Result<()> {
    nd_pass(
        mem,
        h_image,
        im_off,
        spatial_axes,
        kernel_count,
        h_im_shape,
        h_col_shape,
        h_kernel_shape,
        h_pad,
        h_stride,
        h_dilation,
        h_col,
        col_off,
        false,
    )
}

/// N-dimensional col2im over shape buffers.
#[allow(clippy::too_many_arguments)]
pub fn col2im_nd<T: Element>(
    mem: &mut MemoryBank<T>,
    h_col: Handle,
    col_off: usize,
    spatial_axes: usize,
    im_count: usize,
    h_im_shape: Handle,
    h_col_shape: Handle,
    h_kernel_shape: Handle,
    h_pad: Handle,
    h_stride: Handle,
    h_dilation: Handle,
    h_image: Handle,
    im_off: usize,
) -> Result<()> {
    nd_pass(
        mem,
        h_image,
        im_off,
        spatial_axes,
        im_count,
        h_im_shape,
        h_col_shape,
        h_kernel_shape,
        h_pad,
        h_stride,
        h_dilation,
        h_col,
        col_off,
        true,
    )
}

#[allow(clippy::too_many_arguments)]
fn nd_pass<T: Element>(
    mem: &mut MemoryBank<T>,
    h_image: Handle,
    im_off: usize,
    spatial_axes: usize,
    _count: usize,
    h_im_shape: Handle,
    h_col_shape: Handle,
    h_kernel_shape: Handle,
    h_pad: Handle,
    h_stride: Handle,
    h_dilation: Handle,
    h_col: Handle,
    col_off: usize,
    backward: bool,
) -> Result<()> {
    // shape buffers: im_shape leads with channels, col_shape with the
    // kernel-expanded channel dim
    let im_shape = read_dims(mem, h_im_shape, spatial_axes + 1)?;
    let col_shape = read_dims(mem, h_col_shape, spatial_axes + 1)?;
    let kernel = read_dims(mem, h_kernel_shape, spatial_axes)?;
    let pad = read_dims(mem, h_pad, spatial_axes)?;
    let stride = read_dims(mem, h_stride, spatial_axes)?;
    let dilation = read_dims(mem, h_dilation, spatial_axes)?;

    let channels = im_shape[0];
    let im_spatial: usize = im_shape[1..].iter().product();
    let out_spatial: usize = col_shape[1..].iter().product();
    let kernel_size: usize = kernel.iter().product();

    let im_len = channels * im_spatial;
    let col_len = channels * kernel_size * out_spatial;

    let mut im = if backward {
        vec![T::zero(); im_len]
    } else {
        mem.read(h_image, im_off, im_len)?
    };
    let mut col = if backward {
        mem.read(h_col, col_off, col_len)?
    } else {
        vec![T::zero(); col_len]
    };

    // iterate column-buffer positions, mapping each to an image position
    for c in 0..channels {
        for k in 0..kernel_size {
            // decompose kernel index
            let mut krem = k;
            let mut kcoord = vec![0_usize; spatial_axes];
            for a in (0..spatial_axes).rev() {
                kcoord[a] = krem % kernel[a];
                krem /= kernel[a];
            }
            for o in 0..out_spatial {
                let mut orem = o;
                let mut valid = true;
                let mut im_index = 0_usize;
                let mut stride_acc = 1_usize;
                // walk axes last-to-first building the image offset
                let mut coords = vec![0_isize; spatial_axes];
                for a in (0..spatial_axes).rev() {
                    let oc = orem % col_shape[a + 1];
                    orem /= col_shape[a + 1];
                    coords[a] =
                        (oc * stride[a] + kcoord[a] * dilation[a]) as isize - pad[a] as isize;
                }
                for a in (0..spatial_axes).rev() {
                    let dim = im_shape[a + 1];
                    if coords[a] < 0 || coords[a] as usize >= dim {
                        valid = false;
                        break;
                    }
                    im_index += coords[a] as usize * stride_acc;
                    stride_acc *= dim;
                }
                let col_index = (c * kernel_size + k) * out_spatial + o;
                if valid {
                    let slot = c * im_spatial + im_index;
                    if backward {
                        im[slot] = im[slot] + col[col_index];
                    } else {
                        col[col_index] = im[slot];
                    }
                }
            }
        }
    }

    if backward {
        mem.write(h_image, im_off, &im)
    } else {
        mem.write(h_col, col_off, &col)
    }
}

/// Blend original, updated, and server copies by percentage.
#[allow(clippy::too_many_arguments)]
pub fn combine_data<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    h_original: Handle,
    h_updated: Handle,
    updated_pct: T,
    h_server: Handle,
    server_pct: T,
    h_out: Handle,
) -> Result<()> {
    let orig = mem.read(h_original, 0, n)?;
    let upd = mem.read(h_updated, 0, n)?;
    let srv = mem.read(h_server, 0, n)?;
    let mut out = vec![T::zero(); n];
    for i in 0..n {
        let v = orig[i] * (T::one() - updated_pct) + upd[i] * updated_pct;
        out[i] = v * (T::one() - server_pct) + srv[i] * server_pct;
    }
    mem.write(h_out, 0, &out)
}

/// Set the main diagonal of a rows x (n / rows) matrix to `value`.
pub fn mtx_set_diagonal<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    rows: usize,
    value: T,
    h_data: Handle,
) -> Result<()> {
    let cols = n / rows.max(1);
    let mut data = mem.read(h_data, 0, n)?;
    for i in 0..rows.min(cols) {
        data[i * cols + i] = value;
    }
    mem.write(h_data, 0, &data)
}

/// data = scale_a * data, then add scale_b * diagonal along the main
/// diagonal.
#[allow(clippy::too_many_arguments)]
pub fn mtx_set_diagonal2<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    rows: usize,
    h_diagonal: Handle,
    scale_a: T,
    scale_b: T,
    h_data: Handle,
) -> Result<()> {
    let cols = n / rows.max(1);
    let diag = mem.read(h_diagonal, 0, rows.min(cols))?;
    let mut data = mem.read(h_data, 0, n)?;
    for v in &mut data {
        *v = *v * scale_a;
    }
    for i in 0..rows.min(cols) {
        data[i * cols + i] = data[i * cols + i] + scale_b * diag[i];
    }
    mem.write(h_data, 0, &data)
}

/// Add a scaled vector across rows (orientation 0) or columns (1).
#[allow(clippy::too_many_arguments)]
pub fn mtx_add_vector<T: Element>(
    mem: &mut MemoryBank<T>,
    orientation: i32,
    width: usize,
    height: usize,
    scale: T,
    ha: Handle,
    h_vec: Handle,
    hy: Handle,
) -> Result<()> {
    let a = mem.read(ha, 0, width * height)?;
    let vlen = if orientation == 0 { width } else { height };
    let v = mem.read(h_vec, 0, vlen)?;
    let mut y = vec![T::zero(); width * height];
    for r in 0..height {
        for c in 0..width {
            let add = if orientation == 0 { v[c] } else { v[r] };
            y[r * width + c] = a[r * width + c] + scale * add;
        }
    }
    mem.write(hy, 0, &y)
}

/// y = op(scale_a * A, scale_b * B^T); A is height x width, B is width x
/// height.
#[allow(clippy::too_many_arguments)]
pub fn mtx_transpose_op<T: Element>(
    mem: &mut MemoryBank<T>,
    op: TransposeOp,
    width: usize,
    height: usize,
    ha: Handle,
    hb: Handle,
    hy: Handle,
    scale_a: T,
    scale_b: T,
) -> Result<()> {
    let a = mem.read(ha, 0, width * height)?;
    let b = mem.read(hb, 0, width * height)?;
    let mut y = vec![T::zero(); width * height];
    for r in 0..height {
        for c in 0..width {
            let av = scale_a * a[r * width + c];
            let bv = scale_b * b[c * height + r];
            y[r * width + c] = match op {
                TransposeOp::Add => av + bv,
                TransposeOp::Sub => av - bv,
                TransposeOp::Mul => av * bv,
                TransposeOp::Div => av / bv,
            };
        }
    }
    mem.write(hy, 0, &y)
}

/// Reduce each column of a height x width matrix.
pub fn mtx_aggregate_cols<T: Element>(
    mem: &mut MemoryBank<T>,
    op: AggregateOp,
    width: usize,
    height: usize,
    ha: Handle,
    hy: Handle,
) -> Result<()> {
    let a = mem.read(ha, 0, width * height)?;
    let mut y = vec![op.seed::<T>(); width];
    for r in 0..height {
        for c in 0..width {
            y[c] = op.fold(y[c], a[r * width + c]);
        }
    }
    mem.write(hy, 0, &y)
}

/// Reduce each row; the ones vector mirrors the device GEMV contract and is
/// validated for length.
#[allow(clippy::too_many_arguments)]
pub fn mtx_aggregate_rows<T: Element>(
    mem: &mut MemoryBank<T>,
    op: AggregateOp,
    width: usize,
    height: usize,
    ha: Handle,
    h_ones: Handle,
    hy: Handle,
) -> Result<()> {
    if mem.len_of(h_ones)? < width {
        return Err(DeviceError::ShapeMismatch(format!(
            "ones vector shorter than {width}"
        )));
    }
    let a = mem.read(ha, 0, width * height)?;
    let mut y = vec![op.seed::<T>(); height];
    for r in 0..height {
        for c in 0..width {
            y[r] = op.fold(y[r], a[r * width + c]);
        }
    }
    mem.write(hy, 0, &y)
}

/// y = A^T for a height x width A.
pub fn mtx_transpose<T: Element>(
    mem: &mut MemoryBank<T>,
    width: usize,
    height: usize,
    ha: Handle,
    hy: Handle,
) -> Result<()> {
    let a = mem.read(ha, 0, width * height)?;
    let mut y = vec![T::zero(); width * height];
    for r in 0..height {
        for c in 0..width {
            y[c * height + r] = a[r * width + c];
        }
    }
    mem.write(hy, 0, &y)
}

/// Subtract each column's mean; optionally normalize by the column span.
pub fn mtx_meancenter_by_column<T: Element>(
    mem: &mut MemoryBank<T>,
    width: usize,
    height: usize,
    ha: Handle,
    hb: Handle,
    normalize: bool,
) -> Result<()> {
    let a = mem.read(ha, 0, width * height)?;
    let mut b = vec![T::zero(); width * height];
    for c in 0..width {
        let mut sum = T::zero();
        let mut lo = T::infinity();
        let mut hi = T::neg_infinity();
        for r in 0..height {
            let v = a[r * width + c];
            sum = sum + v;
            lo = lo.min(v);
            hi = hi.max(v);
        }
        let mean = sum / T::from_usize(height.max(1));
        let span = hi - lo;
        for r in 0..height {
            let mut v = a[r * width + c] - mean;
            if normalize && span > T::zero() {
                v = v / span;
            }
            b[r * width + c] = v;
        }
    }
    mem.write(hb, 0, &b)
}

/// Pairwise squared euclidean distances for rows `row_start..row_end` of X
/// against all rows of Y; both are n x d.
#[allow(clippy::too_many_arguments)]
pub fn mtx_euclidean_dist<T: Element>(
    mem: &mut MemoryBank<T>,
    hx: Handle,
    hy: Handle,
    h_out: Handle,
    n: usize,
    d: usize,
    row_start: usize,
    row_end: usize,
) -> Result<()> {
    if row_end < row_start || row_end > n {
        return Err(DeviceError::ParamOutOfRange(format!(
            "row range [{row_start}, {row_end}) outside [0, {n})"
        )));
    }
    let x = mem.read(hx, 0, n * d)?;
    let y = mem.read(hy, 0, n * d)?;
    let mut out = mem.read_all(h_out)?;
    if out.len() < n * (row_end - row_start) {
        return Err(DeviceError::ShapeMismatch(format!(
            "distance output shorter than {}",
            n * (row_end - row_start)
        )));
    }
    for i in row_start..row_end {
        for j in 0..n {
            let mut acc = T::zero();
            for k in 0..d {
                let diff = x[i * d + k] - y[j * d + k];
                acc = acc + diff * diff;
            }
            out[(i - row_start) * n + j] = acc;
        }
    }
    mem.write(h_out, 0, &out)
}

/// Plain row-major matrix product: C(m x n) = A(m x k) * B(k x n).
#[allow(clippy::too_many_arguments)]
pub fn mtx_dot<T: Element>(
    mem: &mut MemoryBank<T>,
    m: usize,
    n: usize,
    k: usize,
    ha: Handle,
    hb: Handle,
    hc: Handle,
) -> Result<()> {
    let a = mem.read(ha, 0, m * k)?;
    let b = mem.read(hb, 0, k * n)?;
    let mut c = vec![T::zero(); m * n];
    for i in 0..m {
        for j in 0..n {
            let mut acc = T::zero();
            for p in 0..k {
                acc = acc + a[i * k + p] * b[p * n + j];
            }
            c[i * n + j] = acc;
        }
    }
    mem.write(hc, 0, &c)
}

/// Per-channel gaussian blur with a radius derived from sigma.
#[allow(clippy::too_many_arguments)]
pub fn gaussian_blur<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    channels: usize,
    height: usize,
    width: usize,
    sigma: f64,
    hx: Handle,
    hy: Handle,
) -> Result<()> {
    if n != channels * height * width {
        return Err(DeviceError::ShapeMismatch(format!(
            "blur count {n} != {channels} * {height} * {width}"
        )));
    }
    if sigma <= 0.0 {
        let x = mem.read(hx, 0, n)?;
        return mem.write(hy, 0, &x);
    }
    let radius = (sigma * 3.0).ceil().max(1.0) as isize;
    let mut kernel = Vec::with_capacity((2 * radius + 1) as usize);
    let mut ksum = 0.0_f64;
    for i in -radius..=radius {
        let w = (-((i * i) as f64) / (2.0 * sigma * sigma)).exp();
        kernel.push(w);
        ksum += w;
    }
    for w in &mut kernel {
        *w /= ksum;
    }
    let x = mem.read(hx, 0, n)?;
    let plane = height * width;
    // separable horizontal-then-vertical pass
    let mut tmp = vec![0.0_f64; n];
    for c in 0..channels {
        for r in 0..height {
            for col in 0..width {
                let mut acc = 0.0;
                for (ki, w) in kernel.iter().enumerate() {
                    let cc = (col as isize + ki as isize - radius)
                        .clamp(0, width as isize - 1) as usize;
                    acc += w * x[c * plane + r * width + cc].to_f64();
                }
                tmp[c * plane + r * width + col] = acc;
            }
        }
    }
    let mut y = vec![T::zero(); n];
    for c in 0..channels {
        for r in 0..height {
            for col in 0..width {
                let mut acc = 0.0;
                for (ki, w) in kernel.iter().enumerate() {
                    let rr = (r as isize + ki as isize - radius)
                        .clamp(0, height as isize - 1) as usize;
                    acc += w * tmp[c * plane + rr * width + col];
                }
                y[c * plane + r * width + col] = T::from_f64(acc);
            }
        }
    }
    mem.write(hy, 0, &y)
}

/// y = 1 where the thresholded bits of a and b differ, else 0.
#[allow(clippy::too_many_arguments)]
pub fn hamming_diff<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    threshold: T,
    ha: Handle,
    hb: Handle,
    hy: Handle,
    a_off: usize,
    b_off: usize,
    y_off: usize,
) -> Result<()> {
    let a = mem.read(ha, a_off, n)?;
    let b = mem.read(hb, b_off, n)?;
    let mut y = vec![T::zero(); n];
    for i in 0..n {
        let ba = a[i] > threshold;
        let bb = b[i] > threshold;
        if ba != bb {
            y[i] = T::one();
        }
    }
    mem.write(hy, y_off, &y)
}

/// Distance metric for [`calc_batch_dist`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistMethod {
    /// Thresholded hamming distance.
    Hamming,
    /// Squared euclidean distance.
    Euclidean,
}

impl DistMethod {
    /// Decode the wire discriminant.
    ///
    /// # Errors
    ///
    /// `ParamOutOfRange` outside 0..=1.
    pub fn from_wire(v: i32) -> Result<Self> {
        match v {
            0 => Ok(Self::Hamming),
            1 => Ok(Self::Euclidean),
            other => Err(DeviceError::ParamOutOfRange(format!(
                "distance method {other}"
            ))),
        }
    }
}

/// Batched pairwise distances between indexed items of src and targets.
/// Results are written to the work buffer and returned.
#[allow(clippy::too_many_arguments)]
pub fn calc_batch_dist<T: Element>(
    mem: &mut MemoryBank<T>,
    method: DistMethod,
    threshold: T,
    item_dim: usize,
    h_src: Handle,
    h_targets: Handle,
    h_work: Handle,
    pairs: &[(usize, usize)],
) -> Result<Vec<T>> {
    let src = mem.read_all(h_src)?;
    let targets = mem.read_all(h_targets)?;
    if mem.len_of(h_work)? < pairs.len() {
        return Err(DeviceError::ShapeMismatch(format!(
            "work buffer shorter than {} distances",
            pairs.len()
        )));
    }
    let mut out = Vec::with_capacity(pairs.len());
    for &(i, j) in pairs {
        if (i + 1) * item_dim > src.len() || (j + 1) * item_dim > targets.len() {
            return Err(DeviceError::MemoryRange {
                offset: i.max(j) * item_dim,
                count: item_dim,
                len: src.len().min(targets.len()),
            });
        }
        let mut acc = T::zero();
        for k in 0..item_dim {
            let a = src[i * item_dim + k];
            let b = targets[j * item_dim + k];
            match method {
                DistMethod::Hamming => {
                    if (a > threshold) != (b > threshold) {
                        acc = acc + T::one();
                    }
                }
                DistMethod::Euclidean => {
                    let d = a - b;
                    acc = acc + d * d;
                }
            }
        }
        out.push(acc);
    }
    mem.write(h_work, 0, &out)?;
    Ok(out)
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
    fn im2col_identity_kernel() {
        let mut m = bank();
        let g = ColGeometry {
            channels: 1,
            height: 2,
            width: 2,
            kernel_h: 1,
            kernel_w: 1,
            pad_h: 0,
            pad_w: 0,
            stride_h: 1,
            stride_w: 1,
            dilation_h: 1,
            dilation_w: 1,
        };
        let him = buf(&mut m, &[1.0, 2.0, 3.0, 4.0]);
        let hcol = m.alloc(0, g.col_len()).unwrap();
        im2col(&mut m, him, 0, g, hcol, 0).unwrap();
        assert_eq!(m.read_all(hcol).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn im2col_col2im_adjoint_shapes() {
        let mut m = bank();
        let g = ColGeometry {
            channels: 1,
            height: 3,
            width: 3,
            kernel_h: 2,
            kernel_w: 2,
            pad_h: 0,
            pad_w: 0,
            stride_h: 1,
            stride_w: 1,
            dilation_h: 1,
            dilation_w: 1,
        };
        assert_eq!(g.out_h(), 2);
        assert_eq!(g.col_len(), 16);
        let him = buf(&mut m, &[1.0; 9]);
        let hcol = m.alloc(0, 16).unwrap();
        im2col(&mut m, him, 0, g, hcol, 0).unwrap();
        let him2 = m.alloc(0, 9).unwrap();
        col2im(&mut m, hcol, 0, g, him2, 0).unwrap();
        // center pixel participates in all four windows
        let im = m.read_all(him2).unwrap();
        assert_eq!(im[4], 4.0);
        assert_eq!(im[0], 1.0);
    }

    #[test]
    fn transpose_roundtrip() {
        let mut m = bank();
        let ha = buf(&mut m, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let hy = m.alloc(0, 6).unwrap();
        mtx_transpose(&mut m, 3, 2, ha, hy).unwrap();
        assert_eq!(
            m.read_all(hy).unwrap(),
            vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]
        );
    }

    #[test]
    fn aggregate_cols_and_rows() {
        let mut m = bank();
        let ha = buf(&mut m, &[1.0, 2.0, 3.0, 4.0]);
        let hy = m.alloc(0, 2).unwrap();
        mtx_aggregate_cols(&mut m, AggregateOp::Sum, 2, 2, ha, hy).unwrap();
        assert_eq!(m.read_all(hy).unwrap(), vec![4.0, 6.0]);
        let ones = buf(&mut m, &[1.0, 1.0]);
        let hr = m.alloc(0, 2).unwrap();
        mtx_aggregate_rows(&mut m, AggregateOp::Max, 2, 2, ha, ones, hr).unwrap();
        assert_eq!(m.read_all(hr).unwrap(), vec![2.0, 4.0]);
    }

    #[test]
    fn meancenter_by_column() {
        let mut m = bank();
        let ha = buf(&mut m, &[1.0, 10.0, 3.0, 20.0]);
        let hb = m.alloc(0, 4).unwrap();
        mtx_meancenter_by_column(&mut m, 2, 2, ha, hb, false).unwrap();
        assert_eq!(m.read_all(hb).unwrap(), vec![-1.0, -5.0, 1.0, 5.0]);
    }

    #[test]
    fn euclidean_dist_row_range() {
        let mut m = bank();
        let hx = buf(&mut m, &[0.0, 0.0, 3.0, 4.0]);
        let hout = m.alloc(0, 4).unwrap();
        mtx_euclidean_dist(&mut m, hx, hx, hout, 2, 2, 0, 2).unwrap();
        let out = m.read_all(hout).unwrap();
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], 25.0);
        assert_eq!(out[2], 25.0);
        assert_eq!(out[3], 0.0);
    }

    #[test]
    fn batch_dist_both_methods() {
        let mut m = bank();
        let hsrc = buf(&mut m, &[1.0, 0.0, 1.0, 1.0]);
        let htgt = buf(&mut m, &[1.0, 1.0, 0.0, 0.0]);
        let hwork = m.alloc(0, 2).unwrap();
        let d = calc_batch_dist(
            &mut m,
            DistMethod::Hamming,
            0.5,
            2,
            hsrc,
            htgt,
            hwork,
            &[(0, 0), (1, 1)],
        )
        .unwrap();
        assert_eq!(d, vec![1.0, 2.0]);
        let d2 = calc_batch_dist(
            &mut m,
            DistMethod::Euclidean,
            0.0,
            2,
            hsrc,
            htgt,
            hwork,
            &[(0, 1)],
        )
        .unwrap();
        assert_eq!(d2, vec![1.0 + 0.0]);
    }

    #[test]
    fn blur_preserves_constant_field() {
        let mut m = bank();
        let hx = buf(&mut m, &[2.0; 9]);
        let hy = m.alloc(0, 9).unwrap();
        gaussian_blur(&mut m, 9, 1, 3, 3, 1.0, hx, hy).unwrap();
        for v in m.read_all(hy).unwrap() {
            assert!((v - 2.0).abs() < 1e-4);
        }
    }
}
