//! Marshalling for the math-kernel family: elementwise/BLAS-style ops,
//! reductions, channel ops, im2col, RNG fills, per-layer kernels, optimizer
//! updates, matrix utilities, and t-SNE internals.

use crate::args::{ArgPack, Reply};
use crate::element::Element;
use crate::error::{DeviceError, Result};
use crate::math::layers::{self, PoolGeometry, PoolMethod};
use crate::math::matrix::{self, AggregateOp, ColGeometry, DistMethod, TransposeOp};
use crate::math::{elementwise as ew, tsne};
use crate::op::Op;
use crate::runtime::DeviceRuntime;

use super::Device;

impl<T: Element, R: DeviceRuntime> Device<T, R> {
    #[allow(clippy::too_many_lines)]
    pub(super) fn dispatch_math(&mut self, op: Op, a: &ArgPack<'_, T>) -> Result<Vec<T>> {
        let mem = &mut self.mem;
        match op {
            Op::Set => {
                ew::set(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.val(2),
                    a.opt_int(3, -1),
                    a.opt_size(4, 0),
                )?;
                Ok(Reply::none())
            }
            Op::Get => {
                let out = ew::get(mem, a.size(0), a.req_handle(1)?, a.opt_int(2, -1))?;
                Ok(Reply::vec(out))
            }
            Op::Copy => {
                ew::copy(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.opt_size(3, 0),
                    a.opt_size(4, 0),
                    a.opt_handle(5, -1),
                )?;
                Ok(Reply::none())
            }
            Op::Gemm => {
                ew::gemm(
                    mem,
                    a.nonzero(0),
                    a.nonzero(1),
                    a.size(2),
                    a.size(3),
                    a.size(4),
                    a.val(5),
                    a.req_handle(6)?,
                    a.req_handle(7)?,
                    a.val(8),
                    a.req_handle(9)?,
                    a.opt_size(10, 0),
                    a.opt_size(11, 0),
                    a.opt_size(12, 0),
                )?;
                Ok(Reply::none())
            }
            Op::Gemm2 => {
                ew::gemm_ld(
                    mem,
                    a.nonzero(0),
                    a.nonzero(1),
                    a.size(2),
                    a.size(3),
                    a.size(4),
                    a.val(5),
                    a.req_handle(6)?,
                    a.req_handle(7)?,
                    a.val(8),
                    a.req_handle(9)?,
                    a.size(10),
                    a.size(11),
                    a.size(12),
                )?;
                Ok(Reply::none())
            }
            Op::Gemv => {
                ew::gemv(
                    mem,
                    a.nonzero(0),
                    a.size(1),
                    a.size(2),
                    a.val(3),
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.val(6),
                    a.req_handle(7)?,
                    a.opt_size(8, 0),
                    a.opt_size(9, 0),
                    a.opt_size(10, 0),
                )?;
                Ok(Reply::none())
            }
            Op::Axpy => {
                ew::axpy(
                    mem,
                    a.size(0),
                    a.val(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.opt_size(4, 0),
                    a.opt_size(5, 0),
                )?;
                Ok(Reply::none())
            }
            Op::Axpby => {
                ew::axpby(
                    mem,
                    a.size(0),
                    a.val(1),
                    a.req_handle(2)?,
                    a.val(3),
                    a.req_handle(4)?,
                )?;
                Ok(Reply::none())
            }
            Op::Scal => {
                ew::scal(mem, a.size(0), a.val(1), a.req_handle(2)?, a.opt_size(3, 0))?;
                Ok(Reply::none())
            }
            Op::Dot => {
                let v = ew::dot(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.opt_size(3, 0),
                    a.opt_size(4, 0),
                )?;
                Ok(Reply::scalar(v))
            }
            Op::Asum => {
                let v = ew::asum(mem, a.size(0), a.req_handle(1)?, a.opt_size(2, 0))?;
                Ok(Reply::scalar(v))
            }
            Op::Scale => {
                ew::scale(
                    mem,
                    a.size(0),
                    a.val(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.opt_size(4, 0),
                    a.opt_size(5, 0),
                )?;
                Ok(Reply::none())
            }
            Op::AddScalar => {
                ew::add_scalar(mem, a.size(0), a.val(1), a.req_handle(2)?, a.opt_size(3, 0))?;
                Ok(Reply::none())
            }
            Op::Add => {
                ew::add(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                )?;
                Ok(Reply::none())
            }
            Op::Add2 => {
                ew::add2(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.val(4),
                    a.val(5),
                )?;
                Ok(Reply::none())
            }
            Op::Sub => {
                ew::sub(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                )?;
                Ok(Reply::none())
            }
            Op::Mul => {
                ew::mul(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                )?;
                Ok(Reply::none())
            }
            Op::MulScalar => {
                ew::mul_scalar(mem, a.size(0), a.val(1), a.req_handle(2)?)?;
                Ok(Reply::none())
            }
            Op::Div => {
                ew::div(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                )?;
                Ok(Reply::none())
            }
            Op::SubAndDot => {
                let v = ew::sub_and_dot(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                )?;
                Ok(Reply::scalar(v))
            }
            Op::Abs => {
                ew::abs(mem, a.size(0), a.req_handle(1)?, a.req_handle(2)?)?;
                Ok(Reply::none())
            }
            Op::Exp => {
                ew::exp(mem, a.size(0), a.req_handle(1)?, a.req_handle(2)?)?;
                Ok(Reply::none())
            }
            Op::Log => {
                ew::log(mem, a.size(0), a.req_handle(1)?, a.req_handle(2)?)?;
                Ok(Reply::none())
            }
            Op::Powx => {
                ew::powx(mem, a.size(0), a.req_handle(1)?, a.val(2), a.req_handle(3)?)?;
                Ok(Reply::none())
            }
            Op::Sign => {
                ew::sign(mem, a.size(0), a.req_handle(1)?, a.req_handle(2)?)?;
                Ok(Reply::none())
            }
            Op::Sqrt => {
                ew::sqrt(mem, a.size(0), a.req_handle(1)?, a.req_handle(2)?)?;
                Ok(Reply::none())
            }
            Op::Reciprocol => {
                ew::reciprocol(mem, a.size(0), a.req_handle(1)?, a.req_handle(2)?)?;
                Ok(Reply::none())
            }
            Op::Student => {
                ew::student(mem, a.size(0), a.req_handle(1)?, a.req_handle(2)?)?;
                Ok(Reply::none())
            }
            Op::Logistic1 => {
                ew::logistic1(mem, a.size(0), a.req_handle(1)?, a.req_handle(2)?)?;
                Ok(Reply::none())
            }
            Op::Logistic2 => {
                ew::logistic2(mem, a.size(0), a.req_handle(1)?, a.req_handle(2)?)?;
                Ok(Reply::none())
            }
            Op::CompareSigns => {
                ew::compare_signs(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                )?;
                Ok(Reply::none())
            }
            Op::MaxVal => {
                let v = ew::maxval(mem, a.size(0), a.req_handle(1)?, a.opt_size(2, 0))?;
                Ok(Reply::scalar(v))
            }
            Op::MinVal => {
                let v = ew::minval(mem, a.size(0), a.req_handle(1)?, a.opt_size(2, 0))?;
                Ok(Reply::scalar(v))
            }
            Op::MinMaxVal => {
                let (lo, hi) = ew::minmaxval(mem, a.size(0), a.req_handle(1)?, a.opt_size(2, 0))?;
                Ok(Reply::vec(vec![lo, hi]))
            }
            Op::SumSq => {
                let v = ew::sumsq(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.opt_size(3, 0),
                )?;
                Ok(Reply::scalar(v))
            }
            Op::SumSqDiff => {
                let v = ew::sumsqdiff(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.opt_size(4, 0),
                    a.opt_size(5, 0),
                )?;
                Ok(Reply::scalar(v))
            }
            Op::Width => {
                ew::width(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.val(4),
                    a.req_handle(5)?,
                )?;
                Ok(Reply::none())
            }
            Op::ContainsPoint => {
                let v = ew::contains_point(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                )?;
                Ok(Reply::scalar(v))
            }
            Op::Denan => {
                ew::denan(mem, a.size(0), a.req_handle(1)?, a.val(2))?;
                Ok(Reply::none())
            }
            Op::ChannelMax => {
                ew::channel_max(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.size(2),
                    a.size(3),
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                )?;
                Ok(Reply::none())
            }
            Op::ChannelSub => {
                ew::channel_sub(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.size(2),
                    a.size(3),
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                )?;
                Ok(Reply::none())
            }
            Op::ChannelSum => {
                ew::channel_sum(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.size(2),
                    a.size(3),
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                )?;
                Ok(Reply::none())
            }
            Op::ChannelDiv => {
                ew::channel_div(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.size(2),
                    a.size(3),
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                )?;
                Ok(Reply::none())
            }
            Op::ChannelMul => {
                ew::channel_mul(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.size(2),
                    a.size(3),
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                )?;
                Ok(Reply::none())
            }
            Op::ChannelDot => {
                ew::channel_dot(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.size(2),
                    a.size(3),
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                )?;
                Ok(Reply::none())
            }
            Op::Im2Col | Op::Col2Im => {
                let g = ColGeometry {
                    channels: a.size(2),
                    height: a.size(3),
                    width: a.size(4),
                    kernel_h: a.size(5),
                    kernel_w: a.size(6),
                    pad_h: a.size(7),
                    pad_w: a.size(8),
                    stride_h: a.size(9).max(1),
                    stride_w: a.size(10).max(1),
                    dilation_h: a.size(11).max(1),
                    dilation_w: a.size(12).max(1),
                };
                if op == Op::Im2Col {
                    matrix::im2col(
                        mem,
                        a.req_handle(0)?,
                        a.size(1),
                        g,
                        a.req_handle(13)?,
                        a.size(14),
                    )?;
                } else {
                    matrix::col2im(
                        mem,
                        a.req_handle(13)?,
                        a.size(14),
                        g,
                        a.req_handle(0)?,
                        a.size(1),
                    )?;
                }
                Ok(Reply::none())
            }
            Op::Im2ColNd => {
                matrix::im2col_nd(
                    mem,
                    a.req_handle(0)?,
                    a.size(1),
                    a.size(2),
                    a.size(3),
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                    a.req_handle(7)?,
                    a.req_handle(8)?,
                    a.req_handle(9)?,
                    a.req_handle(10)?,
                    a.size(11),
                )?;
                Ok(Reply::none())
            }
            Op::Col2ImNd => {
                matrix::col2im_nd(
                    mem,
                    a.req_handle(0)?,
                    a.size(1),
                    a.size(2),
                    a.size(3),
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                    a.req_handle(7)?,
                    a.req_handle(8)?,
                    a.req_handle(9)?,
                    a.req_handle(10)?,
                    a.size(11),
                )?;
                Ok(Reply::none())
            }
            Op::RngSetSeed => {
                self.rng.reseed(a.long(0) as u64);
                Ok(Reply::none())
            }
            Op::RngUniform => {
                self.rng
                    .uniform(mem, a.size(0), a.val(1), a.val(2), a.req_handle(3)?)?;
                Ok(Reply::none())
            }
            Op::RngGaussian => {
                self.rng
                    .gaussian(mem, a.size(0), a.val(1), a.val(2), a.req_handle(3)?)?;
                Ok(Reply::none())
            }
            Op::RngBernoulli => {
                self.rng
                    .bernoulli(mem, a.size(0), a.val(1), a.req_handle(2)?)?;
                Ok(Reply::none())
            }
            Op::BatchReidxFwd => {
                layers::batchreidx_fwd(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                )?;
                Ok(Reply::none())
            }
            Op::BatchReidxBwd => {
                layers::batchreidx_bwd(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                )?;
                Ok(Reply::none())
            }
            Op::EmbedFwd => {
                layers::embed_fwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.size(3),
                    a.size(4),
                    a.size(5),
                    a.req_handle(6)?,
                )?;
                Ok(Reply::none())
            }
            Op::EmbedBwd => {
                layers::embed_bwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.size(3),
                    a.size(4),
                    a.size(5),
                    a.req_handle(6)?,
                )?;
                Ok(Reply::none())
            }
            Op::PoolingFwd | Op::PoolingBwd => {
                let method = PoolMethod::from_wire(a.int(0))?;
                let g = PoolGeometry {
                    num: a.size(3),
                    channels: a.size(4),
                    height: a.size(5),
                    width: a.size(6),
                    out_h: a.size(7),
                    out_w: a.size(8),
                    kernel_h: a.size(9),
                    kernel_w: a.size(10),
                    stride_h: a.size(11).max(1),
                    stride_w: a.size(12).max(1),
                    pad_h: a.size(13),
                    pad_w: a.size(14),
                };
                if op == Op::PoolingFwd {
                    layers::pooling_fwd(
                        mem,
                        method,
                        a.size(1),
                        a.req_handle(2)?,
                        g,
                        a.req_handle(15)?,
                        a.handle(16),
                        a.handle(17),
                    )?;
                } else {
                    layers::pooling_bwd(
                        mem,
                        method,
                        a.size(1),
                        a.req_handle(2)?,
                        g,
                        a.req_handle(15)?,
                        a.handle(16),
                        a.handle(17),
                    )?;
                }
                Ok(Reply::none())
            }
            Op::UnpoolingFwd | Op::UnpoolingBwd => {
                let method = PoolMethod::from_wire(a.int(0))?;
                let g = PoolGeometry {
                    num: a.size(3),
                    channels: a.size(4),
                    height: a.size(5),
                    width: a.size(6),
                    out_h: a.size(7),
                    out_w: a.size(8),
                    kernel_h: a.size(9),
                    kernel_w: a.size(10),
                    stride_h: a.size(11).max(1),
                    stride_w: a.size(12).max(1),
                    pad_h: a.size(13),
                    pad_w: a.size(14),
                };
                if op == Op::UnpoolingFwd {
                    layers::unpooling_fwd(
                        mem,
                        method,
                        a.size(1),
                        a.req_handle(2)?,
                        g,
                        a.req_handle(15)?,
                        a.handle(16),
                    )?;
                } else {
                    layers::unpooling_bwd(
                        mem,
                        method,
                        a.size(1),
                        a.req_handle(2)?,
                        g,
                        a.req_handle(15)?,
                        a.handle(16),
                    )?;
                }
                Ok(Reply::none())
            }
            Op::TanhFwd => {
                layers::tanh_fwd(mem, a.size(0), a.req_handle(1)?, a.req_handle(2)?)?;
                Ok(Reply::none())
            }
            Op::TanhBwd => {
                layers::tanh_bwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                )?;
                Ok(Reply::none())
            }
            Op::SigmoidFwd => {
                layers::sigmoid_fwd(mem, a.size(0), a.req_handle(1)?, a.req_handle(2)?)?;
                Ok(Reply::none())
            }
            Op::SigmoidBwd => {
                layers::sigmoid_bwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                )?;
                Ok(Reply::none())
            }
            Op::ReluFwd => {
                layers::relu_fwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.val(3),
                )?;
                Ok(Reply::none())
            }
            Op::ReluBwd => {
                layers::relu_bwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.val(4),
                )?;
                Ok(Reply::none())
            }
            Op::EluFwd => {
                layers::elu_fwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.val(3),
                )?;
                Ok(Reply::none())
            }
            Op::EluBwd => {
                layers::elu_bwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.val(5),
                )?;
                Ok(Reply::none())
            }
            Op::DropoutFwd => {
                layers::dropout_fwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.uint(3),
                    a.val(4),
                    a.req_handle(5)?,
                )?;
                Ok(Reply::none())
            }
            Op::DropoutBwd => {
                layers::dropout_bwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.uint(3),
                    a.val(4),
                    a.req_handle(5)?,
                )?;
                Ok(Reply::none())
            }
            Op::BnllFwd => {
                layers::bnll_fwd(mem, a.size(0), a.req_handle(1)?, a.req_handle(2)?)?;
                Ok(Reply::none())
            }
            Op::BnllBwd => {
                layers::bnll_bwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                )?;
                Ok(Reply::none())
            }
            Op::PreluFwd => {
                layers::prelu_fwd(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.size(2),
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.size(6).max(1),
                )?;
                Ok(Reply::none())
            }
            Op::PreluBwd => {
                layers::prelu_bwd(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.size(2),
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                    a.size(7).max(1),
                )?;
                Ok(Reply::none())
            }
            Op::PreluBwdParam => {
                layers::prelu_bwd_param(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.size(2),
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                )?;
                Ok(Reply::none())
            }
            Op::SoftmaxLossFwd => {
                layers::softmaxloss_fwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.size(4),
                    a.size(5),
                    a.size(6),
                    a.req_handle(7)?,
                    a.opt_int(8, -1),
                )?;
                Ok(Reply::none())
            }
            Op::SoftmaxLossBwd => {
                layers::softmaxloss_bwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.size(4),
                    a.size(5),
                    a.size(6),
                    a.req_handle(7)?,
                    a.opt_int(8, -1),
                )?;
                Ok(Reply::none())
            }
            Op::MaxFwd => {
                layers::max_fwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.int(3),
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                )?;
                Ok(Reply::none())
            }
            Op::MaxBwd => {
                layers::max_bwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.int(2),
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                )?;
                Ok(Reply::none())
            }
            Op::CropFwd => {
                layers::crop_fwd(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                )?;
                Ok(Reply::none())
            }
            Op::CropBwd => {
                layers::crop_bwd(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                )?;
                Ok(Reply::none())
            }
            Op::ConcatFwd => {
                layers::concat_fwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.size(2),
                    a.size(3),
                    a.size(4),
                    a.size(5),
                    a.size(6),
                    a.req_handle(7)?,
                )?;
                Ok(Reply::none())
            }
            Op::ConcatBwd => {
                layers::concat_bwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.size(2),
                    a.size(3),
                    a.size(4),
                    a.size(5),
                    a.size(6),
                    a.req_handle(7)?,
                )?;
                Ok(Reply::none())
            }
            Op::SliceFwd => {
                layers::slice_fwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.size(2),
                    a.size(3),
                    a.size(4),
                    a.size(5),
                    a.size(6),
                    a.req_handle(7)?,
                )?;
                Ok(Reply::none())
            }
            Op::SliceBwd => {
                layers::slice_bwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.size(2),
                    a.size(3),
                    a.size(4),
                    a.size(5),
                    a.size(6),
                    a.req_handle(7)?,
                )?;
                Ok(Reply::none())
            }
            Op::TileFwd => {
                layers::tile_fwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.size(2),
                    a.size(3),
                    a.size(4),
                    a.req_handle(5)?,
                )?;
                Ok(Reply::none())
            }
            Op::TileBwd => {
                layers::tile_bwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.size(2),
                    a.size(3),
                    a.size(4),
                    a.req_handle(5)?,
                )?;
                Ok(Reply::none())
            }
            Op::BiasFwd => {
                layers::bias_fwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.size(3),
                    a.size(4),
                    a.req_handle(5)?,
                )?;
                Ok(Reply::none())
            }
            Op::ScaleFwd => {
                layers::scale_fwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.size(3),
                    a.size(4),
                    a.req_handle(5)?,
                    a.opt_handle(6, 0),
                )?;
                Ok(Reply::none())
            }
            Op::ThresholdFwd => {
                layers::threshold_fwd(
                    mem,
                    a.size(0),
                    a.val(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                )?;
                Ok(Reply::none())
            }
            Op::CllBwd => {
                layers::cll_bwd(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.val(2),
                    a.nonzero(3),
                    a.val(4),
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                    a.req_handle(7)?,
                    a.req_handle(8)?,
                )?;
                Ok(Reply::none())
            }
            Op::LrnFillScale => {
                layers::lrn_fillscale(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.size(2),
                    a.size(3),
                    a.size(4),
                    a.size(5),
                    a.size(6),
                    a.val(7),
                    a.val(8),
                    a.req_handle(9)?,
                )?;
                Ok(Reply::none())
            }
            Op::LrnComputeOutput => {
                layers::lrn_computeoutput(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.val(3),
                    a.req_handle(4)?,
                )?;
                Ok(Reply::none())
            }
            Op::LrnComputeDiff => {
                layers::lrn_computediff(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.size(5),
                    a.size(6),
                    a.size(7),
                    a.size(8),
                    a.size(9),
                    a.val(10),
                    a.val(11),
                    a.req_handle(12)?,
                )?;
                Ok(Reply::none())
            }
            Op::LstmFwd => {
                layers::lstm_fwd(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.size(2),
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.handle(5),
                    a.size(6),
                    a.req_handle(7)?,
                    a.size(8),
                    a.req_handle(9)?,
                    a.size(10),
                    a.req_handle(11)?,
                    a.size(12),
                    a.req_handle(13)?,
                    a.size(14),
                    a.req_handle(15)?,
                    a.size(16),
                    a.req_handle(17)?,
                    a.size(18),
                    a.req_handle(19)?,
                )?;
                Ok(Reply::none())
            }
            Op::LstmBwd => {
                layers::lstm_bwd(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.size(2),
                    a.val(3),
                    a.req_handle(4)?,
                    a.handle(5),
                    a.size(6),
                    a.req_handle(7)?,
                    a.size(8),
                    a.req_handle(9)?,
                    a.req_handle(10)?,
                    a.size(11),
                    a.req_handle(12)?,
                    a.size(13),
                    a.req_handle(14)?,
                    a.req_handle(15)?,
                    a.size(16),
                    a.req_handle(17)?,
                    a.size(18),
                    a.req_handle(19)?,
                    a.size(20),
                    a.req_handle(21)?,
                    a.size(22),
                    a.req_handle(23)?,
                )?;
                Ok(Reply::none())
            }
            Op::LstmUnitFwd => {
                layers::lstm_unit_fwd(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.size(2),
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.handle(6),
                    a.req_handle(7)?,
                    a.req_handle(8)?,
                )?;
                Ok(Reply::none())
            }
            Op::LstmUnitBwd => {
                layers::lstm_unit_bwd(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.size(2),
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                    a.handle(7),
                    a.req_handle(8)?,
                    a.req_handle(9)?,
                    a.req_handle(10)?,
                    a.req_handle(11)?,
                    a.req_handle(12)?,
                )?;
                Ok(Reply::none())
            }
            Op::CoeffSumFwd => {
                layers::coeff_sum_fwd(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.size(2),
                    a.val(3),
                    a.handle(4),
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                )?;
                Ok(Reply::none())
            }
            Op::CoeffSumBwd => {
                layers::coeff_sum_bwd(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.size(2),
                    a.val(3),
                    a.handle(4),
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                )?;
                Ok(Reply::none())
            }
            Op::SigmoidCrossEntropyFwd => {
                layers::sigmoid_cross_entropy_fwd(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.flag(4),
                    a.int(5),
                    a.req_handle(6)?,
                )?;
                Ok(Reply::none())
            }
            Op::SigmoidCrossEntropyIgnore => {
                layers::sigmoid_cross_entropy_ignore(
                    mem,
                    a.size(0),
                    a.int(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                )?;
                Ok(Reply::none())
            }
            Op::SgdUpdate => {
                layers::sgd_update(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.val(3),
                    a.val(4),
                )?;
                Ok(Reply::none())
            }
            Op::NesterovUpdate => {
                layers::nesterov_update(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.val(3),
                    a.val(4),
                )?;
                Ok(Reply::none())
            }
            Op::AdagradUpdate => {
                layers::adagrad_update(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.val(3),
                    a.val(4),
                )?;
                Ok(Reply::none())
            }
            Op::AdadeltaUpdate => {
                layers::adadelta_update(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.val(4),
                    a.val(5),
                    a.val(6),
                )?;
                Ok(Reply::none())
            }
            Op::AdamUpdate => {
                layers::adam_update(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.val(4),
                    a.val(5),
                    a.val(6),
                    a.val(7),
                )?;
                Ok(Reply::none())
            }
            Op::RmsPropUpdate => {
                layers::rmsprop_update(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.val(3),
                    a.val(4),
                    a.val(5),
                )?;
                Ok(Reply::none())
            }
            Op::CombineData => {
                matrix::combine_data(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.val(3),
                    a.req_handle(4)?,
                    a.val(5),
                    a.req_handle(6)?,
                )?;
                Ok(Reply::none())
            }
            Op::MtxSetDiagonal => {
                matrix::mtx_set_diagonal(mem, a.size(0), a.size(1), a.val(2), a.req_handle(3)?)?;
                Ok(Reply::none())
            }
            Op::MtxSetDiagonal2 => {
                matrix::mtx_set_diagonal2(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.req_handle(2)?,
                    a.val(3),
                    a.val(4),
                    a.req_handle(5)?,
                )?;
                Ok(Reply::none())
            }
            Op::MtxAddVector => {
                matrix::mtx_add_vector(
                    mem,
                    a.int(0),
                    a.size(1),
                    a.size(2),
                    a.val(3),
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                )?;
                Ok(Reply::none())
            }
            Op::MtxTransposeOp => {
                matrix::mtx_transpose_op(
                    mem,
                    TransposeOp::from_wire(a.int(0))?,
                    a.size(1),
                    a.size(2),
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.opt_val(6, 1.0),
                    a.opt_val(7, 1.0),
                )?;
                Ok(Reply::none())
            }
            Op::MtxAggregateCols => {
                matrix::mtx_aggregate_cols(
                    mem,
                    AggregateOp::from_wire(a.int(0))?,
                    a.size(1),
                    a.size(2),
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                )?;
                Ok(Reply::none())
            }
            Op::MtxAggregateRows => {
                matrix::mtx_aggregate_rows(
                    mem,
                    AggregateOp::from_wire(a.int(0))?,
                    a.size(1),
                    a.size(2),
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                )?;
                Ok(Reply::none())
            }
            Op::MtxTranspose => {
                matrix::mtx_transpose(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                )?;
                Ok(Reply::none())
            }
            Op::MtxMeanCenterByColumn => {
                matrix::mtx_meancenter_by_column(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.opt_flag(4),
                )?;
                Ok(Reply::none())
            }
            Op::MtxEuclideanDist => {
                matrix::mtx_euclidean_dist(
                    mem,
                    a.req_handle(0)?,
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.size(3),
                    a.size(4),
                    a.size(5),
                    a.size(6),
                )?;
                Ok(Reply::none())
            }
            Op::MtxDot => {
                matrix::mtx_dot(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.size(2),
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                )?;
                Ok(Reply::none())
            }
            Op::TsneUpdate => {
                tsne::update(
                    mem,
                    a.size(0),
                    a.val(1),
                    a.val(2),
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                    a.opt_val(7, 0.8),
                    a.opt_val(8, 0.2),
                )?;
                Ok(Reply::none())
            }
            Op::TsneUpdateGrad => {
                tsne::update_grad(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.val(3),
                    a.req_handle(4)?,
                )?;
                Ok(Reply::none())
            }
            Op::TsneComputeExactError => {
                let v = tsne::compute_exact_error(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                )?;
                Ok(Reply::scalar(v))
            }
            Op::TsneComputeSquaredEuclideanDistance => {
                tsne::squared_euclidean_distance(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                )?;
                Ok(Reply::none())
            }
            Op::TsneComputeQMatrix => {
                let sum = tsne::compute_q_matrix(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.flag(3),
                )?;
                Ok(Reply::scalar(sum))
            }
            Op::TsneComputeExactGradient => {
                tsne::compute_exact_gradient(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.val(6),
                )?;
                Ok(Reply::none())
            }
            Op::TsneSymmetrizeMatrix => {
                let nnz = tsne::symmetrize_matrix(
                    mem,
                    a.size(0),
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                )?;
                Ok(Reply::scalar(T::from_i64(nnz)))
            }
            Op::TsneComputeKnnBounds => {
                let (min_x, min_y, max_x, max_y) =
                    tsne::compute_knn_bounds(mem, a.size(0), a.req_handle(1)?, a.val(2).to_f64())?;
                Ok(Reply::vec(vec![min_x, min_y, max_x, max_y]))
            }
            Op::GaussianBlur => {
                matrix::gaussian_blur(
                    mem,
                    a.size(0),
                    a.size(1),
                    a.size(2),
                    a.size(3),
                    a.val(4).to_f64(),
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                )?;
                Ok(Reply::none())
            }
            Op::HammingDiff => {
                matrix::hamming_diff(
                    mem,
                    a.size(0),
                    a.val(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.opt_size(5, 0),
                    a.opt_size(6, 0),
                    a.opt_size(7, 0),
                )?;
                Ok(Reply::none())
            }
            Op::CalcBatchDist => self.op_calc_batch_dist(a),
            other => Err(DeviceError::UnknownOp(other.id())),
        }
    }

    fn op_calc_batch_dist(&mut self, a: &ArgPack<'_, T>) -> Result<Vec<T>> {
        let method = DistMethod::from_wire(a.int(0))?;
        let threshold = a.val(1);
        let item_dim = a.size(2);
        let h_src = a.req_handle(3)?;
        let h_targets = a.req_handle(4)?;
        let h_work = a.req_handle(5)?;
        let pair_count = a.size(6);
        let tail = a.tail(7);
        if tail.len() != pair_count * 2 {
            return Err(DeviceError::ParamOutOfRange(format!(
                "{} index elements supplied for {pair_count} pairs",
                tail.len()
            )));
        }
        let pairs: Vec<(usize, usize)> = (0..pair_count)
            .map(|p| {
                (
                    tail[p * 2].to_i64().max(0) as usize,
                    tail[p * 2 + 1].to_i64().max(0) as usize,
                )
            })
            .collect();
        let out = matrix::calc_batch_dist(
            &mut self.mem,
            method,
            threshold,
            item_dim,
            h_src,
            h_targets,
            h_work,
            &pairs,
        )?;
        Ok(Reply::vec(out))
    }
}
