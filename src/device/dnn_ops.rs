//! Marshalling for dnn contexts, descriptors, and descriptor-driven ops.
//!
//! Positional layouts here are the wire contract; each handler decodes in
//! declared order and makes exactly one call into the descriptor layer.

use crate::args::{ArgPack, Reply};
use crate::dnn::Activation;
use crate::element::Element;
use crate::error::Result;
use crate::op::Op;
use crate::runtime::DeviceRuntime;

use super::Device;

impl<T: Element, R: DeviceRuntime> Device<T, R> {
    pub(super) fn dispatch_dnn(&mut self, op: Op, a: &ArgPack<'_, T>) -> Result<Vec<T>> {
        match op {
            Op::CreateCudnn => {
                let stream = a.opt_handle(0, 0);
                if stream != 0 {
                    self.mem.synchronize_stream(stream)?;
                }
                Ok(Reply::handle(self.dnn.create_context(stream)))
            }
            Op::FreeCudnn => {
                self.dnn.free_context(a.req_handle(0)?)?;
                Ok(Reply::none())
            }
            Op::CreateTensorDesc => Ok(Reply::handle(self.dnn.create_tensor())),
            Op::FreeTensorDesc => {
                self.dnn.free_tensor(a.req_handle(0)?)?;
                Ok(Reply::none())
            }
            Op::SetTensorDesc => {
                let strides = if a.len() == 9 {
                    Some([a.size(5), a.size(6), a.size(7), a.size(8)])
                } else {
                    None
                };
                self.dnn.set_tensor(
                    a.req_handle(0)?,
                    a.size(1),
                    a.size(2),
                    a.size(3),
                    a.size(4),
                    strides,
                )?;
                Ok(Reply::none())
            }
            Op::AddTensor => {
                self.dnn.add_tensor(
                    &mut self.mem,
                    a.req_handle(0)?,
                    a.val(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.size(4),
                    a.val(5),
                    a.req_handle(6)?,
                    a.req_handle(7)?,
                    a.size(8),
                )?;
                Ok(Reply::none())
            }
            Op::CreateFilterDesc => Ok(Reply::handle(self.dnn.create_filter())),
            Op::FreeFilterDesc => {
                self.dnn.free_filter(a.req_handle(0)?)?;
                Ok(Reply::none())
            }
            Op::SetFilterDesc => {
                self.dnn.set_filter(
                    a.req_handle(0)?,
                    a.size(1),
                    a.size(2),
                    a.size(3),
                    a.size(4),
                )?;
                Ok(Reply::none())
            }
            Op::CreateConvDesc => Ok(Reply::handle(self.dnn.create_conv())),
            Op::FreeConvDesc => {
                self.dnn.free_conv(a.req_handle(0)?)?;
                Ok(Reply::none())
            }
            Op::SetConvDesc => {
                self.dnn.set_conv(
                    a.req_handle(0)?,
                    a.size(1),
                    a.size(2),
                    a.size(3),
                    a.size(4),
                )?;
                Ok(Reply::none())
            }
            Op::GetConvInfo => {
                let info = self.dnn.conv_info::<T>(
                    a.req_handle(0)?,
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.size(5),
                )?;
                Ok(Reply::vec(info.iter().map(|&v| T::from_i64(v)).collect()))
            }
            Op::ConvForward => {
                self.dnn.conv_forward(
                    &mut self.mem,
                    a.req_handle(0)?,
                    a.val(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.size(4),
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                    a.size(7),
                    a.req_handle(8)?,
                    a.long(9),
                    a.handle(10),
                    a.size(11),
                    a.size(12),
                    a.val(13),
                    a.req_handle(14)?,
                    a.req_handle(15)?,
                    a.size(16),
                )?;
                Ok(Reply::none())
            }
            Op::ConvBackwardBias => {
                self.dnn.conv_backward_bias(
                    &mut self.mem,
                    a.req_handle(0)?,
                    a.val(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.size(4),
                    a.val(5),
                    a.req_handle(6)?,
                    a.req_handle(7)?,
                    a.size(8),
                )?;
                Ok(Reply::none())
            }
            Op::ConvBackwardFilter => {
                self.dnn.conv_backward_filter(
                    &mut self.mem,
                    a.req_handle(0)?,
                    a.val(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.size(4),
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                    a.size(7),
                    a.req_handle(8)?,
                    a.long(9),
                    a.handle(10),
                    a.size(11),
                    a.size(12),
                    a.val(13),
                    a.req_handle(14)?,
                    a.req_handle(15)?,
                    a.size(16),
                )?;
                Ok(Reply::none())
            }
            Op::ConvBackwardData => {
                self.dnn.conv_backward_data(
                    &mut self.mem,
                    a.req_handle(0)?,
                    a.val(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.size(4),
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                    a.size(7),
                    a.req_handle(8)?,
                    a.long(9),
                    a.handle(10),
                    a.size(11),
                    a.size(12),
                    a.val(13),
                    a.req_handle(14)?,
                    a.req_handle(15)?,
                    a.size(16),
                )?;
                Ok(Reply::none())
            }
            Op::CreatePoolingDesc => Ok(Reply::handle(self.dnn.create_pooling())),
            Op::FreePoolingDesc => {
                self.dnn.free_pooling(a.req_handle(0)?)?;
                Ok(Reply::none())
            }
            Op::SetPoolingDesc => {
                self.dnn.set_pooling(
                    a.req_handle(0)?,
                    a.int(1),
                    a.size(2),
                    a.size(3),
                    a.size(4),
                    a.size(5),
                    a.size(6),
                    a.size(7),
                )?;
                Ok(Reply::none())
            }
            Op::PoolingForward => {
                self.dnn.pooling_forward(
                    &mut self.mem,
                    a.req_handle(0)?,
                    a.req_handle(1)?,
                    a.val(2),
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.val(5),
                    a.req_handle(6)?,
                    a.req_handle(7)?,
                )?;
                Ok(Reply::none())
            }
            Op::PoolingBackward => {
                self.dnn.pooling_backward(
                    &mut self.mem,
                    a.req_handle(0)?,
                    a.req_handle(1)?,
                    a.val(2),
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                    a.req_handle(7)?,
                    a.req_handle(8)?,
                    a.val(9),
                    a.req_handle(10)?,
                    a.req_handle(11)?,
                )?;
                Ok(Reply::none())
            }
            Op::CreateDropoutDesc => Ok(Reply::handle(self.dnn.create_dropout())),
            Op::FreeDropoutDesc => {
                self.dnn.free_dropout(a.req_handle(0)?)?;
                Ok(Reply::none())
            }
            Op::SetDropoutDesc => {
                self.dnn.set_dropout(
                    &self.mem,
                    a.req_handle(0)?,
                    a.req_handle(1)?,
                    a.val(2).to_f64(),
                    a.handle(3),
                    a.long(4) as u64,
                )?;
                Ok(Reply::none())
            }
            Op::GetDropoutInfo => {
                let (states, reserved) =
                    self.dnn.dropout_info(a.req_handle(0)?, a.req_handle(1)?)?;
                Ok(Reply::vec(vec![
                    T::from_usize(states),
                    T::from_usize(reserved),
                ]))
            }
            Op::DropoutForward => {
                self.dnn.dropout_forward(
                    &mut self.mem,
                    a.req_handle(0)?,
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.handle(6),
                )?;
                Ok(Reply::none())
            }
            Op::DropoutBackward => {
                self.dnn.dropout_backward(
                    &mut self.mem,
                    a.req_handle(0)?,
                    a.req_handle(1)?,
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.handle(6),
                )?;
                Ok(Reply::none())
            }
            Op::CreateLrnDesc => Ok(Reply::handle(self.dnn.create_lrn())),
            Op::FreeLrnDesc => {
                self.dnn.free_lrn(a.req_handle(0)?)?;
                Ok(Reply::none())
            }
            Op::SetLrnDesc => {
                self.dnn.set_lrn(
                    a.req_handle(0)?,
                    a.size(1),
                    a.val(2).to_f64(),
                    a.val(3).to_f64(),
                    a.val(4).to_f64(),
                )?;
                Ok(Reply::none())
            }
            Op::TanhForward | Op::SigmoidForward | Op::ReluForward => {
                let kind = match op {
                    Op::TanhForward => Activation::Tanh,
                    Op::SigmoidForward => Activation::Sigmoid,
                    _ => Activation::Relu,
                };
                self.dnn.activation_forward(
                    &mut self.mem,
                    kind,
                    a.req_handle(0)?,
                    a.val(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.val(4),
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                )?;
                Ok(Reply::none())
            }
            Op::TanhBackward | Op::SigmoidBackward | Op::ReluBackward => {
                let kind = match op {
                    Op::TanhBackward => Activation::Tanh,
                    Op::SigmoidBackward => Activation::Sigmoid,
                    _ => Activation::Relu,
                };
                self.dnn.activation_backward(
                    &mut self.mem,
                    kind,
                    a.req_handle(0)?,
                    a.val(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                    a.req_handle(7)?,
                    a.val(8),
                    a.req_handle(9)?,
                    a.req_handle(10)?,
                )?;
                Ok(Reply::none())
            }
            Op::SoftmaxForward => {
                self.dnn.softmax_forward(
                    &mut self.mem,
                    a.req_handle(0)?,
                    a.val(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.val(4),
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                )?;
                Ok(Reply::none())
            }
            Op::SoftmaxBackward => {
                self.dnn.softmax_backward(
                    &mut self.mem,
                    a.req_handle(0)?,
                    a.val(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.val(6),
                    a.req_handle(7)?,
                    a.req_handle(8)?,
                )?;
                Ok(Reply::none())
            }
            Op::LrnForwardCC => {
                self.dnn.lrn_forward(
                    &mut self.mem,
                    a.req_handle(0)?,
                    a.req_handle(1)?,
                    a.val(2),
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.val(5),
                    a.req_handle(6)?,
                    a.req_handle(7)?,
                )?;
                Ok(Reply::none())
            }
            Op::LrnBackwardCC => {
                self.dnn.lrn_backward(
                    &mut self.mem,
                    a.req_handle(0)?,
                    a.req_handle(1)?,
                    a.val(2),
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                    a.req_handle(7)?,
                    a.req_handle(8)?,
                    a.val(9),
                    a.req_handle(10)?,
                    a.req_handle(11)?,
                )?;
                Ok(Reply::none())
            }
            Op::LcnForwardCC => {
                self.dnn.lcn_forward(
                    &mut self.mem,
                    a.req_handle(0)?,
                    a.req_handle(1)?,
                    a.val(2),
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                    a.val(7),
                    a.req_handle(8)?,
                    a.req_handle(9)?,
                )?;
                Ok(Reply::none())
            }
            Op::LcnBackwardCC => {
                self.dnn.lcn_backward(
                    &mut self.mem,
                    a.req_handle(0)?,
                    a.req_handle(1)?,
                    a.val(2),
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                    a.req_handle(7)?,
                    a.val(8),
                    a.req_handle(9)?,
                    a.req_handle(10)?,
                )?;
                Ok(Reply::none())
            }
            _ => unreachable!("dnn dispatch received {op:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::Op;

    fn dev() -> Device<f32> {
        Device::host()
    }

    fn alloc(d: &mut Device<f32>, values: &[f32]) -> f32 {
        let h = d.invoke(Op::AllocMemory, &[values.len() as f32]).unwrap()[0];
        let mut args = vec![h, values.len() as f32];
        args.extend_from_slice(values);
        d.invoke(Op::SetMemory, &args).unwrap();
        h
    }

    #[test]
    fn tensor_desc_exact_pair_arity() {
        let mut d = dev();
        let t = d.invoke(Op::CreateTensorDesc, &[]).unwrap()[0];
        assert!(d
            .invoke(Op::SetTensorDesc, &[t, 1.0, 1.0, 2.0, 2.0])
            .is_ok());
        // six arguments sit between the exact pair and must be rejected
        let err = d
            .invoke(Op::SetTensorDesc, &[t, 1.0, 1.0, 2.0, 2.0, 4.0])
            .unwrap_err();
        assert_eq!(err.code(), 2);
        assert!(d
            .invoke(
                Op::SetTensorDesc,
                &[t, 1.0, 1.0, 2.0, 2.0, 4.0, 4.0, 2.0, 1.0]
            )
            .is_ok());
        d.invoke(Op::FreeTensorDesc, &[t]).unwrap();
    }

    #[test]
    fn add_tensor_through_dispatch() {
        let mut d = dev();
        let ctx = d.invoke(Op::CreateCudnn, &[]).unwrap()[0];
        let desc = d.invoke(Op::CreateTensorDesc, &[]).unwrap()[0];
        d.invoke(Op::SetTensorDesc, &[desc, 1.0, 1.0, 1.0, 3.0])
            .unwrap();
        let hx = alloc(&mut d, &[1.0, 2.0, 3.0]);
        let hy = alloc(&mut d, &[10.0, 10.0, 10.0]);
        d.invoke(
            Op::AddTensor,
            &[ctx, 2.0, desc, hx, 0.0, 1.0, desc, hy, 0.0],
        )
        .unwrap();
        assert_eq!(
            d.invoke(Op::GetMemory, &[hy]).unwrap(),
            vec![12.0, 14.0, 16.0]
        );
        d.invoke(Op::FreeCudnn, &[ctx]).unwrap();
    }

    #[test]
    fn conv_forward_through_dispatch() {
        let mut d = dev();
        let ctx = d.invoke(Op::CreateCudnn, &[]).unwrap()[0];
        let bdesc = d.invoke(Op::CreateTensorDesc, &[]).unwrap()[0];
        d.invoke(Op::SetTensorDesc, &[bdesc, 1.0, 1.0, 3.0, 3.0])
            .unwrap();
        let fdesc = d.invoke(Op::CreateFilterDesc, &[]).unwrap()[0];
        d.invoke(Op::SetFilterDesc, &[fdesc, 1.0, 1.0, 2.0, 2.0])
            .unwrap();
        let cdesc = d.invoke(Op::CreateConvDesc, &[]).unwrap()[0];
        d.invoke(Op::SetConvDesc, &[cdesc, 0.0, 0.0, 1.0, 1.0])
            .unwrap();
        let tdesc = d.invoke(Op::CreateTensorDesc, &[]).unwrap()[0];
        d.invoke(Op::SetTensorDesc, &[tdesc, 1.0, 1.0, 2.0, 2.0])
            .unwrap();

        let info = d
            .invoke(Op::GetConvInfo, &[ctx, bdesc, fdesc, cdesc, tdesc, 0.0])
            .unwrap();
        assert_eq!(info.len(), 6);

        let hx = alloc(&mut d, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let hw = alloc(&mut d, &[1.0, 0.0, 0.0, 1.0]);
        let hy = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
        d.invoke(
            Op::ConvForward,
            &[
                ctx, 1.0, bdesc, hx, 0.0, fdesc, hw, 0.0, cdesc, 1.0, 0.0, 0.0, 0.0, 0.0, tdesc,
                hy, 0.0,
            ],
        )
        .unwrap();
        assert_eq!(
            d.invoke(Op::GetMemory, &[hy]).unwrap(),
            vec![6.0, 8.0, 12.0, 14.0]
        );
    }

    #[test]
    fn dropout_round_trip_through_dispatch() {
        let mut d = dev();
        let ctx = d.invoke(Op::CreateCudnn, &[]).unwrap()[0];
        let desc = d.invoke(Op::CreateTensorDesc, &[]).unwrap()[0];
        d.invoke(Op::SetTensorDesc, &[desc, 1.0, 1.0, 1.0, 32.0])
            .unwrap();
        let dd = d.invoke(Op::CreateDropoutDesc, &[]).unwrap()[0];
        let info = d.invoke(Op::GetDropoutInfo, &[ctx, desc]).unwrap();
        assert_eq!(info.len(), 2);
        let states = d.invoke(Op::AllocMemory, &[info[0]]).unwrap()[0];
        d.invoke(Op::SetDropoutDesc, &[ctx, dd, 0.5, states, 99.0])
            .unwrap();
        let hx = alloc(&mut d, &[1.0; 32]);
        let hy = d.invoke(Op::AllocMemory, &[32.0]).unwrap()[0];
        let hres = d.invoke(Op::AllocMemory, &[info[1]]).unwrap()[0];
        d.invoke(Op::DropoutForward, &[ctx, dd, desc, hx, desc, hy, hres])
            .unwrap();
        let y = d.invoke(Op::GetMemory, &[hy]).unwrap();
        assert!(y.iter().any(|&v| v == 0.0));
        assert!(y.iter().any(|&v| v > 1.0));
        let hbd = d.invoke(Op::AllocMemory, &[32.0]).unwrap()[0];
        d.invoke(Op::DropoutBackward, &[ctx, dd, desc, hy, desc, hbd, hres])
            .unwrap();
    }

    #[test]
    fn activation_and_softmax_through_dispatch() {
        let mut d = dev();
        let ctx = d.invoke(Op::CreateCudnn, &[]).unwrap()[0];
        let desc = d.invoke(Op::CreateTensorDesc, &[]).unwrap()[0];
        d.invoke(Op::SetTensorDesc, &[desc, 1.0, 3.0, 1.0, 1.0])
            .unwrap();
        let hx = alloc(&mut d, &[-1.0, 0.5, 2.0]);
        let hy = d.invoke(Op::AllocMemory, &[3.0]).unwrap()[0];
        d.invoke(Op::ReluForward, &[ctx, 1.0, desc, hx, 0.0, desc, hy])
            .unwrap();
        let y = d.invoke(Op::GetMemory, &[hy]).unwrap();
        assert_eq!(y, vec![0.0, 0.5, 2.0]);

        let hs = d.invoke(Op::AllocMemory, &[3.0]).unwrap()[0];
        d.invoke(Op::SoftmaxForward, &[ctx, 1.0, desc, hx, 0.0, desc, hs])
            .unwrap();
        let s = d.invoke(Op::GetMemory, &[hs]).unwrap();
        assert!((s.iter().sum::<f32>() - 1.0).abs() < 1e-5);

        // backward shrinks to nine arguments for softmax
        let hdy = alloc(&mut d, &[1.0, 0.0, 0.0]);
        let hbd = d.invoke(Op::AllocMemory, &[3.0]).unwrap()[0];
        d.invoke(
            Op::SoftmaxBackward,
            &[ctx, 1.0, desc, hs, desc, hdy, 0.0, desc, hbd],
        )
        .unwrap();
        let bd = d.invoke(Op::GetMemory, &[hbd]).unwrap();
        assert!((bd.iter().sum::<f32>()).abs() < 1e-5);
    }

    #[test]
    fn lrn_through_dispatch() {
        let mut d = dev();
        let ctx = d.invoke(Op::CreateCudnn, &[]).unwrap()[0];
        let desc = d.invoke(Op::CreateTensorDesc, &[]).unwrap()[0];
        d.invoke(Op::SetTensorDesc, &[desc, 1.0, 3.0, 1.0, 1.0])
            .unwrap();
        let lrn = d.invoke(Op::CreateLrnDesc, &[]).unwrap()[0];
        d.invoke(Op::SetLrnDesc, &[lrn, 3.0, 1.0, 0.75, 1.0])
            .unwrap();
        let hx = alloc(&mut d, &[1.0, 1.0, 1.0]);
        let hy = d.invoke(Op::AllocMemory, &[3.0]).unwrap()[0];
        d.invoke(Op::LrnForwardCC, &[ctx, lrn, 1.0, desc, hx, 0.0, desc, hy])
            .unwrap();
        for v in d.invoke(Op::GetMemory, &[hy]).unwrap() {
            assert!(v > 0.0 && v < 1.0);
        }
        d.invoke(Op::FreeLrnDesc, &[lrn]).unwrap();
    }
}
