//! Marshalling for communicator and solver operations.

use crate::args::{ArgPack, Reply};
use crate::collective::{CollectiveBank, ReduceOp};
use crate::element::Element;
use crate::error::{DeviceError, Result};
use crate::op::Op;
use crate::runtime::DeviceRuntime;

use super::Device;

impl<T: Element, R: DeviceRuntime> Device<T, R> {
    pub(super) fn dispatch_extra(&mut self, op: Op, a: &ArgPack<'_, T>) -> Result<Vec<T>> {
        match op {
            Op::CreateNccl => self.op_create_nccl(a),
            Op::FreeNccl => {
                self.comms.free(a.req_handle(0)?)?;
                Ok(Reply::none())
            }
            Op::NcclInitSingleProcess => self.op_nccl_init_single(a),
            Op::NcclInitMultiProcess => {
                self.comms.init_multi_process(a.size(0), a.req_handle(1)?)?;
                Ok(Reply::none())
            }
            Op::NcclBroadcast => {
                self.comms.broadcast(
                    &mut self.mem,
                    a.req_handle(0)?,
                    a.handle(1),
                    a.req_handle(2)?,
                    a.size(3),
                )?;
                Ok(Reply::none())
            }
            Op::NcclAllReduce => {
                self.comms.all_reduce(
                    &mut self.mem,
                    a.req_handle(0)?,
                    a.handle(1),
                    a.req_handle(2)?,
                    a.size(3),
                    ReduceOp::from_wire(a.int(4))?,
                    a.val(5),
                )?;
                Ok(Reply::none())
            }
            Op::CreatePca => {
                let h = self.solvers.create_pca(
                    &self.mem,
                    a.size(0),
                    a.size(1),
                    a.size(2),
                    a.size(3),
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                    a.opt_handle(7, 0),
                    a.opt_handle(8, 0),
                )?;
                Ok(Reply::handle(h))
            }
            Op::FreePca => {
                self.solvers.free_pca(a.req_handle(0)?)?;
                Ok(Reply::none())
            }
            Op::RunPca => {
                let progress =
                    self.solvers
                        .run_pca(&mut self.mem, a.req_handle(0)?, a.opt_size(1, 1))?;
                Ok(Reply::vec(vec![
                    if progress.running { T::one() } else { T::zero() },
                    T::from_usize(progress.iteration),
                    T::from_usize(progress.figure),
                ]))
            }
            Op::CreateTsneGaussianPerplexity => {
                let h = self.solvers.create_perplexity(
                    &mut self.mem,
                    a.size(0),
                    a.size(1),
                    a.size(2),
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                    a.req_handle(7)?,
                    a.val(8).to_f64(),
                )?;
                Ok(Reply::handle(h))
            }
            Op::FreeTsneGaussianPerplexity => {
                self.solvers.free_perplexity(a.req_handle(0)?)?;
                Ok(Reply::none())
            }
            Op::FindTsneGaussianPerplexity => {
                let progress = self
                    .solvers
                    .find_perplexity(&mut self.mem, a.req_handle(0)?)?;
                Ok(Reply::vec(vec![
                    if progress.running { T::one() } else { T::zero() },
                    T::from_usize(progress.iteration),
                    T::from_usize(progress.figure),
                ]))
            }
            Op::CreateTsne => {
                let h = self.solvers.create_tsne(
                    &self.mem,
                    a.size(0),
                    a.size(1),
                    a.req_handle(2)?,
                    a.req_handle(3)?,
                    a.req_handle(4)?,
                    a.req_handle(5)?,
                    a.req_handle(6)?,
                    a.val(7).to_f64(),
                )?;
                Ok(Reply::handle(h))
            }
            Op::FreeTsne => {
                self.solvers.free_tsne(a.req_handle(0)?)?;
                Ok(Reply::none())
            }
            Op::ComputeTsneGradient => {
                self.solvers
                    .tsne_gradient(&mut self.mem, a.req_handle(0)?, a.flag(1))?;
                Ok(Reply::none())
            }
            Op::EvaluateTsneError => {
                let e = self.solvers.tsne_error(&self.mem, a.req_handle(0)?)?;
                Ok(Reply::scalar(e))
            }
            _ => unreachable!("extra dispatch received {op:?}"),
        }
    }

    fn op_create_nccl(&mut self, a: &ArgPack<'_, T>) -> Result<Vec<T>> {
        let device = a.size(0);
        let world = a.size(1);
        let rank = a.size(2);
        let guid_count = a.int(3);
        if guid_count != 5 {
            return Err(DeviceError::ParamOutOfRange(format!(
                "guid count {guid_count}"
            )));
        }
        let key = CollectiveBank::<T>::format_key(
            a.uint(4),
            a.uint(5),
            a.uint(6),
            a.uint(7),
            a.long(8) as u64,
        );
        let h = self.comms.create(device, world, rank, key)?;
        Ok(Reply::handle(h))
    }

    fn op_nccl_init_single(&mut self, a: &ArgPack<'_, T>) -> Result<Vec<T>> {
        let buffer_count = a.size(0);
        let count = a.size(1);
        if count != a.len() - 2 {
            return Err(DeviceError::ParamOutOfRange(format!(
                "{count} handles declared, {} supplied",
                a.len() - 2
            )));
        }
        let handles: Vec<i64> = a.tail(2).iter().map(|v| (*v).to_i64()).collect();
        self.comms.init_single_process(buffer_count, &handles)?;
        Ok(Reply::none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::Op;

    fn dev() -> Device<f64> {
        Device::host()
    }

    fn alloc(d: &mut Device<f64>, values: &[f64]) -> f64 {
        let h = d.invoke(Op::AllocMemory, &[values.len() as f64]).unwrap()[0];
        let mut args = vec![h, values.len() as f64];
        args.extend_from_slice(values);
        d.invoke(Op::SetMemory, &args).unwrap();
        h
    }

    #[test]
    fn nccl_guid_count_must_be_five() {
        let mut d = dev();
        let err = d
            .invoke(
                Op::CreateNccl,
                &[0.0, 2.0, 0.0, 4.0, 1.0, 2.0, 3.0, 4.0, 5.0],
            )
            .unwrap_err();
        assert_eq!(err.code(), 2);
    }

    #[test]
    fn nccl_group_lifecycle_through_dispatch() {
        let mut d = dev();
        let c0 = d
            .invoke(
                Op::CreateNccl,
                &[0.0, 2.0, 0.0, 5.0, 1.0, 2.0, 3.0, 4.0, 5.0],
            )
            .unwrap()[0];
        let c1 = d
            .invoke(
                Op::CreateNccl,
                &[0.0, 2.0, 1.0, 5.0, 1.0, 2.0, 3.0, 4.0, 5.0],
            )
            .unwrap()[0];
        // declared count must match the supplied tail
        let err = d
            .invoke(Op::NcclInitSingleProcess, &[128.0, 3.0, c0, c1])
            .unwrap_err();
        assert_eq!(err.code(), 2);
        d.invoke(Op::NcclInitSingleProcess, &[128.0, 2.0, c0, c1])
            .unwrap();

        let a = alloc(&mut d, &[1.0, 2.0]);
        let b = alloc(&mut d, &[3.0, 4.0]);
        d.invoke(Op::NcclAllReduce, &[c0, 0.0, a, 2.0, 0.0, 1.0])
            .unwrap();
        d.invoke(Op::NcclAllReduce, &[c1, 0.0, b, 2.0, 0.0, 1.0])
            .unwrap();
        assert_eq!(d.invoke(Op::GetMemory, &[a]).unwrap(), vec![4.0, 6.0]);

        d.invoke(Op::NcclBroadcast, &[c0, 0.0, a, 2.0]).unwrap();
        d.invoke(Op::NcclBroadcast, &[c1, 0.0, b, 2.0]).unwrap();
        assert_eq!(d.invoke(Op::GetMemory, &[b]).unwrap(), vec![4.0, 6.0]);

        d.invoke(Op::FreeNccl, &[c0]).unwrap();
        d.invoke(Op::FreeNccl, &[c1]).unwrap();
    }

    #[test]
    fn pca_through_dispatch_with_optional_tail() {
        let mut d = dev();
        let data = alloc(&mut d, &[-2.0, 0.0, -1.0, 0.0, 1.0, 0.0, 2.0, 0.0]);
        let scores = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
        let loads = d.invoke(Op::AllocMemory, &[2.0]).unwrap()[0];
        // seven arguments: residual/eigenvalue handles default to none
        let h = d
            .invoke(
                Op::CreatePca,
                &[50.0, 4.0, 2.0, 1.0, data, scores, loads],
            )
            .unwrap()[0];
        let out = d.invoke(Op::RunPca, &[h]).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], 0.0, "single component should finish in one step");
        assert_eq!(out[2], 1.0);
        d.invoke(Op::FreePca, &[h]).unwrap();

        // nine arguments: eigenvalues captured
        let ev = d.invoke(Op::AllocMemory, &[1.0]).unwrap()[0];
        let res = d.invoke(Op::AllocMemory, &[8.0]).unwrap()[0];
        let h2 = d
            .invoke(
                Op::CreatePca,
                &[50.0, 4.0, 2.0, 1.0, data, scores, loads, res, ev],
            )
            .unwrap()[0];
        d.invoke(Op::RunPca, &[h2, 1.0]).unwrap();
        let eig = d.invoke(Op::GetMemory, &[ev]).unwrap();
        assert!(eig[0] > 0.0);
    }

    #[test]
    fn tsne_pipeline_through_dispatch() {
        let mut d = dev();
        let n = 4.0;
        let k = 2.0;
        let x = alloc(&mut d, &[0.0, 0.5, 2.0, 2.5]);
        let cur = d.invoke(Op::AllocMemory, &[8.0]).unwrap()[0];
        let val = d.invoke(Op::AllocMemory, &[8.0]).unwrap()[0];
        let row = d.invoke(Op::AllocMemory, &[5.0]).unwrap()[0];
        let col = d.invoke(Op::AllocMemory, &[8.0]).unwrap()[0];
        let hp = d
            .invoke(
                Op::CreateTsneGaussianPerplexity,
                &[n, 1.0, k, x, cur, val, row, col, 2.0],
            )
            .unwrap()[0];
        let out = d.invoke(Op::FindTsneGaussianPerplexity, &[hp]).unwrap();
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], n);
        d.invoke(Op::FreeTsneGaussianPerplexity, &[hp]).unwrap();

        let y = alloc(&mut d, &[0.0, 0.0, 0.1, 0.1, 1.0, 1.0, 1.1, 1.1]);
        let dc = d.invoke(Op::AllocMemory, &[8.0]).unwrap()[0];
        let ht = d
            .invoke(Op::CreateTsne, &[n, 2.0, y, val, row, col, dc, 0.5])
            .unwrap()[0];
        d.invoke(Op::ComputeTsneGradient, &[ht, 1.0]).unwrap();
        let err = d.invoke(Op::EvaluateTsneError, &[ht]).unwrap();
        assert_eq!(err.len(), 1);
        assert!(err[0].is_finite());
        d.invoke(Op::FreeTsne, &[ht]).unwrap();
    }
}
