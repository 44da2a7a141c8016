//! The dispatch facade.
//!
//! One `Device` owns the memory bank, descriptor tables, solver and
//! communicator banks, the kernel RNG, and the runtime seam. `invoke`
//! validates the declared arity before anything else, decodes positional
//! fields exactly once, makes one delegate call, and packs the reply.

mod dnn_ops;
mod extra_ops;
mod math_ops;

use tracing::{debug, warn};

use crate::args::{ArgPack, Reply};
use crate::collective::CollectiveBank;
use crate::dnn::Dnn;
use crate::element::Element;
use crate::error::{DeviceError, Result};
use crate::math::random::FillRng;
use crate::memory::MemoryBank;
use crate::op::{Op, TextQuery};
use crate::runtime::{DeviceRuntime, HostRuntime, RuntimeConfig};
use crate::solvers::SolverBank;

/// Init flag: create the BLAS-style context.
pub const DEVINIT_BLAS: i32 = 0x0001;
/// Init flag: create the RNG generator.
pub const DEVINIT_RNG: i32 = 0x0002;
/// Init flag: apply the seed argument.
pub const DEVINIT_SETSEED: i32 = 0x0004;
/// Init flag: reset the device first.
pub const DEVINIT_RESET: i32 = 0x0008;

/// Device property id: visible device count.
pub const DEVPROP_DEVICECOUNT: i32 = 1;
/// Device property id: name (string channel only).
pub const DEVPROP_NAME: i32 = 2;
/// Device property id: multi-GPU board group.
pub const DEVPROP_MULTIGPUBOARDGROUPID: i32 = 3;

/// Dispatch facade over a device runtime.
pub struct Device<T: Element, R: DeviceRuntime = HostRuntime> {
    runtime: R,
    mem: MemoryBank<T>,
    dnn: Dnn,
    solvers: SolverBank,
    comms: CollectiveBank<T>,
    rng: FillRng,
    current_device: usize,
    blas_ready: bool,
    rng_ready: bool,
}

impl<T: Element> Device<T, HostRuntime> {
    /// Facade over the default single-device host runtime.
    #[must_use]
    pub fn host() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Facade over a host runtime with the given virtual device table.
    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::new(HostRuntime::new(config))
    }
}

impl<T: Element> Default for Device<T, HostRuntime> {
    fn default() -> Self {
        Self::host()
    }
}

impl<T: Element, R: DeviceRuntime> Device<T, R> {
    /// Wire the facade to a runtime: the math layer shares the memory bank,
    /// contexts start live on device 0, and the lifecycle event is logged.
    pub fn new(runtime: R) -> Self {
        let capacities: Vec<u64> = (0..runtime.device_count())
            .map(|d| runtime.memory_info(d).map(|m| m.total).unwrap_or(0))
            .collect();
        debug!(devices = capacities.len(), "device facade up");
        Self {
            runtime,
            mem: MemoryBank::new(capacities),
            dnn: Dnn::new(),
            solvers: SolverBank::new(),
            comms: CollectiveBank::new(),
            rng: FillRng::new(0),
            current_device: 0,
            blas_ready: true,
            rng_ready: true,
        }
    }

    /// The runtime behind the facade.
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Currently selected device ordinal.
    #[must_use]
    pub fn current_device(&self) -> usize {
        self.current_device
    }

    /// Direct access to the memory bank (tests and embedding callers).
    pub fn memory(&mut self) -> &mut MemoryBank<T> {
        &mut self.mem
    }

    /// Total live handles across every resource table.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.mem.live_buffers()
            + self.dnn.live_handles()
            + self.solvers.live_handles()
            + self.comms.live_handles()
    }

    // =========================================================================
    // Boundary surface
    // =========================================================================

    /// Validate, decode, delegate, pack.
    ///
    /// # Errors
    ///
    /// `ParamOutOfRange`/`ParamNull` from marshalling; delegate errors pass
    /// through unchanged.
    pub fn invoke(&mut self, op: Op, args: &[T]) -> Result<Vec<T>> {
        let pack = ArgPack::new(args, op.arity())?;
        let out = self.dispatch(op, &pack);
        if let Err(e) = &out {
            warn!(op = op.name(), code = e.code(), "dispatch failed: {e}");
        }
        out
    }

    /// Flat status-code surface: 0 on success, a stable nonzero code
    /// otherwise, with the (possibly empty) result buffer alongside.
    pub fn invoke_raw(&mut self, op_id: u32, args: &[T]) -> (i64, Vec<T>) {
        let op = match Op::from_id(op_id) {
            Ok(op) => op,
            Err(e) => return (e.code(), Vec::new()),
        };
        match self.invoke(op, args) {
            Ok(out) => (0, out),
            Err(e) => (e.code(), Vec::new()),
        }
    }

    /// String-returning device queries.
    ///
    /// # Errors
    ///
    /// `ParamOutOfRange` from marshalling or the runtime.
    pub fn query(&mut self, q: TextQuery, args: &[T]) -> Result<String> {
        let pack = ArgPack::new(args, q.arity())?;
        let device = pack.size(0);
        match q {
            TextQuery::DeviceName => self.runtime.name(device),
            TextQuery::DeviceP2PInfo => self.runtime.p2p_info(device),
            TextQuery::DeviceInfo => self.runtime.info(device, pack.opt_flag(1)),
        }
    }

    fn dispatch(&mut self, op: Op, a: &ArgPack<'_, T>) -> Result<Vec<T>> {
        match op {
            // device / runtime control
            Op::SetDevice => self.op_set_device(a),
            Op::GetDevice => Ok(Reply::scalar(T::from_usize(self.current_device))),
            Op::ResetDevice => {
                self.runtime.reset()?;
                Ok(Reply::none())
            }
            Op::SynchronizeDevice => {
                self.runtime.synchronize()?;
                Ok(Reply::none())
            }
            Op::GetDeviceProperty => self.op_get_device_property(a),
            Op::CheckMemoryAttributes => self.op_check_memory_attributes(a),
            Op::GetDeviceMemory => self.op_get_device_memory(a),
            Op::CanAccessPeer => {
                let ok = self.runtime.can_access_peer(a.size(0), a.size(1))?;
                Ok(Reply::scalar(if ok { T::one() } else { T::zero() }))
            }
            Op::EnablePeerAccess => {
                let peer = a.size(0);
                self.runtime.enable_peer_access(self.current_device, peer)?;
                Ok(Reply::none())
            }
            Op::DisablePeerAccess => {
                let peer = a.size(0);
                self.runtime.disable_peer_access(self.current_device, peer)?;
                Ok(Reply::none())
            }
            Op::SetRandomSeed => {
                if !self.rng_ready {
                    return Err(DeviceError::NotInitialized("rng"));
                }
                self.rng.reseed(a.long(0) as u64);
                Ok(Reply::none())
            }

            // memory and resource lifecycle
            Op::AllocMemory => self.op_alloc_memory(a),
            Op::FreeMemory => {
                self.mem.free(a.req_handle(0)?)?;
                Ok(Reply::none())
            }
            Op::GetMemory => self.op_get_memory(a),
            Op::SetMemory => self.op_set_memory(a),
            Op::SetMemoryAt => self.op_set_memory_at(a),
            Op::AllocHostBuffer => {
                let h = self.mem.alloc_host(a.size(0));
                Ok(Reply::handle(h))
            }
            Op::FreeHostBuffer => {
                self.mem.free_host(a.req_handle(0)?)?;
                Ok(Reply::none())
            }
            Op::GetHostMemory => {
                let data = self.mem.read_host(a.req_handle(0)?)?;
                Ok(Reply::vec(data))
            }
            Op::SetHostMemory => self.op_set_host_memory(a),
            Op::CreateMemoryPointer => {
                let h = self
                    .mem
                    .create_view(a.req_handle(0)?, a.size(1), a.size(2))?;
                Ok(Reply::handle(h))
            }
            Op::FreeMemoryPointer => {
                self.mem.free_view(a.req_handle(0)?)?;
                Ok(Reply::none())
            }
            Op::CreateStream => {
                let h = self.mem.create_stream(a.opt_flag(0));
                Ok(Reply::handle(h))
            }
            Op::FreeStream => {
                self.mem.free_stream(a.req_handle(0)?)?;
                Ok(Reply::none())
            }
            Op::SynchronizeStream => {
                self.mem.synchronize_stream(a.req_handle(0)?)?;
                Ok(Reply::none())
            }
            Op::SynchronizeThread => {
                self.runtime.synchronize()?;
                Ok(Reply::none())
            }
            Op::CreateMemoryTest => self.op_create_memory_test(a),
            Op::FreeMemoryTest => {
                self.mem.free_memory_test(a.req_handle(0)?)?;
                Ok(Reply::none())
            }
            Op::RunMemoryTest => self.op_run_memory_test(a),

            // dnn contexts, descriptors, ops
            Op::CreateCudnn
            | Op::FreeCudnn
            | Op::CreateTensorDesc
            | Op::FreeTensorDesc
            | Op::SetTensorDesc
            | Op::AddTensor
            | Op::CreateFilterDesc
            | Op::FreeFilterDesc
            | Op::SetFilterDesc
            | Op::CreateConvDesc
            | Op::FreeConvDesc
            | Op::SetConvDesc
            | Op::GetConvInfo
            | Op::ConvForward
            | Op::ConvBackwardBias
            | Op::ConvBackwardFilter
            | Op::ConvBackwardData
            | Op::CreatePoolingDesc
            | Op::FreePoolingDesc
            | Op::SetPoolingDesc
            | Op::PoolingForward
            | Op::PoolingBackward
            | Op::CreateDropoutDesc
            | Op::FreeDropoutDesc
            | Op::SetDropoutDesc
            | Op::GetDropoutInfo
            | Op::DropoutForward
            | Op::DropoutBackward
            | Op::CreateLrnDesc
            | Op::FreeLrnDesc
            | Op::SetLrnDesc
            | Op::TanhForward
            | Op::TanhBackward
            | Op::SigmoidForward
            | Op::SigmoidBackward
            | Op::ReluForward
            | Op::ReluBackward
            | Op::SoftmaxForward
            | Op::SoftmaxBackward
            | Op::LrnForwardCC
            | Op::LrnBackwardCC
            | Op::LcnForwardCC
            | Op::LcnBackwardCC => self.dispatch_dnn(op, a),

            // collective communication and solvers
            Op::CreateNccl
            | Op::FreeNccl
            | Op::NcclInitSingleProcess
            | Op::NcclInitMultiProcess
            | Op::NcclBroadcast
            | Op::NcclAllReduce
            | Op::CreatePca
            | Op::FreePca
            | Op::RunPca
            | Op::CreateTsneGaussianPerplexity
            | Op::FreeTsneGaussianPerplexity
            | Op::FindTsneGaussianPerplexity
            | Op::CreateTsne
            | Op::FreeTsne
            | Op::ComputeTsneGradient
            | Op::EvaluateTsneError => self.dispatch_extra(op, a),

            // math kernels
            _ => self.dispatch_math(op, a),
        }
    }

    // =========================================================================
    // Control handlers
    // =========================================================================

    fn check_device(&self, device: usize) -> Result<usize> {
        if device >= self.runtime.device_count() {
            return Err(DeviceError::ParamOutOfRange(format!(
                "device {device} outside [0, {})",
                self.runtime.device_count()
            )));
        }
        Ok(device)
    }

    fn op_set_device(&mut self, a: &ArgPack<'_, T>) -> Result<Vec<T>> {
        let device = self.check_device(a.size(0))?;
        let flags = a.opt_int(1, DEVINIT_BLAS | DEVINIT_RNG | DEVINIT_SETSEED);
        let seed = a.opt_long(2, 0);
        if flags & DEVINIT_RESET != 0 {
            self.runtime.reset()?;
        }
        self.current_device = device;
        if flags & DEVINIT_BLAS != 0 {
            self.blas_ready = true;
        }
        if flags & DEVINIT_RNG != 0 {
            self.rng_ready = true;
        }
        if flags & DEVINIT_SETSEED != 0 {
            self.rng.reseed(seed as u64);
        }
        Ok(Reply::none())
    }

    fn op_get_device_property(&mut self, a: &ArgPack<'_, T>) -> Result<Vec<T>> {
        let device = a.size(0);
        match a.int(1) {
            DEVPROP_DEVICECOUNT => Ok(Reply::scalar(T::from_usize(self.runtime.device_count()))),
            DEVPROP_MULTIGPUBOARDGROUPID => {
                let group = self.runtime.board_group(device)?;
                Ok(Reply::scalar(T::from_i64(i64::from(group))))
            }
            other => Err(DeviceError::ParamOutOfRange(format!(
                "device property {other}"
            ))),
        }
    }

    fn op_check_memory_attributes(&mut self, a: &ArgPack<'_, T>) -> Result<Vec<T>> {
        let h_src = a.req_handle(0)?;
        let src_device = a.size(1);
        let h_dst = a.req_handle(2)?;
        let dst_device = a.size(3);
        let placed = self.mem.device_of(h_src)? == src_device
            && self.mem.device_of(h_dst)? == dst_device;
        let reachable = src_device == dst_device
            || self.runtime.can_access_peer(src_device, dst_device)?;
        Ok(Reply::scalar(if placed && reachable {
            T::one()
        } else {
            T::zero()
        }))
    }

    fn op_get_device_memory(&mut self, a: &ArgPack<'_, T>) -> Result<Vec<T>> {
        let device = self.check_device(a.size(0))?;
        let info = self.runtime.memory_info(device)?;
        let used = self.mem.allocated_bytes(device);
        let free = info.total.saturating_sub(used);
        let mb = |b: u64| T::from_f64(b as f64 / f64::from(1 << 20));
        Ok(Reply::vec(vec![
            mb(info.total),
            mb(free),
            mb(used),
            if info.estimated { T::one() } else { T::zero() },
        ]))
    }

    // =========================================================================
    // Memory handlers
    // =========================================================================

    fn op_alloc_memory(&mut self, a: &ArgPack<'_, T>) -> Result<Vec<T>> {
        let count = a.size(0);
        let h = self.mem.alloc(self.current_device, count)?;
        if a.len() > 1 {
            let src = a.req_handle(1);
            match src {
                Ok(src) => {
                    let data = self.mem.read_host(src)?;
                    let take = data.len().min(count);
                    self.mem.write(h, 0, &data[..take])?;
                }
                Err(e) => {
                    // roll the allocation back so a bad source leaks nothing
                    self.mem.free(h)?;
                    return Err(e);
                }
            }
        }
        Ok(Reply::handle(h))
    }

    fn op_get_memory(&mut self, a: &ArgPack<'_, T>) -> Result<Vec<T>> {
        let h = a.req_handle(0)?;
        let count = a.opt_size(1, self.mem.len_of(h)?);
        let data = self.mem.read(h, 0, count)?;
        Ok(Reply::vec(data))
    }

    fn op_set_memory(&mut self, a: &ArgPack<'_, T>) -> Result<Vec<T>> {
        let h = a.req_handle(0)?;
        let count = a.size(1);
        let data = a.tail(2);
        if data.len() < count {
            return Err(DeviceError::ParamOutOfRange(format!(
                "{} data elements supplied for count {count}",
                data.len()
            )));
        }
        self.mem.write(h, 0, &data[..count])?;
        Ok(Reply::none())
    }

    fn op_set_memory_at(&mut self, a: &ArgPack<'_, T>) -> Result<Vec<T>> {
        let h = a.req_handle(0)?;
        let count = a.size(1);
        let offset = a.size(2);
        let data = a.tail(3);
        if data.len() < count {
            return Err(DeviceError::ParamOutOfRange(format!(
                "{} data elements supplied for count {count}",
                data.len()
            )));
        }
        self.mem.write(h, offset, &data[..count])?;
        Ok(Reply::none())
    }

    fn op_set_host_memory(&mut self, a: &ArgPack<'_, T>) -> Result<Vec<T>> {
        let h = a.req_handle(0)?;
        let count = a.size(1);
        let data = a.tail(2);
        if data.len() < count {
            return Err(DeviceError::ParamOutOfRange(format!(
                "{} data elements supplied for count {count}",
                data.len()
            )));
        }
        self.mem.write_host(h, &data[..count])?;
        Ok(Reply::none())
    }

    fn op_create_memory_test(&mut self, a: &ArgPack<'_, T>) -> Result<Vec<T>> {
        let pct = a.val(0).to_f64();
        let (h, blocks, bytes, start, block_size) =
            self.mem.create_memory_test(self.current_device, pct)?;
        Ok(Reply::vec(vec![
            T::from_i64(h),
            T::from_usize(blocks),
            T::from_f64(bytes as f64),
            T::from_f64(start as f64),
            T::from_usize(block_size),
        ]))
    }

    fn op_run_memory_test(&mut self, a: &ArgPack<'_, T>) -> Result<Vec<T>> {
        let h = a.req_handle(0)?;
        let test_type = a.int(1);
        if test_type != 0 {
            return Err(DeviceError::ParamOutOfRange(format!(
                "memory test type {test_type}"
            )));
        }
        let start = a.size(2);
        let count = a.size(3);
        let write = a.nonzero(4);
        let read = a.nonzero(5);
        let failed = self.mem.run_memory_test(h, start, count, write, read)?;
        let mut out = Vec::with_capacity(1 + failed.len());
        out.push(T::from_usize(failed.len()));
        out.extend(failed.into_iter().map(T::from_usize));
        Ok(Reply::vec(out))
    }
}

impl<T: Element, R: DeviceRuntime> Drop for Device<T, R> {
    fn drop(&mut self) {
        // release live contexts before the log handle goes away
        self.blas_ready = false;
        self.rng_ready = false;
        self.comms.clear();
        self.solvers.clear();
        self.dnn.clear();
        self.mem.clear();
        debug!("device facade down");
    }
}
