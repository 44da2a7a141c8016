//! Collective communication: communicator resources and the in-process
//! group rendezvous behind broadcast and all-reduce.
//!
//! Communicators are created per rank with a shared group key formatted from
//! the caller's guid quintuple. The reference backend realizes the group as
//! shared staging state inside the facade: broadcast publishes rank 0's
//! buffer, all-reduce accumulates per-rank contributions and resolves once
//! every rank has arrived. A real transport would replace the rendezvous
//! behind the same surface.

use std::collections::HashMap;

use tracing::debug;

use crate::element::Element;
use crate::error::{DeviceError, Result};
use crate::handle::{Handle, HandleTable};
use crate::memory::MemoryBank;

/// Reduction applied by all-reduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Elementwise sum.
    Sum,
    /// Elementwise product.
    Prod,
    /// Elementwise maximum.
    Max,
    /// Elementwise minimum.
    Min,
}

impl ReduceOp {
    /// Decode the wire discriminant.
    ///
    /// # Errors
    ///
    /// `ParamOutOfRange` outside 0..=3.
    pub fn from_wire(v: i32) -> Result<Self> {
        match v {
            0 => Ok(Self::Sum),
            1 => Ok(Self::Prod),
            2 => Ok(Self::Max),
            3 => Ok(Self::Min),
            other => Err(DeviceError::ParamOutOfRange(format!("reduce op {other}"))),
        }
    }

    fn fold<T: Element>(self, acc: T, v: T) -> T {
        match self {
            Self::Sum => acc + v,
            Self::Prod => acc * v,
            Self::Max => acc.max(v),
            Self::Min => acc.min(v),
        }
    }
}

/// One rank's communicator.
#[derive(Debug, Clone)]
pub struct Communicator {
    /// Device the rank runs on.
    pub device: usize,
    /// World size of the group.
    pub world: usize,
    /// This communicator's rank.
    pub rank: usize,
    /// Rendezvous key shared by the group.
    pub key: String,
    /// Set by either init path.
    pub initialized: bool,
}

/// Pending all-reduce accumulation for one group.
#[derive(Debug, Default)]
struct PendingReduce<T> {
    acc: Vec<T>,
    buffers: Vec<Handle>,
    ranks: Vec<usize>,
}

/// Group rendezvous state.
#[derive(Debug)]
struct Group<T> {
    world: usize,
    buffer_count: usize,
    broadcast_staging: Option<Vec<T>>,
    reduce: Option<PendingReduce<T>>,
}

/// Communicator table plus group rendezvous.
#[derive(Debug)]
pub struct CollectiveBank<T> {
    comms: HandleTable<Communicator>,
    groups: HashMap<String, Group<T>>,
}

impl<T: Element> Default for CollectiveBank<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> CollectiveBank<T> {
    /// Empty bank.
    #[must_use]
    pub fn new() -> Self {
        Self {
            comms: HandleTable::new("communicator"),
            groups: HashMap::new(),
        }
    }

    /// Format the rendezvous key from the caller's guid quintuple.
    #[must_use]
    pub fn format_key(g1: u32, g2: u32, g3: u32, g4: u32, g5: u64) -> String {
        format!("nccl-{g1:08x}-{g2:04x}-{g3:04x}-{g4:04x}-{g5:012x}")
    }

    /// Create a communicator for one rank of a group.
    ///
    /// # Errors
    ///
    /// `ParamOutOfRange` for an empty world or a rank outside it,
    /// `GroupMismatch` for duplicate ranks or conflicting world sizes.
    pub fn create(
        &mut self,
        device: usize,
        world: usize,
        rank: usize,
        key: String,
    ) -> Result<Handle> {
        if world == 0 || rank >= world {
            return Err(DeviceError::ParamOutOfRange(format!(
                "rank {rank} outside world of {world}"
            )));
        }
        for (_, c) in self.comms.iter() {
            if c.key == key {
                if c.world != world {
                    return Err(DeviceError::GroupMismatch(format!(
                        "world {world} conflicts with existing {}",
                        c.world
                    )));
                }
                if c.rank == rank {
                    return Err(DeviceError::GroupMismatch(format!(
                        "rank {rank} already present in {key}"
                    )));
                }
            }
        }
        let h = self.comms.insert(Communicator {
            device,
            world,
            rank,
            key: key.clone(),
            initialized: false,
        });
        debug!(handle = h, world, rank, key = key.as_str(), "create communicator");
        Ok(h)
    }

    /// Free a communicator; the group dissolves with its last member.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn free(&mut self, h: Handle) -> Result<()> {
        let comm = self.comms.remove(h)?;
        let still_used = self.comms.iter().any(|(_, c)| c.key == comm.key);
        if !still_used {
            self.groups.remove(&comm.key);
        }
        Ok(())
    }

    /// Look up a communicator.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn get(&self, h: Handle) -> Result<&Communicator> {
        self.comms.get(h)
    }

    /// Number of live communicators.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.comms.len()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.comms.clear();
        self.groups.clear();
    }

    /// Bind same-process communicators into one group.
    ///
    /// Every listed handle must be live, share one key, and together cover
    /// each rank exactly once.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`, `GroupMismatch` on partial or conflicting coverage.
    pub fn init_single_process(&mut self, buffer_count: usize, handles: &[Handle]) -> Result<()> {
        if handles.is_empty() {
            return Err(DeviceError::ParamNull);
        }
        let first = self.comms.get(handles[0])?.clone();
        if handles.len() != first.world {
            return Err(DeviceError::GroupMismatch(format!(
                "{} communicators for a world of {}",
                handles.len(),
                first.world
            )));
        }
        let mut seen = vec![false; first.world];
        for &h in handles {
            let c = self.comms.get(h)?;
            if c.key != first.key {
                return Err(DeviceError::GroupMismatch(format!(
                    "key {} does not match {}",
                    c.key, first.key
                )));
            }
            if seen[c.rank] {
                return Err(DeviceError::GroupMismatch(format!(
                    "rank {} bound twice",
                    c.rank
                )));
            }
            seen[c.rank] = true;
        }
        for &h in handles {
            self.comms.get_mut(h)?.initialized = true;
        }
        self.groups.insert(
            first.key.clone(),
            Group {
                world: first.world,
                buffer_count,
                broadcast_staging: None,
                reduce: None,
            },
        );
        Ok(())
    }

    /// Join a group through the rendezvous key (cross-process shape; the
    /// reference backend resolves it in-process).
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn init_multi_process(&mut self, buffer_count: usize, h: Handle) -> Result<()> {
        let comm = self.comms.get_mut(h)?;
        comm.initialized = true;
        let (key, world) = (comm.key.clone(), comm.world);
        self.groups.entry(key).or_insert(Group {
            world,
            buffer_count,
            broadcast_staging: None,
            reduce: None,
        });
        Ok(())
    }

    fn group_for(&mut self, h: Handle) -> Result<(Communicator, &mut Group<T>)> {
        let comm = self.comms.get(h)?.clone();
        if !comm.initialized {
            return Err(DeviceError::NotInitialized("communicator"));
        }
        let group = self
            .groups
            .get_mut(&comm.key)
            .ok_or(DeviceError::NotInitialized("communicator group"))?;
        Ok((comm, group))
    }

    /// Broadcast: rank 0 publishes its buffer, other ranks copy it in.
    ///
    /// # Errors
    ///
    /// `NotInitialized` before init or before rank 0 arrives, handle and
    /// range errors on the data buffer.
    pub fn broadcast(
        &mut self,
        mem: &mut MemoryBank<T>,
        h: Handle,
        stream: Handle,
        h_x: Handle,
        count: usize,
    ) -> Result<()> {
        if stream > 0 {
            mem.synchronize_stream(stream)?;
        }
        let (comm, group) = self.group_for(h)?;
        if count > group.buffer_count && group.buffer_count > 0 {
            return Err(DeviceError::ParamOutOfRange(format!(
                "broadcast count {count} exceeds group buffer count {}",
                group.buffer_count
            )));
        }
        if comm.rank == 0 {
            group.broadcast_staging = Some(mem.read(h_x, 0, count)?);
            Ok(())
        } else {
            match &group.broadcast_staging {
                Some(data) => {
                    let data = data.clone();
                    mem.write(h_x, 0, &data[..count.min(data.len())])
                }
                None => Err(DeviceError::NotInitialized("broadcast root")),
            }
        }
    }

    /// All-reduce with op and scale. Contributions accumulate per rank; once
    /// all ranks have arrived the scaled result is written back to every
    /// contributed buffer.
    ///
    /// # Errors
    ///
    /// `NotInitialized` before init, `GroupMismatch` when a rank contributes
    /// twice in one round, handle and range errors on the data buffers.
    #[allow(clippy::too_many_arguments)]
    pub fn all_reduce(
        &mut self,
        mem: &mut MemoryBank<T>,
        h: Handle,
        stream: Handle,
        h_x: Handle,
        count: usize,
        op: ReduceOp,
        scale: T,
    ) -> Result<()> {
        if stream > 0 {
            mem.synchronize_stream(stream)?;
        }
        let (comm, _) = self.group_for(h)?;
        let contribution = mem.read(h_x, 0, count)?;
        let group = self
            .groups
            .get_mut(&comm.key)
            .ok_or(DeviceError::NotInitialized("communicator group"))?;
        let pending = group.reduce.get_or_insert_with(|| PendingReduce {
            acc: contribution.clone(),
            buffers: Vec::new(),
            ranks: Vec::new(),
        });
        if pending.ranks.contains(&comm.rank) {
            return Err(DeviceError::GroupMismatch(format!(
                "rank {} reduced twice in one round",
                comm.rank
            )));
        }
        if !pending.ranks.is_empty() {
            for (i, slot) in pending.acc.iter_mut().enumerate() {
                *slot = op.fold(*slot, contribution[i]);
            }
        }
        pending.ranks.push(comm.rank);
        pending.buffers.push(h_x);
        if pending.ranks.len() == group.world {
            let mut result = pending.acc.clone();
            for v in &mut result {
                *v = *v * scale;
            }
            let buffers = pending.buffers.clone();
            group.reduce = None;
            for b in buffers {
                mem.write(b, 0, &result)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(world: usize) -> (CollectiveBank<f32>, MemoryBank<f32>, Vec<Handle>) {
        let mut bank = CollectiveBank::new();
        let mem = MemoryBank::new(vec![1 << 20; world]);
        let key = CollectiveBank::<f32>::format_key(1, 2, 3, 4, 5);
        let comms: Vec<Handle> = (0..world)
            .map(|r| bank.create(r, world, r, key.clone()).unwrap())
            .collect();
        bank.init_single_process(1024, &comms).unwrap();
        (bank, mem, comms)
    }

    #[test]
    fn key_format_is_stable() {
        assert_eq!(
            CollectiveBank::<f32>::format_key(0xdead_beef, 1, 2, 3, 0xabc),
            "nccl-deadbeef-0001-0002-0003-000000000abc"
        );
    }

    #[test]
    fn duplicate_rank_is_rejected() {
        let mut bank: CollectiveBank<f32> = CollectiveBank::new();
        let key = CollectiveBank::<f32>::format_key(9, 9, 9, 9, 9);
        bank.create(0, 2, 0, key.clone()).unwrap();
        let err = bank.create(1, 2, 0, key).unwrap_err();
        assert_eq!(err.code(), 11);
    }

    #[test]
    fn ops_before_init_fail() {
        let mut bank: CollectiveBank<f32> = CollectiveBank::new();
        let mut mem: MemoryBank<f32> = MemoryBank::new(vec![1 << 20]);
        let key = CollectiveBank::<f32>::format_key(1, 1, 1, 1, 1);
        let c = bank.create(0, 2, 0, key).unwrap();
        let hx = mem.alloc(0, 4).unwrap();
        let err = bank.broadcast(&mut mem, c, 0, hx, 4).unwrap_err();
        assert_eq!(err.code(), 7);
    }

    #[test]
    fn broadcast_copies_root_buffer() {
        let (mut bank, mut mem, comms) = setup(2);
        let root = mem.alloc(0, 4).unwrap();
        mem.write(root, 0, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let other = mem.alloc(1, 4).unwrap();
        bank.broadcast(&mut mem, comms[0], 0, root, 4).unwrap();
        bank.broadcast(&mut mem, comms[1], 0, other, 4).unwrap();
        assert_eq!(mem.read_all(other).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn all_reduce_sum_with_scale() {
        let (mut bank, mut mem, comms) = setup(2);
        let a = mem.alloc(0, 2).unwrap();
        let b = mem.alloc(1, 2).unwrap();
        mem.write(a, 0, &[1.0, 2.0]).unwrap();
        mem.write(b, 0, &[3.0, 4.0]).unwrap();
        bank.all_reduce(&mut mem, comms[0], 0, a, 2, ReduceOp::Sum, 0.5)
            .unwrap();
        // first arrival leaves buffers untouched
        assert_eq!(mem.read_all(a).unwrap(), vec![1.0, 2.0]);
        bank.all_reduce(&mut mem, comms[1], 0, b, 2, ReduceOp::Sum, 0.5)
            .unwrap();
        assert_eq!(mem.read_all(a).unwrap(), vec![2.0, 3.0]);
        assert_eq!(mem.read_all(b).unwrap(), vec![2.0, 3.0]);
    }

    #[test]
    fn all_reduce_max() {
        let (mut bank, mut mem, comms) = setup(2);
        let a = mem.alloc(0, 2).unwrap();
        let b = mem.alloc(1, 2).unwrap();
        mem.write(a, 0, &[1.0, 9.0]).unwrap();
        mem.write(b, 0, &[5.0, 2.0]).unwrap();
        bank.all_reduce(&mut mem, comms[0], 0, a, 2, ReduceOp::Max, 1.0)
            .unwrap();
        bank.all_reduce(&mut mem, comms[1], 0, b, 2, ReduceOp::Max, 1.0)
            .unwrap();
        assert_eq!(mem.read_all(a).unwrap(), vec![5.0, 9.0]);
    }

    #[test]
    fn double_contribution_in_round_is_rejected() {
        let (mut bank, mut mem, comms) = setup(2);
        let a = mem.alloc(0, 2).unwrap();
        bank.all_reduce(&mut mem, comms[0], 0, a, 2, ReduceOp::Sum, 1.0)
            .unwrap();
        let err = bank
            .all_reduce(&mut mem, comms[0], 0, a, 2, ReduceOp::Sum, 1.0)
            .unwrap_err();
        assert_eq!(err.code(), 11);
    }

    #[test]
    fn free_dissolves_group_with_last_member() {
        let (mut bank, _mem, comms) = setup(2);
        bank.free(comms[0]).unwrap();
        assert_eq!(bank.live_handles(), 1);
        bank.free(comms[1]).unwrap();
        assert_eq!(bank.live_handles(), 0);
        assert!(bank.free(comms[0]).is_err());
    }
}
