//! Memory bank: device buffers, buffer views, host buffers, streams, and
//! memory-test sessions.
//!
//! Buffers live in one handle namespace together with views (memory
//! pointers), so any operation that takes a data handle accepts either. A
//! view aliases a range of its parent's storage and is never freed through
//! the buffer path, nor the parent through the view path.

use tracing::debug;

use crate::element::Element;
use crate::error::{DeviceError, Result};
use crate::handle::{Handle, HandleTable};

/// One entry in the unified data-handle namespace.
#[derive(Debug)]
enum MemoryEntry<T> {
    /// A buffer owning its storage on a (virtual) device.
    Owned { data: Vec<T>, device: usize },
    /// An aliasing window into another entry's storage.
    View {
        parent: Handle,
        offset: usize,
        count: usize,
    },
}

/// Execution stream token.
///
/// The host backend completes work inline; streams order nothing but are
/// real resources with create/free/synchronize lifecycle.
#[derive(Debug, Clone, Copy)]
pub struct Stream {
    /// Created with the non-blocking flag.
    pub non_blocking: bool,
}

/// Memory-test session over a scratch allocation.
#[derive(Debug)]
pub struct MemoryTest {
    block_size: usize,
    blocks: usize,
    scratch: Vec<u8>,
}

/// Bytes per memory-test block.
const MEMTEST_BLOCK_BYTES: usize = 1 << 20;

/// Resource manager for everything data-shaped.
#[derive(Debug)]
pub struct MemoryBank<T> {
    entries: HandleTable<MemoryEntry<T>>,
    host: HandleTable<Vec<T>>,
    streams: HandleTable<Stream>,
    tests: HandleTable<MemoryTest>,
    allocated: Vec<u64>,
    capacity: Vec<u64>,
}

impl<T: Element> MemoryBank<T> {
    /// Create a bank for `capacity_per_device.len()` devices.
    #[must_use]
    pub fn new(capacity_per_device: Vec<u64>) -> Self {
        Self {
            entries: HandleTable::new("buffer"),
            host: HandleTable::new("host buffer"),
            streams: HandleTable::new("stream"),
            tests: HandleTable::new("memory test"),
            allocated: vec![0; capacity_per_device.len()],
            capacity: capacity_per_device,
        }
    }

    // =========================================================================
    // Device buffers and views
    // =========================================================================

    /// Allocate a zero-filled buffer of `count` elements on `device`.
    ///
    /// # Errors
    ///
    /// `MemoryOut` when the device capacity would be exceeded.
    pub fn alloc(&mut self, device: usize, count: usize) -> Result<Handle> {
        let bytes = (count * std::mem::size_of::<T>()) as u64;
        let used = self.allocated.get(device).copied().unwrap_or(0);
        let cap = self.capacity.get(device).copied().unwrap_or(0);
        if used + bytes > cap {
            return Err(DeviceError::MemoryOut {
                requested: bytes as usize,
                device,
            });
        }
        self.allocated[device] += bytes;
        let h = self.entries.insert(MemoryEntry::Owned {
            data: vec![T::zero(); count],
            device,
        });
        debug!(handle = h, count, device, "alloc buffer");
        Ok(h)
    }

    /// Free an owned buffer.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` for views, freed handles, or zero.
    pub fn free(&mut self, handle: Handle) -> Result<()> {
        match self.entries.get(handle)? {
            MemoryEntry::Owned { .. } => {}
            MemoryEntry::View { .. } => {
                return Err(DeviceError::InvalidHandle {
                    kind: "buffer",
                    handle,
                })
            }
        }
        if let MemoryEntry::Owned { data, device } = self.entries.remove(handle)? {
            let bytes = (data.len() * std::mem::size_of::<T>()) as u64;
            self.allocated[device] = self.allocated[device].saturating_sub(bytes);
        }
        debug!(handle, "free buffer");
        Ok(())
    }

    /// Create a view of `count` elements at `offset` into `parent`.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` for a dead parent, `MemoryRange` for an out-of-bounds
    /// window.
    pub fn create_view(&mut self, parent: Handle, offset: usize, count: usize) -> Result<Handle> {
        let (root, base, len) = self.resolve(parent)?;
        if offset + count > len {
            return Err(DeviceError::MemoryRange { offset, count, len });
        }
        Ok(self.entries.insert(MemoryEntry::View {
            parent: root,
            offset: base + offset,
            count,
        }))
    }

    /// Free a view. The parent storage is untouched.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` for owned buffers, freed handles, or zero.
    pub fn free_view(&mut self, handle: Handle) -> Result<()> {
        match self.entries.get(handle)? {
            MemoryEntry::View { .. } => {
                self.entries.remove(handle)?;
                Ok(())
            }
            MemoryEntry::Owned { .. } => Err(DeviceError::InvalidHandle {
                kind: "memory pointer",
                handle,
            }),
        }
    }

    /// Resolve a data handle to `(root buffer, base offset, length)`.
    fn resolve(&self, handle: Handle) -> Result<(Handle, usize, usize)> {
        match self.entries.get(handle)? {
            MemoryEntry::Owned { data, .. } => Ok((handle, 0, data.len())),
            MemoryEntry::View {
                parent,
                offset,
                count,
            } => {
                // views always point at an owned root
                match self.entries.get(*parent)? {
                    MemoryEntry::Owned { .. } => Ok((*parent, *offset, *count)),
                    MemoryEntry::View { .. } => Err(DeviceError::InvalidHandle {
                        kind: "memory pointer",
                        handle: *parent,
                    }),
                }
            }
        }
    }

    fn owned(&self, root: Handle) -> Result<&Vec<T>> {
        match self.entries.get(root)? {
            MemoryEntry::Owned { data, .. } => Ok(data),
            MemoryEntry::View { .. } => Err(DeviceError::InvalidHandle {
                kind: "buffer",
                handle: root,
            }),
        }
    }

    fn owned_mut(&mut self, root: Handle) -> Result<&mut Vec<T>> {
        match self.entries.get_mut(root)? {
            MemoryEntry::Owned { data, .. } => Ok(data),
            MemoryEntry::View { .. } => Err(DeviceError::InvalidHandle {
                kind: "buffer",
                handle: root,
            }),
        }
    }

    /// Element length visible through `handle`.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn len_of(&self, handle: Handle) -> Result<usize> {
        Ok(self.resolve(handle)?.2)
    }

    /// Device ordinal owning the storage behind `handle`.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn device_of(&self, handle: Handle) -> Result<usize> {
        let (root, _, _) = self.resolve(handle)?;
        match self.entries.get(root)? {
            MemoryEntry::Owned { device, .. } => Ok(*device),
            MemoryEntry::View { .. } => Err(DeviceError::InvalidHandle {
                kind: "buffer",
                handle: root,
            }),
        }
    }

    /// Read `count` elements starting at `offset` within the handle's window.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`, `MemoryRange`.
    pub fn read(&self, handle: Handle, offset: usize, count: usize) -> Result<Vec<T>> {
        let (root, base, len) = self.resolve(handle)?;
        if offset + count > len {
            return Err(DeviceError::MemoryRange { offset, count, len });
        }
        let data = self.owned(root)?;
        Ok(data[base + offset..base + offset + count].to_vec())
    }

    /// Read the whole window behind `handle`.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn read_all(&self, handle: Handle) -> Result<Vec<T>> {
        let len = self.len_of(handle)?;
        self.read(handle, 0, len)
    }

    /// Write `values` starting at `offset` within the handle's window.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`, `MemoryRange`.
    pub fn write(&mut self, handle: Handle, offset: usize, values: &[T]) -> Result<()> {
        let (root, base, len) = self.resolve(handle)?;
        if offset + values.len() > len {
            return Err(DeviceError::MemoryRange {
                offset,
                count: values.len(),
                len,
            });
        }
        let data = self.owned_mut(root)?;
        data[base + offset..base + offset + values.len()].copy_from_slice(values);
        Ok(())
    }

    /// Fill `count` elements at `offset` with `value`.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`, `MemoryRange`.
    pub fn fill(&mut self, handle: Handle, offset: usize, count: usize, value: T) -> Result<()> {
        let (root, base, len) = self.resolve(handle)?;
        if offset + count > len {
            return Err(DeviceError::MemoryRange { offset, count, len });
        }
        let data = self.owned_mut(root)?;
        for v in &mut data[base + offset..base + offset + count] {
            *v = value;
        }
        Ok(())
    }

    /// Copy `count` elements between two data handles (which may alias).
    ///
    /// # Errors
    ///
    /// `InvalidHandle`, `MemoryRange`.
    pub fn copy(
        &mut self,
        count: usize,
        src: Handle,
        dst: Handle,
        src_offset: usize,
        dst_offset: usize,
    ) -> Result<()> {
        let tmp = self.read(src, src_offset, count)?;
        self.write(dst, dst_offset, &tmp)
    }

    /// Bytes currently allocated on `device`.
    #[must_use]
    pub fn allocated_bytes(&self, device: usize) -> u64 {
        self.allocated.get(device).copied().unwrap_or(0)
    }

    /// Number of live data handles (buffers plus views).
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.entries.len()
    }

    // =========================================================================
    // Host buffers
    // =========================================================================

    /// Allocate a zero-filled host buffer.
    pub fn alloc_host(&mut self, count: usize) -> Handle {
        self.host.insert(vec![T::zero(); count])
    }

    /// Free a host buffer.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn free_host(&mut self, handle: Handle) -> Result<()> {
        self.host.remove(handle).map(|_| ())
    }

    /// Read a whole host buffer.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn read_host(&self, handle: Handle) -> Result<Vec<T>> {
        Ok(self.host.get(handle)?.clone())
    }

    /// Overwrite the front of a host buffer with `values`.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`, `MemoryRange` when `values` exceed the buffer.
    pub fn write_host(&mut self, handle: Handle, values: &[T]) -> Result<()> {
        let buf = self.host.get_mut(handle)?;
        if values.len() > buf.len() {
            return Err(DeviceError::MemoryRange {
                offset: 0,
                count: values.len(),
                len: buf.len(),
            });
        }
        buf[..values.len()].copy_from_slice(values);
        Ok(())
    }

    // =========================================================================
    // Streams
    // =========================================================================

    /// Create a stream token.
    pub fn create_stream(&mut self, non_blocking: bool) -> Handle {
        self.streams.insert(Stream { non_blocking })
    }

    /// Free a stream token.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn free_stream(&mut self, handle: Handle) -> Result<()> {
        self.streams.remove(handle).map(|_| ())
    }

    /// Validate a stream handle; inline execution means there is nothing to
    /// wait for.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn synchronize_stream(&self, handle: Handle) -> Result<()> {
        self.streams.get(handle).map(|_| ())
    }

    /// Whether `handle` is a live stream.
    #[must_use]
    pub fn stream_exists(&self, handle: Handle) -> bool {
        self.streams.contains(handle)
    }

    // =========================================================================
    // Memory tests
    // =========================================================================

    /// Allocate a memory-test session over `pct` of the free capacity of
    /// `device`. Returns `(handle, blocks, bytes, start, block size)`.
    ///
    /// # Errors
    ///
    /// `ParamOutOfRange` for a percentage outside (0, 1].
    pub fn create_memory_test(
        &mut self,
        device: usize,
        pct: f64,
    ) -> Result<(Handle, usize, u64, u64, usize)> {
        if !(pct > 0.0 && pct <= 1.0) {
            return Err(DeviceError::ParamOutOfRange(format!(
                "memory test percentage {pct} outside (0, 1]"
            )));
        }
        let cap = self.capacity.get(device).copied().unwrap_or(0);
        let free = cap.saturating_sub(self.allocated_bytes(device));
        let bytes = ((free as f64) * pct) as u64;
        let blocks = ((bytes as usize) / MEMTEST_BLOCK_BYTES).max(1);
        let scratch = vec![0_u8; blocks * MEMTEST_BLOCK_BYTES];
        let start = scratch.as_ptr() as u64;
        let h = self.tests.insert(MemoryTest {
            block_size: MEMTEST_BLOCK_BYTES,
            blocks,
            scratch,
        });
        Ok((
            h,
            blocks,
            (blocks * MEMTEST_BLOCK_BYTES) as u64,
            start,
            MEMTEST_BLOCK_BYTES,
        ))
    }

    /// Free a memory-test session.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`.
    pub fn free_memory_test(&mut self, handle: Handle) -> Result<()> {
        self.tests.remove(handle).map(|_| ())
    }

    /// Run write/verify phases over `[start_block, start_block + block_count)`.
    /// Returns the indices of blocks that failed verification.
    ///
    /// # Errors
    ///
    /// `InvalidHandle`, `ParamOutOfRange` for a block range outside the
    /// session.
    pub fn run_memory_test(
        &mut self,
        handle: Handle,
        start_block: usize,
        block_count: usize,
        write: bool,
        read: bool,
    ) -> Result<Vec<usize>> {
        let test = self.tests.get_mut(handle)?;
        if start_block + block_count > test.blocks {
            return Err(DeviceError::ParamOutOfRange(format!(
                "block range [{start_block}, {}) outside {} blocks",
                start_block + block_count,
                test.blocks
            )));
        }
        let mut failed = Vec::new();
        for b in start_block..start_block + block_count {
            let span = &mut test.scratch[b * test.block_size..(b + 1) * test.block_size];
            let pattern = (b & 0xFF) as u8 ^ 0xA5;
            if write {
                span.fill(pattern);
            }
            if read && span.iter().any(|&v| v != pattern) {
                failed.push(b);
            }
        }
        Ok(failed)
    }

    /// Drop every resource the bank holds.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.host.clear();
        self.streams.clear();
        self.tests.clear();
        for a in &mut self.allocated {
            *a = 0;
        }
    }
}
