//! Device runtime abstraction.
//!
//! The facade never talks to a vendor runtime directly; it goes through
//! `DeviceRuntime` for device enumeration, properties, memory totals, peer
//! access, and device-wide reset/synchronize. `HostRuntime` is the reference
//! implementation: a configurable table of virtual devices backed by host
//! memory, so the full operation catalogue runs without GPU hardware.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{DeviceError, Result};

/// Memory totals reported for one device, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    /// Total device memory.
    pub total: u64,
    /// Whether the figures are estimated rather than queried exactly.
    pub estimated: bool,
}

/// Runtime seam: everything the facade needs from the device layer.
pub trait DeviceRuntime {
    /// Number of visible devices.
    fn device_count(&self) -> usize;

    /// Human-readable device name.
    ///
    /// # Errors
    ///
    /// Out-of-range device ordinal.
    fn name(&self, device: usize) -> Result<String>;

    /// Multi-GPU board group id for the device.
    ///
    /// # Errors
    ///
    /// Out-of-range device ordinal.
    fn board_group(&self, device: usize) -> Result<i32>;

    /// Memory totals for the device.
    ///
    /// # Errors
    ///
    /// Out-of-range device ordinal.
    fn memory_info(&self, device: usize) -> Result<MemoryInfo>;

    /// Whether `device` can access `peer`'s memory directly.
    ///
    /// # Errors
    ///
    /// Out-of-range ordinal on either side.
    fn can_access_peer(&self, device: usize, peer: usize) -> Result<bool>;

    /// Enable direct access from `device` to `peer`.
    ///
    /// # Errors
    ///
    /// Out-of-range ordinal, or the pair cannot peer.
    fn enable_peer_access(&mut self, device: usize, peer: usize) -> Result<()>;

    /// Disable direct access from `device` to `peer`.
    ///
    /// # Errors
    ///
    /// Out-of-range ordinal.
    fn disable_peer_access(&mut self, device: usize, peer: usize) -> Result<()>;

    /// Reset the device, discarding runtime state.
    ///
    /// # Errors
    ///
    /// Runtime fault.
    fn reset(&mut self) -> Result<()>;

    /// Block until all queued device work completes.
    ///
    /// # Errors
    ///
    /// Runtime fault.
    fn synchronize(&self) -> Result<()>;

    /// Peer-to-peer capability summary for the device.
    ///
    /// # Errors
    ///
    /// Out-of-range device ordinal.
    fn p2p_info(&self, device: usize) -> Result<String>;

    /// General device information line; `verbose` adds memory figures.
    ///
    /// # Errors
    ///
    /// Out-of-range device ordinal.
    fn info(&self, device: usize, verbose: bool) -> Result<String>;
}

/// Configuration for the host reference runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Number of virtual devices to expose.
    pub device_count: usize,
    /// Memory capacity per virtual device, in bytes.
    pub memory_per_device: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            device_count: 1,
            memory_per_device: 1 << 30,
        }
    }
}

/// Host-memory reference runtime.
///
/// All virtual devices share the host address space; peer access between any
/// pair therefore succeeds once enabled. Memory figures are estimates.
#[derive(Debug)]
pub struct HostRuntime {
    config: RuntimeConfig,
    peers: HashSet<(usize, usize)>,
}

impl HostRuntime {
    /// Create a runtime exposing the configured virtual devices.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            peers: HashSet::new(),
        }
    }

    fn check(&self, device: usize) -> Result<()> {
        if device >= self.config.device_count {
            return Err(DeviceError::ParamOutOfRange(format!(
                "device {device} outside [0, {})",
                self.config.device_count
            )));
        }
        Ok(())
    }
}

impl Default for HostRuntime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl DeviceRuntime for HostRuntime {
    fn device_count(&self) -> usize {
        self.config.device_count
    }

    fn name(&self, device: usize) -> Result<String> {
        self.check(device)?;
        Ok(format!("Host Reference Device {device}"))
    }

    fn board_group(&self, device: usize) -> Result<i32> {
        self.check(device)?;
        Ok(0)
    }

    fn memory_info(&self, device: usize) -> Result<MemoryInfo> {
        self.check(device)?;
        Ok(MemoryInfo {
            total: self.config.memory_per_device,
            estimated: true,
        })
    }

    fn can_access_peer(&self, device: usize, peer: usize) -> Result<bool> {
        self.check(device)?;
        self.check(peer)?;
        Ok(device != peer)
    }

    fn enable_peer_access(&mut self, device: usize, peer: usize) -> Result<()> {
        if !self.can_access_peer(device, peer)? {
            return Err(DeviceError::Runtime(format!(
                "device {device} cannot peer with {peer}"
            )));
        }
        self.peers.insert((device, peer));
        Ok(())
    }

    fn disable_peer_access(&mut self, device: usize, peer: usize) -> Result<()> {
        self.check(device)?;
        self.check(peer)?;
        self.peers.remove(&(device, peer));
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.peers.clear();
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }

    fn p2p_info(&self, device: usize) -> Result<String> {
        self.check(device)?;
        let enabled: Vec<String> = self
            .peers
            .iter()
            .filter(|(d, _)| *d == device)
            .map(|(_, p)| p.to_string())
            .collect();
        Ok(format!(
            "device {device}: p2p capable, enabled peers [{}]",
            enabled.join(", ")
        ))
    }

    fn info(&self, device: usize, verbose: bool) -> Result<String> {
        let name = self.name(device)?;
        if verbose {
            let mem = self.memory_info(device)?;
            Ok(format!(
                "{name} ({} MB total, estimated)",
                mem.total / (1 << 20)
            ))
        } else {
            Ok(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_exposes_one_device() {
        let rt = HostRuntime::default();
        assert_eq!(rt.device_count(), 1);
        assert!(rt.name(0).unwrap().contains("Device 0"));
        assert!(rt.name(1).is_err());
    }

    #[test]
    fn peer_access_lifecycle() {
        let mut rt = HostRuntime::new(RuntimeConfig {
            device_count: 2,
            memory_per_device: 1 << 20,
        });
        assert!(rt.can_access_peer(0, 1).unwrap());
        assert!(!rt.can_access_peer(0, 0).unwrap());
        rt.enable_peer_access(0, 1).unwrap();
        assert!(rt.p2p_info(0).unwrap().contains('1'));
        rt.disable_peer_access(0, 1).unwrap();
        assert!(rt.enable_peer_access(0, 0).is_err());
    }

    #[test]
    fn verbose_info_includes_memory() {
        let rt = HostRuntime::default();
        let info = rt.info(0, true).unwrap();
        assert!(info.contains("MB"));
        assert!(!rt.info(0, false).unwrap().contains("MB"));
    }
}
