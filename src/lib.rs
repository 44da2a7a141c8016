//! # Despachar
//!
//! Handle-based dispatch facade for deep-net compute primitives.
//!
//! Despachar (Spanish: "to dispatch, to attend to") exposes a flat catalogue
//! of operations (device control, memory and descriptor lifecycle, dnn-style
//! tensor ops, raw math kernels, solvers, and collectives) behind one
//! uniform boundary: a numeric argument buffer in, a status code and a
//! numeric result buffer out.
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------+
//! |  Device::invoke / query   |  <- arity check, positional decode, pack
//! +---------------------------+
//! |  MemoryBank | Dnn | math  |  <- typed delegate layer (handles resolve
//! |  SolverBank | Collective  |     here, exactly once per call)
//! +---------------------------+
//! |  DeviceRuntime trait      |  <- vendor-runtime seam
//! |  (HostRuntime reference)  |
//! +---------------------------+
//! ```
//!
//! Every operation follows the same shape: validate the declared `[min, max]`
//! argument arity before reading anything, decode fields by fixed position,
//! make exactly one delegate call, and pack a reply of the declared shape
//! (none, single handle, single scalar, or a fixed small vector). Marshalling
//! itself can only fail with a parameter-out-of-range or missing-parameter
//! error; everything else propagates unchanged from the delegate layer.
//!
//! ## Example
//!
//! ```rust
//! use despachar::{Device, Op};
//!
//! let mut device: Device<f32> = Device::host();
//! let h = device.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
//! device
//!     .invoke(Op::SetMemory, &[h, 4.0, 1.0, 2.0, 3.0, 4.0])
//!     .unwrap();
//! let sum = device.invoke(Op::Asum, &[4.0, h]).unwrap();
//! assert_eq!(sum, vec![10.0]);
//!
//! // the flat surface reports stable status codes instead of errors
//! let (code, _) = device.invoke_raw(Op::FreeMemory.id(), &[]);
//! assert_eq!(code, 2);
//! ```
//!
//! The reference backend runs every operation on host memory, so the whole
//! catalogue is exercisable without GPU hardware; a vendor runtime plugs in
//! behind the [`runtime::DeviceRuntime`] seam.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)] // wire fields are small integers
#![allow(clippy::cast_precision_loss)] // counts fit the element width
#![allow(clippy::cast_sign_loss)] // checked before casting
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::many_single_char_names)] // tensor math reads better this way
#![allow(clippy::similar_names)]
#![allow(clippy::needless_range_loop)] // index math mirrors the kernels
#![allow(clippy::too_many_lines)] // the dispatch match is naturally long
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::float_cmp)] // exact comparisons are deliberate in tests
#![allow(clippy::doc_markdown)]

/// Argument validation and result packing.
pub mod args;
/// Communicators, groups, broadcast, all-reduce.
pub mod collective;
/// The dispatch facade.
pub mod device;
/// Descriptor tables and descriptor-driven tensor ops.
pub mod dnn;
/// Element width abstraction (f32/f64).
pub mod element;
/// Error type and stable status codes.
pub mod error;
/// Handle allocation and resource tables.
pub mod handle;
/// Math kernel layer.
pub mod math;
/// Device buffers, views, host buffers, streams, memory tests.
pub mod memory;
/// Operation catalogue: wire ids, names, arities.
pub mod op;
/// Device runtime seam and the host reference implementation.
pub mod runtime;
/// Stateful PCA and t-SNE solver instances.
pub mod solvers;

// Re-exports for convenience
pub use args::Arity;
pub use device::Device;
pub use element::Element;
pub use error::{DeviceError, Result};
pub use handle::Handle;
pub use op::{Op, TextQuery};
pub use runtime::{DeviceRuntime, HostRuntime, RuntimeConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with("0."));
        assert!(VERSION.contains('.'));
    }
}
