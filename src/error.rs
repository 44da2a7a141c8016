//! Error type and status codes for the dispatch facade.
//!
//! Marshalling itself can only fail two ways: an argument count outside the
//! operation's declared bounds, or a required buffer/handle that is absent.
//! Everything else is a delegate failure and propagates unchanged through the
//! integer status channel.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Error type for all facade operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Operation id not present in the catalogue.
    #[error("unknown operation id {0}")]
    UnknownOp(u32),

    /// Argument count or enumeration value outside its declared range.
    #[error("parameter out of range: {0}")]
    ParamOutOfRange(String),

    /// A required buffer or handle was absent (zero).
    #[error("required parameter missing")]
    ParamNull,

    /// Device allocation exceeded capacity.
    #[error("out of memory: requested {requested} bytes on device {device}")]
    MemoryOut {
        /// Requested allocation size in bytes.
        requested: usize,
        /// Target device ordinal.
        device: usize,
    },

    /// Handle does not refer to a live resource of the expected kind.
    #[error("invalid {kind} handle {handle}")]
    InvalidHandle {
        /// Resource table the lookup targeted.
        kind: &'static str,
        /// The offending handle value.
        handle: i64,
    },

    /// Element range exceeds the underlying buffer.
    #[error("range [{offset}, {offset}+{count}) exceeds buffer of {len} elements")]
    MemoryRange {
        /// Start offset in elements.
        offset: usize,
        /// Element count requested.
        count: usize,
        /// Buffer length in elements.
        len: usize,
    },

    /// A context required by the operation has not been initialized.
    #[error("{0} not initialized")]
    NotInitialized(&'static str),

    /// The reference backend does not implement the requested mode.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Fault reported by the device runtime.
    #[error("device runtime fault: {0}")]
    Runtime(String),

    /// Descriptor or buffer dimensions do not agree.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Communicator group membership conflict.
    #[error("communicator group mismatch: {0}")]
    GroupMismatch(String),
}

impl DeviceError {
    /// Stable nonzero status code for the flat boundary; success is 0.
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::UnknownOp(_) => 1,
            Self::ParamOutOfRange(_) => 2,
            Self::ParamNull => 3,
            Self::MemoryOut { .. } => 4,
            Self::InvalidHandle { .. } => 5,
            Self::MemoryRange { .. } => 6,
            Self::NotInitialized(_) => 7,
            Self::Unsupported(_) => 8,
            Self::Runtime(_) => 9,
            Self::ShapeMismatch(_) => 10,
            Self::GroupMismatch(_) => 11,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_and_nonzero() {
        let errs: Vec<DeviceError> = vec![
            DeviceError::UnknownOp(9999),
            DeviceError::ParamOutOfRange("argc".into()),
            DeviceError::ParamNull,
            DeviceError::MemoryOut {
                requested: 16,
                device: 0,
            },
            DeviceError::InvalidHandle {
                kind: "buffer",
                handle: 42,
            },
            DeviceError::MemoryRange {
                offset: 8,
                count: 8,
                len: 4,
            },
            DeviceError::NotInitialized("rng"),
            DeviceError::Unsupported("stochastic pooling".into()),
            DeviceError::Runtime("peer access".into()),
            DeviceError::ShapeMismatch("top desc".into()),
            DeviceError::GroupMismatch("rank 2".into()),
        ];
        let codes: Vec<i64> = errs.iter().map(DeviceError::code).collect();
        assert_eq!(codes, (1..=11).collect::<Vec<i64>>());
    }

    #[test]
    fn display_names_the_problem() {
        let e = DeviceError::InvalidHandle {
            kind: "stream",
            handle: 7,
        };
        assert_eq!(e.to_string(), "invalid stream handle 7");
    }
}
