//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Declared frame length is zero or above the configured ceiling
    #[error("invalid frame length {len} (max {max})")]
    InvalidLength {
        /// Length read from the prefix
        len: u32,
        /// Ceiling in force for this stream
        max: u32,
    },

    /// Payload too large to be framed
    #[error("payload of {0} bytes does not fit in a frame")]
    Oversize(usize),
}
