//! Wire protocol errors
//!
//! Using thiserror for automatic Display implementation and error chaining.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WireError {
    /// The stream closed in the middle of a frame.
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    /// The stream closed cleanly on a frame boundary.
    #[error("stream closed")]
    Closed,

    #[error("frame length {0} exceeds limit of {limit} bytes", limit = crate::MAX_FRAME_LEN)]
    FrameTooLarge(usize),

    /// A payload ended before a primitive could be read.
    #[error("truncated payload: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated { offset: usize, needed: usize, available: usize },

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    #[error("invalid header {found:?}, expected {expected:?}", expected = crate::MAGIC)]
    BadMagic { found: String },

    #[error("call stack exceeds {max} frames without terminator", max = crate::MAX_STACK_DEPTH)]
    StackTooDeep,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// True when the peer went away, cleanly or mid-frame.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, WireError::Closed | WireError::ShortRead { .. })
    }
}
