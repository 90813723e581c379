//! Error types for the fxcrt memory core.
//!
//! Allocation failure is the only recoverable error in this layer. The other
//! variants report misuse that the caller can detect and correct: sizes and
//! positions out of range, configuration changed after it was sealed, or a
//! pointer handed to an allocator that never produced it.

use std::fmt;

/// Errors reported by allocators, pools and buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The underlying allocator could not satisfy a request.
    OutOfMemory {
        /// Requested size in bytes.
        size: usize,
    },

    /// A size, position or count was outside the accepted range.
    InvalidArgument {
        /// What was wrong with the argument.
        reason: &'static str,
    },

    /// The operation is not allowed in the object's current state.
    InvalidState {
        /// Which state rule was violated.
        reason: &'static str,
    },

    /// A fixed pool was configured below its minimum size.
    PoolTooSmall {
        /// The configured size in bytes.
        requested: usize,
        /// The minimum accepted size in bytes.
        minimum: usize,
    },

    /// A pointer was returned to an allocator that does not own it.
    ForeignPointer {
        /// Address of the pointer.
        ptr: usize,
    },
}

impl Error {
    /// Returns `true` for allocation failures.
    #[must_use]
    pub const fn is_out_of_memory(&self) -> bool {
        matches!(self, Error::OutOfMemory { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfMemory { size } => {
                write!(f, "Out of memory: failed to allocate {size} bytes")
            }
            Error::InvalidArgument { reason } => {
                write!(f, "Invalid argument: {reason}")
            }
            Error::InvalidState { reason } => write!(f, "Invalid state: {reason}"),
            Error::PoolTooSmall { requested, minimum } => {
                write!(
                    f,
                    "Pool too small: {requested} bytes requested, minimum is {minimum} bytes"
                )
            }
            Error::ForeignPointer { ptr } => {
                write!(f, "Pointer {ptr:#x} was not allocated by this allocator")
            }
        }
    }
}

impl std::error::Error for Error {}

/// Result type for memory-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::OutOfMemory { size: 64 }.to_string(),
            "Out of memory: failed to allocate 64 bytes"
        );
        assert_eq!(
            Error::PoolTooSmall {
                requested: 10,
                minimum: 20
            }
            .to_string(),
            "Pool too small: 10 bytes requested, minimum is 20 bytes"
        );
        assert_eq!(
            Error::ForeignPointer { ptr: 0x1000 }.to_string(),
            "Pointer 0x1000 was not allocated by this allocator"
        );
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(Error::OutOfMemory { size: 1 }, Error::OutOfMemory { size: 1 });
        assert_ne!(
            Error::InvalidArgument { reason: "a" },
            Error::InvalidState { reason: "a" }
        );
        assert!(Error::OutOfMemory { size: 0 }.is_out_of_memory());
        assert!(!Error::InvalidState { reason: "x" }.is_out_of_memory());
    }
}
