//! fxcrt value types
//!
//! Strings, buffers and counted references built on the `fxcrt-mem` memory
//! core:
//!
//! - [`SharedBlock`]: the one copy-on-write primitive. A reference count, an
//!   allocator, a header and an inline element array in a single allocation.
//! - [`ByteString`] / [`WideString`]: COW strings over shared blocks.
//! - [`CountedRef`]: a COW reference to an arbitrary value.
//! - [`BinaryBuffer`]: a growable byte buffer with a configurable step, and
//!   the [`ByteTextBuf`] / [`WideTextBuf`] builders on top of it.
//!
//! Every type allocates through an [`AllocatorHandle`]. A default handle
//! resolves to the process default manager the first time it allocates.
//!
//! # Example
//!
//! ```
//! use fxcrt::{BinaryBuffer, ByteString};
//!
//! let hello = ByteString::from("hello");
//! let greeting = &hello + &ByteString::from(" world");
//! assert_eq!(greeting, "hello world");
//!
//! let mut buf = BinaryBuffer::new();
//! buf.append_block(greeting.as_bytes()).unwrap();
//! assert_eq!(buf.len(), 11);
//! ```

pub mod buffer;
pub mod counted;
pub mod cow;
pub mod string;
pub mod text_buf;

pub use fxcrt_mem as mem;

pub use buffer::{BinaryBuffer, DetachedBuffer, MIN_GROWTH};
pub use counted::CountedRef;
pub use cow::SharedBlock;
pub use fxcrt_mem::{Allocator, AllocatorHandle, Error, MemoryManager, Result};
pub use string::{ByteString, RefString, StrChar, WideString};
pub use text_buf::{ByteTextBuf, WideTextBuf};

/// Logs and panics for an index past the end of a string or buffer.
#[cold]
#[track_caller]
pub(crate) fn index_out_of_range(index: usize, len: usize) -> ! {
    fxcrt_log::error!("index {} out of range for length {}", index, len);
    panic!("index out of range: the len is {len} but the index is {index}")
}
