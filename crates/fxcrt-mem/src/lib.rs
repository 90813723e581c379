//! fxcrt memory core
//!
//! Every byte the fxcrt value types use flows through this crate:
//!
//! - **System allocators** ([`SystemAllocator`]): where memory physically
//!   comes from. [`HeapSystem`] uses the process heap, [`BoundedHeap`] caps
//!   it, [`FixedPool`] carves a fixed region.
//! - **Memory managers** ([`MemoryManager`]): one system allocator plus flag
//!   handling, OOM dispatch, debugger hooks and statistics.
//! - **Default manager** ([`default_manager`]): the process-wide slot used by
//!   every default [`AllocatorHandle`].
//! - **Allocator handles** ([`AllocatorHandle`]): what containers hold.
//! - **Grow-only pool** ([`GrowOnlyPool`]): an arena freed only in bulk.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use fxcrt_mem::{fx_alloc, fx_realloc, AllocatorHandle, GrowOnlyPool, MemoryManager};
//!
//! let manager = Arc::new(MemoryManager::with_heap());
//!
//! let ptr = fx_alloc!(manager, 64).unwrap();
//! let ptr = unsafe { fx_realloc!(manager, ptr, 128) }.unwrap();
//! unsafe { manager.free(ptr, Default::default()) };
//!
//! let pool = GrowOnlyPool::new(AllocatorHandle::from_manager(manager.clone()), 4096).unwrap();
//! let value = pool.construct(7u64).unwrap();
//! assert_eq!(*value, 7);
//! ```

pub mod debugger;
pub mod error;
pub mod fixed;
pub mod flags;
pub mod global;
pub mod handle;
pub mod manager;
pub mod pool;
pub mod system;

pub use debugger::MemoryDebugger;
#[cfg(feature = "leak-tracker")]
pub use debugger::{LeakRecord, LeakTracker};
pub use error::{Error, Result};
pub use fixed::{
    FixedPool, FixedPoolConfig, HeapExtension, MIN_FIXED_BUFFER, MIN_LIBRARY_POOL, PoolExtension,
    PoolStats,
};
pub use flags::AllocFlags;
pub use global::{default_manager, is_default_sealed, reset_default_manager, set_default_manager};
pub use handle::{Allocator, AllocatorHandle};
pub use manager::{ManagerKind, ManagerStats, MemoryManager, OomEvent, OomHandler};
pub use pool::{DEFAULT_TRUNK_SIZE, GrowOnlyPool, GrowOnlyStats};
pub use system::{BoundedHeap, HeapSystem, MIN_ALIGN, SystemAllocator};

/// Allocates through a manager's debug entry point, recording the call site.
///
/// `fx_alloc!(manager, size)` uses empty flags; `fx_alloc!(manager, size,
/// flags)` passes them through.
#[macro_export]
macro_rules! fx_alloc {
    ($manager:expr, $size:expr) => {
        $manager.alloc_debug($size, $crate::AllocFlags::empty(), file!(), line!())
    };
    ($manager:expr, $size:expr, $flags:expr) => {
        $manager.alloc_debug($size, $flags, file!(), line!())
    };
}

/// Resizes through a manager's debug entry point, recording the call site.
///
/// Expands to an `unsafe` method call, so it must be used inside an
/// `unsafe` block that upholds [`MemoryManager::realloc`]'s contract.
#[macro_export]
macro_rules! fx_realloc {
    ($manager:expr, $ptr:expr, $size:expr) => {
        $manager.realloc_debug($ptr, $size, $crate::AllocFlags::empty(), file!(), line!())
    };
    ($manager:expr, $ptr:expr, $size:expr, $flags:expr) => {
        $manager.realloc_debug($ptr, $size, $flags, file!(), line!())
    };
}
