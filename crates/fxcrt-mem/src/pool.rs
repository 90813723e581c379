//! Grow-only pool: bump allocation from trunks, bulk free only.
//!
//! A [`GrowOnlyPool`] requests trunks from an [`AllocatorHandle`] and hands
//! out sub-regions of the current trunk with a bump pointer. Trunks form a
//! singly linked list threaded through their own headers, newest first.
//!
//! - [`Allocator::free`] is a no-op: the pool never reclaims single blocks.
//! - [`GrowOnlyPool::free_all`] returns every trunk to the backing
//!   allocator. It takes `&mut self`, so no reference handed out by
//!   [`construct`](GrowOnlyPool::construct) can outlive it.
//! - The backing allocator can only be changed while the pool owns no trunk.
//!
//! # Examples
//!
//! ```
//! use fxcrt_mem::{AllocatorHandle, GrowOnlyPool};
//!
//! let mut pool = GrowOnlyPool::new(AllocatorHandle::default(), 4096).unwrap();
//!
//! let point = pool.construct((3i32, 4i32)).unwrap();
//! point.0 += 1;
//! assert_eq!(*point, (4, 4));
//!
//! let name = pool.alloc_slice_copy(&b"trunk"[..]).unwrap();
//! assert_eq!(name, b"trunk");
//!
//! pool.free_all();
//! assert_eq!(pool.stats().trunks, 0);
//! ```

use std::mem::{align_of, size_of};
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::handle::{Allocator, AllocatorHandle};
use crate::system::MIN_ALIGN;

/// Trunk size used by [`GrowOnlyPool::with_default_trunks`] (16 KiB).
pub const DEFAULT_TRUNK_SIZE: usize = 16 * 1024;

/// Header at the start of every trunk.
#[repr(C)]
struct TrunkHeader {
    next: Option<NonNull<TrunkHeader>>,
    size: usize,
    used: usize,
}

/// Room reserved for the header, keeping trunk payloads 16-aligned.
const HEADER_SPACE: usize = (size_of::<TrunkHeader>() + MIN_ALIGN - 1) & !(MIN_ALIGN - 1);

/// Usage counters of a [`GrowOnlyPool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GrowOnlyStats {
    /// Trunks currently owned by the pool.
    pub trunks: usize,
    /// Trunks created over the pool's lifetime.
    pub trunks_created: usize,
    /// Bytes handed out since the last bulk free, alignment padding included.
    pub bytes_allocated: usize,
    /// Bytes the current trunks can hold, headers excluded.
    pub capacity: usize,
}

struct PoolState {
    head: Option<NonNull<TrunkHeader>>,
    trunks: usize,
    trunks_created: usize,
    bytes_allocated: usize,
    capacity: usize,
}

// SAFETY: trunk memory is owned by the pool and only touched under its mutex.
unsafe impl Send for PoolState {}

/// Arena allocator that frees only in bulk.
pub struct GrowOnlyPool {
    allocator: AllocatorHandle,
    trunk_size: usize,
    state: Mutex<PoolState>,
}

impl GrowOnlyPool {
    /// Creates a pool drawing `trunk_size`-byte trunks from `allocator`.
    ///
    /// Fails with [`Error::InvalidArgument`] when `trunk_size` is zero or
    /// too large to carry a trunk header.
    ///
    /// A default handle is pinned to the current default manager, so every
    /// trunk goes back to the manager that produced it.
    pub fn new(allocator: AllocatorHandle, trunk_size: usize) -> Result<Self> {
        if trunk_size == 0 {
            return Err(Error::InvalidArgument {
                reason: "trunk size must be non-zero",
            });
        }
        if trunk_size.checked_add(HEADER_SPACE).is_none() {
            return Err(Error::InvalidArgument {
                reason: "trunk size overflows with the trunk header",
            });
        }

        Ok(GrowOnlyPool {
            allocator: allocator.resolve(),
            trunk_size,
            state: Mutex::new(PoolState {
                head: None,
                trunks: 0,
                trunks_created: 0,
                bytes_allocated: 0,
                capacity: 0,
            }),
        })
    }

    /// Creates a pool with [`DEFAULT_TRUNK_SIZE`] trunks.
    pub fn with_default_trunks(allocator: AllocatorHandle) -> Result<Self> {
        Self::new(allocator, DEFAULT_TRUNK_SIZE)
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the configured trunk size.
    #[must_use]
    pub const fn trunk_size(&self) -> usize {
        self.trunk_size
    }

    /// Returns the allocator trunks come from.
    #[must_use]
    pub const fn allocator(&self) -> &AllocatorHandle {
        &self.allocator
    }

    /// Replaces the backing allocator.
    ///
    /// Fails with [`Error::InvalidState`] while the pool owns any trunk.
    pub fn set_allocator(&mut self, allocator: AllocatorHandle) -> Result<()> {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.head.is_some() {
            return Err(Error::InvalidState {
                reason: "pool allocator cannot change after the first allocation",
            });
        }
        self.allocator = allocator.resolve();
        Ok(())
    }

    /// Returns a snapshot of the pool's counters.
    #[must_use]
    pub fn stats(&self) -> GrowOnlyStats {
        let state = self.state();
        GrowOnlyStats {
            trunks: state.trunks,
            trunks_created: state.trunks_created,
            bytes_allocated: state.bytes_allocated,
            capacity: state.capacity,
        }
    }

    /// Bump-allocates `size` bytes aligned to `align`, linking a new trunk
    /// when the current one is full.
    fn alloc_aligned(&self, size: usize, align: usize) -> Result<NonNull<u8>> {
        debug_assert!(align.is_power_of_two());
        let mut state = self.state();

        if let Some(ptr) = state.head.and_then(|head| bump(head, size, align)) {
            state.bytes_allocated += size;
            return Ok(ptr);
        }

        let needed = size
            .checked_add(HEADER_SPACE + align.saturating_sub(MIN_ALIGN))
            .ok_or(Error::InvalidArgument {
                reason: "pool allocation size overflows",
            })?;
        let trunk_size = needed.max(self.trunk_size + HEADER_SPACE);

        let memory = self.allocator.alloc(trunk_size)?;
        let header = memory.cast::<TrunkHeader>();
        // SAFETY: memory is a fresh, MIN_ALIGN-aligned block of trunk_size bytes.
        unsafe {
            header.write(TrunkHeader {
                next: state.head,
                size: trunk_size,
                used: HEADER_SPACE,
            });
        }

        state.head = Some(header);
        state.trunks += 1;
        state.trunks_created += 1;
        state.capacity += trunk_size - HEADER_SPACE;
        fxcrt_log::debug!("grow-only pool linked a {} byte trunk", trunk_size);

        let ptr = bump(header, size, align).ok_or(Error::OutOfMemory { size })?;
        state.bytes_allocated += size;
        Ok(ptr)
    }

    /// Moves `value` into the pool. The value is never dropped.
    #[allow(clippy::mut_from_ref)]
    pub fn construct<T>(&self, value: T) -> Result<&mut T> {
        let ptr = self
            .alloc_aligned(size_of::<T>(), align_of::<T>().max(MIN_ALIGN))?
            .cast::<T>();
        // SAFETY: ptr is fresh, aligned for T and exclusively ours until the
        // next free_all, which needs &mut self.
        unsafe {
            ptr.write(value);
            Ok(&mut *ptr.as_ptr())
        }
    }

    /// Copies `src` into the pool.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_slice_copy<T: Copy>(&self, src: &[T]) -> Result<&mut [T]> {
        let size = size_of::<T>()
            .checked_mul(src.len())
            .ok_or(Error::InvalidArgument {
                reason: "slice size overflows",
            })?;
        let ptr = self
            .alloc_aligned(size, align_of::<T>().max(MIN_ALIGN))?
            .cast::<T>();
        // SAFETY: ptr is fresh, aligned and large enough for src.len() items.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), ptr.as_ptr(), src.len());
            Ok(std::slice::from_raw_parts_mut(ptr.as_ptr(), src.len()))
        }
    }

    /// Returns every trunk to the backing allocator.
    ///
    /// The next allocation links a brand-new trunk.
    pub fn free_all(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.trunks > 0 {
            fxcrt_log::debug!(
                "grow-only pool freeing {} trunks ({} bytes used)",
                state.trunks,
                state.bytes_allocated
            );
        }

        let mut next = state.head.take();
        while let Some(trunk) = next {
            // SAFETY: every trunk in the list is live and was allocated
            // through self.allocator.
            unsafe {
                next = trunk.as_ref().next;
                self.allocator.free(trunk.cast());
            }
        }

        state.trunks = 0;
        state.bytes_allocated = 0;
        state.capacity = 0;
    }
}

fn bump(trunk: NonNull<TrunkHeader>, size: usize, align: usize) -> Option<NonNull<u8>> {
    // SAFETY: trunk points at a live header owned by the locked pool state.
    let header = unsafe { &mut *trunk.as_ptr() };
    let base = trunk.cast::<u8>();
    let start = (base.as_ptr().addr() + header.used).next_multiple_of(align) - base.as_ptr().addr();
    let end = start.checked_add(size)?;
    if end > header.size {
        return None;
    }
    header.used = end;
    // SAFETY: start is within the trunk, checked above.
    Some(unsafe { base.add(start) })
}

impl Allocator for GrowOnlyPool {
    fn alloc(&self, size: usize) -> Result<NonNull<u8>> {
        self.alloc_aligned(size, MIN_ALIGN)
    }

    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>> {
        if new_size <= old_size {
            return Ok(ptr);
        }

        {
            let mut state = self.state();
            if let Some(head) = state.head {
                // SAFETY: head is live while the state lock is held.
                let header = unsafe { &mut *head.as_ptr() };
                let offset = ptr.as_ptr().addr().wrapping_sub(head.as_ptr().addr());
                let is_last = offset.checked_add(old_size) == Some(header.used);
                if is_last
                    && let Some(end) = offset.checked_add(new_size)
                    && end <= header.size
                {
                    header.used = end;
                    state.bytes_allocated += new_size - old_size;
                    return Ok(ptr);
                }
            }
        }

        let new = self.alloc(new_size)?;
        // SAFETY: the old block holds old_size bytes and the new block is a
        // distinct, larger region.
        unsafe { std::ptr::copy_nonoverlapping(ptr.as_ptr(), new.as_ptr(), old_size) };
        Ok(new)
    }

    unsafe fn free(&self, _ptr: NonNull<u8>) {}
}

impl Drop for GrowOnlyPool {
    fn drop(&mut self) {
        self.free_all();
    }
}

impl std::fmt::Debug for GrowOnlyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrowOnlyPool")
            .field("trunk_size", &self.trunk_size)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::MemoryManager;
    use std::sync::Arc;

    fn pool_with_manager(trunk_size: usize) -> (GrowOnlyPool, Arc<MemoryManager>) {
        let manager = Arc::new(MemoryManager::with_heap());
        let pool =
            GrowOnlyPool::new(AllocatorHandle::from_manager(manager.clone()), trunk_size).unwrap();
        (pool, manager)
    }

    #[test]
    fn test_zero_trunk_size_rejected() {
        let err = GrowOnlyPool::new(AllocatorHandle::default(), 0).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_huge_trunk_size_rejected() {
        let err = GrowOnlyPool::new(AllocatorHandle::default(), usize::MAX).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));

        let limit = usize::MAX - HEADER_SPACE;
        assert!(GrowOnlyPool::new(AllocatorHandle::default(), limit).is_ok());
        assert!(GrowOnlyPool::new(AllocatorHandle::default(), limit + 1).is_err());
    }

    #[test]
    fn test_bump_allocations_share_trunk() {
        let (pool, manager) = pool_with_manager(1024);
        let a = pool.alloc(10).unwrap();
        let b = pool.alloc(10).unwrap();

        assert_eq!(b.as_ptr().addr() - a.as_ptr().addr(), MIN_ALIGN);
        assert_eq!(pool.stats().trunks, 1);
        assert_eq!(manager.stats().live_blocks, 1);
    }

    #[test]
    fn test_oversized_request_gets_own_trunk() {
        let (pool, _manager) = pool_with_manager(256);
        pool.alloc(16).unwrap();
        pool.alloc(10_000).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.trunks, 2);
        assert!(stats.capacity >= 10_000 + 256);
    }

    #[test]
    fn test_free_is_noop() {
        let (pool, _manager) = pool_with_manager(256);
        let a = pool.alloc(32).unwrap();
        unsafe { Allocator::free(&pool, a) };
        let b = pool.alloc(32).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_free_all_returns_trunks() {
        let (mut pool, manager) = pool_with_manager(256);
        for _ in 0..50 {
            pool.alloc(100).unwrap();
        }
        assert!(manager.stats().live_blocks > 1);

        pool.free_all();
        assert_eq!(manager.stats().live_blocks, 0);

        pool.alloc(8).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.trunks, 1);
        assert!(stats.trunks_created > 1);
    }

    #[test]
    fn test_set_allocator_only_before_first_trunk() {
        let (mut pool, _manager) = pool_with_manager(256);
        let other = AllocatorHandle::from_manager(Arc::new(MemoryManager::with_heap()));

        assert!(pool.set_allocator(other.clone()).is_ok());
        pool.alloc(1).unwrap();
        assert!(matches!(
            pool.set_allocator(other.clone()),
            Err(Error::InvalidState { .. })
        ));

        pool.free_all();
        assert!(pool.set_allocator(other).is_ok());
    }

    #[test]
    fn test_construct_respects_alignment() {
        #[repr(align(64))]
        struct Wide(u8);

        let (pool, _manager) = pool_with_manager(256);
        pool.alloc(1).unwrap();
        let wide = pool.construct(Wide(7)).unwrap();
        assert_eq!(std::ptr::from_ref::<Wide>(wide).addr() % 64, 0);
        assert_eq!(wide.0, 7);
    }

    #[test]
    fn test_realloc_extends_last_block_in_place() {
        let (pool, _manager) = pool_with_manager(1024);
        let a = pool.alloc(16).unwrap();
        unsafe {
            a.as_ptr().write_bytes(0xAB, 16);
            let grown = pool.realloc(a, 16, 64).unwrap();
            assert_eq!(grown, a);

            let b = pool.alloc(16).unwrap();
            let moved = pool.realloc(a, 64, 128).unwrap();
            assert_ne!(moved, a);
            assert_ne!(moved, b);
            assert_eq!(*moved.as_ptr(), 0xAB);
        }
    }

    #[test]
    fn test_drop_frees_trunks() {
        let (pool, manager) = pool_with_manager(128);
        pool.alloc_slice_copy(&[1u32, 2, 3]).unwrap();
        drop(pool);
        assert_eq!(manager.stats().live_blocks, 0);
    }
}
