//! Allocator handles passed into containers.
//!
//! Containers never talk to a [`MemoryManager`] directly. They hold an
//! [`AllocatorHandle`], which is either bound to a specific [`Allocator`] or
//! left as the default handle, meaning "whatever the process default manager
//! is". Every allocator behind a handle returns blocks aligned to
//! [`MIN_ALIGN`](crate::MIN_ALIGN).

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::Result;
use crate::flags::AllocFlags;
use crate::global::default_manager;
use crate::manager::MemoryManager;

/// The allocation interface containers are written against.
///
/// Callers own what they allocate: an allocator never frees a block on its
/// own, apart from bulk operations such as
/// [`GrowOnlyPool::free_all`](crate::GrowOnlyPool::free_all).
pub trait Allocator: Send + Sync {
    /// Allocates `size` bytes.
    fn alloc(&self, size: usize) -> Result<NonNull<u8>>;

    /// Allocates `size` bytes on behalf of `file:line`.
    fn alloc_debug(&self, size: usize, file: &'static str, line: u32) -> Result<NonNull<u8>> {
        let _ = (file, line);
        self.alloc(size)
    }

    /// Resizes a block of `old_size` bytes to `new_size` bytes. On failure the
    /// original block is untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this allocator, be live, and be `old_size` bytes.
    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>>;

    /// Resizes a block on behalf of `file:line`.
    ///
    /// # Safety
    ///
    /// Same contract as [`realloc`](Self::realloc).
    unsafe fn realloc_debug(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
        file: &'static str,
        line: u32,
    ) -> Result<NonNull<u8>> {
        let _ = (file, line);
        // SAFETY: forwarded caller contract.
        unsafe { self.realloc(ptr, old_size, new_size) }
    }

    /// Releases a block.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this allocator and must not be used afterwards.
    unsafe fn free(&self, ptr: NonNull<u8>);
}

impl Allocator for MemoryManager {
    fn alloc(&self, size: usize) -> Result<NonNull<u8>> {
        MemoryManager::alloc(self, size, AllocFlags::empty())
    }

    fn alloc_debug(&self, size: usize, file: &'static str, line: u32) -> Result<NonNull<u8>> {
        MemoryManager::alloc_debug(self, size, AllocFlags::empty(), file, line)
    }

    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        _old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>> {
        // SAFETY: forwarded caller contract.
        unsafe { MemoryManager::realloc(self, ptr, new_size, AllocFlags::empty()) }
    }

    unsafe fn realloc_debug(
        &self,
        ptr: NonNull<u8>,
        _old_size: usize,
        new_size: usize,
        file: &'static str,
        line: u32,
    ) -> Result<NonNull<u8>> {
        // SAFETY: forwarded caller contract.
        unsafe {
            MemoryManager::realloc_debug(self, ptr, new_size, AllocFlags::empty(), file, line)
        }
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        // SAFETY: forwarded caller contract.
        unsafe { MemoryManager::free(self, ptr, AllocFlags::empty()) }
    }
}

/// A cheap, clonable reference to an [`Allocator`].
///
/// The default handle resolves to the process default manager on every
/// call. Containers that keep blocks alive call [`resolve`](Self::resolve)
/// before their first allocation, so that each block is freed by the manager
/// that produced it even if the default is replaced in between.
///
/// ```
/// use std::sync::Arc;
/// use fxcrt_mem::{AllocatorHandle, MemoryManager};
///
/// let handle = AllocatorHandle::from_manager(Arc::new(MemoryManager::with_heap()));
/// let ptr = handle.alloc(64).unwrap();
/// unsafe { handle.free(ptr) };
///
/// assert!(AllocatorHandle::default().is_default());
/// assert!(!AllocatorHandle::default().resolve().is_default());
/// ```
#[derive(Clone, Default)]
pub struct AllocatorHandle {
    inner: Option<Arc<dyn Allocator>>,
}

impl AllocatorHandle {
    /// Binds a handle to `allocator`.
    #[must_use]
    pub fn new(allocator: Arc<dyn Allocator>) -> Self {
        AllocatorHandle {
            inner: Some(allocator),
        }
    }

    /// Binds a handle to a memory manager.
    #[must_use]
    pub fn from_manager(manager: Arc<MemoryManager>) -> Self {
        Self::new(manager)
    }

    /// Returns `true` for the unbound handle.
    #[must_use]
    pub const fn is_default(&self) -> bool {
        self.inner.is_none()
    }

    /// Returns a handle bound to the allocator this handle currently uses.
    #[must_use]
    pub fn resolve(&self) -> AllocatorHandle {
        AllocatorHandle {
            inner: Some(self.allocator()),
        }
    }

    /// Returns `true` if both handles are bound to the same allocator, or
    /// both are unbound.
    #[must_use]
    pub fn same_allocator(&self, other: &AllocatorHandle) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    fn allocator(&self) -> Arc<dyn Allocator> {
        match &self.inner {
            Some(allocator) => Arc::clone(allocator),
            None => {
                let manager: Arc<dyn Allocator> = default_manager();
                manager
            }
        }
    }

    fn with<R>(&self, f: impl FnOnce(&dyn Allocator) -> R) -> R {
        match &self.inner {
            Some(allocator) => f(allocator.as_ref()),
            None => f(&*default_manager()),
        }
    }

    /// Allocates `size` bytes.
    pub fn alloc(&self, size: usize) -> Result<NonNull<u8>> {
        self.with(|a| a.alloc(size))
    }

    /// Allocates `size` bytes on behalf of `file:line`.
    pub fn alloc_debug(&self, size: usize, file: &'static str, line: u32) -> Result<NonNull<u8>> {
        self.with(|a| a.alloc_debug(size, file, line))
    }

    /// Resizes a block.
    ///
    /// # Safety
    ///
    /// See [`Allocator::realloc`].
    pub unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>> {
        // SAFETY: forwarded caller contract.
        self.with(|a| unsafe { a.realloc(ptr, old_size, new_size) })
    }

    /// Resizes a block on behalf of `file:line`.
    ///
    /// # Safety
    ///
    /// See [`Allocator::realloc`].
    pub unsafe fn realloc_debug(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
        file: &'static str,
        line: u32,
    ) -> Result<NonNull<u8>> {
        // SAFETY: forwarded caller contract.
        self.with(|a| unsafe { a.realloc_debug(ptr, old_size, new_size, file, line) })
    }

    /// Releases a block.
    ///
    /// # Safety
    ///
    /// See [`Allocator::free`].
    pub unsafe fn free(&self, ptr: NonNull<u8>) {
        // SAFETY: forwarded caller contract.
        self.with(|a| unsafe { a.free(ptr) });
    }
}

impl From<Arc<MemoryManager>> for AllocatorHandle {
    fn from(manager: Arc<MemoryManager>) -> Self {
        Self::from_manager(manager)
    }
}

impl From<Arc<dyn Allocator>> for AllocatorHandle {
    fn from(allocator: Arc<dyn Allocator>) -> Self {
        Self::new(allocator)
    }
}

impl fmt::Debug for AllocatorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(allocator) => write!(f, "AllocatorHandle({:p})", Arc::as_ptr(allocator)),
            None => f.write_str("AllocatorHandle(default)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::BoundedHeap;

    #[test]
    fn test_bound_handle_uses_its_manager() {
        let manager = Arc::new(MemoryManager::with_heap());
        let handle = AllocatorHandle::from_manager(manager.clone());

        let ptr = handle.alloc(100).unwrap();
        assert_eq!(manager.stats().live_blocks, 1);

        let ptr = unsafe { handle.realloc(ptr, 100, 1000) }.unwrap();
        assert_eq!(manager.stats().live_blocks, 1);

        unsafe { handle.free(ptr) };
        assert_eq!(manager.stats().live_blocks, 0);
    }

    #[test]
    fn test_handle_reports_out_of_memory() {
        let manager = Arc::new(MemoryManager::new(Arc::new(BoundedHeap::new(256))));
        let handle = AllocatorHandle::from(manager);
        assert!(handle.alloc(4096).unwrap_err().is_out_of_memory());
    }

    #[test]
    fn test_resolve_pins_allocator() {
        let default = AllocatorHandle::default();
        let pinned = default.resolve();
        assert!(!pinned.is_default());
        assert!(pinned.same_allocator(&pinned.clone()));
        assert!(!pinned.same_allocator(&default));
        assert!(default.same_allocator(&AllocatorHandle::default()));
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(
            format!("{:?}", AllocatorHandle::default()),
            "AllocatorHandle(default)"
        );
    }
}
