//! System allocators: the root of all memory handed out by a manager.
//!
//! A [`SystemAllocator`] is the table a host installs to decide where memory
//! physically comes from. The manager layered above it adds flags handling,
//! OOM dispatch and debugger notifications; system allocators only move
//! bytes.
//!
//! Every block returned by a system allocator is aligned to [`MIN_ALIGN`].

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::flags::AllocFlags;

/// Alignment of every block returned by the allocators in this crate.
pub const MIN_ALIGN: usize = 16;

/// Size of the in-band header [`HeapSystem`] keeps in front of each block.
const HEADER: usize = MIN_ALIGN;

/// Raw allocation entry points supplied by the host.
///
/// Only `alloc`, `realloc` and `free` are required. The debug variants fall
/// back to the release ones, `lock`/`unlock` are identity operations, and
/// `purge`/`collect_all` do nothing unless the allocator manages its own
/// arena.
pub trait SystemAllocator: Send + Sync {
    /// Allocates `size` bytes, or returns `None` when memory is exhausted.
    fn alloc(&self, size: usize, flags: AllocFlags) -> Option<NonNull<u8>>;

    /// Allocates like [`alloc`](Self::alloc) and records the call site.
    fn alloc_debug(
        &self,
        size: usize,
        flags: AllocFlags,
        file: &'static str,
        line: u32,
    ) -> Option<NonNull<u8>> {
        let _ = (file, line);
        self.alloc(size, flags)
    }

    /// Resizes a block. On failure the original block is left untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator and not yet freed.
    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        new_size: usize,
        flags: AllocFlags,
    ) -> Option<NonNull<u8>>;

    /// Resizes like [`realloc`](Self::realloc) and records the call site.
    ///
    /// # Safety
    ///
    /// Same contract as [`realloc`](Self::realloc).
    unsafe fn realloc_debug(
        &self,
        ptr: NonNull<u8>,
        new_size: usize,
        flags: AllocFlags,
        file: &'static str,
        line: u32,
    ) -> Option<NonNull<u8>> {
        let _ = (file, line);
        // SAFETY: forwarded caller contract.
        unsafe { self.realloc(ptr, new_size, flags) }
    }

    /// Pins a `MOVABLE` block and returns its current address.
    fn lock(&self, ptr: NonNull<u8>) -> NonNull<u8> {
        ptr
    }

    /// Releases a pin taken by [`lock`](Self::lock).
    fn unlock(&self, ptr: NonNull<u8>) {
        let _ = ptr;
    }

    /// Returns a block to the allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator and not yet freed.
    unsafe fn free(&self, ptr: NonNull<u8>, flags: AllocFlags);

    /// Releases reserved memory that no live block uses.
    fn purge(&self) {}

    /// Frees every block this allocator ever handed out.
    ///
    /// Only arena-style allocators implement this.
    ///
    /// # Safety
    ///
    /// No pointer obtained from this allocator before the call may be used
    /// afterwards, not even to free it.
    unsafe fn collect_all(&self) {}

    /// Returns the usable size of a live block, if the allocator tracks it.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator and not yet freed.
    unsafe fn block_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        let _ = ptr;
        None
    }
}

/// The process heap, reached through `std::alloc`.
///
/// Each block carries a 16-byte header holding its requested size, so that
/// `realloc` and `free` can rebuild the layout without help from the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapSystem;

impl HeapSystem {
    /// Creates the heap allocator.
    #[must_use]
    pub const fn new() -> Self {
        HeapSystem
    }

    fn layout_for(size: usize) -> Option<Layout> {
        let total = size.checked_add(HEADER)?;
        Layout::from_size_align(total, MIN_ALIGN).ok()
    }

    /// # Safety
    ///
    /// `ptr` must be a live block from [`HeapSystem`].
    unsafe fn stored_size(ptr: NonNull<u8>) -> usize {
        // SAFETY: the header precedes every block and holds its size.
        unsafe { ptr.sub(HEADER).cast::<usize>().read() }
    }
}

impl SystemAllocator for HeapSystem {
    fn alloc(&self, size: usize, _flags: AllocFlags) -> Option<NonNull<u8>> {
        let layout = Self::layout_for(size)?;

        // SAFETY: the layout is never zero-sized because of the header.
        let base = NonNull::new(unsafe { alloc::alloc(layout) })?;

        // SAFETY: base is valid for HEADER + size bytes and aligned for usize.
        unsafe {
            base.cast::<usize>().write(size);
            Some(base.add(HEADER))
        }
    }

    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        new_size: usize,
        _flags: AllocFlags,
    ) -> Option<NonNull<u8>> {
        let new_layout = Self::layout_for(new_size)?;

        // SAFETY: ptr is a live block from this allocator (caller contract),
        // so its header is readable and its old layout was valid.
        unsafe {
            let base = ptr.sub(HEADER);
            let old_size = Self::stored_size(ptr);
            let old_layout =
                Layout::from_size_align_unchecked(old_size + HEADER, MIN_ALIGN);

            let new_base = NonNull::new(alloc::realloc(
                base.as_ptr(),
                old_layout,
                new_layout.size(),
            ))?;
            new_base.cast::<usize>().write(new_size);
            Some(new_base.add(HEADER))
        }
    }

    unsafe fn free(&self, ptr: NonNull<u8>, _flags: AllocFlags) {
        // SAFETY: ptr is a live block from this allocator (caller contract).
        unsafe {
            let size = Self::stored_size(ptr);
            let layout = Layout::from_size_align_unchecked(size + HEADER, MIN_ALIGN);
            alloc::dealloc(ptr.sub(HEADER).as_ptr(), layout);
        }
    }

    unsafe fn block_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        // SAFETY: forwarded caller contract.
        Some(unsafe { Self::stored_size(ptr) })
    }
}

/// A heap allocator with a hard byte budget.
///
/// Requests that would push the live total past the budget fail, which lets
/// a host sandbox a document's memory without a dedicated pool.
#[derive(Debug)]
pub struct BoundedHeap {
    heap: HeapSystem,
    limit: usize,
    in_use: AtomicUsize,
}

impl BoundedHeap {
    /// Creates a heap that never holds more than `limit` live bytes.
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        BoundedHeap {
            heap: HeapSystem,
            limit,
            in_use: AtomicUsize::new(0),
        }
    }

    /// Returns the number of live bytes.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Returns the byte budget.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    fn reserve(&self, size: usize) -> bool {
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|&total| total <= self.limit)
            })
            .is_ok()
    }

    fn release(&self, size: usize) {
        self.in_use.fetch_sub(size, Ordering::AcqRel);
    }
}

impl SystemAllocator for BoundedHeap {
    fn alloc(&self, size: usize, flags: AllocFlags) -> Option<NonNull<u8>> {
        if !self.reserve(size) {
            return None;
        }
        let ptr = self.heap.alloc(size, flags);
        if ptr.is_none() {
            self.release(size);
        }
        ptr
    }

    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        new_size: usize,
        flags: AllocFlags,
    ) -> Option<NonNull<u8>> {
        // SAFETY: forwarded caller contract.
        let old_size = unsafe { HeapSystem::stored_size(ptr) };

        if new_size > old_size && !self.reserve(new_size - old_size) {
            return None;
        }

        // SAFETY: forwarded caller contract.
        let new_ptr = unsafe { self.heap.realloc(ptr, new_size, flags) };
        match new_ptr {
            Some(_) if new_size < old_size => self.release(old_size - new_size),
            None if new_size > old_size => self.release(new_size - old_size),
            _ => {}
        }
        new_ptr
    }

    unsafe fn free(&self, ptr: NonNull<u8>, flags: AllocFlags) {
        // SAFETY: forwarded caller contract.
        unsafe {
            self.release(HeapSystem::stored_size(ptr));
            self.heap.free(ptr, flags);
        }
    }

    unsafe fn block_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        // SAFETY: forwarded caller contract.
        Some(unsafe { HeapSystem::stored_size(ptr) })
    }
}
