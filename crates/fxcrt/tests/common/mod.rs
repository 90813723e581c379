// Common test utilities for integration tests
//
// Provides an allocator that counts traffic through a handle and can be
// switched into failing mode.

#![allow(dead_code)]

use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use fxcrt::mem::{Allocator, Error, MemoryManager, Result};
use fxcrt::AllocatorHandle;

/// An allocator forwarding to a private heap manager while counting calls.
pub struct CountingAllocator {
    inner: MemoryManager,
    allocs: AtomicUsize,
    reallocs: AtomicUsize,
    frees: AtomicUsize,
    failing: AtomicBool,
}

impl CountingAllocator {
    pub fn new() -> Arc<Self> {
        Arc::new(CountingAllocator {
            inner: MemoryManager::with_heap(),
            allocs: AtomicUsize::new(0),
            reallocs: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        })
    }

    pub fn allocs(&self) -> usize {
        self.allocs.load(Ordering::SeqCst)
    }

    pub fn reallocs(&self) -> usize {
        self.reallocs.load(Ordering::SeqCst)
    }

    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }

    /// Blocks allocated and not yet freed.
    pub fn live(&self) -> usize {
        self.allocs() - self.frees()
    }

    /// Makes every following allocation and reallocation fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Allocator for CountingAllocator {
    fn alloc(&self, size: usize) -> Result<NonNull<u8>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::OutOfMemory { size });
        }
        let ptr = Allocator::alloc(&self.inner, size)?;
        self.allocs.fetch_add(1, Ordering::SeqCst);
        Ok(ptr)
    }

    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::OutOfMemory { size: new_size });
        }
        self.reallocs.fetch_add(1, Ordering::SeqCst);
        // SAFETY: forwarded from the caller's contract.
        unsafe { Allocator::realloc(&self.inner, ptr, old_size, new_size) }
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        self.frees.fetch_add(1, Ordering::SeqCst);
        // SAFETY: forwarded from the caller's contract.
        unsafe { Allocator::free(&self.inner, ptr) }
    }
}

/// Returns a fresh counting allocator and a handle to it.
pub fn counting_handle() -> (Arc<CountingAllocator>, AllocatorHandle) {
    let counter = CountingAllocator::new();
    let handle = AllocatorHandle::new(counter.clone());
    (counter, handle)
}
