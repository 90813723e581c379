//! The memory manager: one system allocator plus failure policy.
//!
//! A [`MemoryManager`] wraps exactly one [`SystemAllocator`] and adds what
//! every caller above it relies on:
//!
//! - **Flag handling**: `NONLEAVE` failures are returned silently, all other
//!   failures are logged and passed to the OOM handler first.
//! - **Debug entry points** that carry the call site down to the system
//!   allocator and the installed [`MemoryDebugger`].
//! - **Statistics** on live blocks and OOM events.
//!
//! Managers are created explicitly and destroyed by dropping them. A
//! process-wide default lives in [`crate::global`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use fxcrt_mem::{AllocFlags, BoundedHeap, MemoryManager};
//!
//! let manager = MemoryManager::new(Arc::new(BoundedHeap::new(1024)));
//!
//! let calls = Arc::new(AtomicUsize::new(0));
//! let seen = calls.clone();
//! manager.set_oom_handler(Some(Box::new(move |_event| {
//!     seen.fetch_add(1, Ordering::SeqCst);
//! })));
//!
//! assert!(manager.alloc(4096, AllocFlags::NONLEAVE).is_err());
//! assert_eq!(calls.load(Ordering::SeqCst), 0);
//!
//! assert!(manager.alloc(4096, AllocFlags::empty()).is_err());
//! assert_eq!(calls.load(Ordering::SeqCst), 1);
//! ```

use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::debugger::MemoryDebugger;
use crate::error::{Error, Result};
use crate::fixed::{FixedPool, FixedPoolConfig};
use crate::flags::AllocFlags;
use crate::system::{HeapSystem, SystemAllocator};

/// Details of a failed allocation, passed to the OOM handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OomEvent {
    /// Requested size in bytes.
    pub size: usize,
    /// Flags of the failed request.
    pub flags: AllocFlags,
}

/// Callback run when an allocation without `NONLEAVE` fails.
///
/// The handler may log, release caches or abort the process. It runs with no
/// manager lock held, so it may reconfigure the manager, including removing
/// itself. If it returns, the failure is reported to the caller as
/// [`Error::OutOfMemory`].
pub type OomHandler = Box<dyn Fn(&OomEvent) + Send + Sync>;

type SharedOomHandler = Arc<dyn Fn(&OomEvent) + Send + Sync>;

/// Which strategy backs a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerKind {
    /// A general system allocator supplied by the host.
    System,
    /// A fixed pool owned by the manager.
    Fixed,
}

/// Counters kept by every manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Blocks allocated and not yet freed.
    pub live_blocks: usize,
    /// Bytes in live blocks, when the system allocator reports block sizes.
    pub live_bytes: usize,
    /// Allocation failures seen, with or without `NONLEAVE`.
    pub oom_events: usize,
}

/// Allocation front end over one system allocator.
pub struct MemoryManager {
    kind: ManagerKind,
    system: Arc<dyn SystemAllocator>,
    fixed: Option<Arc<FixedPool>>,
    oom_handler: RwLock<Option<SharedOomHandler>>,
    debugger: RwLock<Option<Arc<dyn MemoryDebugger>>>,
    live_blocks: AtomicUsize,
    live_bytes: AtomicUsize,
    oom_events: AtomicUsize,
}

impl MemoryManager {
    /// Creates a manager over a host-supplied system allocator.
    #[must_use]
    pub fn new(system: Arc<dyn SystemAllocator>) -> Self {
        Self::build(ManagerKind::System, system, None)
    }

    /// Creates a manager over the process heap.
    #[must_use]
    pub fn with_heap() -> Self {
        Self::new(Arc::new(HeapSystem::new()))
    }

    /// Creates a manager that owns a fixed pool built from `config`.
    pub fn new_fixed(config: FixedPoolConfig) -> Result<Self> {
        let pool = Arc::new(FixedPool::new(config)?);
        let system: Arc<dyn SystemAllocator> = pool.clone();
        Ok(Self::build(ManagerKind::Fixed, system, Some(pool)))
    }

    fn build(
        kind: ManagerKind,
        system: Arc<dyn SystemAllocator>,
        fixed: Option<Arc<FixedPool>>,
    ) -> Self {
        fxcrt_log::debug!("created {:?} memory manager", kind);
        MemoryManager {
            kind,
            system,
            fixed,
            oom_handler: RwLock::new(None),
            debugger: RwLock::new(None),
            live_blocks: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
            oom_events: AtomicUsize::new(0),
        }
    }

    /// Returns the strategy backing this manager.
    #[must_use]
    pub const fn kind(&self) -> ManagerKind {
        self.kind
    }

    /// Returns the system allocator this manager wraps.
    #[must_use]
    pub fn system(&self) -> &Arc<dyn SystemAllocator> {
        &self.system
    }

    /// Returns the fixed pool, for managers created by [`new_fixed`](Self::new_fixed).
    #[must_use]
    pub fn fixed_pool(&self) -> Option<&FixedPool> {
        self.fixed.as_deref()
    }

    /// Installs or removes the OOM handler.
    pub fn set_oom_handler(&self, handler: Option<OomHandler>) {
        *self
            .oom_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = handler.map(SharedOomHandler::from);
    }

    /// Installs or removes the memory debugger.
    pub fn set_debugger(&self, debugger: Option<Arc<dyn MemoryDebugger>>) {
        *self.debugger.write().unwrap_or_else(PoisonError::into_inner) = debugger;
    }

    fn with_debugger(&self, f: impl FnOnce(&dyn MemoryDebugger)) {
        let debugger = self
            .debugger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(debugger) = debugger {
            f(&*debugger);
        }
    }

    /// Labels the allocations that follow for the installed debugger.
    pub fn tag(&self, tag: &str) {
        self.with_debugger(|d| d.on_tag(tag));
    }

    /// Returns a snapshot of the manager's counters.
    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            live_blocks: self.live_blocks.load(Ordering::Relaxed),
            live_bytes: self.live_bytes.load(Ordering::Relaxed),
            oom_events: self.oom_events.load(Ordering::Relaxed),
        }
    }

    /// Allocates `size` bytes.
    pub fn alloc(&self, size: usize, flags: AllocFlags) -> Result<NonNull<u8>> {
        match self.system.alloc(size, flags) {
            Some(ptr) => {
                self.note_alloc(ptr);
                self.with_debugger(|d| d.on_alloc(ptr, size));
                Ok(ptr)
            }
            None => Err(self.out_of_memory(size, flags)),
        }
    }

    /// Allocates `size` bytes and records the call site.
    pub fn alloc_debug(
        &self,
        size: usize,
        flags: AllocFlags,
        file: &'static str,
        line: u32,
    ) -> Result<NonNull<u8>> {
        match self.system.alloc_debug(size, flags, file, line) {
            Some(ptr) => {
                self.note_alloc(ptr);
                self.with_debugger(|d| d.on_alloc_debug(ptr, size, file, line));
                Ok(ptr)
            }
            None => Err(self.out_of_memory(size, flags)),
        }
    }

    /// Resizes a block. On failure the original block stays valid.
    ///
    /// # Safety
    ///
    /// `ptr` must have been allocated by this manager and not yet freed.
    pub unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        new_size: usize,
        flags: AllocFlags,
    ) -> Result<NonNull<u8>> {
        // SAFETY: forwarded caller contract.
        let old_size = unsafe { self.system.block_size(ptr) };
        // SAFETY: forwarded caller contract.
        match unsafe { self.system.realloc(ptr, new_size, flags) } {
            Some(new) => {
                self.note_realloc(old_size, new);
                self.with_debugger(|d| d.on_realloc(ptr, new, new_size));
                Ok(new)
            }
            None => Err(self.out_of_memory(new_size, flags)),
        }
    }

    /// Resizes a block and records the call site.
    ///
    /// # Safety
    ///
    /// Same contract as [`realloc`](Self::realloc).
    pub unsafe fn realloc_debug(
        &self,
        ptr: NonNull<u8>,
        new_size: usize,
        flags: AllocFlags,
        file: &'static str,
        line: u32,
    ) -> Result<NonNull<u8>> {
        // SAFETY: forwarded caller contract.
        let old_size = unsafe { self.system.block_size(ptr) };
        // SAFETY: forwarded caller contract.
        match unsafe { self.system.realloc_debug(ptr, new_size, flags, file, line) } {
            Some(new) => {
                self.note_realloc(old_size, new);
                self.with_debugger(|d| d.on_realloc_debug(ptr, new, new_size, file, line));
                Ok(new)
            }
            None => Err(self.out_of_memory(new_size, flags)),
        }
    }

    /// Frees a block.
    ///
    /// A fixed manager validates the pointer against its pool first. A
    /// pointer the pool did not hand out, or one already freed, is logged and
    /// ignored, and the counters stay as they were.
    ///
    /// # Safety
    ///
    /// `ptr` must have been allocated by this manager and not yet freed. A
    /// fixed manager also accepts a pointer it already freed, as long as its
    /// pool has not been collected since.
    pub unsafe fn free(&self, ptr: NonNull<u8>, flags: AllocFlags) {
        // SAFETY: forwarded caller contract.
        let size = unsafe { self.system.block_size(ptr) };
        if self.kind == ManagerKind::Fixed && size.is_none() {
            fxcrt_log::error!(
                "{:?} memory manager rejected free of {:p}: not a live block",
                self.kind,
                ptr
            );
            return;
        }

        self.with_debugger(|d| d.on_free(ptr));
        // SAFETY: forwarded caller contract.
        unsafe { self.system.free(ptr, flags) };

        self.live_blocks.fetch_sub(1, Ordering::Relaxed);
        if let Some(size) = size {
            self.live_bytes.fetch_sub(size, Ordering::Relaxed);
        }
    }

    /// Pins a `MOVABLE` block.
    pub fn lock(&self, ptr: NonNull<u8>) -> NonNull<u8> {
        self.system.lock(ptr)
    }

    /// Releases a pin taken by [`lock`](Self::lock).
    pub fn unlock(&self, ptr: NonNull<u8>) {
        self.system.unlock(ptr);
    }

    /// Releases reserved memory that no live block uses.
    pub fn purge(&self) {
        fxcrt_log::debug!("purging {:?} memory manager", self.kind);
        self.system.purge();
    }

    /// Frees every block this manager's allocator ever handed out.
    ///
    /// # Safety
    ///
    /// No pointer obtained from this manager may be used afterwards.
    pub unsafe fn collect_all(&self) {
        fxcrt_log::debug!("collecting all blocks of {:?} memory manager", self.kind);
        // SAFETY: forwarded caller contract.
        unsafe { self.system.collect_all() };
        self.live_blocks.store(0, Ordering::Relaxed);
        self.live_bytes.store(0, Ordering::Relaxed);
    }

    fn note_alloc(&self, ptr: NonNull<u8>) {
        self.live_blocks.fetch_add(1, Ordering::Relaxed);
        // SAFETY: ptr was just returned by the system allocator.
        if let Some(size) = unsafe { self.system.block_size(ptr) } {
            self.live_bytes.fetch_add(size, Ordering::Relaxed);
        }
    }

    fn note_realloc(&self, old_size: Option<usize>, new: NonNull<u8>) {
        if let Some(old_size) = old_size {
            self.live_bytes.fetch_sub(old_size, Ordering::Relaxed);
        }
        // SAFETY: new was just returned by the system allocator.
        if let Some(size) = unsafe { self.system.block_size(new) } {
            self.live_bytes.fetch_add(size, Ordering::Relaxed);
        }
    }

    #[cold]
    fn out_of_memory(&self, size: usize, flags: AllocFlags) -> Error {
        self.oom_events.fetch_add(1, Ordering::Relaxed);

        if flags.leaves_on_failure() {
            fxcrt_log::error!(
                "{:?} memory manager failed to allocate {} bytes",
                self.kind,
                size
            );
            let handler = self
                .oom_handler
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(handler) = handler {
                handler(&OomEvent { size, flags });
            }
        }

        Error::OutOfMemory { size }
    }
}

impl fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryManager")
            .field("kind", &self.kind)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        fxcrt_log::debug!(
            "destroying {:?} memory manager with {} live blocks",
            self.kind,
            self.live_blocks.load(Ordering::Relaxed)
        );
    }
}
