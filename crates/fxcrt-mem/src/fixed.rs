//! Fixed-size pool allocator for memory-constrained hosts.
//!
//! A [`FixedPool`] carves blocks out of one primary trunk: either a buffer
//! the caller hands over (at least [`MIN_FIXED_BUFFER`] bytes) or memory the
//! library reserves itself (at least [`MIN_LIBRARY_POOL`] bytes). When the
//! pool is exhausted it asks its [`PoolExtension`] for another trunk; a pool
//! without an extension simply fails the request.
//!
//! # Layout
//!
//! Every block starts with a 16-byte header holding the block's total size
//! and a marker used to reject foreign pointers and double frees.
//!
//! - **Small blocks** (total size up to 2048 bytes) are rounded to a size
//!   class and recycled through per-class free lists in O(1).
//! - **Large blocks** come from an address-ordered free list with first-fit
//!   search and coalescing of neighbours on free.
//!
//! [`purge`](SystemAllocator::purge) returns the per-class lists to the
//! coalescing list and hands fully free extension trunks back to the
//! extension.

use std::collections::BTreeMap;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::flags::AllocFlags;
use crate::system::{MIN_ALIGN, SystemAllocator};

/// Smallest caller-supplied buffer a pool accepts (512 KiB).
pub const MIN_FIXED_BUFFER: usize = 512 * 1024;

/// Smallest pool the library reserves on its own (8 MiB).
pub const MIN_LIBRARY_POOL: usize = 8 * 1024 * 1024;

/// Default trunk size handed out by [`HeapExtension`] (1 MiB).
pub const DEFAULT_EXTENSION_TRUNK: usize = 1024 * 1024;

const BLOCK_HEADER: usize = MIN_ALIGN;

const BLOCK_MARKER: usize = 0x5AFE_B10C;

const SIZE_CLASSES: [usize; 7] = [32, 64, 128, 256, 512, 1024, 2048];

const LARGEST_CLASS: usize = SIZE_CLASSES[SIZE_CLASSES.len() - 1];

/// Second-level source of backing trunks for an extensible pool.
pub trait PoolExtension: Send + Sync {
    /// Returns a new trunk of at least `min_size` bytes, or `None` when the
    /// host has no more memory to give.
    fn more(&self, min_size: usize) -> Option<Box<[u8]>>;

    /// Takes back a trunk obtained from [`more`](Self::more).
    fn free(&self, trunk: Box<[u8]>);
}

/// Extension that takes trunks from the process heap.
#[derive(Debug)]
pub struct HeapExtension {
    trunk_size: usize,
    max_trunks: Option<usize>,
    outstanding: AtomicUsize,
}

impl HeapExtension {
    /// Creates an unbounded extension handing out `trunk_size`-byte trunks.
    #[must_use]
    pub const fn new(trunk_size: usize) -> Self {
        HeapExtension {
            trunk_size,
            max_trunks: None,
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Limits how many trunks may be outstanding at once.
    #[must_use]
    pub const fn with_max_trunks(mut self, max_trunks: usize) -> Self {
        self.max_trunks = Some(max_trunks);
        self
    }

    /// Number of trunks handed out and not yet returned.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

impl Default for HeapExtension {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSION_TRUNK)
    }
}

impl PoolExtension for HeapExtension {
    fn more(&self, min_size: usize) -> Option<Box<[u8]>> {
        let limit = self.max_trunks.unwrap_or(usize::MAX);
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()?;

        let size = min_size.max(self.trunk_size);
        let mut memory = Vec::new();
        if memory.try_reserve_exact(size).is_err() {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        memory.resize(size, 0);
        Some(memory.into_boxed_slice())
    }

    fn free(&self, trunk: Box<[u8]>) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        drop(trunk);
    }
}

enum PoolSource {
    Buffer(Box<[u8]>),
    Size(usize),
}

/// Construction parameters for a [`FixedPool`].
pub struct FixedPoolConfig {
    source: PoolSource,
    small_blocks: bool,
    extension: Option<Arc<dyn PoolExtension>>,
}

impl FixedPoolConfig {
    /// Builds the pool over a caller-supplied buffer.
    #[must_use]
    pub fn with_buffer(buffer: Box<[u8]>) -> Self {
        Self::from_source(PoolSource::Buffer(buffer))
    }

    /// Lets the library reserve `size` bytes, raised to [`MIN_LIBRARY_POOL`].
    #[must_use]
    pub fn with_size(size: usize) -> Self {
        Self::from_source(PoolSource::Size(size))
    }

    fn from_source(source: PoolSource) -> Self {
        FixedPoolConfig {
            source,
            small_blocks: true,
            extension: None,
        }
    }

    /// Enables or disables the size-class front end (enabled by default).
    #[must_use]
    pub fn small_blocks(mut self, enabled: bool) -> Self {
        self.small_blocks = enabled;
        self
    }

    /// Makes the pool extensible through `extension`.
    #[must_use]
    pub fn extension(mut self, extension: Arc<dyn PoolExtension>) -> Self {
        self.extension = Some(extension);
        self
    }
}

impl fmt::Debug for FixedPoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            PoolSource::Buffer(buffer) => format!("buffer of {} bytes", buffer.len()),
            PoolSource::Size(size) => format!("{size} bytes"),
        };
        f.debug_struct("FixedPoolConfig")
            .field("source", &source)
            .field("small_blocks", &self.small_blocks)
            .field("extensible", &self.extension.is_some())
            .finish()
    }
}

/// Usage counters of a [`FixedPool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Trunks backing the pool, primary included.
    pub trunks: usize,
    /// Trunks obtained from the extension.
    pub extension_trunks: usize,
    /// Usable bytes across all trunks.
    pub capacity: usize,
    /// Bytes held by live blocks, headers included.
    pub bytes_in_use: usize,
    /// Blocks allocated and not yet freed.
    pub live_blocks: usize,
    /// Bytes available for allocation.
    pub bytes_free: usize,
    /// Largest block the coalescing list could hand out right now.
    pub largest_free_block: usize,
}

struct Trunk {
    memory: NonNull<[u8]>,
    start: usize,
    len: usize,
    extension: bool,
}

impl Trunk {
    fn new(memory: Box<[u8]>, extension: bool) -> Self {
        let memory = NonNull::from(Box::leak(memory));
        let base = memory.cast::<u8>();
        let offset = base.as_ptr().align_offset(MIN_ALIGN);
        let len = memory.len().saturating_sub(offset) & !(MIN_ALIGN - 1);

        Trunk {
            memory,
            start: base.as_ptr().addr() + offset,
            len,
            extension,
        }
    }

    fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.start + self.len
    }

    fn ptr_at(&self, addr: usize) -> NonNull<u8> {
        debug_assert!(self.contains(addr));
        let base = self.memory.cast::<u8>();
        // SAFETY: addr lies inside this trunk, so the offset stays in bounds.
        unsafe { base.add(addr - base.as_ptr().addr()) }
    }

    fn into_box(self) -> Box<[u8]> {
        // SAFETY: memory came from Box::leak in Trunk::new and is released once.
        unsafe { Box::from_raw(self.memory.as_ptr()) }
    }
}

struct PoolState {
    trunks: Vec<Trunk>,
    free: BTreeMap<usize, usize>,
    small: [Vec<usize>; SIZE_CLASSES.len()],
    small_blocks: bool,
    bytes_in_use: usize,
    live_blocks: usize,
}

// SAFETY: the trunk memory is owned exclusively by the pool and only touched
// while the pool's mutex is held.
unsafe impl Send for PoolState {}

impl PoolState {
    fn trunk_index(&self, addr: usize) -> Option<usize> {
        self.trunks.iter().position(|t| t.contains(addr))
    }

    fn add_trunk(&mut self, trunk: Trunk) {
        if trunk.len > 0 {
            self.insert_free(trunk.start, trunk.len);
        }
        self.trunks.push(trunk);
    }

    fn block_total(&self, size: usize) -> Option<(Option<usize>, usize)> {
        let total = size.max(1).checked_add(BLOCK_HEADER + MIN_ALIGN - 1)? & !(MIN_ALIGN - 1);

        if self.small_blocks && total <= LARGEST_CLASS {
            let class = SIZE_CLASSES.iter().position(|&s| s >= total)?;
            Some((Some(class), SIZE_CLASSES[class]))
        } else {
            Some((None, total))
        }
    }

    fn take_free(&mut self, total: usize) -> Option<usize> {
        let (&addr, &len) = self.free.iter().find(|&(_, &len)| len >= total)?;
        self.free.remove(&addr);
        if len > total {
            self.free.insert(addr + total, len - total);
        }
        Some(addr)
    }

    fn insert_free(&mut self, addr: usize, len: usize) {
        let trunk = self.trunk_index(addr);
        let end = addr + len;
        let mut start = addr;
        let mut len = len;

        let prev = self.free.range(..addr).next_back().map(|(&a, &l)| (a, l));
        if let Some((prev_addr, prev_len)) = prev
            && prev_addr + prev_len == addr
            && self.trunk_index(prev_addr) == trunk
        {
            self.free.remove(&prev_addr);
            start = prev_addr;
            len += prev_len;
        }

        if self.trunk_index(end) == trunk
            && let Some(next_len) = self.free.remove(&end)
        {
            len += next_len;
        }

        self.free.insert(start, len);
    }

    fn alloc(
        &mut self,
        size: usize,
        extension: Option<&Arc<dyn PoolExtension>>,
    ) -> Option<NonNull<u8>> {
        let (class, total) = self.block_total(size)?;

        let addr = match class.and_then(|c| self.small[c].pop()) {
            Some(addr) => addr,
            None => match self.take_free(total) {
                Some(addr) => addr,
                None => {
                    let extension = extension?;
                    self.grow(extension, total)?;
                    self.take_free(total)?
                }
            },
        };

        let block = self.trunks[self.trunk_index(addr)?].ptr_at(addr);
        self.bytes_in_use += total;
        self.live_blocks += 1;

        // SAFETY: the block is at least BLOCK_HEADER + 16 bytes inside the
        // trunk and aligned for usize.
        unsafe {
            block.cast::<usize>().write(total);
            block.cast::<usize>().add(1).write(BLOCK_MARKER);
            Some(block.add(BLOCK_HEADER))
        }
    }

    fn grow(&mut self, extension: &Arc<dyn PoolExtension>, total: usize) -> Option<()> {
        let Some(memory) = extension.more(total + MIN_ALIGN) else {
            fxcrt_log::warn!("fixed pool exhausted: no extension trunk for {} bytes", total);
            return None;
        };

        let trunk = Trunk::new(memory, true);
        if trunk.len < total {
            fxcrt_log::warn!(
                "extension trunk of {} usable bytes cannot hold {} bytes",
                trunk.len,
                total
            );
            extension.free(trunk.into_box());
            return None;
        }

        fxcrt_log::debug!("fixed pool grew by a {} byte trunk", trunk.len);
        self.add_trunk(trunk);
        Some(())
    }

    /// Validates a block pointer and returns its header address and total size.
    fn block_of(&self, ptr: NonNull<u8>) -> Result<(usize, usize)> {
        let foreign = Error::ForeignPointer {
            ptr: ptr.as_ptr().addr(),
        };
        let addr = ptr.as_ptr().addr().checked_sub(BLOCK_HEADER).ok_or(foreign.clone())?;
        if addr % MIN_ALIGN != 0 {
            return Err(foreign);
        }
        let index = self.trunk_index(addr).ok_or(foreign.clone())?;
        let header = self.trunks[index].ptr_at(addr).cast::<usize>();

        // SAFETY: addr is 16-aligned and inside a trunk owned by this pool;
        // trunk lengths are multiples of 16, so the header read stays in bounds.
        let (total, marker) = unsafe { (header.read(), header.add(1).read()) };
        if marker != BLOCK_MARKER {
            return Err(foreign);
        }
        Ok((addr, total))
    }

    fn free(&mut self, ptr: NonNull<u8>) -> Result<()> {
        let (addr, total) = self.block_of(ptr)?;
        let index = self.trunk_index(addr).ok_or(Error::ForeignPointer { ptr: addr })?;

        // SAFETY: block_of validated the header; clearing the marker makes a
        // second free of the same block fail.
        unsafe {
            self.trunks[index]
                .ptr_at(addr)
                .cast::<usize>()
                .add(1)
                .write(0);
        }

        self.bytes_in_use -= total;
        self.live_blocks -= 1;

        match SIZE_CLASSES.iter().position(|&s| s == total) {
            Some(class) if self.small_blocks => self.small[class].push(addr),
            _ => self.insert_free(addr, total),
        }
        Ok(())
    }

    fn release_trunk(&mut self, index: usize, extension: Option<&Arc<dyn PoolExtension>>) {
        let trunk = self.trunks.remove(index);
        let memory = trunk.into_box();
        match extension {
            Some(extension) => extension.free(memory),
            None => drop(memory),
        }
    }

    fn purge(&mut self, extension: Option<&Arc<dyn PoolExtension>>) {
        let small: Vec<(usize, usize)> = self
            .small
            .iter_mut()
            .enumerate()
            .flat_map(|(class, list)| list.drain(..).map(move |addr| (addr, SIZE_CLASSES[class])))
            .collect();
        for (addr, len) in small {
            self.insert_free(addr, len);
        }

        let mut index = 0;
        while index < self.trunks.len() {
            let trunk = &self.trunks[index];
            let idle = trunk.extension && self.free.get(&trunk.start) == Some(&trunk.len);
            if idle {
                fxcrt_log::debug!("purge released a {} byte extension trunk", trunk.len);
                let start = trunk.start;
                self.free.remove(&start);
                self.release_trunk(index, extension);
            } else {
                index += 1;
            }
        }
    }

    fn collect_all(&mut self, extension: Option<&Arc<dyn PoolExtension>>) {
        let mut index = 0;
        while index < self.trunks.len() {
            if self.trunks[index].extension {
                self.release_trunk(index, extension);
            } else {
                index += 1;
            }
        }

        self.free.clear();
        self.small.iter_mut().for_each(Vec::clear);
        for trunk in self.trunks.iter().filter(|t| t.len > 0) {
            // SAFETY: the range is exactly the trunk's usable memory; zeroing
            // it wipes every block marker so stale pointers fail validation.
            unsafe { trunk.ptr_at(trunk.start).write_bytes(0, trunk.len) };
        }
        let primary: Vec<(usize, usize)> = self.trunks.iter().map(|t| (t.start, t.len)).collect();
        for (start, len) in primary {
            if len > 0 {
                self.free.insert(start, len);
            }
        }
        self.bytes_in_use = 0;
        self.live_blocks = 0;
    }

    fn stats(&self) -> PoolStats {
        let small_free: usize = self
            .small
            .iter()
            .zip(SIZE_CLASSES)
            .map(|(list, size)| list.len() * size)
            .sum();

        PoolStats {
            trunks: self.trunks.len(),
            extension_trunks: self.trunks.iter().filter(|t| t.extension).count(),
            capacity: self.trunks.iter().map(|t| t.len).sum(),
            bytes_in_use: self.bytes_in_use,
            live_blocks: self.live_blocks,
            bytes_free: self.free.values().sum::<usize>() + small_free,
            largest_free_block: self.free.values().copied().max().unwrap_or(0),
        }
    }
}

/// A bounded pool allocator, optionally extensible.
///
/// ```
/// use fxcrt_mem::{AllocFlags, FixedPool, FixedPoolConfig, SystemAllocator, MIN_FIXED_BUFFER};
///
/// let buffer = vec![0u8; MIN_FIXED_BUFFER].into_boxed_slice();
/// let pool = FixedPool::new(FixedPoolConfig::with_buffer(buffer)).unwrap();
///
/// let ptr = pool.alloc(100, AllocFlags::empty()).unwrap();
/// assert_eq!(pool.stats().live_blocks, 1);
///
/// // A request larger than the whole pool fails instead of growing.
/// assert!(pool.alloc(2 * MIN_FIXED_BUFFER, AllocFlags::empty()).is_none());
///
/// unsafe { pool.free(ptr, AllocFlags::empty()) };
/// ```
pub struct FixedPool {
    state: Mutex<PoolState>,
    extension: Option<Arc<dyn PoolExtension>>,
}

impl FixedPool {
    /// Builds a pool from `config`.
    pub fn new(config: FixedPoolConfig) -> Result<Self> {
        let memory = match config.source {
            PoolSource::Buffer(buffer) => {
                if buffer.len() < MIN_FIXED_BUFFER {
                    return Err(Error::PoolTooSmall {
                        requested: buffer.len(),
                        minimum: MIN_FIXED_BUFFER,
                    });
                }
                buffer
            }
            PoolSource::Size(size) => {
                let size = size.max(MIN_LIBRARY_POOL);
                let mut memory = Vec::new();
                memory
                    .try_reserve_exact(size)
                    .map_err(|_| Error::OutOfMemory { size })?;
                memory.resize(size, 0);
                memory.into_boxed_slice()
            }
        };

        let mut state = PoolState {
            trunks: Vec::new(),
            free: BTreeMap::new(),
            small: Default::default(),
            small_blocks: config.small_blocks,
            bytes_in_use: 0,
            live_blocks: 0,
        };
        state.add_trunk(Trunk::new(memory, false));

        fxcrt_log::debug!(
            "created fixed pool of {} bytes (extensible: {})",
            state.trunks[0].len,
            config.extension.is_some()
        );

        Ok(FixedPool {
            state: Mutex::new(state),
            extension: config.extension,
        })
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` if the pool can request more trunks.
    #[must_use]
    pub fn is_extensible(&self) -> bool {
        self.extension.is_some()
    }

    /// Returns a snapshot of the pool's counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.state().stats()
    }

    /// Frees a block, reporting pointers this pool does not own.
    ///
    /// # Safety
    ///
    /// If `ptr` was allocated by this pool it must not be in use afterwards.
    pub unsafe fn try_free(&self, ptr: NonNull<u8>) -> Result<()> {
        self.state().free(ptr)
    }
}

impl SystemAllocator for FixedPool {
    fn alloc(&self, size: usize, _flags: AllocFlags) -> Option<NonNull<u8>> {
        let ptr = self.state().alloc(size, self.extension.as_ref());
        fxcrt_log::trace!("fixed pool alloc {} bytes -> {:?}", size, ptr);
        ptr
    }

    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        new_size: usize,
        _flags: AllocFlags,
    ) -> Option<NonNull<u8>> {
        let mut state = self.state();
        let (_, total) = state.block_of(ptr).ok()?;
        let usable = total - BLOCK_HEADER;
        if new_size <= usable {
            return Some(ptr);
        }

        let new = state.alloc(new_size, self.extension.as_ref())?;
        // SAFETY: both blocks are live, distinct and at least `usable` bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.as_ptr(), new.as_ptr(), usable);
        }
        state.free(ptr).ok()?;
        Some(new)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, _flags: AllocFlags) {
        if let Err(err) = self.state().free(ptr) {
            fxcrt_log::error!("fixed pool free rejected: {}", err);
        }
    }

    fn purge(&self) {
        self.state().purge(self.extension.as_ref());
    }

    unsafe fn collect_all(&self) {
        self.state().collect_all(self.extension.as_ref());
    }

    unsafe fn block_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        let (_, total) = self.state().block_of(ptr).ok()?;
        Some(total - BLOCK_HEADER)
    }
}

impl fmt::Debug for FixedPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedPool")
            .field("stats", &self.stats())
            .field("extensible", &self.is_extensible())
            .finish()
    }
}

impl Drop for FixedPool {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for trunk in state.trunks.drain(..) {
            let extension_trunk = trunk.extension;
            let memory = trunk.into_box();
            match &self.extension {
                Some(extension) if extension_trunk => extension.free(memory),
                _ => drop(memory),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool() -> FixedPool {
        let buffer = vec![0u8; MIN_FIXED_BUFFER].into_boxed_slice();
        FixedPool::new(FixedPoolConfig::with_buffer(buffer)).unwrap()
    }

    #[test]
    fn test_rejects_small_buffer() {
        let buffer = vec![0u8; 1024].into_boxed_slice();
        let err = FixedPool::new(FixedPoolConfig::with_buffer(buffer)).unwrap_err();
        assert_eq!(
            err,
            Error::PoolTooSmall {
                requested: 1024,
                minimum: MIN_FIXED_BUFFER
            }
        );
    }

    #[test]
    fn test_library_pool_minimum() {
        let pool = FixedPool::new(FixedPoolConfig::with_size(4096)).unwrap();
        assert!(pool.stats().capacity >= MIN_LIBRARY_POOL - MIN_ALIGN);
    }

    #[test]
    fn test_blocks_are_aligned_and_disjoint() {
        let pool = small_pool();
        let ptrs: Vec<_> = (1..64)
            .map(|i| pool.alloc(i * 7, AllocFlags::empty()).unwrap())
            .collect();

        for (i, ptr) in ptrs.iter().enumerate() {
            assert_eq!(ptr.as_ptr().addr() % MIN_ALIGN, 0);
            unsafe { ptr.as_ptr().write_bytes(i as u8, (i + 1) * 7) };
        }
        for (i, ptr) in ptrs.iter().enumerate() {
            let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), (i + 1) * 7) };
            assert!(bytes.iter().all(|&b| b == i as u8));
        }
        for ptr in ptrs {
            unsafe { pool.free(ptr, AllocFlags::empty()) };
        }
        assert_eq!(pool.stats().live_blocks, 0);
        assert_eq!(pool.stats().bytes_in_use, 0);
    }

    #[test]
    fn test_small_blocks_are_recycled() {
        let pool = small_pool();
        let a = pool.alloc(40, AllocFlags::empty()).unwrap();
        unsafe { pool.free(a, AllocFlags::empty()) };
        let b = pool.alloc(48, AllocFlags::empty()).unwrap();
        assert_eq!(a, b);
        unsafe { pool.free(b, AllocFlags::empty()) };
    }

    #[test]
    fn test_large_blocks_coalesce() {
        let pool = FixedPool::new(
            FixedPoolConfig::with_buffer(vec![0u8; MIN_FIXED_BUFFER].into_boxed_slice())
                .small_blocks(false),
        )
        .unwrap();
        let initial = pool.stats().largest_free_block;

        let a = pool.alloc(100_000, AllocFlags::empty()).unwrap();
        let b = pool.alloc(100_000, AllocFlags::empty()).unwrap();
        let c = pool.alloc(100_000, AllocFlags::empty()).unwrap();
        unsafe {
            pool.free(b, AllocFlags::empty());
            pool.free(a, AllocFlags::empty());
            pool.free(c, AllocFlags::empty());
        }

        assert_eq!(pool.stats().largest_free_block, initial);
    }

    #[test]
    fn test_exhaustion_without_extension() {
        let pool = small_pool();
        assert!(pool.alloc(MIN_FIXED_BUFFER, AllocFlags::empty()).is_none());
        assert_eq!(pool.stats().trunks, 1);
    }

    #[test]
    fn test_extension_grows_and_purge_releases() {
        let extension = Arc::new(HeapExtension::new(256 * 1024));
        let pool = FixedPool::new(
            FixedPoolConfig::with_buffer(vec![0u8; MIN_FIXED_BUFFER].into_boxed_slice())
                .extension(extension.clone()),
        )
        .unwrap();

        let big = pool.alloc(MIN_FIXED_BUFFER, AllocFlags::empty()).unwrap();
        assert_eq!(pool.stats().extension_trunks, 1);
        assert_eq!(extension.outstanding(), 1);

        unsafe { pool.free(big, AllocFlags::empty()) };
        pool.purge();
        assert_eq!(pool.stats().extension_trunks, 0);
        assert_eq!(extension.outstanding(), 0);
    }

    #[test]
    fn test_bounded_extension() {
        let extension = Arc::new(HeapExtension::new(64 * 1024).with_max_trunks(1));
        let pool = FixedPool::new(
            FixedPoolConfig::with_buffer(vec![0u8; MIN_FIXED_BUFFER].into_boxed_slice())
                .extension(extension.clone()),
        )
        .unwrap();

        let a = pool.alloc(MIN_FIXED_BUFFER, AllocFlags::empty()).unwrap();
        assert!(pool.alloc(MIN_FIXED_BUFFER, AllocFlags::empty()).is_none());
        unsafe { pool.free(a, AllocFlags::empty()) };
        drop(pool);
        assert_eq!(extension.outstanding(), 0);
    }

    #[test]
    fn test_realloc_in_place_and_moving() {
        let pool = small_pool();
        let ptr = pool.alloc(10, AllocFlags::empty()).unwrap();
        unsafe {
            ptr.as_ptr().copy_from_nonoverlapping(b"0123456789".as_ptr(), 10);

            let same = pool.realloc(ptr, 16, AllocFlags::empty()).unwrap();
            assert_eq!(same, ptr);

            let moved = pool.realloc(same, 5000, AllocFlags::empty()).unwrap();
            assert_ne!(moved, ptr);
            assert_eq!(std::slice::from_raw_parts(moved.as_ptr(), 10), b"0123456789");
            assert_eq!(pool.block_size(moved), Some(5008));

            pool.free(moved, AllocFlags::empty());
        }
        assert_eq!(pool.stats().live_blocks, 0);
    }

    #[test]
    fn test_double_free_is_rejected() {
        let pool = small_pool();
        let ptr = pool.alloc(3000, AllocFlags::empty()).unwrap();
        unsafe {
            assert!(pool.try_free(ptr).is_ok());
            assert!(matches!(pool.try_free(ptr), Err(Error::ForeignPointer { .. })));
        }
    }

    #[test]
    fn test_foreign_pointer_is_rejected() {
        let pool = small_pool();
        let mut outside = [0u8; 64];
        let ptr = NonNull::new(outside.as_mut_ptr().wrapping_add(32)).unwrap();
        assert!(matches!(
            unsafe { pool.try_free(ptr) },
            Err(Error::ForeignPointer { .. })
        ));
    }

    #[test]
    fn test_collect_all_resets_pool() {
        let pool = small_pool();
        let capacity = pool.stats().capacity;
        for _ in 0..100 {
            pool.alloc(300, AllocFlags::empty()).unwrap();
        }
        unsafe { pool.collect_all() };

        let stats = pool.stats();
        assert_eq!(stats.live_blocks, 0);
        assert_eq!(stats.bytes_free, capacity);
        assert_eq!(stats.largest_free_block, capacity);
    }

    #[test]
    fn test_collect_all_invalidates_old_blocks() {
        let pool = small_pool();
        let capacity = pool.stats().capacity;
        let stale = pool.alloc(3000, AllocFlags::empty()).unwrap();
        unsafe { pool.collect_all() };

        assert!(matches!(
            unsafe { pool.try_free(stale) },
            Err(Error::ForeignPointer { .. })
        ));
        let stats = pool.stats();
        assert_eq!(stats.live_blocks, 0);
        assert_eq!(stats.bytes_free, capacity);
        assert_eq!(stats.largest_free_block, capacity);
    }
}
