//! Growable contiguous byte buffers.
//!
//! [`BinaryBuffer`] owns one allocation obtained through an
//! [`AllocatorHandle`] and grows it on demand. Growth rounds the requested
//! size up to the allocation step; with no step configured the step is a
//! quarter of the current capacity, never less than [`MIN_GROWTH`] bytes, so
//! repeated single-byte appends stay amortized O(1).
//!
//! Every growth path returns a [`Result`]: `Err(OutOfMemory)` leaves the
//! buffer exactly as it was.

use std::fmt;
use std::ops::{Index, IndexMut};
use std::ptr::NonNull;

use fxcrt_mem::{AllocatorHandle, Error, Result};

use crate::index_out_of_range;
use crate::string::ByteString;

/// Smallest growth increment when no allocation step is configured.
pub const MIN_GROWTH: usize = 100;

/// A growable byte buffer with a configurable allocation step.
///
/// ```
/// use fxcrt::BinaryBuffer;
///
/// let mut buf = BinaryBuffer::new();
/// buf.append_block(b"hello").unwrap();
/// buf.append_fill(b'!', 3).unwrap();
/// buf.insert_block(5, b", world").unwrap();
/// assert_eq!(buf.as_slice(), b"hello, world!!!");
///
/// buf.delete(5, 7).unwrap();
/// assert_eq!(buf.as_slice(), b"hello!!!");
/// ```
pub struct BinaryBuffer {
    buffer: Option<NonNull<u8>>,
    size: usize,
    alloc_size: usize,
    alloc_step: usize,
    allocator: AllocatorHandle,
}

// SAFETY: the buffer exclusively owns its allocation, and allocators behind
// handles are Send + Sync.
unsafe impl Send for BinaryBuffer {}
// SAFETY: shared access only reads the allocation.
unsafe impl Sync for BinaryBuffer {}

impl BinaryBuffer {
    /// Creates an empty buffer using the default allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::new_in(AllocatorHandle::default())
    }

    /// Creates an empty buffer that allocates through `allocator`.
    ///
    /// A default handle is pinned on the first allocation.
    #[must_use]
    pub fn new_in(allocator: AllocatorHandle) -> Self {
        BinaryBuffer {
            buffer: None,
            size: 0,
            alloc_size: 0,
            alloc_step: 0,
            allocator,
        }
    }

    /// Creates an empty buffer that grows in multiples of `step` bytes.
    #[must_use]
    pub fn with_step(step: usize) -> Self {
        let mut buffer = Self::new();
        buffer.alloc_step = step;
        buffer
    }

    /// Creates a buffer holding a copy of `data`.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let mut buffer = Self::new();
        buffer.append_block(data)?;
        Ok(buffer)
    }

    /// Number of bytes in use.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.size
    }

    /// Returns `true` if no bytes are in use.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of bytes allocated.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.alloc_size
    }

    /// The configured allocation step; 0 means adaptive growth.
    #[must_use]
    pub const fn step(&self) -> usize {
        self.alloc_step
    }

    /// Returns the allocator the buffer uses.
    #[must_use]
    pub const fn allocator(&self) -> &AllocatorHandle {
        &self.allocator
    }

    /// The bytes in use.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match self.buffer {
            // SAFETY: the first `size` bytes of the allocation are initialized.
            Some(ptr) => unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.size) },
            None => &[],
        }
    }

    /// The bytes in use, mutably.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self.buffer {
            // SAFETY: as in as_slice; &mut self guarantees exclusivity.
            Some(ptr) => unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.size) },
            None => &mut [],
        }
    }

    pub(crate) fn as_ptr(&self) -> Option<NonNull<u8>> {
        self.buffer
    }

    /// Resizes the allocation to exactly `new_size` bytes.
    fn reallocate(&mut self, new_size: usize) -> Result<()> {
        if self.allocator.is_default() {
            self.allocator = self.allocator.resolve();
        }

        let ptr = match self.buffer {
            // SAFETY: the allocation came from this allocator with alloc_size bytes.
            Some(ptr) => unsafe { self.allocator.realloc(ptr, self.alloc_size, new_size)? },
            None => self.allocator.alloc(new_size)?,
        };
        self.buffer = Some(ptr);
        self.alloc_size = new_size;
        Ok(())
    }

    /// Makes room for `add` more bytes, rounding up to the growth step.
    fn expand_buf(&mut self, add: usize) -> Result<()> {
        let needed = self.size.checked_add(add).ok_or(Error::InvalidArgument {
            reason: "buffer size overflows",
        })?;
        if needed <= self.alloc_size {
            return Ok(());
        }

        let step = match self.alloc_step {
            0 => (self.alloc_size / 4).max(MIN_GROWTH),
            step => step,
        };
        let new_size = needed.checked_next_multiple_of(step).unwrap_or(needed);
        self.reallocate(new_size)
    }

    /// Ensures capacity for `size` bytes without changing the length.
    ///
    /// A non-zero `step` replaces the allocation step for future growth.
    pub fn estimate_size(&mut self, size: usize, step: usize) -> Result<()> {
        if step != 0 {
            self.alloc_step = step;
        }
        if size <= self.alloc_size {
            return Ok(());
        }
        self.reallocate(size)
    }

    /// Appends a copy of `data`.
    pub fn append_block(&mut self, data: &[u8]) -> Result<()> {
        self.expand_buf(data.len())?;
        if let Some(ptr) = self.buffer {
            // SAFETY: expand_buf made room for data.len() bytes past size.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    data.as_ptr(),
                    ptr.as_ptr().add(self.size),
                    data.len(),
                );
            }
        }
        self.size += data.len();
        Ok(())
    }

    /// Appends one byte.
    pub fn append_byte(&mut self, byte: u8) -> Result<()> {
        self.append_block(&[byte])
    }

    /// Appends `count` copies of `byte`.
    pub fn append_fill(&mut self, byte: u8, count: usize) -> Result<()> {
        self.expand_buf(count)?;
        if let Some(ptr) = self.buffer {
            // SAFETY: expand_buf made room for count bytes past size.
            unsafe { ptr.as_ptr().add(self.size).write_bytes(byte, count) };
        }
        self.size += count;
        Ok(())
    }

    /// Inserts `data` at `pos`, shifting the tail right.
    pub fn insert_block(&mut self, pos: usize, data: &[u8]) -> Result<()> {
        if pos > self.size {
            return Err(Error::InvalidArgument {
                reason: "insert position past the end of the buffer",
            });
        }
        self.expand_buf(data.len())?;
        if let Some(ptr) = self.buffer {
            // SAFETY: the tail move and the copy both stay below size + len,
            // which expand_buf guaranteed to be allocated.
            unsafe {
                let base = ptr.as_ptr();
                std::ptr::copy(base.add(pos), base.add(pos + data.len()), self.size - pos);
                std::ptr::copy_nonoverlapping(data.as_ptr(), base.add(pos), data.len());
            }
        }
        self.size += data.len();
        Ok(())
    }

    /// Removes `count` bytes starting at `start`, shifting the tail left.
    ///
    /// Fails with [`Error::InvalidArgument`] if the range is not inside the
    /// buffer; the buffer is left unchanged.
    pub fn delete(&mut self, start: usize, count: usize) -> Result<()> {
        let end = start
            .checked_add(count)
            .filter(|&end| end <= self.size)
            .ok_or(Error::InvalidArgument {
                reason: "delete range outside the buffer",
            })?;
        self.as_mut_slice().copy_within(end.., start);
        self.size -= count;
        Ok(())
    }

    /// Replaces the contents with a copy of `data`.
    pub fn copy_data(&mut self, data: &[u8]) -> Result<()> {
        self.clear();
        self.append_block(data)
    }

    /// Sets the length to zero, keeping the allocation.
    pub fn clear(&mut self) {
        self.size = 0;
    }

    /// Shortens the buffer to `len` bytes; longer lengths are ignored.
    pub fn truncate(&mut self, len: usize) {
        self.size = self.size.min(len);
    }

    /// Releases the allocation and resets every size to zero.
    pub fn release(&mut self) {
        if let Some(ptr) = self.buffer.take() {
            // SAFETY: the buffer owned this allocation.
            unsafe { self.allocator.free(ptr) };
        }
        self.size = 0;
        self.alloc_size = 0;
    }

    /// Hands the allocation to the caller; the buffer is empty afterwards.
    ///
    /// Returns `None` if the buffer holds no allocation.
    pub fn detach_buffer(&mut self) -> Option<DetachedBuffer> {
        let ptr = self.buffer.take()?;
        let detached = DetachedBuffer {
            ptr,
            len: self.size,
            capacity: self.alloc_size,
            allocator: self.allocator.clone(),
        };
        self.size = 0;
        self.alloc_size = 0;
        Some(detached)
    }

    /// Takes ownership of a detached allocation, releasing the current one.
    pub fn attach_data(&mut self, data: DetachedBuffer) {
        self.release();
        let data = std::mem::ManuallyDrop::new(data);
        self.buffer = Some(data.ptr);
        self.size = data.len;
        self.alloc_size = data.capacity;
        // SAFETY: data is never dropped, so its handle is moved exactly once.
        self.allocator = unsafe { std::ptr::read(&data.allocator) };
    }

    /// Steals `other`'s allocation, leaving `other` empty.
    pub fn take_over(&mut self, other: &mut BinaryBuffer) {
        match other.detach_buffer() {
            Some(data) => self.attach_data(data),
            None => self.release(),
        }
        if other.alloc_step != 0 {
            self.alloc_step = other.alloc_step;
        }
    }

    /// Copies the contents into a byte string.
    #[must_use]
    pub fn get_byte_string(&self) -> ByteString {
        ByteString::from_slice(self.as_slice())
    }
}

impl Default for BinaryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BinaryBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

impl Index<usize> for BinaryBuffer {
    type Output = u8;

    #[track_caller]
    fn index(&self, index: usize) -> &u8 {
        match self.as_slice().get(index) {
            Some(byte) => byte,
            None => index_out_of_range(index, self.size),
        }
    }
}

impl IndexMut<usize> for BinaryBuffer {
    #[track_caller]
    fn index_mut(&mut self, index: usize) -> &mut u8 {
        let len = self.size;
        match self.as_mut_slice().get_mut(index) {
            Some(byte) => byte,
            None => index_out_of_range(index, len),
        }
    }
}

impl fmt::Debug for BinaryBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryBuffer")
            .field("len", &self.size)
            .field("capacity", &self.alloc_size)
            .field("step", &self.alloc_step)
            .finish()
    }
}

/// An allocation detached from a [`BinaryBuffer`].
///
/// Frees itself through its allocator when dropped, unless it is attached
/// to a buffer again first.
pub struct DetachedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    capacity: usize,
    allocator: AllocatorHandle,
}

// SAFETY: same ownership argument as BinaryBuffer.
unsafe impl Send for DetachedBuffer {}

impl DetachedBuffer {
    /// Start of the allocation.
    #[must_use]
    pub const fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Bytes in use.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no bytes are in use.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes allocated.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// The bytes in use.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the first len bytes were initialized by the buffer.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for DetachedBuffer {
    fn drop(&mut self) {
        // SAFETY: the detached buffer owns this allocation.
        unsafe { self.allocator.free(self.ptr) };
    }
}

impl fmt::Debug for DetachedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetachedBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use fxcrt_mem::{BoundedHeap, MemoryManager};

    fn counted() -> (BinaryBuffer, Arc<MemoryManager>) {
        let manager = Arc::new(MemoryManager::with_heap());
        let buffer = BinaryBuffer::new_in(AllocatorHandle::from_manager(manager.clone()));
        (buffer, manager)
    }

    #[test]
    fn test_estimate_size_reserves_without_length() {
        let mut buf = BinaryBuffer::new();
        buf.estimate_size(1000, 0).unwrap();
        assert!(buf.capacity() >= 1000);
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.step(), 0);

        buf.estimate_size(10, 256).unwrap();
        assert_eq!(buf.step(), 256);
        assert_eq!(buf.capacity(), 1000);
    }

    #[test]
    fn test_single_byte_growth_is_chunked() {
        let (mut buf, manager) = counted();
        buf.append_byte(1).unwrap();
        assert_eq!(buf.capacity(), MIN_GROWTH);

        for i in 0..99u8 {
            buf.append_byte(i).unwrap();
        }
        assert_eq!(buf.capacity(), MIN_GROWTH);
        assert_eq!(manager.stats().live_blocks, 1);

        buf.append_byte(0).unwrap();
        assert_eq!(buf.capacity(), 2 * MIN_GROWTH);
    }

    #[test]
    fn test_step_rounds_growth() {
        let mut buf = BinaryBuffer::with_step(64);
        buf.append_block(&[0; 65]).unwrap();
        assert_eq!(buf.capacity(), 128);
    }

    #[test]
    fn test_insert_and_bounds() {
        let mut buf = BinaryBuffer::from_slice(b"ace").unwrap();
        buf.insert_block(1, b"b").unwrap();
        buf.insert_block(3, b"d").unwrap();
        buf.insert_block(5, b"f").unwrap();
        assert_eq!(buf.as_slice(), b"abcdef");

        let err = buf.insert_block(7, b"x").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_delete_out_of_range_is_rejected() {
        let mut buf = BinaryBuffer::from_slice(b"abcdef").unwrap();
        assert!(buf.delete(4, 3).is_err());
        assert!(buf.delete(usize::MAX, 2).is_err());
        assert_eq!(buf.as_slice(), b"abcdef");

        buf.delete(0, 6).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_attach_detach_round_trip() {
        let (mut source, manager) = counted();
        source.append_block(b"payload").unwrap();
        let detached = source.detach_buffer().unwrap();
        let ptr = detached.as_ptr();

        let mut buf = BinaryBuffer::new();
        buf.attach_data(detached);
        assert_eq!(buf.as_slice(), b"payload");

        let again = buf.detach_buffer().unwrap();
        assert_eq!(again.as_ptr(), ptr);
        assert_eq!(again.len(), 7);
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.capacity(), 0);
        assert!(buf.detach_buffer().is_none());

        drop(buf);
        assert_eq!(manager.stats().live_blocks, 1);
        drop(again);
        assert_eq!(manager.stats().live_blocks, 0);
    }

    #[test]
    fn test_take_over_moves_allocation() {
        let mut a = BinaryBuffer::from_slice(b"old").unwrap();
        let mut b = BinaryBuffer::from_slice(b"new").unwrap();
        a.take_over(&mut b);
        assert_eq!(a.as_slice(), b"new");
        assert!(b.is_empty());
        assert_eq!(b.capacity(), 0);
    }

    #[test]
    fn test_failed_growth_leaves_buffer_intact() {
        let manager = Arc::new(MemoryManager::new(Arc::new(BoundedHeap::new(512))));
        let mut buf = BinaryBuffer::new_in(AllocatorHandle::from_manager(manager));
        buf.append_block(b"keep").unwrap();

        let err = buf.append_fill(0, 10_000).unwrap_err();
        assert!(err.is_out_of_memory());
        assert_eq!(buf.as_slice(), b"keep");
    }

    #[test]
    fn test_copy_data_and_clear() {
        let mut buf = BinaryBuffer::from_slice(b"first").unwrap();
        buf.copy_data(b"second").unwrap();
        assert_eq!(buf.as_slice(), b"second");
        let capacity = buf.capacity();
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), capacity);
    }

    #[test]
    fn test_index_access() {
        let mut buf = BinaryBuffer::from_slice(b"xyz").unwrap();
        buf[1] = b'Y';
        assert_eq!(buf[1], b'Y');
        assert_eq!(buf.get_byte_string(), "xYz");
    }

    #[test]
    #[should_panic(expected = "index out of range")]
    fn test_index_past_end_fails_fast() {
        let buf = BinaryBuffer::from_slice(b"ab").unwrap();
        let _byte = buf[2];
    }
}
