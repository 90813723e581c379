//! The copy-on-write block shared by strings and counted references.
//!
//! A [`SharedBlock`] is a single allocation holding a reference count, the
//! allocator it came from, a header value of type `H` and a trailing inline
//! array of `E` elements:
//!
//! ```text
//! [refs][allocator][capacity][header: H][E; capacity]
//! ```
//!
//! Cloning a block only bumps the count. Mutation goes through
//! [`make_unique`](SharedBlock::make_unique), which forks a private copy when
//! the block is shared, or [`get_mut`](SharedBlock::get_mut), which refuses
//! to hand out a shared block at all.
//!
//! The count is a plain `Cell<usize>`, so blocks are neither `Send` nor
//! `Sync`. A value crossing threads is converted to an owned `Vec` first.

use std::alloc::Layout;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ptr::{self, NonNull};

use fxcrt_mem::{AllocatorHandle, Error, MIN_ALIGN, Result};

#[repr(C)]
struct BlockHeader<H> {
    refs: Cell<usize>,
    allocator: AllocatorHandle,
    capacity: usize,
    header: H,
}

/// A reference-counted allocation of one header and `capacity` elements.
///
/// ```
/// use fxcrt::SharedBlock;
/// use fxcrt::mem::AllocatorHandle;
///
/// let mut a: SharedBlock<usize, u8> = SharedBlock::new(&AllocatorHandle::default(), 0, 8).unwrap();
/// let b = a.clone();
/// assert_eq!(a.ref_count(), 2);
///
/// let (len, bytes) = a.make_unique().unwrap();
/// bytes[0] = b'x';
/// *len = 1;
///
/// assert!(!SharedBlock::ptr_eq(&a, &b));
/// assert_eq!(b.elements()[0], 0);
/// ```
pub struct SharedBlock<H, E: Copy + Default = ()> {
    ptr: NonNull<BlockHeader<H>>,
    _marker: PhantomData<(BlockHeader<H>, E)>,
}

impl<H, E: Copy + Default> SharedBlock<H, E> {
    const ALIGN_OK: () = assert!(
        align_of::<BlockHeader<H>>() <= MIN_ALIGN && align_of::<E>() <= MIN_ALIGN,
        "shared block types must not need more than MIN_ALIGN alignment"
    );

    /// Returns the block layout and the offset of the element array.
    fn layout(capacity: usize) -> Result<(Layout, usize)> {
        let overflow = Error::InvalidArgument {
            reason: "shared block size overflows",
        };
        let elements = Layout::array::<E>(capacity).map_err(|_| overflow.clone())?;
        let (layout, offset) = Layout::new::<BlockHeader<H>>()
            .extend(elements)
            .map_err(|_| overflow)?;
        Ok((layout.pad_to_align(), offset))
    }

    /// Allocates a block holding `header` and `capacity` default elements.
    ///
    /// A default handle is resolved first, so the block is always freed by
    /// the allocator that produced it.
    pub fn new(allocator: &AllocatorHandle, header: H, capacity: usize) -> Result<Self> {
        let () = Self::ALIGN_OK;
        let (layout, offset) = Self::layout(capacity)?;
        let allocator = allocator.resolve();
        let raw = allocator.alloc(layout.size())?;

        let block = raw.cast::<BlockHeader<H>>();
        // SAFETY: raw is a fresh block of layout.size() bytes aligned to
        // MIN_ALIGN, which covers both the header and the element array.
        unsafe {
            block.write(BlockHeader {
                refs: Cell::new(1),
                allocator,
                capacity,
                header,
            });
            let elements = raw.add(offset).cast::<E>();
            for i in 0..capacity {
                elements.add(i).write(E::default());
            }
        }

        Ok(SharedBlock {
            ptr: block,
            _marker: PhantomData,
        })
    }

    fn inner(&self) -> &BlockHeader<H> {
        // SAFETY: the block stays live while any SharedBlock points at it.
        unsafe { self.ptr.as_ref() }
    }

    fn elements_ptr(&self) -> NonNull<E> {
        // Same offset Layout::extend computed when the block was allocated.
        let offset = size_of::<BlockHeader<H>>().next_multiple_of(align_of::<E>());
        // SAFETY: offset lies within the allocation.
        unsafe { self.ptr.cast::<u8>().add(offset).cast::<E>() }
    }

    /// Returns the header.
    #[must_use]
    pub fn header(&self) -> &H {
        &self.inner().header
    }

    /// Returns the whole element array.
    #[must_use]
    pub fn elements(&self) -> &[E] {
        // SAFETY: capacity elements were initialized at allocation.
        unsafe { std::slice::from_raw_parts(self.elements_ptr().as_ptr(), self.capacity()) }
    }

    /// Number of trailing elements.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner().capacity
    }

    /// Number of owners of this block.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.inner().refs.get()
    }

    /// Returns `true` when more than one owner exists.
    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.ref_count() > 1
    }

    /// Returns `true` if both values own the same block.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.ptr == b.ptr
    }

    /// Returns the allocator the block was allocated from.
    #[must_use]
    pub fn allocator(&self) -> &AllocatorHandle {
        &self.inner().allocator
    }

    /// Mutable access, only while this is the sole owner.
    pub fn get_mut(&mut self) -> Option<(&mut H, &mut [E])> {
        if self.is_shared() {
            return None;
        }
        let elements = self.elements_ptr();
        let capacity = self.capacity();
        // SAFETY: the count is 1, so no other owner can observe the block,
        // and &mut self prevents aliasing through this one.
        unsafe {
            let inner = &mut *self.ptr.as_ptr();
            Some((
                &mut inner.header,
                std::slice::from_raw_parts_mut(elements.as_ptr(), capacity),
            ))
        }
    }

    /// Allocates a private block of `capacity` elements from the same
    /// allocator, copying the header and the first `keep` elements.
    pub fn fork(&self, capacity: usize, keep: usize) -> Result<Self>
    where
        H: Clone,
    {
        let mut fresh = SharedBlock::new(self.allocator(), self.header().clone(), capacity)?;
        let keep = keep.min(capacity).min(self.capacity());
        if let Some((_, elements)) = fresh.get_mut() {
            elements[..keep].copy_from_slice(&self.elements()[..keep]);
        }
        Ok(fresh)
    }

    /// Mutable access, forking a private copy first if the block is shared.
    ///
    /// This is the copy-on-write point: after it returns, this owner holds
    /// a block with a count of 1 and the other owners keep the original.
    pub fn make_unique(&mut self) -> Result<(&mut H, &mut [E])>
    where
        H: Clone,
    {
        if self.is_shared() {
            *self = self.fork(self.capacity(), self.capacity())?;
        }
        self.get_mut().ok_or(Error::InvalidState {
            reason: "shared block still shared after fork",
        })
    }
}

impl<H, E: Copy + Default> Clone for SharedBlock<H, E> {
    fn clone(&self) -> Self {
        let refs = &self.inner().refs;
        let count = refs
            .get()
            .checked_add(1)
            .unwrap_or_else(|| panic!("reference count overflow in SharedBlock::clone"));
        refs.set(count);
        SharedBlock {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<H, E: Copy + Default> Drop for SharedBlock<H, E> {
    fn drop(&mut self) {
        let refs = &self.inner().refs;
        let count = refs.get() - 1;
        refs.set(count);
        if count > 0 {
            return;
        }

        // SAFETY: this was the last owner. The header and allocator are moved
        // out before the memory goes back to the allocator that produced it.
        unsafe {
            let block = self.ptr.as_ptr();
            let allocator = ptr::read(&raw const (*block).allocator);
            ptr::drop_in_place(&raw mut (*block).header);
            allocator.free(self.ptr.cast());
        }
    }
}

impl<H: fmt::Debug, E: Copy + Default> fmt::Debug for SharedBlock<H, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBlock")
            .field("refs", &self.ref_count())
            .field("capacity", &self.capacity())
            .field("header", self.header())
            .finish()
    }
}
