//! Counted references: shared-immutable values with lazy deep copy.

use std::fmt;

use fxcrt_mem::{AllocatorHandle, Result};

use crate::cow::SharedBlock;

/// A copy-on-write reference to a `T`, or null.
///
/// Clones share one allocation. [`get_modify`](Self::get_modify) is the
/// fork point: it hands out the payload directly when this reference is the
/// only owner and clones it into a private allocation otherwise. Equality
/// compares identity of the shared allocation, not payload contents.
///
/// | Operation   | `CountedRef` |
/// |-------------|--------------|
/// | new object  | [`emplace`](Self::emplace) |
/// | modify      | [`get_modify`](Self::get_modify) |
/// | add owner   | [`Clone::clone`] |
/// | drop owner  | [`set_null`](Self::set_null) or drop |
///
/// ```
/// use fxcrt::CountedRef;
///
/// let mut a = CountedRef::from_value(vec![1, 2, 3]).unwrap();
/// let b = a.clone();
/// assert_eq!(a.ref_count(), 2);
/// assert_eq!(a, b);
///
/// a.get_modify().unwrap().push(4);
/// assert_ne!(a, b);
/// assert_eq!(b.get().unwrap(), &[1, 2, 3]);
/// assert_eq!(a.ref_count(), 1);
/// ```
pub struct CountedRef<T> {
    block: Option<SharedBlock<T>>,
    allocator: AllocatorHandle,
}

impl<T> CountedRef<T> {
    /// Creates a null reference using the default allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::new_in(AllocatorHandle::default())
    }

    /// Creates a null reference that allocates through `allocator`.
    #[must_use]
    pub fn new_in(allocator: AllocatorHandle) -> Self {
        CountedRef {
            block: None,
            allocator,
        }
    }

    /// Creates a reference to a freshly allocated `value`.
    pub fn from_value(value: T) -> Result<Self> {
        Self::from_value_in(value, AllocatorHandle::default())
    }

    /// Creates a reference to `value` allocated through `allocator`.
    ///
    /// Later forks from [`get_modify`](Self::get_modify) use the same
    /// allocator.
    pub fn from_value_in(value: T, allocator: AllocatorHandle) -> Result<Self> {
        let mut counted = Self::new_in(allocator);
        counted.emplace(value)?;
        Ok(counted)
    }

    /// Releases the current object and allocates a fresh one holding `value`.
    ///
    /// The reference is the sole owner afterwards. On failure it is null.
    pub fn emplace(&mut self, value: T) -> Result<&mut T> {
        self.block = None;
        let block = self.block.insert(SharedBlock::new(&self.allocator, value, 0)?);
        block
            .get_mut()
            .map(|(payload, _)| payload)
            .ok_or(fxcrt_mem::Error::InvalidState {
                reason: "fresh counted object is shared",
            })
    }

    /// Returns the payload, or `None` for a null reference.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.block.as_ref().map(SharedBlock::header)
    }

    /// Returns a payload this reference owns exclusively.
    ///
    /// - null: allocates a default `T`
    /// - sole owner: returns the existing payload
    /// - shared: releases the shared object and clones it privately
    pub fn get_modify(&mut self) -> Result<&mut T>
    where
        T: Clone + Default,
    {
        match self.block {
            Some(ref mut block) => block.make_unique().map(|(payload, _)| payload),
            None => self.emplace(T::default()),
        }
    }

    /// Releases the current object, leaving the reference null.
    pub fn set_null(&mut self) {
        self.block = None;
    }

    /// Returns `true` for a null reference.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.block.is_none()
    }

    /// Number of references sharing the object; 0 when null.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.block.as_ref().map_or(0, SharedBlock::ref_count)
    }

    /// Returns the allocator new objects come from.
    #[must_use]
    pub fn allocator(&self) -> &AllocatorHandle {
        &self.allocator
    }
}

impl<T> Default for CountedRef<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CountedRef<T> {
    fn clone(&self) -> Self {
        CountedRef {
            block: self.block.clone(),
            allocator: self.allocator.clone(),
        }
    }
}

impl<T> PartialEq for CountedRef<T> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.block, &other.block) {
            (Some(a), Some(b)) => SharedBlock::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T> Eq for CountedRef<T> {}

impl<T: fmt::Debug> fmt::Debug for CountedRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.block {
            Some(block) => f
                .debug_struct("CountedRef")
                .field("refs", &block.ref_count())
                .field("value", block.header())
                .finish(),
            None => f.write_str("CountedRef(null)"),
        }
    }
}
