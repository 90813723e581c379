//! Copy-on-write reference-counted strings.
//!
//! [`RefString`] is generic over its character type; [`ByteString`] and
//! [`WideString`] are the two instantiations. A string is one pointer to a
//! [`SharedBlock`] holding the length and the characters inline, or no block
//! at all for the empty string.
//!
//! # Sharing
//!
//! Cloning shares the block. Every mutator funnels through
//! `copy_before_write`, which forks a private block while the current one
//! is shared, so writes through one string are never visible through
//! another:
//!
//! ```
//! use fxcrt::ByteString;
//!
//! let a = ByteString::from("shared");
//! let mut b = a.clone();
//! assert!(a.shares_block_with(&b));
//!
//! b.set_at(0, b'S');
//! assert_eq!(a, "shared");
//! assert_eq!(b, "Shared");
//! assert!(!a.shares_block_with(&b));
//! ```
//!
//! # Failure
//!
//! Growth through [`get_buffer`](RefString::get_buffer) reports allocation
//! failure as a [`Result`]. The convenience mutators and operators behave
//! like the standard collections and call
//! [`handle_alloc_error`](std::alloc::handle_alloc_error) instead. Indexing
//! past the end logs and panics.

mod byte;
mod wide;

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, AddAssign, Index};

use fxcrt_mem::{AllocatorHandle, Error, MIN_ALIGN, Result};

use crate::cow::SharedBlock;
use crate::index_out_of_range;

/// A string of bytes.
pub type ByteString = RefString<u8>;

/// A string of Unicode scalar values.
pub type WideString = RefString<char>;

/// Character types a [`RefString`] can hold.
pub trait StrChar: Copy + Default + Eq + Ord + Hash + fmt::Debug + 'static {
    /// The terminator kept after the last character.
    const NUL: Self;

    /// Converts an ASCII byte.
    fn from_ascii(byte: u8) -> Self;

    /// Returns the lowercase form of the character.
    fn to_lower(self) -> Self;

    /// Returns the uppercase form of the character.
    fn to_upper(self) -> Self;

    /// Returns `true` for whitespace.
    fn is_space(self) -> bool;

    /// Returns the value of an ASCII decimal digit.
    fn to_digit(self) -> Option<u32>;
}

impl StrChar for u8 {
    const NUL: Self = 0;

    fn from_ascii(byte: u8) -> Self {
        byte
    }

    fn to_lower(self) -> Self {
        self.to_ascii_lowercase()
    }

    fn to_upper(self) -> Self {
        self.to_ascii_uppercase()
    }

    fn is_space(self) -> bool {
        self.is_ascii_whitespace()
    }

    fn to_digit(self) -> Option<u32> {
        char::from(self).to_digit(10)
    }
}

impl StrChar for char {
    const NUL: Self = '\0';

    fn from_ascii(byte: u8) -> Self {
        char::from(byte)
    }

    fn to_lower(self) -> Self {
        single_mapping(self.to_lowercase()).unwrap_or(self)
    }

    fn to_upper(self) -> Self {
        single_mapping(self.to_uppercase()).unwrap_or(self)
    }

    fn is_space(self) -> bool {
        self.is_whitespace()
    }

    fn to_digit(self) -> Option<u32> {
        self.to_digit(10)
    }
}

/// Case mappings that expand to several characters leave the input as is.
fn single_mapping(mut chars: impl Iterator<Item = char>) -> Option<char> {
    let first = chars.next()?;
    chars.next().is_none().then_some(first)
}

#[derive(Debug, Clone, Copy)]
struct StrHeader {
    len: usize,
}

type StrBlock<C> = SharedBlock<StrHeader, C>;

#[cold]
fn alloc_failed(err: Error) -> ! {
    let size = match err {
        Error::OutOfMemory { size } => size,
        _ => 0,
    };
    let layout = std::alloc::Layout::from_size_align(size, MIN_ALIGN)
        .unwrap_or(std::alloc::Layout::new::<u8>());
    std::alloc::handle_alloc_error(layout)
}

/// A copy-on-write, reference-counted string of `C`.
pub struct RefString<C: StrChar> {
    block: Option<StrBlock<C>>,
}

impl<C: StrChar> RefString<C> {
    /// Creates an empty string. Does not allocate.
    #[must_use]
    pub const fn new() -> Self {
        RefString { block: None }
    }

    /// Creates a string holding a copy of `chars`, allocated through
    /// `allocator`.
    pub fn try_from_slice_in(chars: &[C], allocator: &AllocatorHandle) -> Result<Self> {
        if chars.is_empty() {
            return Ok(Self::new());
        }
        let mut block = StrBlock::new(allocator, StrHeader { len: chars.len() }, chars.len() + 1)?;
        if let Some((_, elements)) = block.get_mut() {
            elements[..chars.len()].copy_from_slice(chars);
        }
        Ok(RefString { block: Some(block) })
    }

    /// Creates a string holding a copy of `chars`.
    #[must_use]
    pub fn from_slice(chars: &[C]) -> Self {
        Self::try_from_slice_in(chars, &AllocatorHandle::default())
            .unwrap_or_else(|err| alloc_failed(err))
    }

    /// Creates a string of `count` copies of `ch`.
    #[must_use]
    pub fn repeat(ch: C, count: usize) -> Self {
        let mut s = Self::new();
        if count > 0 {
            let buffer = s.get_buffer(count).unwrap_or_else(|err| alloc_failed(err));
            buffer[..count].fill(ch);
            s.release_buffer(Some(count));
        }
        s
    }

    /// Number of characters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.block.as_ref().map_or(0, |b| b.header().len)
    }

    /// Returns `true` for the empty string.
    ///
    /// Mutators drop the block when the length reaches zero, so this checks
    /// for a missing block. A zero-length buffer from
    /// [`get_buffer`](Self::get_buffer) counts as non-empty until
    /// [`release_buffer`](Self::release_buffer).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.block.is_none()
    }

    /// The characters.
    #[must_use]
    pub fn as_slice(&self) -> &[C] {
        match &self.block {
            Some(block) => &block.elements()[..block.header().len],
            None => &[],
        }
    }

    /// Number of strings sharing this string's block; 0 when empty.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.block.as_ref().map_or(0, SharedBlock::ref_count)
    }

    /// Returns `true` if both strings use the same block.
    #[must_use]
    pub fn shares_block_with(&self, other: &Self) -> bool {
        match (&self.block, &other.block) {
            (Some(a), Some(b)) => SharedBlock::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Releases the block, leaving the string empty.
    pub fn clear(&mut self) {
        self.block = None;
    }

    fn allocator(&self) -> AllocatorHandle {
        self.block
            .as_ref()
            .map_or_else(AllocatorHandle::default, |b| b.allocator().clone())
    }

    /// Makes the block private, forking it if it is shared.
    fn copy_before_write(&mut self) -> Option<(&mut usize, &mut [C])> {
        let block = self.block.as_mut()?;
        match block.make_unique() {
            Ok((header, elements)) => Some((&mut header.len, elements)),
            Err(err) => alloc_failed(err),
        }
    }

    /// Replaces the contents with `len` characters already written to a
    /// private buffer, dropping the block when `len` is zero.
    fn set_len(&mut self, len: usize) {
        if len == 0 {
            self.block = None;
            return;
        }
        if let Some((current, elements)) = self.copy_before_write() {
            *current = len;
            elements[len] = C::NUL;
        }
    }

    /// Returns a private, writable buffer of at least `min_len` characters.
    ///
    /// The current contents are kept. Finish with
    /// [`release_buffer`](Self::release_buffer) to set the new length.
    pub fn get_buffer(&mut self, min_len: usize) -> Result<&mut [C]> {
        self.get_buffer_in(min_len, &AllocatorHandle::default())
    }

    /// Like [`get_buffer`](Self::get_buffer), but an empty string takes its
    /// first block from `allocator`.
    ///
    /// A string that already owns a block keeps that block's allocator, and
    /// every later edit allocates through it.
    pub fn get_buffer_in(
        &mut self,
        min_len: usize,
        allocator: &AllocatorHandle,
    ) -> Result<&mut [C]> {
        let len = self.len();
        let capacity = min_len.max(len);
        let need = capacity.checked_add(1).ok_or(Error::InvalidArgument {
            reason: "string length overflows",
        })?;

        let fits = self
            .block
            .as_ref()
            .is_some_and(|b| !b.is_shared() && b.capacity() >= need);
        if !fits {
            let fresh = match &self.block {
                Some(block) => block.fork(need, len)?,
                None => StrBlock::new(allocator, StrHeader { len: 0 }, need)?,
            };
            self.block = Some(fresh);
        }

        match self.block.as_mut().and_then(SharedBlock::get_mut) {
            Some((_, elements)) => {
                let usable = elements.len() - 1;
                Ok(&mut elements[..usable])
            }
            None => Err(Error::InvalidState {
                reason: "string buffer is shared",
            }),
        }
    }

    /// Returns a private, writable buffer over the current contents.
    pub fn lock_buffer(&mut self) -> Result<&mut [C]> {
        let len = self.len();
        self.get_buffer(len)
    }

    /// Finalizes a buffer obtained from [`get_buffer`](Self::get_buffer).
    ///
    /// `None` scans for the first terminator; an explicit length is clamped
    /// to the buffer size.
    pub fn release_buffer(&mut self, new_len: Option<usize>) {
        let Some(block) = &self.block else {
            return;
        };
        let usable = block.capacity() - 1;
        let elements = &block.elements()[..usable];
        let len = match new_len {
            Some(len) => len.min(usable),
            None => elements.iter().position(|&c| c == C::NUL).unwrap_or(usable),
        };
        self.set_len(len);
    }

    /// Returns the character at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is past the end.
    #[must_use]
    #[track_caller]
    pub fn get_at(&self, index: usize) -> C {
        match self.as_slice().get(index) {
            Some(&c) => c,
            None => index_out_of_range(index, self.len()),
        }
    }

    /// Replaces the character at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is past the end.
    #[track_caller]
    pub fn set_at(&mut self, index: usize, ch: C) {
        let len = self.len();
        if index >= len {
            index_out_of_range(index, len);
        }
        if let Some((_, elements)) = self.copy_before_write() {
            elements[index] = ch;
        }
    }

    /// Rebuilds the string from `chars` into a block sharing this string's
    /// allocator.
    fn assign(&mut self, chars: &[C]) {
        let allocator = self.allocator();
        *self =
            Self::try_from_slice_in(chars, &allocator).unwrap_or_else(|err| alloc_failed(err));
    }

    /// Builds `parts` concatenated in one allocation.
    fn concat_in(allocator: &AllocatorHandle, parts: &[&[C]]) -> Self {
        let total: usize = parts.iter().map(|p| p.len()).sum();
        if total == 0 {
            return Self::new();
        }
        let mut block = StrBlock::new(allocator, StrHeader { len: total }, total + 1)
            .unwrap_or_else(|err| alloc_failed(err));
        if let Some((_, elements)) = block.get_mut() {
            let mut at = 0;
            for part in parts {
                elements[at..at + part.len()].copy_from_slice(part);
                at += part.len();
            }
        }
        RefString { block: Some(block) }
    }

    /// Returns `a` followed by `b` in a single new block.
    #[must_use]
    pub fn concat(a: &[C], b: &[C]) -> Self {
        Self::concat_in(&AllocatorHandle::default(), &[a, b])
    }

    /// Appends `chars`, growing in place when the block is private and large
    /// enough.
    pub fn push_slice(&mut self, chars: &[C]) {
        if chars.is_empty() {
            return;
        }
        let len = self.len();
        let in_place = self
            .block
            .as_ref()
            .is_some_and(|b| !b.is_shared() && b.capacity() > len + chars.len());
        if in_place {
            if let Some((current, elements)) = self.copy_before_write() {
                elements[len..len + chars.len()].copy_from_slice(chars);
                *current = len + chars.len();
                elements[len + chars.len()] = C::NUL;
            }
            return;
        }
        *self = Self::concat_in(&self.allocator(), &[self.as_slice(), chars]);
    }

    /// Appends one character.
    pub fn push(&mut self, ch: C) {
        self.push_slice(&[ch]);
    }

    /// Inserts `ch` before `index`, clamped to the length. Returns the new
    /// length.
    pub fn insert(&mut self, index: usize, ch: C) -> usize {
        self.insert_slice(index, &[ch])
    }

    /// Inserts `chars` before `index`, clamped to the length. Returns the
    /// new length.
    pub fn insert_slice(&mut self, index: usize, chars: &[C]) -> usize {
        let index = index.min(self.len());
        let (head, tail) = self.as_slice().split_at(index);
        *self = Self::concat_in(&self.allocator(), &[head, chars, tail]);
        self.len()
    }

    /// Removes up to `count` characters starting at `index`. Counts past the
    /// end are clamped. Returns the new length.
    pub fn delete(&mut self, index: usize, count: usize) -> usize {
        let len = self.len();
        if index >= len || count == 0 {
            return len;
        }
        let end = index.saturating_add(count).min(len);
        if let Some((_, elements)) = self.copy_before_write() {
            elements.copy_within(end..len, index);
        }
        self.set_len(len - (end - index));
        self.len()
    }

    /// Removes every occurrence of `ch`. Returns how many were removed.
    pub fn remove(&mut self, ch: C) -> usize {
        let count = self.as_slice().iter().filter(|&&c| c == ch).count();
        if count == 0 {
            return 0;
        }
        let len = self.len();
        if let Some((_, elements)) = self.copy_before_write() {
            let mut kept = 0;
            for i in 0..len {
                let c = elements[i];
                if c != ch {
                    elements[kept] = c;
                    kept += 1;
                }
            }
        }
        self.set_len(len - count);
        count
    }

    /// Replaces every occurrence of `old` with `new`. Returns the number of
    /// replacements.
    pub fn replace(&mut self, old: &[C], new: &[C]) -> usize {
        if old.is_empty() {
            return 0;
        }
        let source = self.as_slice();
        let mut parts: Vec<&[C]> = Vec::new();
        let mut count = 0;
        let mut start = 0;
        while let Some(at) = find_slice(&source[start..], old) {
            parts.push(&source[start..start + at]);
            parts.push(new);
            start += at + old.len();
            count += 1;
        }
        if count == 0 {
            return 0;
        }
        parts.push(&source[start..]);
        *self = Self::concat_in(&self.allocator(), &parts);
        count
    }

    /// Replaces every occurrence of the character `old` with `new`.
    pub fn replace_char(&mut self, old: C, new: C) -> usize {
        let count = self.as_slice().iter().filter(|&&c| c == old).count();
        if count > 0 {
            self.map_chars(|c| if c == old { new } else { c });
        }
        count
    }

    /// Converts every character to uppercase.
    pub fn make_upper(&mut self) {
        self.map_chars(C::to_upper);
    }

    /// Converts every character to lowercase.
    pub fn make_lower(&mut self) {
        self.map_chars(C::to_lower);
    }

    fn map_chars(&mut self, f: impl Fn(C) -> C) {
        if let Some((len, elements)) = self.copy_before_write() {
            let len = *len;
            elements[..len].iter_mut().for_each(|c| *c = f(*c));
        }
    }

    fn keep_range(&mut self, start: usize, end: usize) {
        let len = self.len();
        if start == 0 && end == len {
            return;
        }
        if start >= end {
            self.block = None;
            return;
        }
        if let Some((_, elements)) = self.copy_before_write() {
            elements.copy_within(start..end, 0);
        }
        self.set_len(end - start);
    }

    /// Removes leading and trailing whitespace.
    pub fn trim(&mut self) {
        self.trim_right();
        self.trim_left();
    }

    /// Removes leading whitespace.
    pub fn trim_left(&mut self) {
        let start = self.as_slice().iter().take_while(|c| c.is_space()).count();
        self.keep_range(start, self.len());
    }

    /// Removes trailing whitespace.
    pub fn trim_right(&mut self) {
        let trailing = self.as_slice().iter().rev().take_while(|c| c.is_space()).count();
        self.keep_range(0, self.len() - trailing);
    }

    /// Removes leading and trailing characters found in `targets`.
    pub fn trim_with(&mut self, targets: &[C]) {
        self.trim_right_with(targets);
        self.trim_left_with(targets);
    }

    /// Removes leading characters found in `targets`.
    pub fn trim_left_with(&mut self, targets: &[C]) {
        let start = self
            .as_slice()
            .iter()
            .take_while(|c| targets.contains(c))
            .count();
        self.keep_range(start, self.len());
    }

    /// Removes trailing characters found in `targets`.
    pub fn trim_right_with(&mut self, targets: &[C]) {
        let trailing = self
            .as_slice()
            .iter()
            .rev()
            .take_while(|c| targets.contains(c))
            .count();
        self.keep_range(0, self.len() - trailing);
    }

    /// Position of the first occurrence of `sub` at or after `start`.
    #[must_use]
    pub fn find(&self, sub: &[C], start: usize) -> Option<usize> {
        let haystack = self.as_slice().get(start..)?;
        find_slice(haystack, sub).map(|at| at + start)
    }

    /// Position of the first `ch` at or after `start`.
    #[must_use]
    pub fn find_char(&self, ch: C, start: usize) -> Option<usize> {
        let haystack = self.as_slice().get(start..)?;
        haystack.iter().position(|&c| c == ch).map(|at| at + start)
    }

    /// Position of the last `ch`.
    #[must_use]
    pub fn reverse_find(&self, ch: C) -> Option<usize> {
        self.as_slice().iter().rposition(|&c| c == ch)
    }

    /// Up to `count` characters starting at `first`.
    ///
    /// Taking the whole string shares its block.
    #[must_use]
    pub fn mid(&self, first: usize, count: usize) -> Self {
        let len = self.len();
        let first = first.min(len);
        let end = first.saturating_add(count).min(len);
        if first == 0 && end == len {
            return self.clone();
        }
        Self::concat_in(&self.allocator(), &[&self.as_slice()[first..end]])
    }

    /// Everything from `first` to the end.
    #[must_use]
    pub fn mid_from(&self, first: usize) -> Self {
        self.mid(first, usize::MAX)
    }

    /// The first `count` characters.
    #[must_use]
    pub fn left(&self, count: usize) -> Self {
        self.mid(0, count)
    }

    /// The last `count` characters.
    #[must_use]
    pub fn right(&self, count: usize) -> Self {
        let len = self.len();
        self.mid(len.saturating_sub(count), count)
    }

    /// Case-sensitive ordering.
    #[must_use]
    pub fn compare(&self, other: &[C]) -> Ordering {
        self.as_slice().cmp(other)
    }

    /// Case-insensitive equality.
    #[must_use]
    pub fn equal_no_case(&self, other: &[C]) -> bool {
        let mine = self.as_slice();
        mine.len() == other.len()
            && mine
                .iter()
                .zip(other)
                .all(|(&a, &b)| a == b || a.to_lower() == b.to_lower())
    }

    /// Parses a leading decimal integer: optional whitespace, optional sign,
    /// digits. Stops at the first other character and saturates on overflow.
    #[must_use]
    pub fn to_i32(&self) -> i32 {
        let mut chars = self.as_slice().iter().copied().skip_while(|c| c.is_space()).peekable();
        let negative = match chars.peek() {
            Some(&c) if c == C::from_ascii(b'-') => {
                chars.next();
                true
            }
            Some(&c) if c == C::from_ascii(b'+') => {
                chars.next();
                false
            }
            _ => false,
        };

        let mut value = 0i64;
        for digit in chars.map_while(C::to_digit) {
            value = (value * 10 + i64::from(digit)).min(i64::from(i32::MAX) + 1);
        }
        let value = if negative { -value } else { value };
        i32::try_from(value).unwrap_or(if negative { i32::MIN } else { i32::MAX })
    }

    /// Formats an integer in decimal.
    #[must_use]
    pub fn from_i32(value: i32) -> Self {
        let digits: Vec<C> = value.to_string().bytes().map(C::from_ascii).collect();
        Self::from_slice(&digits)
    }
}

fn find_slice<C: PartialEq>(haystack: &[C], needle: &[C]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl<C: StrChar> Default for RefString<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: StrChar> Clone for RefString<C> {
    fn clone(&self) -> Self {
        RefString {
            block: self.block.clone(),
        }
    }
}

impl<C: StrChar> PartialEq for RefString<C> {
    fn eq(&self, other: &Self) -> bool {
        self.shares_block_with(other) || self.as_slice() == other.as_slice()
    }
}

impl<C: StrChar> Eq for RefString<C> {}

impl<C: StrChar> PartialEq<[C]> for RefString<C> {
    fn eq(&self, other: &[C]) -> bool {
        self.as_slice() == other
    }
}

impl<C: StrChar> PartialOrd for RefString<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C: StrChar> Ord for RefString<C> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other.as_slice())
    }
}

impl<C: StrChar> Hash for RefString<C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state);
    }
}

impl<C: StrChar> Index<usize> for RefString<C> {
    type Output = C;

    #[track_caller]
    fn index(&self, index: usize) -> &C {
        match self.as_slice().get(index) {
            Some(c) => c,
            None => index_out_of_range(index, self.len()),
        }
    }
}

impl<C: StrChar> Add<&RefString<C>> for &RefString<C> {
    type Output = RefString<C>;

    fn add(self, rhs: &RefString<C>) -> RefString<C> {
        RefString::concat_in(&self.allocator(), &[self.as_slice(), rhs.as_slice()])
    }
}

impl<C: StrChar> Add<&RefString<C>> for RefString<C> {
    type Output = RefString<C>;

    fn add(mut self, rhs: &RefString<C>) -> RefString<C> {
        self.push_slice(rhs.as_slice());
        self
    }
}

impl<C: StrChar> AddAssign<&RefString<C>> for RefString<C> {
    fn add_assign(&mut self, rhs: &RefString<C>) {
        if self.is_empty() {
            *self = rhs.clone();
        } else {
            self.push_slice(rhs.as_slice());
        }
    }
}

impl<C: StrChar> AddAssign<C> for RefString<C> {
    fn add_assign(&mut self, rhs: C) {
        self.push(rhs);
    }
}

impl<C: StrChar> AddAssign<&[C]> for RefString<C> {
    fn add_assign(&mut self, rhs: &[C]) {
        self.push_slice(rhs);
    }
}

impl<C: StrChar> From<&[C]> for RefString<C> {
    fn from(chars: &[C]) -> Self {
        Self::from_slice(chars)
    }
}

impl<C: StrChar> FromIterator<C> for RefString<C> {
    fn from_iter<I: IntoIterator<Item = C>>(iter: I) -> Self {
        let chars: Vec<C> = iter.into_iter().collect();
        Self::from_slice(&chars)
    }
}
