//! Text builders layered on [`BinaryBuffer`].
//!
//! Both builders reuse the buffer's growth policy and report allocation
//! failure the same way: an `Err` leaves the text as it was.

use std::fmt;

use fxcrt_mem::{AllocatorHandle, Result};

use crate::buffer::BinaryBuffer;
use crate::string::{ByteString, WideString};

/// An append-only byte text builder.
///
/// ```
/// use fxcrt::ByteTextBuf;
///
/// let mut text = ByteTextBuf::new();
/// text.append_str("x=").unwrap();
/// text.append_i32(-3).unwrap();
/// text.append_byte(b';').unwrap();
/// assert_eq!(text.get_byte_string(), "x=-3;");
/// ```
#[derive(Debug, Default)]
pub struct ByteTextBuf {
    buffer: BinaryBuffer,
}

impl ByteTextBuf {
    /// Creates an empty builder on the default allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty builder that allocates through `allocator`.
    #[must_use]
    pub fn new_in(allocator: AllocatorHandle) -> Self {
        ByteTextBuf {
            buffer: BinaryBuffer::new_in(allocator),
        }
    }

    /// Appends raw bytes.
    pub fn append_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.buffer.append_block(bytes)
    }

    /// Appends a single byte.
    pub fn append_byte(&mut self, byte: u8) -> Result<()> {
        self.buffer.append_byte(byte)
    }

    /// Appends the UTF-8 bytes of `s`.
    pub fn append_str(&mut self, s: &str) -> Result<()> {
        self.append_bytes(s.as_bytes())
    }

    /// Appends the contents of a byte string.
    pub fn append_byte_string(&mut self, s: &ByteString) -> Result<()> {
        self.append_bytes(s.as_bytes())
    }

    /// Appends `value` in decimal.
    pub fn append_i32(&mut self, value: i32) -> Result<()> {
        self.append_str(&value.to_string())
    }

    /// Appends `value` in decimal.
    pub fn append_u32(&mut self, value: u32) -> Result<()> {
        self.append_str(&value.to_string())
    }

    /// Appends `value` in its shortest round-tripping decimal form.
    pub fn append_f64(&mut self, value: f64) -> Result<()> {
        self.append_str(&value.to_string())
    }

    /// Copies the text into a byte string.
    #[must_use]
    pub fn get_byte_string(&self) -> ByteString {
        self.buffer.get_byte_string()
    }

    /// The bytes written so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `true` when nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drops the last `count` bytes.
    pub fn pop_bytes(&mut self, count: usize) {
        let len = self.len();
        self.buffer.truncate(len.saturating_sub(count));
    }

    /// Drops all text, keeping the capacity.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// The underlying buffer.
    #[must_use]
    pub fn buffer(&self) -> &BinaryBuffer {
        &self.buffer
    }
}

impl fmt::Write for ByteTextBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.append_str(s).map_err(|_| fmt::Error)
    }
}

const CHAR_BYTES: usize = size_of::<char>();

/// An append-only builder of Unicode scalar values.
///
/// Characters are stored as native-endian `u32` units in the underlying
/// byte buffer.
///
/// ```
/// use fxcrt::WideTextBuf;
///
/// let mut text = WideTextBuf::new();
/// text.append_str("n\u{b0}").unwrap();
/// text.append_i32(7).unwrap();
/// assert_eq!(text.len(), 3);
/// assert_eq!(text.get_wide_string(), "n\u{b0}7");
/// ```
#[derive(Debug, Default)]
pub struct WideTextBuf {
    buffer: BinaryBuffer,
}

impl WideTextBuf {
    /// Creates an empty builder on the default allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty builder that allocates through `allocator`.
    #[must_use]
    pub fn new_in(allocator: AllocatorHandle) -> Self {
        WideTextBuf {
            buffer: BinaryBuffer::new_in(allocator),
        }
    }

    /// Appends one character.
    pub fn append_char(&mut self, ch: char) -> Result<()> {
        self.buffer.append_block(&u32::from(ch).to_ne_bytes())
    }

    /// Appends a run of characters.
    pub fn append_chars(&mut self, chars: &[char]) -> Result<()> {
        self.buffer.estimate_size(self.buffer.len() + chars.len() * CHAR_BYTES, 0)?;
        chars.iter().try_for_each(|&ch| self.append_char(ch))
    }

    /// Appends the characters of `s`.
    pub fn append_str(&mut self, s: &str) -> Result<()> {
        let extra = s.chars().count() * CHAR_BYTES;
        self.buffer.estimate_size(self.buffer.len() + extra, 0)?;
        s.chars().try_for_each(|ch| self.append_char(ch))
    }

    /// Appends the contents of a wide string.
    pub fn append_wide_string(&mut self, s: &WideString) -> Result<()> {
        self.append_chars(s.as_slice())
    }

    /// Appends `value` in decimal.
    pub fn append_i32(&mut self, value: i32) -> Result<()> {
        self.append_str(&value.to_string())
    }

    /// The characters written so far.
    #[must_use]
    pub fn as_chars(&self) -> &[char] {
        match self.buffer.as_ptr() {
            // SAFETY: the buffer only ever receives whole chars, and every
            // allocator returns MIN_ALIGN-aligned memory.
            Some(ptr) => unsafe {
                std::slice::from_raw_parts(ptr.cast::<char>().as_ptr(), self.len())
            },
            None => &[],
        }
    }

    /// Copies the text into a wide string.
    #[must_use]
    pub fn get_wide_string(&self) -> WideString {
        WideString::from_slice(self.as_chars())
    }

    /// Length in characters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len() / CHAR_BYTES
    }

    /// Returns `true` when nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drops the last `count` characters.
    pub fn pop_chars(&mut self, count: usize) {
        let len = self.len();
        self.buffer.truncate(len.saturating_sub(count) * CHAR_BYTES);
    }

    /// Drops all text, keeping the capacity.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl fmt::Write for WideTextBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.append_str(s).map_err(|_| fmt::Error)
    }

    fn write_char(&mut self, c: char) -> fmt::Result {
        self.append_char(c).map_err(|_| fmt::Error)
    }
}
