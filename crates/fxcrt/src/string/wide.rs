use std::fmt::{self, Write};

use super::{ByteString, WideString};

impl WideString {
    /// Decodes UTF-8, replacing invalid sequences with U+FFFD.
    #[must_use]
    pub fn from_utf8(bytes: &[u8]) -> Self {
        String::from_utf8_lossy(bytes).chars().collect()
    }

    /// Encodes the characters as UTF-8.
    #[must_use]
    pub fn to_utf8(&self) -> ByteString {
        ByteString::from(self.to_string().as_str())
    }

    /// Builds a string from format arguments.
    #[must_use]
    pub fn format(args: fmt::Arguments<'_>) -> Self {
        match args.as_str() {
            Some(s) => Self::from(s),
            None => Self::from(args.to_string().as_str()),
        }
    }
}

impl From<&str> for WideString {
    fn from(s: &str) -> Self {
        s.chars().collect()
    }
}

impl PartialEq<str> for WideString {
    fn eq(&self, other: &str) -> bool {
        self.as_slice().iter().copied().eq(other.chars())
    }
}

impl PartialEq<&str> for WideString {
    fn eq(&self, other: &&str) -> bool {
        *self == **other
    }
}

impl fmt::Display for WideString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_slice().iter().try_for_each(|&c| f.write_char(c))
    }
}

impl fmt::Debug for WideString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{:?}", self.to_string())
    }
}
