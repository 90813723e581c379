use std::fmt::{self, Write};

use super::{ByteString, WideString};

impl ByteString {
    /// The bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.as_slice()
    }

    /// The bytes as UTF-8, if they are valid.
    pub fn to_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(self.as_slice())
    }

    /// The bytes as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn to_string_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.as_slice())
    }

    /// Decodes the bytes as UTF-8 into a wide string.
    #[must_use]
    pub fn to_wide(&self) -> WideString {
        WideString::from_utf8(self.as_slice())
    }

    /// Builds a string from format arguments.
    ///
    /// ```
    /// use fxcrt::ByteString;
    ///
    /// let s = ByteString::format(format_args!("{}x{}", 3, 4));
    /// assert_eq!(s, "3x4");
    /// ```
    #[must_use]
    pub fn format(args: fmt::Arguments<'_>) -> Self {
        match args.as_str() {
            Some(s) => Self::from(s),
            None => Self::from(args.to_string().as_str()),
        }
    }
}

impl From<&str> for ByteString {
    fn from(s: &str) -> Self {
        Self::from_slice(s.as_bytes())
    }
}

impl PartialEq<str> for ByteString {
    fn eq(&self, other: &str) -> bool {
        self.as_slice() == other.as_bytes()
    }
}

impl PartialEq<&str> for ByteString {
    fn eq(&self, other: &&str) -> bool {
        self.as_slice() == other.as_bytes()
    }
}

impl PartialEq<ByteString> for &str {
    fn eq(&self, other: &ByteString) -> bool {
        self.as_bytes() == other.as_slice()
    }
}

impl fmt::Display for ByteString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for chunk in self.as_slice().utf8_chunks() {
            f.write_str(chunk.valid())?;
            if !chunk.invalid().is_empty() {
                f.write_char(char::REPLACEMENT_CHARACTER)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ByteString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{:?}", self.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_comparisons() {
        let s = ByteString::from("abc");
        assert_eq!(s, "abc");
        assert!("abc" == s);
        assert!(s != "abd");
        assert_eq!(s.to_str(), Ok("abc"));
    }

    #[test]
    fn test_display_replaces_invalid_utf8() {
        let s = ByteString::from_slice(b"ok\xffgo");
        assert_eq!(s.to_string(), "ok\u{fffd}go");
        assert!(s.to_str().is_err());
        assert_eq!(format!("{s:?}"), "b\"ok\u{fffd}go\"");
    }

    #[test]
    fn test_format() {
        assert_eq!(ByteString::format(format_args!("n={}", 5)), "n=5");
        assert!(ByteString::format(format_args!("")).is_empty());
    }

    #[test]
    fn test_to_wide() {
        let wide = ByteString::from("h\u{e9}").to_wide();
        assert_eq!(wide.as_slice(), &['h', '\u{e9}']);
    }
}
