// String Integration Tests
//
// These tests exercise ByteString and WideString through the public API:
// sharing, copy-on-write forks and which allocator their blocks come from.

mod common;

use fxcrt::{ByteString, WideString};

/// Concatenation builds a fresh block and leaves both operands unshared
#[test]
fn test_concat_hello_world() {
    let a = ByteString::from("hello");
    let b = ByteString::from(" world");

    let c = &a + &b;

    assert_eq!(c, "hello world");
    assert_eq!(c.len(), 11);
    assert_eq!(a.ref_count(), 1);
    assert_eq!(b.ref_count(), 1);
    assert_eq!(c.ref_count(), 1);
}

/// Writing through one clone never shows up in another
#[test]
fn test_copy_on_write_isolation() {
    let original = ByteString::from("shared text");
    let mut clones: Vec<ByteString> = (0..4).map(|_| original.clone()).collect();
    assert_eq!(original.ref_count(), 5);

    clones[0].make_upper();
    clones[1].replace(b"text", b"data");
    clones[2].delete(0, 7);
    clones[3].insert_slice(0, b"not ");

    assert_eq!(original, "shared text");
    assert_eq!(clones[0], "SHARED TEXT");
    assert_eq!(clones[1], "shared data");
    assert_eq!(clones[2], "text");
    assert_eq!(clones[3], "not shared text");
    assert_eq!(original.ref_count(), 1);
}

/// Blocks come from the string's allocator and go back to it
#[test]
fn test_strings_use_their_allocator() {
    let (counter, handle) = common::counting_handle();

    let s = ByteString::try_from_slice_in(b"counted", &handle).unwrap();
    assert_eq!(counter.allocs(), 1);

    let mut copy = s.clone();
    assert_eq!(counter.allocs(), 1);

    copy.set_at(0, b'C');
    assert_eq!(counter.allocs(), 2, "fork should allocate from the same allocator");

    let joined = &s + &copy;
    assert_eq!(counter.allocs(), 3);

    drop(s);
    drop(copy);
    drop(joined);
    assert_eq!(counter.live(), 0);
}

/// A failing allocator surfaces through get_buffer and leaves the string intact
#[test]
fn test_get_buffer_reports_failure() {
    let (counter, handle) = common::counting_handle();
    let mut s = ByteString::try_from_slice_in(b"keep", &handle).unwrap();

    counter.set_failing(true);
    let err = s.get_buffer(1024).unwrap_err();
    assert!(err.is_out_of_memory());
    assert_eq!(s, "keep");

    counter.set_failing(false);
    s.get_buffer(1024).unwrap()[4] = b'!';
    s.release_buffer(Some(5));
    assert_eq!(s, "keep!");
}

/// An empty string takes its first block from the allocator it is given
#[test]
fn test_get_buffer_in_picks_first_allocator() {
    let (counter, handle) = common::counting_handle();
    let mut s = ByteString::new();

    s.get_buffer_in(8, &handle).unwrap()[..3].copy_from_slice(b"abc");
    s.release_buffer(Some(3));
    assert_eq!(s, "abc");
    assert_eq!(counter.allocs(), 1);

    // the block keeps its allocator, so a fork allocates from it too
    let mut copy = s.clone();
    copy.set_at(0, b'A');
    assert_eq!(counter.allocs(), 2);
    assert_eq!(copy, "Abc");

    drop(s);
    drop(copy);
    assert_eq!(counter.live(), 0);
}

/// Creating a string from a failing allocator is an error, not a panic
#[test]
fn test_try_from_slice_in_failure() {
    let (counter, handle) = common::counting_handle();
    counter.set_failing(true);
    let err = WideString::try_from_slice_in(&['a'], &handle).unwrap_err();
    assert!(err.is_out_of_memory());
}

/// Empty strings never allocate
#[test]
fn test_empty_strings_do_not_allocate() {
    let (counter, handle) = common::counting_handle();
    let empty = ByteString::try_from_slice_in(b"", &handle).unwrap();
    assert!(empty.is_empty());
    assert_eq!(empty.ref_count(), 0);
    assert_eq!(counter.allocs(), 0);
}

/// Wide and byte strings convert through UTF-8
#[test]
fn test_wide_byte_conversion() {
    let wide = WideString::from("na\u{ef}ve caf\u{e9}");
    let bytes = wide.to_utf8();
    assert_eq!(bytes.len(), 12);
    assert_eq!(bytes.to_wide(), wide);

    let mut upper = wide.clone();
    upper.make_upper();
    assert_eq!(upper, "NA\u{cf}VE CAF\u{c9}");
    assert!(upper.equal_no_case(wide.as_slice()));
}

/// Strings work as map keys
#[test]
fn test_strings_as_keys() {
    use std::collections::BTreeMap;

    let mut map = BTreeMap::new();
    map.insert(ByteString::from("b"), 2);
    map.insert(ByteString::from("a"), 1);
    map.insert(ByteString::from("c"), 3);

    let keys: Vec<String> = map.keys().map(ToString::to_string).collect();
    assert_eq!(keys, ["a", "b", "c"]);
}

/// Indexing past the end panics with a clear message
#[test]
#[should_panic(expected = "index out of range")]
fn test_wide_index_past_end() {
    let wide = WideString::from("ab");
    let _ch = wide[2];
}
