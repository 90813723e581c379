// Buffer Integration Tests
//
// These tests verify BinaryBuffer growth, failure handling and ownership
// transfer against a counting allocator.

mod common;

use fxcrt::{BinaryBuffer, ByteTextBuf, MIN_GROWTH};

/// Single-byte appends grow in MIN_GROWTH steps, then by a quarter
#[test]
fn test_growth_policy() {
    let (counter, handle) = common::counting_handle();
    let mut buf = BinaryBuffer::new_in(handle);

    buf.append_byte(0).unwrap();
    assert_eq!(buf.capacity(), MIN_GROWTH);

    for i in 1..1000 {
        buf.append_byte((i % 251) as u8).unwrap();
    }
    assert_eq!(buf.len(), 1000);
    assert!(buf.capacity() >= 1000);

    // amortized: far fewer reallocations than appends
    assert!(counter.reallocs() < 20, "got {} reallocs", counter.reallocs());
    assert_eq!(counter.allocs(), 1);
}

/// A configured step fixes the growth increment
#[test]
fn test_explicit_step() {
    let mut buf = BinaryBuffer::with_step(64);
    buf.append_block(&[1; 10]).unwrap();
    assert_eq!(buf.capacity(), 64);
    buf.append_block(&[2; 60]).unwrap();
    assert_eq!(buf.capacity(), 128);

    buf.estimate_size(1000, 0).unwrap();
    assert_eq!(buf.capacity(), 1000);
    assert_eq!(buf.len(), 70);
}

/// A failed growth leaves the buffer untouched
#[test]
fn test_failed_growth_keeps_contents() {
    let (counter, handle) = common::counting_handle();
    let mut buf = BinaryBuffer::new_in(handle);
    buf.append_block(b"intact").unwrap();
    let capacity = buf.capacity();

    counter.set_failing(true);
    let err = buf.append_fill(b'x', 10_000).unwrap_err();
    assert!(err.is_out_of_memory());
    assert_eq!(buf.as_slice(), b"intact");
    assert_eq!(buf.capacity(), capacity);

    counter.set_failing(false);
    buf.append_fill(b'x', 10_000).unwrap();
    assert_eq!(buf.len(), 10_006);
}

/// Strict delete rejects ranges past the end
#[test]
fn test_delete_out_of_range() {
    let mut buf = BinaryBuffer::from_slice(b"abc").unwrap();
    assert!(buf.delete(2, 2).is_err());
    assert!(buf.insert_block(4, b"x").is_err());
    assert_eq!(buf.as_slice(), b"abc");

    buf.delete(1, 2).unwrap();
    assert_eq!(buf.as_slice(), b"a");
}

/// Detached memory is freed by the allocator that produced it
#[test]
fn test_detach_returns_memory_to_owner() {
    let (counter, handle) = common::counting_handle();
    let mut source = BinaryBuffer::new_in(handle);
    source.append_block(b"moved").unwrap();

    let detached = source.detach_buffer().unwrap();
    assert!(source.is_empty());
    assert_eq!(detached.as_slice(), b"moved");

    let mut target = BinaryBuffer::new();
    target.attach_data(detached);
    assert_eq!(target.as_slice(), b"moved");
    assert!(target.allocator().same_allocator(source.allocator()));

    drop(target);
    assert_eq!(counter.live(), 0);
}

/// take_over moves the allocation without copying
#[test]
fn test_take_over() {
    let (counter, handle) = common::counting_handle();
    let mut a = BinaryBuffer::new_in(handle.clone());
    let mut b = BinaryBuffer::new_in(handle);
    a.append_block(b"first").unwrap();
    b.append_block(b"second").unwrap();

    a.take_over(&mut b);
    assert_eq!(a.as_slice(), b"second");
    assert!(b.is_empty());
    assert_eq!(counter.live(), 1);
}

/// Text buffers share the buffer's allocator seam
#[test]
fn test_text_buf_allocator() {
    let (counter, handle) = common::counting_handle();
    let mut text = ByteTextBuf::new_in(handle);
    text.append_str("pi=").unwrap();
    text.append_f64(3.25).unwrap();
    assert_eq!(text.get_byte_string(), "pi=3.25");
    assert_eq!(counter.allocs(), 1);
}

/// Indexing past the length fails fast
#[test]
#[should_panic(expected = "index out of range")]
fn test_index_past_len() {
    let buf = BinaryBuffer::from_slice(b"ab").unwrap();
    let _byte = buf[2];
}
