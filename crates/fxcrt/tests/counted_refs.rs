// Counted Reference Integration Tests
//
// These tests verify CountedRef sharing and forking against a counting
// allocator.

mod common;

use fxcrt::CountedRef;

#[derive(Clone, Default, Debug, PartialEq)]
struct Style {
    name: String,
    size: u32,
}

/// Clones share one allocation until one of them asks to modify
#[test]
fn test_lazy_deep_copy() {
    let (counter, handle) = common::counting_handle();
    let mut base = CountedRef::new_in(handle);
    base.emplace(Style {
        name: "body".into(),
        size: 12,
    })
    .unwrap();

    let readers: Vec<_> = (0..3).map(|_| base.clone()).collect();
    assert_eq!(base.ref_count(), 4);
    assert_eq!(counter.allocs(), 1);

    let mut writer = readers[0].clone();
    writer.get_modify().unwrap().size = 14;
    assert_eq!(counter.allocs(), 2);
    assert_eq!(writer.get().unwrap().size, 14);
    assert!(readers.iter().all(|r| r.get().unwrap().size == 12));

    // a second modify on the now-private copy does not allocate
    writer.get_modify().unwrap().name.push_str("-bold");
    assert_eq!(counter.allocs(), 2);

    drop(readers);
    drop(base);
    drop(writer);
    assert_eq!(counter.live(), 0);
}

/// from_value_in allocates the value and its forks through the given allocator
#[test]
fn test_from_value_in_uses_allocator() {
    let (counter, handle) = common::counting_handle();
    let base = CountedRef::from_value_in(
        Style {
            name: "title".into(),
            size: 20,
        },
        handle,
    )
    .unwrap();
    assert_eq!(counter.allocs(), 1);
    assert_eq!(base.ref_count(), 1);

    let mut fork = base.clone();
    fork.get_modify().unwrap().size = 24;
    assert_eq!(counter.allocs(), 2);
    assert_eq!(base.get().unwrap().size, 20);

    drop(base);
    drop(fork);
    assert_eq!(counter.live(), 0);
}

/// Failed allocation in from_value_in is reported, not a panic
#[test]
fn test_from_value_in_failure() {
    let (counter, handle) = common::counting_handle();
    counter.set_failing(true);
    let err = CountedRef::from_value_in(Style::default(), handle).unwrap_err();
    assert!(err.is_out_of_memory());
}

/// A failed fork leaves the reference pointing at the shared value
#[test]
fn test_failed_get_modify() {
    let (counter, handle) = common::counting_handle();
    let mut a = CountedRef::new_in(handle);
    a.emplace(Style::default()).unwrap();
    let b = a.clone();

    counter.set_failing(true);
    assert!(a.get_modify().unwrap_err().is_out_of_memory());
    assert_eq!(a, b);
    assert_eq!(a.ref_count(), 2);
}

/// Null references allocate on first modify
#[test]
fn test_null_get_modify() {
    let (counter, handle) = common::counting_handle();
    let mut style: CountedRef<Style> = CountedRef::new_in(handle);
    assert!(style.is_null());
    assert_eq!(style.get(), None);

    style.get_modify().unwrap().size = 9;
    assert_eq!(counter.allocs(), 1);
    assert_eq!(style.get().unwrap().size, 9);

    style.set_null();
    assert_eq!(counter.live(), 0);
}
