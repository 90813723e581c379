// Leak tracker integration tests
//
// Drives LeakTracker through a real manager, including the debug
// allocation macros that record call sites.

#![cfg(feature = "leak-tracker")]

use std::sync::Arc;

use fxcrt_mem::{AllocFlags, LeakTracker, MemoryManager, fx_alloc, fx_realloc};

#[test]
fn test_debug_macros_record_call_site() {
    let manager = MemoryManager::with_heap();
    let tracker = Arc::new(LeakTracker::new());
    manager.set_debugger(Some(tracker.clone()));

    let ptr = fx_alloc!(manager, 24).unwrap();
    let line = line!() - 1;

    let live = tracker.live_blocks();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].size, 24);
    assert_eq!(live[0].location, Some((file!(), line)));

    let ptr = unsafe { fx_realloc!(manager, ptr, 96) }.unwrap();
    assert_eq!(tracker.live_bytes(), 96);

    unsafe { manager.free(ptr, AllocFlags::empty()) };
    assert_eq!(tracker.report_leaks(), 0);
}

#[test]
fn test_tags_follow_manager() {
    let manager = MemoryManager::with_heap();
    let tracker = Arc::new(LeakTracker::new());
    manager.set_debugger(Some(tracker.clone()));

    manager.tag("glyph-cache");
    let a = manager.alloc(8, AllocFlags::empty()).unwrap();
    manager.tag("");
    let b = fx_alloc!(manager, 8, AllocFlags::MOVABLE).unwrap();

    let tags: Vec<_> = tracker
        .live_blocks()
        .into_iter()
        .map(|r| (r.addr, r.tag.map(|t| t.to_string())))
        .collect();
    assert!(tags.contains(&(a.as_ptr().addr(), Some("glyph-cache".to_owned()))));
    assert!(tags.contains(&(b.as_ptr().addr(), None)));

    assert_eq!(tracker.report_leaks(), 2);
    unsafe {
        manager.free(a, AllocFlags::empty());
        manager.free(b, AllocFlags::empty());
    }
    assert_eq!(tracker.live_count(), 0);
}
