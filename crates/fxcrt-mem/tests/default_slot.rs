// Process default manager lifecycle
//
// The default slot is process-wide, so the whole lifecycle runs in one test
// to keep the steps ordered.

use std::sync::Arc;

use fxcrt_mem::{
    AllocatorHandle, Error, GrowOnlyPool, MemoryManager, default_manager, is_default_sealed,
    reset_default_manager, set_default_manager,
};

#[test]
fn test_default_slot_lifecycle() {
    // Configuring before first use is allowed.
    let custom = Arc::new(MemoryManager::with_heap());
    set_default_manager(custom.clone()).unwrap();
    assert!(!is_default_sealed());

    // First use seals the slot and returns the installed manager.
    let resolved = default_manager();
    assert!(Arc::ptr_eq(&resolved, &custom));
    assert!(is_default_sealed());

    let err = set_default_manager(Arc::new(MemoryManager::with_heap())).unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));

    // A pool pins the default it resolved at construction.
    let pool = GrowOnlyPool::new(AllocatorHandle::default(), 1024).unwrap();
    pool.construct(1u8).unwrap();
    assert_eq!(custom.stats().live_blocks, 1);

    // Reset hands back the old manager and unseals the slot.
    let previous = reset_default_manager().unwrap();
    assert!(Arc::ptr_eq(&previous, &custom));
    assert!(!is_default_sealed());

    // Without a host manager, first use falls back to the heap.
    let fallback = default_manager();
    assert!(!Arc::ptr_eq(&fallback, &custom));

    // The pool still frees into the manager it pinned.
    drop(pool);
    assert_eq!(custom.stats().live_blocks, 0);
    assert_eq!(fallback.stats().live_blocks, 0);
}
