//! Memory-debugger hooks.
//!
//! A host installs a [`MemoryDebugger`] on a manager to observe every
//! allocation event. All hooks default to doing nothing, so an observer only
//! overrides the events it cares about. With the `leak-tracker` feature the
//! crate also ships [`LeakTracker`], which keeps a table of live blocks and
//! reports the ones still alive at teardown.

use std::ptr::NonNull;

/// Observer for allocation events on a [`MemoryManager`](crate::MemoryManager).
///
/// Hooks run after the underlying allocator succeeded and never see failed
/// requests; those go to the OOM handler instead.
pub trait MemoryDebugger: Send + Sync {
    /// A block of `size` bytes was allocated.
    fn on_alloc(&self, ptr: NonNull<u8>, size: usize) {
        let _ = (ptr, size);
    }

    /// A block was allocated through a debug entry point.
    fn on_alloc_debug(&self, ptr: NonNull<u8>, size: usize, file: &'static str, line: u32) {
        let _ = (file, line);
        self.on_alloc(ptr, size);
    }

    /// `old` was resized to `size` bytes and now lives at `new`.
    fn on_realloc(&self, old: NonNull<u8>, new: NonNull<u8>, size: usize) {
        let _ = (old, new, size);
    }

    /// A block was resized through a debug entry point.
    fn on_realloc_debug(
        &self,
        old: NonNull<u8>,
        new: NonNull<u8>,
        size: usize,
        file: &'static str,
        line: u32,
    ) {
        let _ = (file, line);
        self.on_realloc(old, new, size);
    }

    /// A block is about to be freed.
    fn on_free(&self, ptr: NonNull<u8>) {
        let _ = ptr;
    }

    /// The host labeled the allocations that follow with `tag`.
    fn on_tag(&self, tag: &str) {
        let _ = tag;
    }
}

#[cfg(feature = "leak-tracker")]
pub use leak::{LeakRecord, LeakTracker};

#[cfg(feature = "leak-tracker")]
mod leak {
    use std::ptr::NonNull;
    use std::sync::{Arc, Mutex, MutexGuard};

    use fxhash::FxBuildHasher;
    use hashbrown::HashMap;

    use super::MemoryDebugger;

    /// A live block seen by a [`LeakTracker`].
    #[derive(Debug, Clone)]
    pub struct LeakRecord {
        /// Address of the block.
        pub addr: usize,
        /// Size of the block in bytes.
        pub size: usize,
        /// Call site, for blocks allocated through a debug entry point.
        pub location: Option<(&'static str, u32)>,
        /// Tag in effect when the block was allocated.
        pub tag: Option<Arc<str>>,
        /// Stack at the allocation site.
        #[cfg(feature = "alloc-backtrace")]
        pub backtrace: Option<Arc<backtrace::Backtrace>>,
    }

    #[derive(Default)]
    struct TrackerState {
        live: HashMap<usize, LeakRecord, FxBuildHasher>,
        tag: Option<Arc<str>>,
    }

    /// Debugger that keeps a table of every live block.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use fxcrt_mem::{AllocFlags, LeakTracker, MemoryManager};
    ///
    /// let tracker = Arc::new(LeakTracker::new());
    /// let manager = MemoryManager::with_heap();
    /// manager.set_debugger(Some(tracker.clone()));
    ///
    /// let ptr = manager.alloc(32, AllocFlags::empty()).unwrap();
    /// assert_eq!(tracker.live_count(), 1);
    ///
    /// unsafe { manager.free(ptr, AllocFlags::empty()) };
    /// assert_eq!(tracker.live_count(), 0);
    /// ```
    #[derive(Default)]
    pub struct LeakTracker {
        state: Mutex<TrackerState>,
    }

    impl LeakTracker {
        /// Creates an empty tracker.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn state(&self) -> MutexGuard<'_, TrackerState> {
            // A panic while holding the lock leaves the table consistent.
            self.state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
        }

        /// Number of blocks currently alive.
        #[must_use]
        pub fn live_count(&self) -> usize {
            self.state().live.len()
        }

        /// Total bytes currently alive.
        #[must_use]
        pub fn live_bytes(&self) -> usize {
            self.state().live.values().map(|r| r.size).sum()
        }

        /// Snapshot of the live blocks, ordered by address.
        #[must_use]
        pub fn live_blocks(&self) -> Vec<LeakRecord> {
            let mut records: Vec<_> = self.state().live.values().cloned().collect();
            records.sort_by_key(|r| r.addr);
            records
        }

        /// Logs every live block at error level and returns how many there were.
        pub fn report_leaks(&self) -> usize {
            let leaks = self.live_blocks();
            for leak in &leaks {
                match leak.location {
                    Some((file, line)) => fxcrt_log::error!(
                        "leaked {} bytes at {:#x} (allocated at {}:{}, tag {:?})",
                        leak.size,
                        leak.addr,
                        file,
                        line,
                        leak.tag.as_deref()
                    ),
                    None => fxcrt_log::error!(
                        "leaked {} bytes at {:#x} (tag {:?})",
                        leak.size,
                        leak.addr,
                        leak.tag.as_deref()
                    ),
                }
            }
            leaks.len()
        }

        fn record(&self, ptr: NonNull<u8>, size: usize, location: Option<(&'static str, u32)>) {
            let mut state = self.state();
            let record = LeakRecord {
                addr: ptr.as_ptr().addr(),
                size,
                location,
                tag: state.tag.clone(),
                #[cfg(feature = "alloc-backtrace")]
                backtrace: location.map(|_| Arc::new(backtrace::Backtrace::new())),
            };
            state.live.insert(record.addr, record);
        }

        fn move_record(
            &self,
            old: NonNull<u8>,
            new: NonNull<u8>,
            size: usize,
            location: Option<(&'static str, u32)>,
        ) {
            let existing = self.state().live.remove(&old.as_ptr().addr());
            match existing {
                Some(mut record) => {
                    record.addr = new.as_ptr().addr();
                    record.size = size;
                    if location.is_some() {
                        record.location = location;
                    }
                    self.state().live.insert(record.addr, record);
                }
                None => self.record(new, size, location),
            }
        }
    }

    impl MemoryDebugger for LeakTracker {
        fn on_alloc(&self, ptr: NonNull<u8>, size: usize) {
            self.record(ptr, size, None);
        }

        fn on_alloc_debug(&self, ptr: NonNull<u8>, size: usize, file: &'static str, line: u32) {
            self.record(ptr, size, Some((file, line)));
        }

        fn on_realloc(&self, old: NonNull<u8>, new: NonNull<u8>, size: usize) {
            self.move_record(old, new, size, None);
        }

        fn on_realloc_debug(
            &self,
            old: NonNull<u8>,
            new: NonNull<u8>,
            size: usize,
            file: &'static str,
            line: u32,
        ) {
            self.move_record(old, new, size, Some((file, line)));
        }

        fn on_free(&self, ptr: NonNull<u8>) {
            self.state().live.remove(&ptr.as_ptr().addr());
        }

        fn on_tag(&self, tag: &str) {
            self.state().tag = (!tag.is_empty()).then(|| Arc::from(tag));
        }
    }

}
