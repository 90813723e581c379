//! Allocation flags shared by every allocator entry point.

use bitflags::bitflags;

bitflags! {
    /// Per-request allocation flags.
    ///
    /// `MOVABLE` and `DISCARDABLE` are platform hints that allocators are free
    /// to ignore. `NONLEAVE` changes failure handling: the manager returns the
    /// error silently instead of logging it and calling the OOM handler.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AllocFlags: u32 {
        /// Report failure to the caller without running the OOM handler.
        const NONLEAVE = 1 << 0;
        /// The block may be relocated between `lock` and `unlock` calls.
        const MOVABLE = 1 << 1;
        /// The block may be dropped by the platform under memory pressure.
        const DISCARDABLE = 1 << 2;
    }
}

impl AllocFlags {
    /// Returns `true` if a failure should run the OOM handler.
    #[must_use]
    pub const fn leaves_on_failure(self) -> bool {
        !self.contains(Self::NONLEAVE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_empty() {
        assert!(AllocFlags::default().is_empty());
        assert!(AllocFlags::default().leaves_on_failure());
    }

    #[test]
    fn test_nonleave_suppresses_handler() {
        let flags = AllocFlags::NONLEAVE | AllocFlags::MOVABLE;
        assert!(!flags.leaves_on_failure());
        assert!(flags.contains(AllocFlags::MOVABLE));
        assert!(!flags.contains(AllocFlags::DISCARDABLE));
    }
}
