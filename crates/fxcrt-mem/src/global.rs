//! The process-wide default memory manager.
//!
//! Exactly one slot exists per process. The first call to
//! [`default_manager`] fills it with a heap-backed manager if the host did
//! not install one, and seals it: from then on [`set_default_manager`]
//! reports [`Error::InvalidState`]. [`reset_default_manager`] is the explicit
//! teardown that empties and unseals the slot.
//!
//! Containers that already resolved the default keep their manager alive
//! through its `Arc`, so a reset never frees memory out from under them.
//!
//! ```
//! use fxcrt_mem::{default_manager, AllocFlags};
//!
//! let manager = default_manager();
//! let ptr = manager.alloc(16, AllocFlags::empty()).unwrap();
//! unsafe { manager.free(ptr, AllocFlags::empty()) };
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::manager::MemoryManager;

struct Slot {
    manager: Option<Arc<MemoryManager>>,
    sealed: bool,
}

static DEFAULT: Mutex<Slot> = Mutex::new(Slot {
    manager: None,
    sealed: false,
});

fn slot() -> MutexGuard<'static, Slot> {
    DEFAULT.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returns the default manager, creating a heap-backed one on first use.
#[must_use]
pub fn default_manager() -> Arc<MemoryManager> {
    let mut slot = slot();
    slot.sealed = true;
    Arc::clone(
        slot.manager
            .get_or_insert_with(|| Arc::new(MemoryManager::with_heap())),
    )
}

/// Installs `manager` as the process default.
///
/// Fails once the default has been resolved; call
/// [`reset_default_manager`] first to reconfigure.
pub fn set_default_manager(manager: Arc<MemoryManager>) -> Result<()> {
    let mut slot = slot();
    if slot.sealed {
        return Err(Error::InvalidState {
            reason: "default memory manager is already in use",
        });
    }
    fxcrt_log::debug!("installing {:?} memory manager as default", manager.kind());
    slot.manager = Some(manager);
    Ok(())
}

/// Empties and unseals the default slot, returning the previous manager.
pub fn reset_default_manager() -> Option<Arc<MemoryManager>> {
    let mut slot = slot();
    slot.sealed = false;
    let previous = slot.manager.take();
    if previous.is_some() {
        fxcrt_log::warn!("default memory manager reset");
    }
    previous
}

/// Returns `true` once the default has been resolved and can no longer be
/// replaced with [`set_default_manager`].
#[must_use]
pub fn is_default_sealed() -> bool {
    slot().sealed
}
