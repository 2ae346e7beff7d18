//! Per-identity mutual exclusion.
//!
//! Each identity maps to its own mutex, created on first use and dropped
//! from the table once nobody holds or waits for it.

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::types::Handle;

/// What a lock protects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockIdentity {
    /// A volume: its metadata, its data, and duplication from it.
    Volume(Handle),
    /// An external tree being namespaced and imported.
    ImportSource(PathBuf),
}

type Slot = Arc<Mutex<()>>;

/// Grants exclusive, scoped locks keyed by [`LockIdentity`].
#[derive(Debug, Default)]
pub struct LockManager {
    slots: Arc<Mutex<HashMap<LockIdentity, Slot>>>,
}

impl LockManager {
    /// Empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `identity` is free, then holds it until the guard drops.
    #[must_use = "the lock is released as soon as the guard is dropped"]
    pub fn acquire(&self, identity: LockIdentity) -> LockGuard {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(identity.clone()).or_default())
        };
        let guard = slot.lock_arc();
        LockGuard {
            identity,
            guard: Some(guard),
            slots: Arc::clone(&self.slots),
        }
    }

    /// Number of identities currently held or awaited.
    #[must_use]
    pub fn active(&self) -> usize {
        self.slots.lock().len()
    }
}

/// Holds a lock until dropped.
pub struct LockGuard {
    identity: LockIdentity,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
    slots: Arc<Mutex<HashMap<LockIdentity, Slot>>>,
}

impl LockGuard {
    /// The identity this guard holds.
    #[must_use]
    pub fn identity(&self) -> &LockIdentity {
        &self.identity
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Waiters clone the slot under the table lock, so a strong count of
        // one seen under the same lock means nobody else wants it.
        let mut slots = self.slots.lock();
        self.guard.take();
        if slots
            .get(&self.identity)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.identity);
        }
    }
}
