//! Set-Lock Array.
//!
//! A lock striped by set index over the last-level cache's geometry, so
//! every level in the stack shares the same striping. Governs the whole
//! cache stack for a given set: an L2/L3 access, any write in a
//! write-through cache, and any atomically-bracketed load+store must hold
//! the exclusive (stack-scoped) mode; an L1-only read may settle for the
//! shared (core-scoped) mode, which still lets other cores proceed
//! concurrently against the same set.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A held set lock, either core-scoped (shared) or stack-scoped (exclusive).
pub enum SetGuard<'a> {
    /// Core-scoped: permits concurrent L1-only activity by other cores on this set.
    Shared(RwLockReadGuard<'a, ()>),
    /// Stack-scoped: excludes every other holder on this set.
    Exclusive(RwLockWriteGuard<'a, ()>),
}

impl SetGuard<'_> {
    /// True if this guard is held in exclusive (stack-scoped) mode.
    pub fn is_exclusive(&self) -> bool {
        matches!(self, SetGuard::Exclusive(_))
    }
}

/// Lock array striped by cache set index.
pub struct SetLockArray {
    locks: Vec<RwLock<()>>,
}

impl SetLockArray {
    /// Creates a lock array with one stripe per set.
    pub fn new(num_sets: usize) -> Self {
        Self { locks: (0..num_sets.max(1)).map(|_| RwLock::new(())).collect() }
    }

    /// Number of set stripes.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// True if there are no stripes (degenerate geometry).
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Acquires the stripe for `set` in core-scoped shared mode.
    pub fn lock_shared(&self, set: usize) -> SetGuard<'_> {
        SetGuard::Shared(self.locks[set % self.locks.len()].read())
    }

    /// Acquires the stripe for `set` in stack-scoped exclusive mode.
    pub fn lock_exclusive(&self, set: usize) -> SetGuard<'_> {
        SetGuard::Exclusive(self.locks[set % self.locks.len()].write())
    }

    /// Upgrades a shared guard to exclusive by releasing and reacquiring.
    ///
    /// This is **not** atomic: another holder may acquire the stripe in the
    /// gap between release and reacquire. Callers re-check coherence state
    /// after upgrading rather than assuming nothing changed underneath them,
    /// per the set-lock contract.
    pub fn upgrade<'a>(&'a self, guard: SetGuard<'a>, set: usize) -> SetGuard<'a> {
        drop(guard);
        self.lock_exclusive(set)
    }

    /// Downgrades an exclusive guard to shared atomically (no window where
    /// the stripe is briefly unheld).
    pub fn downgrade(&self, guard: SetGuard<'_>) -> SetGuard<'_> {
        match guard {
            SetGuard::Exclusive(w) => SetGuard::Shared(RwLockWriteGuard::downgrade(w)),
            shared => shared,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn shared_locks_on_same_set_do_not_exclude_each_other() {
        let locks = Arc::new(SetLockArray::new(4));
        let l1 = locks.lock_shared(0);
        let l2 = locks.lock_shared(0);
        assert!(!l1.is_exclusive());
        assert!(!l2.is_exclusive());
    }

    #[test]
    fn exclusive_excludes_other_threads() {
        let locks = Arc::new(SetLockArray::new(4));
        let guard = locks.lock_exclusive(1);
        let locks2 = Arc::clone(&locks);
        let handle = thread::spawn(move || {
            // Should block until the main thread drops its guard.
            let _g = locks2.lock_exclusive(1);
        });
        drop(guard);
        handle.join().unwrap();
    }

    #[test]
    fn downgrade_is_atomic_type_change() {
        let locks = SetLockArray::new(2);
        let guard = locks.lock_exclusive(0);
        let guard = locks.downgrade(guard);
        assert!(!guard.is_exclusive());
    }

    #[test]
    fn distinct_sets_do_not_interfere() {
        let locks = SetLockArray::new(4);
        let _a = locks.lock_exclusive(0);
        let _b = locks.lock_exclusive(1);
    }
}
