//! Scoped guards over the lock contracts
//!
//! A guard acquires its lock on construction and releases it exactly
//! once when it leaves scope, on every exit path out of that scope -
//! normal return, early return, and unwind alike. Guards are move-only:
//! moving one hands the release obligation to the new binding and the
//! old binding drops nothing, so a hold can never be released twice.
//!
//! There is deliberately no manual early unlock. Release is scope-driven
//! only; a critical section that wants to end early ends its scope.

use core::fmt;

/// Exclusive acquire/release contract consumed by [`ExclusiveGuard`]
pub trait LockExclusive {
    /// Block until the calling context holds the lock exclusively
    fn lock(&self);

    /// Attempt the acquisition, reporting whether the lock is now held
    ///
    /// The attempt policy is the lock's own; the reader/writer lock's
    /// attempt blocks until granted and then reports `true`.
    fn try_lock(&self) -> bool;

    /// Release the exclusive hold; only valid while held
    fn unlock(&self);
}

/// Shared acquire/release contract consumed by [`SharedGuard`]
///
/// Only lock types that actually distinguish a shared mode implement
/// this, so a `SharedGuard` over an exclusive-only mutex does not
/// compile.
pub trait LockShared {
    /// Block until the calling context holds the lock in shared mode
    fn lock_shared(&self);

    /// Attempt the shared acquisition, reporting whether the lock is
    /// now held; policy is the lock's own
    fn try_lock_shared(&self) -> bool;

    /// Release one shared hold; only valid while held in shared mode
    fn unlock_shared(&self);
}

/// Scope-bound exclusive hold on a lock
///
/// # Examples
/// ```rust,ignore
/// {
///     let _held = ExclusiveGuard::new(&device.state_lock);
///     // exclusive section
/// } // released here, including on early return out of the block
/// ```
pub struct ExclusiveGuard<'a, L: LockExclusive + ?Sized> {
    lock: &'a L,
}

impl<'a, L: LockExclusive + ?Sized> ExclusiveGuard<'a, L> {
    /// Block until `lock` is held exclusively, then bind the hold to
    /// the returned guard
    pub fn new(lock: &'a L) -> Self {
        lock.lock();
        ExclusiveGuard { lock }
    }

    /// Attempt the acquisition; `None` when the lock reported failure
    pub fn try_new(lock: &'a L) -> Option<Self> {
        if lock.try_lock() {
            Some(ExclusiveGuard { lock })
        } else {
            None
        }
    }
}

impl<L: LockExclusive + ?Sized> Drop for ExclusiveGuard<'_, L> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

impl<L: LockExclusive + ?Sized> fmt::Debug for ExclusiveGuard<'_, L> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ExclusiveGuard {{ <held> }}")
    }
}

/// Scope-bound shared hold on a lock
///
/// Many shared guards may be active over one lock at the same time;
/// each releases its own hold.
pub struct SharedGuard<'a, L: LockShared + ?Sized> {
    lock: &'a L,
}

impl<'a, L: LockShared + ?Sized> SharedGuard<'a, L> {
    /// Block until `lock` is held in shared mode, then bind the hold to
    /// the returned guard
    pub fn new(lock: &'a L) -> Self {
        lock.lock_shared();
        SharedGuard { lock }
    }

    /// Attempt the shared acquisition; `None` when the lock reported
    /// failure
    pub fn try_new(lock: &'a L) -> Option<Self> {
        if lock.try_lock_shared() {
            Some(SharedGuard { lock })
        } else {
            None
        }
    }
}

impl<L: LockShared + ?Sized> Drop for SharedGuard<'_, L> {
    fn drop(&mut self) {
        self.lock.unlock_shared();
    }
}

impl<L: LockShared + ?Sized> fmt::Debug for SharedGuard<'_, L> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SharedGuard {{ <held> }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guarded::GuardedMutex;
    use crate::pool::PoolTag;
    use crate::rwlock::RwLock;
    use crate::waitable::WaitableMutex;

    #[test]
    fn test_exclusive_guard_releases_on_scope_exit() {
        let lock = RwLock::new();
        {
            let _held = ExclusiveGuard::new(&lock);
            assert!(!lock.raw().is_idle());
        }
        assert!(lock.raw().is_idle());
    }

    #[test]
    fn test_exclusive_guard_releases_on_early_return() {
        fn section(lock: &RwLock, bail: bool) -> Result<(), ()> {
            let _held = ExclusiveGuard::new(lock);
            if bail {
                return Err(());
            }
            Ok(())
        }

        let lock = RwLock::new();
        assert_eq!(section(&lock, true), Err(()));
        assert!(lock.raw().is_idle());
        assert_eq!(section(&lock, false), Ok(()));
        assert!(lock.raw().is_idle());
    }

    #[test]
    fn test_moved_guard_releases_once() {
        let lock = RwLock::new();

        let held = ExclusiveGuard::new(&lock);
        let moved = held;
        assert!(!lock.raw().is_idle());

        drop(moved);
        assert!(lock.raw().is_idle());

        // The lock is intact after the single release: it can be taken
        // again immediately.
        let again = ExclusiveGuard::new(&lock);
        drop(again);
        assert!(lock.raw().is_idle());
    }

    #[test]
    fn test_shared_guards_stack() {
        let lock = RwLock::new();

        let first = SharedGuard::new(&lock);
        let second = SharedGuard::new(&lock);
        assert_eq!(lock.raw().shared_holders(), 2);

        drop(first);
        assert_eq!(lock.raw().shared_holders(), 1);
        drop(second);
        assert!(lock.raw().is_idle());
    }

    #[test]
    fn test_try_new_reports_contention() {
        let mutex = GuardedMutex::new(PoolTag::from_bytes(*b"tGdT")).unwrap();

        mutex.lock();
        assert!(ExclusiveGuard::try_new(&mutex).is_none());
        mutex.unlock();

        let held = ExclusiveGuard::try_new(&mutex).expect("mutex is free");
        drop(held);
    }

    #[test]
    fn test_guard_drives_waitable_mutex() {
        let mutex = WaitableMutex::new(PoolTag::from_bytes(*b"tGdW")).unwrap();

        {
            let _held = ExclusiveGuard::new(&mutex);
            assert!(!mutex.check());
        }
        assert!(mutex.check());
    }
}
