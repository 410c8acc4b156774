//! In-place reader/writer lock
//!
//! Wraps [`RawPushLock`] in caller-owned storage: the lock is embedded
//! by value in whatever structure it protects and allocates nothing.
//! Construction never fails; teardown is the drop, after which the
//! ownership system forbids any further use.

use core::fmt;

use crate::context::{self, IrqLevel};
use crate::guard::{LockExclusive, LockShared};
use crate::raw::RawPushLock;

/// Reader/writer lock embedded in caller-owned storage
///
/// Many concurrent shared holders XOR one exclusive holder. Fairness is
/// whatever the raw primitive gives; starvation of either side is not
/// excluded.
///
/// Acquisition and release are legal at [`IrqLevel::Apc`] or below.
///
/// # Examples
/// ```rust,ignore
/// struct DeviceTable {
///     lock: RwLock,
///     // ... state the lock protects ...
/// }
///
/// let table = DeviceTable { lock: RwLock::new(), /* ... */ };
/// table.lock.lock_shared();
/// // read the state
/// table.lock.unlock_shared();
/// ```
pub struct RwLock {
    raw: RawPushLock,
}

impl RwLock {
    /// Create the lock in place; never fails, allocates nothing
    pub const fn new() -> Self {
        RwLock {
            raw: RawPushLock::new(),
        }
    }

    /// Block until no holder of either mode remains, then hold
    /// exclusively
    pub fn lock(&self) {
        context::assert_max_level(IrqLevel::Apc);
        self.raw.acquire_exclusive();
    }

    /// Acquire exclusively, reporting success
    ///
    /// This is not a non-blocking attempt. The acquisition policy for
    /// this lock is always-wait: the call blocks until granted and then
    /// reports `true` unconditionally. Do not use it to probe for
    /// contention.
    pub fn try_lock(&self) -> bool {
        self.lock();
        true
    }

    /// Release the exclusive hold
    ///
    /// Releasing a mode that is not held corrupts the lock word; debug
    /// builds assert, release builds do not check.
    pub fn unlock(&self) {
        self.raw.release_exclusive();
    }

    /// Block until no exclusive holder remains, then join the shared
    /// holders
    pub fn lock_shared(&self) {
        context::assert_max_level(IrqLevel::Apc);
        self.raw.acquire_shared();
    }

    /// Acquire in shared mode, reporting success
    ///
    /// Same always-wait policy as [`RwLock::try_lock`]: blocks until
    /// granted, then reports `true`.
    pub fn try_lock_shared(&self) -> bool {
        self.lock_shared();
        true
    }

    /// Release one shared hold
    pub fn unlock_shared(&self) {
        self.raw.release_shared();
    }

    /// Borrow the underlying primitive for host interfaces that take it
    /// directly
    ///
    /// The borrow does not extend the lock's lifetime.
    pub fn raw(&self) -> &RawPushLock {
        &self.raw
    }
}

impl Default for RwLock {
    fn default() -> Self {
        RwLock::new()
    }
}

impl Drop for RwLock {
    fn drop(&mut self) {
        debug_assert!(self.raw.is_idle(), "reader/writer lock dropped while held");
    }
}

impl fmt::Debug for RwLock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.raw.is_idle(), self.raw.shared_holders()) {
            (true, _) => write!(f, "RwLock {{ idle }}"),
            (false, 0) => write!(f, "RwLock {{ <exclusive> }}"),
            (false, n) => write!(f, "RwLock {{ shared: {} }}", n),
        }
    }
}

impl LockExclusive for RwLock {
    fn lock(&self) {
        RwLock::lock(self);
    }

    fn try_lock(&self) -> bool {
        RwLock::try_lock(self)
    }

    fn unlock(&self) {
        RwLock::unlock(self);
    }
}

impl LockShared for RwLock {
    fn lock_shared(&self) {
        RwLock::lock_shared(self);
    }

    fn try_lock_shared(&self) -> bool {
        RwLock::try_lock_shared(self)
    }

    fn unlock_shared(&self) {
        RwLock::unlock_shared(self);
    }
}
