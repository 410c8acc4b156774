//! Pool-backed waitable mutex
//!
//! The dispatcher-style exclusive lock: waits can be bounded, the
//! signaled state can be read without acquiring, and a holder that
//! ceases to exist while holding surfaces as an abandoned grant instead
//! of a wedged lock. Costs more per operation than
//! [`crate::GuardedMutex`]; use it where those capabilities matter.

use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;

use log::trace;

use crate::context::{self, IrqLevel};
use crate::guard::LockExclusive;
use crate::pool::{self, OutOfMemory, PoolFlags, PoolTag};
use crate::raw::{RawWaitMutex, Timeout, WaitStatus};

/// Waitable exclusive lock backed by one tagged pool block
///
/// The legal interrupt level depends on the wait bound, and the
/// [`Timeout`] value in the signature is what makes that checkable at
/// the call site: [`Timeout::Infinite`] and nonzero [`Timeout::Millis`]
/// require [`IrqLevel::Apc`] or below, [`Timeout::Immediate`] is legal
/// up to [`IrqLevel::Dispatch`].
pub struct WaitableMutex {
    raw: NonNull<RawWaitMutex>,
    tag: PoolTag,
}

// SAFETY: the pool block is owned by this object for its whole
// lifetime and all access to it goes through atomics.
unsafe impl Send for WaitableMutex {}
unsafe impl Sync for WaitableMutex {}

impl WaitableMutex {
    const LAYOUT: Layout = Layout::new::<RawWaitMutex>();

    /// Allocate and initialize the mutex, charging the block to `tag`
    ///
    /// On [`OutOfMemory`] no object exists: there is nothing to lock
    /// and nothing will be freed.
    pub fn new(tag: PoolTag) -> Result<Self, OutOfMemory> {
        let block = pool::allocate(tag, PoolFlags::NON_PAGED, Self::LAYOUT)?;
        let raw = block.cast::<RawWaitMutex>();
        unsafe { raw.as_ptr().write(RawWaitMutex::new()) };
        trace!("wait mutex {} ready", tag);
        Ok(WaitableMutex { raw, tag })
    }

    fn raw_ref(&self) -> &RawWaitMutex {
        // SAFETY: `raw` points at the block `new` initialized, kept
        // alive until drop.
        unsafe { self.raw.as_ref() }
    }

    /// Wait for ownership within `timeout`
    ///
    /// [`WaitStatus::Abandoned`] confers ownership exactly like
    /// [`WaitStatus::Acquired`]; it additionally tells the caller that
    /// the previous holder died holding the mutex, so whatever the
    /// mutex protects may need validation.
    pub fn lock(&self, timeout: Timeout) -> WaitStatus {
        match timeout {
            Timeout::Immediate | Timeout::Millis(0) => {
                context::assert_max_level(IrqLevel::Dispatch)
            }
            Timeout::Infinite | Timeout::Millis(_) => context::assert_max_level(IrqLevel::Apc),
        }
        self.raw_ref().acquire(timeout)
    }

    /// Test-and-return shorthand for `lock(Timeout::Immediate)`
    pub fn try_lock(&self) -> bool {
        self.lock(Timeout::Immediate).is_acquired()
    }

    /// Whether the mutex is currently signaled (unheld), without
    /// acquiring it
    ///
    /// Non-blocking; legal up to [`IrqLevel::Dispatch`]. The answer is
    /// stale the moment it is produced.
    pub fn check(&self) -> bool {
        context::assert_max_level(IrqLevel::Dispatch);
        self.raw_ref().is_signaled()
    }

    /// Release the hold
    ///
    /// Only valid while held by the calling context; no ownership
    /// verification is performed. Legal up to [`IrqLevel::Dispatch`].
    pub fn unlock(&self) {
        context::assert_max_level(IrqLevel::Dispatch);
        self.raw_ref().release();
    }

    /// Release on behalf of a holder that ceased to exist while holding
    ///
    /// Host teardown hook: the environment reaping a dead context calls
    /// this for each mutex the context still held. The next successful
    /// wait reports [`WaitStatus::Abandoned`] exactly once, after which
    /// the mutex behaves normally.
    pub fn abandon(&self) {
        trace!("wait mutex {} abandoned by its holder", self.tag);
        self.raw_ref().abandon();
    }

    /// Expose the raw primitive for host interfaces that take it
    /// directly
    ///
    /// The pointer is borrowed from this object; it does not extend the
    /// mutex's lifetime and must not outlive it.
    pub fn raw(&self) -> NonNull<RawWaitMutex> {
        self.raw
    }
}

impl Drop for WaitableMutex {
    fn drop(&mut self) {
        debug_assert!(
            self.raw_ref().is_signaled(),
            "wait mutex dropped while held"
        );
        unsafe {
            core::ptr::drop_in_place(self.raw.as_ptr());
            pool::free(self.tag, self.raw.cast(), Self::LAYOUT);
        }
    }
}

impl fmt::Debug for WaitableMutex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.raw_ref().is_signaled() {
            write!(f, "WaitableMutex {{ tag: {}, signaled }}", self.tag)
        } else {
            write!(f, "WaitableMutex {{ tag: {}, <held> }}", self.tag)
        }
    }
}

impl LockExclusive for WaitableMutex {
    fn lock(&self) {
        let status = WaitableMutex::lock(self, Timeout::Infinite);
        debug_assert!(status.is_acquired());
    }

    fn try_lock(&self) -> bool {
        WaitableMutex::try_lock(self)
    }

    fn unlock(&self) {
        WaitableMutex::unlock(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::fault;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_starts_signaled() {
        let mutex = WaitableMutex::new(PoolTag::from_bytes(*b"tWm0")).unwrap();
        assert!(mutex.check());
    }

    #[test]
    fn test_immediate_lock_round_trip() {
        let mutex = WaitableMutex::new(PoolTag::from_bytes(*b"tWm1")).unwrap();

        assert_eq!(mutex.lock(Timeout::Immediate), WaitStatus::Acquired);
        assert!(!mutex.check());
        mutex.unlock();
        assert!(mutex.check());
    }

    #[test]
    fn test_bounded_wait_times_out_while_held() {
        let mutex = Arc::new(WaitableMutex::new(PoolTag::from_bytes(*b"tWm2")).unwrap());
        let barrier = Arc::new(Barrier::new(2));

        let holder = {
            let mutex = Arc::clone(&mutex);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                assert_eq!(mutex.lock(Timeout::Infinite), WaitStatus::Acquired);
                barrier.wait(); // held from here on
                barrier.wait(); // until the waiter has seen its timeouts
                mutex.unlock();
            })
        };

        barrier.wait();
        assert_eq!(mutex.lock(Timeout::Immediate), WaitStatus::TimedOut);
        assert_eq!(mutex.lock(Timeout::Millis(5)), WaitStatus::TimedOut);
        assert!(!mutex.check());
        barrier.wait();

        holder.join().unwrap();
        assert_eq!(mutex.lock(Timeout::Millis(100)), WaitStatus::Acquired);
        mutex.unlock();
    }

    #[test]
    fn test_infinite_wait_acquires_free_mutex() {
        let mutex = WaitableMutex::new(PoolTag::from_bytes(*b"tWm3")).unwrap();
        assert_eq!(mutex.lock(Timeout::Infinite), WaitStatus::Acquired);
        mutex.unlock();
    }

    #[test]
    fn test_abandonment_reported_once() {
        let mutex = WaitableMutex::new(PoolTag::from_bytes(*b"tWm4")).unwrap();

        assert_eq!(mutex.lock(Timeout::Immediate), WaitStatus::Acquired);
        mutex.abandon();
        assert!(mutex.check());

        assert_eq!(mutex.lock(Timeout::Immediate), WaitStatus::Abandoned);
        mutex.unlock();
        assert_eq!(mutex.lock(Timeout::Immediate), WaitStatus::Acquired);
        mutex.unlock();
    }

    #[test]
    fn test_check_and_immediate_legal_at_dispatch() {
        let mutex = WaitableMutex::new(PoolTag::from_bytes(*b"tWm5")).unwrap();

        let prev = context::raise_level(IrqLevel::Dispatch);
        assert!(mutex.check());
        assert!(mutex.try_lock());
        mutex.unlock();
        context::lower_level(prev);
    }

    #[test]
    #[should_panic]
    fn test_blocking_wait_asserts_at_dispatch() {
        let mutex = WaitableMutex::new(PoolTag::from_bytes(*b"tWm6")).unwrap();

        context::raise_level(IrqLevel::Dispatch);
        let _ = mutex.lock(Timeout::Infinite);
    }

    #[test]
    fn test_construction_reports_out_of_memory() {
        let tag = PoolTag::from_bytes(*b"tWmF");
        let before = pool::stats();

        fault::fail_next(tag);
        assert_eq!(WaitableMutex::new(tag).unwrap_err(), OutOfMemory);

        let after = pool::stats();
        assert_eq!(after.frees, before.frees);
    }
}
