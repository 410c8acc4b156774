//! Pool-backed guarded mutex
//!
//! The fast exclusive lock for code that never runs above
//! [`IrqLevel::Apc`]. Construction draws one tagged non-paged block for
//! the raw primitive; destruction frees it exactly once. While held,
//! the owning context sits inside a guarded region (tracked through
//! [`crate::context`]) so host callbacks that respect the region stay
//! out of the critical section.

use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;

use log::trace;

use crate::context::{self, IrqLevel};
use crate::guard::LockExclusive;
use crate::pool::{self, OutOfMemory, PoolFlags, PoolTag};
use crate::raw::RawGuardedMutex;

/// Exclusive lock backed by one tagged pool block
///
/// Cheaper per operation than [`crate::WaitableMutex`] but restricted:
/// no timeouts, no signaled-state query, and never legal at
/// [`IrqLevel::Dispatch`].
pub struct GuardedMutex {
    raw: NonNull<RawGuardedMutex>,
    tag: PoolTag,
}

// SAFETY: the pool block is owned by this object for its whole
// lifetime and all access to it goes through atomics.
unsafe impl Send for GuardedMutex {}
unsafe impl Sync for GuardedMutex {}

impl GuardedMutex {
    const LAYOUT: Layout = Layout::new::<RawGuardedMutex>();

    /// Allocate and initialize the mutex, charging the block to `tag`
    ///
    /// On [`OutOfMemory`] no object exists: there is nothing to lock
    /// and nothing will be freed.
    pub fn new(tag: PoolTag) -> Result<Self, OutOfMemory> {
        let block = pool::allocate(tag, PoolFlags::NON_PAGED, Self::LAYOUT)?;
        let raw = block.cast::<RawGuardedMutex>();
        unsafe { raw.as_ptr().write(RawGuardedMutex::new()) };
        trace!("guarded mutex {} ready", tag);
        Ok(GuardedMutex { raw, tag })
    }

    fn raw_ref(&self) -> &RawGuardedMutex {
        // SAFETY: `raw` points at the block `new` initialized, kept
        // alive until drop.
        unsafe { self.raw.as_ref() }
    }

    /// Block until the calling context is the sole holder
    ///
    /// Legal at [`IrqLevel::Apc`] or below.
    pub fn lock(&self) {
        context::assert_max_level(IrqLevel::Apc);
        context::enter_guarded_region();
        self.raw_ref().acquire();
    }

    /// Attempt to acquire without blocking
    ///
    /// A failed attempt leaves the context's guarded region again
    /// before reporting `false`.
    pub fn try_lock(&self) -> bool {
        context::assert_max_level(IrqLevel::Apc);
        context::enter_guarded_region();
        if self.raw_ref().try_acquire() {
            true
        } else {
            context::leave_guarded_region();
            false
        }
    }

    /// Release the hold
    ///
    /// Only valid while held by the calling context; no ownership
    /// verification is performed.
    pub fn unlock(&self) {
        self.raw_ref().release();
        context::leave_guarded_region();
    }

    /// Expose the raw primitive for host interfaces that take it
    /// directly
    ///
    /// The pointer is borrowed from this object; it does not extend the
    /// mutex's lifetime and must not outlive it.
    pub fn raw(&self) -> NonNull<RawGuardedMutex> {
        self.raw
    }
}

impl Drop for GuardedMutex {
    fn drop(&mut self) {
        debug_assert!(
            !self.raw_ref().is_owned(),
            "guarded mutex dropped while held"
        );
        unsafe {
            core::ptr::drop_in_place(self.raw.as_ptr());
            pool::free(self.tag, self.raw.cast(), Self::LAYOUT);
        }
    }
}

impl fmt::Debug for GuardedMutex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.raw_ref().is_owned() {
            write!(f, "GuardedMutex {{ tag: {}, <locked> }}", self.tag)
        } else {
            write!(f, "GuardedMutex {{ tag: {}, unlocked }}", self.tag)
        }
    }
}

impl LockExclusive for GuardedMutex {
    fn lock(&self) {
        GuardedMutex::lock(self);
    }

    fn try_lock(&self) -> bool {
        GuardedMutex::try_lock(self)
    }

    fn unlock(&self) {
        GuardedMutex::unlock(self);
    }
}
