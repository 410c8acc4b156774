//! Lock primitive wrappers and scoped guards for kernel-mode code
//!
//! This crate unifies three lock primitives behind one acquire/release
//! protocol so critical sections read the same no matter which
//! primitive backs them:
//!
//! - [`RwLock`]: in-place reader/writer lock, embedded by value, no
//!   allocation
//! - [`GuardedMutex`]: pool-backed exclusive lock, fast, restricted to
//!   low interrupt levels
//! - [`WaitableMutex`]: pool-backed exclusive lock with bounded waits,
//!   a signaled-state check, and abandonment reporting
//!
//! [`ExclusiveGuard`] and [`SharedGuard`] bind a hold to a scope so the
//! release happens on every exit path. Interrupt-level legality is a
//! documented precondition per operation, debug-asserted through
//! [`context`]; the heap-backed locks draw their blocks from the tagged
//! [`pool`] capability and report [`OutOfMemory`] as the sole error.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod context;
pub mod guard;
pub mod guarded;
pub mod pool;
pub mod raw;
pub mod rwlock;
pub mod waitable;

pub use context::IrqLevel;
pub use guard::{ExclusiveGuard, LockExclusive, LockShared, SharedGuard};
pub use guarded::GuardedMutex;
pub use pool::{OutOfMemory, PoolBackend, PoolFlags, PoolTag, PoolUsage};
pub use raw::{RawGuardedMutex, RawPushLock, RawWaitMutex, Timeout, WaitStatus};
pub use rwlock::RwLock;
pub use waitable::WaitableMutex;
