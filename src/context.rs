//! Execution-context tracking for lock preconditions
//!
//! Every lock in this crate is only legal to acquire from certain
//! interrupt levels. The levels are a property of the hosting
//! environment, not of the locks, so this module only records what the
//! host tells it and verifies preconditions in debug builds. Release
//! builds compile every check down to a no-op.
//!
//! # Level rules
//!
//! 1. **Passive** - ordinary thread context; any operation is legal.
//! 2. **Apc** - callback context; blocking waits are still legal.
//! 3. **Dispatch** - elevated context; only non-blocking operations
//!    (immediate waits, state checks) are legal. Acquiring a blocking
//!    lock here deadlocks the CPU.
//!
//! The host maintains one level slot per execution context and must
//! update it through [`raise_level`]/[`lower_level`] when it changes the
//! hardware state. Under `cargo test` each test thread stands in for an
//! execution context of its own.

use core::fmt;

/// Interrupt level of an execution context
///
/// Ordered: a level compares greater than every level it restricts
/// further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum IrqLevel {
    /// Ordinary thread context, blocking waits allowed
    Passive = 0,
    /// Asynchronous-callback context, blocking waits still allowed
    Apc = 1,
    /// Elevated context, only non-blocking operations allowed
    Dispatch = 2,
}

impl IrqLevel {
    /// Get the string representation of the level
    pub const fn as_str(&self) -> &'static str {
        match self {
            IrqLevel::Passive => "PASSIVE",
            IrqLevel::Apc => "APC",
            IrqLevel::Dispatch => "DISPATCH",
        }
    }

    fn from_raw(raw: u8) -> IrqLevel {
        match raw {
            0 => IrqLevel::Passive,
            1 => IrqLevel::Apc,
            _ => IrqLevel::Dispatch,
        }
    }
}

impl fmt::Display for IrqLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Per-context storage slot. The kernel build keeps the current CPU's
// slot; the host swaps its contents on context switch. The test build
// models each test thread as its own context.
#[cfg(not(test))]
mod slot {
    use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

    static LEVEL: AtomicU8 = AtomicU8::new(0);
    static GUARD_DEPTH: AtomicU32 = AtomicU32::new(0);

    pub fn level() -> u8 {
        LEVEL.load(Ordering::Relaxed)
    }

    pub fn set_level(raw: u8) {
        LEVEL.store(raw, Ordering::Relaxed);
    }

    pub fn guard_depth() -> u32 {
        GUARD_DEPTH.load(Ordering::Relaxed)
    }

    pub fn guard_enter() {
        GUARD_DEPTH.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the depth before the decrement
    pub fn guard_leave() -> u32 {
        GUARD_DEPTH.fetch_sub(1, Ordering::Relaxed)
    }
}


/// Interrupt level of the calling context
#[inline]
pub fn current_level() -> IrqLevel {
    IrqLevel::from_raw(slot::level())
}

/// Move the calling context to a higher level
///
/// Returns the previous level so the caller can hand it back to
/// [`lower_level`] when the elevated section ends. Raising below the
/// current level is a contract violation.
pub fn raise_level(to: IrqLevel) -> IrqLevel {
    let prev = current_level();
    debug_assert!(
        to >= prev,
        "raise_level to {} while context is at {}",
        to,
        prev
    );
    slot::set_level(to as u8);
    prev
}

/// Return the calling context to a lower level
///
/// Lowering above the current level is a contract violation.
pub fn lower_level(to: IrqLevel) {
    debug_assert!(
        to <= current_level(),
        "lower_level to {} while context is at {}",
        to,
        current_level()
    );
    slot::set_level(to as u8);
}

/// Mark the calling context as inside a guarded region
///
/// Guarded-mutex acquisition enters the region; release leaves it.
/// Entries nest.
#[inline]
pub fn enter_guarded_region() {
    slot::guard_enter();
}

/// Leave one level of guarded region
///
/// Must pair with a previous [`enter_guarded_region`] on the same
/// context.
#[inline]
pub fn leave_guarded_region() {
    let prev = slot::guard_leave();
    debug_assert!(prev > 0, "leave_guarded_region without a matching enter");
}

/// Whether the calling context is inside a guarded region
#[inline]
pub fn in_guarded_region() -> bool {
    slot::guard_depth() > 0
}

/// Assert that the calling context is at `max` or below
///
/// Verifies an operation's level precondition before the operation
/// touches its primitive. Violations are programmer errors; they are
/// caught here only in debug builds.
#[cfg(debug_assertions)]
pub fn assert_max_level(max: IrqLevel) {
    let level = current_level();
    debug_assert!(
        level <= max,
        "operation requires {} or below, context is at {}",
        max,
        level
    );
}

// No-op version for release builds
#[cfg(not(debug_assertions))]
#[inline(always)]
pub fn assert_max_level(_max: IrqLevel) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level_is_passive() {
        assert_eq!(current_level(), IrqLevel::Passive);
    }

    #[test]
    fn test_raise_and_lower_round_trip() {
        let prev = raise_level(IrqLevel::Dispatch);
        assert_eq!(prev, IrqLevel::Passive);
        assert_eq!(current_level(), IrqLevel::Dispatch);

        lower_level(prev);
        assert_eq!(current_level(), IrqLevel::Passive);
    }

    #[test]
    fn test_level_ordering() {
        assert!(IrqLevel::Passive < IrqLevel::Apc);
        assert!(IrqLevel::Apc < IrqLevel::Dispatch);
    }

    #[test]
    fn test_guarded_region_nesting() {
        assert!(!in_guarded_region());

        enter_guarded_region();
        assert!(in_guarded_region());

        enter_guarded_region();
        leave_guarded_region();
        assert!(in_guarded_region());

        leave_guarded_region();
        assert!(!in_guarded_region());
    }

    #[test]
    #[should_panic]
    fn test_unbalanced_leave_asserts() {
        leave_guarded_region();
    }

    #[test]
    #[should_panic]
    fn test_blocking_assert_fires_at_dispatch() {
        raise_level(IrqLevel::Dispatch);
        assert_max_level(IrqLevel::Apc);
    }

    #[test]
    fn test_level_display() {
        assert_eq!(IrqLevel::Dispatch.as_str(), "DISPATCH");
    }
}
