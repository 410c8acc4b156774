//! Tagged pool allocation capability
//!
//! The heap-backed locks draw their primitive blocks from here. Every
//! block is charged to a four-byte [`PoolTag`] so leaks and double frees
//! can be attributed to a subsystem from a crash dump. The front-end
//! routes through an installable [`PoolBackend`] and keeps usage
//! counters; the default backend is the registered global allocator.
//!
//! Allocation failure is the only condition this crate ever reports
//! through an error channel. Everything downstream of a successful
//! allocation is infallible.

use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use log::warn;
use spin::Once;

/// Four-byte diagnostic tag identifying the owner of a pool block
///
/// Conventionally four ASCII characters, e.g. `PoolTag::from_bytes(*b"kLok")`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PoolTag(u32);

impl PoolTag {
    /// Build a tag from its four ASCII bytes
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        PoolTag(u32::from_le_bytes(bytes))
    }

    /// Raw tag value as stored in accounting records
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PoolTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for byte in self.0.to_le_bytes() {
            let c = if byte.is_ascii_graphic() {
                byte as char
            } else {
                '.'
            };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for PoolTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PoolTag({})", self)
    }
}

bitflags! {
    /// Placement and initialization flags for a pool allocation
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PoolFlags: u32 {
        /// Block must stay resident; required for anything touched at
        /// elevated interrupt levels
        const NON_PAGED = 1 << 0;
        /// Block may be paged out while unreferenced
        const PAGED = 1 << 1;
        /// Zero the block before returning it
        const ZEROED = 1 << 2;
    }
}

/// The pool could not satisfy an allocation request
///
/// The failed object does not exist; nothing was allocated and nothing
/// needs to be freed. Whether this is fatal or retryable is the
/// caller's policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemory;

impl fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "pool allocation failed: out of memory")
    }
}

/// Backend contract for the pool front-end
///
/// The hosting environment installs its allocator once at startup via
/// [`install_backend`]. Absent an installed backend the front-end falls
/// back to the registered global allocator.
pub trait PoolBackend: Sync {
    /// Allocate `layout` bytes charged to `tag`
    fn allocate(
        &self,
        tag: PoolTag,
        flags: PoolFlags,
        layout: Layout,
    ) -> Result<NonNull<u8>, OutOfMemory>;

    /// Return a block previously handed out by `allocate`
    ///
    /// # Safety
    /// `ptr` must originate from a successful `allocate` on this backend
    /// with the same `tag` and `layout`, and must not be freed twice.
    unsafe fn free(&self, tag: PoolTag, ptr: NonNull<u8>, layout: Layout);
}

/// Default backend over the registered global allocator
struct HeapBackend;

impl PoolBackend for HeapBackend {
    fn allocate(
        &self,
        _tag: PoolTag,
        flags: PoolFlags,
        layout: Layout,
    ) -> Result<NonNull<u8>, OutOfMemory> {
        let ptr = unsafe {
            if flags.contains(PoolFlags::ZEROED) {
                alloc::alloc::alloc_zeroed(layout)
            } else {
                alloc::alloc::alloc(layout)
            }
        };
        NonNull::new(ptr).ok_or(OutOfMemory)
    }

    unsafe fn free(&self, _tag: PoolTag, ptr: NonNull<u8>, layout: Layout) {
        alloc::alloc::dealloc(ptr.as_ptr(), layout);
    }
}

static HEAP_BACKEND: HeapBackend = HeapBackend;
static BACKEND: Once<&'static dyn PoolBackend> = Once::new();

/// Install the pool backend
///
/// The first installer wins; later calls are ignored. Must happen
/// before the first allocation, otherwise the default backend is
/// already latched in.
pub fn install_backend(backend: &'static dyn PoolBackend) {
    BACKEND.call_once(|| backend);
}

fn backend() -> &'static dyn PoolBackend {
    *BACKEND.call_once(|| &HEAP_BACKEND)
}

/// Pool usage counters, updated on every front-end call
struct PoolCounters {
    allocations: AtomicU64,
    frees: AtomicU64,
    failures: AtomicU64,
    bytes_in_use: AtomicU64,
}

static COUNTERS: PoolCounters = PoolCounters {
    allocations: AtomicU64::new(0),
    frees: AtomicU64::new(0),
    failures: AtomicU64::new(0),
    bytes_in_use: AtomicU64::new(0),
};

/// Snapshot of the pool usage counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolUsage {
    /// Successful allocations since boot
    pub allocations: u64,
    /// Frees since boot
    pub frees: u64,
    /// Failed allocation attempts since boot
    pub failures: u64,
    /// Bytes currently held by live allocations
    pub bytes_in_use: u64,
}

/// Read the current pool usage counters
pub fn stats() -> PoolUsage {
    PoolUsage {
        allocations: COUNTERS.allocations.load(Ordering::Relaxed),
        frees: COUNTERS.frees.load(Ordering::Relaxed),
        failures: COUNTERS.failures.load(Ordering::Relaxed),
        bytes_in_use: COUNTERS.bytes_in_use.load(Ordering::Relaxed),
    }
}

/// Allocate `layout` bytes from the installed backend, charged to `tag`
pub fn allocate(
    tag: PoolTag,
    flags: PoolFlags,
    layout: Layout,
) -> Result<NonNull<u8>, OutOfMemory> {
    debug_assert!(layout.size() != 0, "zero-sized pool allocation");

    #[cfg(test)]
    fault::take(tag)?;

    match backend().allocate(tag, flags, layout) {
        Ok(ptr) => {
            COUNTERS.allocations.fetch_add(1, Ordering::Relaxed);
            COUNTERS
                .bytes_in_use
                .fetch_add(layout.size() as u64, Ordering::Relaxed);
            Ok(ptr)
        }
        Err(OutOfMemory) => {
            COUNTERS.failures.fetch_add(1, Ordering::Relaxed);
            warn!("pool: {} allocation of {} bytes failed", tag, layout.size());
            Err(OutOfMemory)
        }
    }
}

/// Return a block to the installed backend
///
/// # Safety
/// `ptr` must originate from a successful [`allocate`] with the same
/// `tag` and `layout`, and must not be freed twice.
pub unsafe fn free(tag: PoolTag, ptr: NonNull<u8>, layout: Layout) {
    backend().free(tag, ptr, layout);
    COUNTERS.frees.fetch_add(1, Ordering::Relaxed);
    COUNTERS
        .bytes_in_use
        .fetch_sub(layout.size() as u64, Ordering::Relaxed);
}
