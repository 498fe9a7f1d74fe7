//! # Process-Wide Heap
//!
//! One [`Heap`] instance over a statically reserved region, guarded by a
//! spinlock and initialized on first use. The free functions here preserve
//! the classic malloc calling convention; [`GlobalHeap`] adapts the same
//! instance to [`GlobalAlloc`] so it can be installed with
//! `#[global_allocator]`:
//!
//! ```ignore
//! use heap_alloc::GlobalHeap;
//!
//! #[global_allocator]
//! static ALLOCATOR: GlobalHeap = GlobalHeap;
//! ```
//!
//! The block format hands out payloads with exactly 16-byte alignment, so
//! layouts requesting more than [`ALIGNMENT`] are refused with a null
//! pointer rather than served misaligned.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull, null_mut};

use heap_region::{HeapStorage, SbrkRegion};
use heap_sync::SpinLock;

use crate::heap::{Heap, HeapInitError};
use crate::tag::ALIGNMENT;

/// Size of the statically reserved heap region.
///
/// Adjust as needed; the storage sits in `.bss` and costs nothing until the
/// pages are touched.
const HEAP_CAPACITY: usize = 16 * 1024 * 1024; // 16 MiB

/// Backing storage for the process-wide heap.
static mut STORAGE: HeapStorage<HEAP_CAPACITY> = HeapStorage::new();

/// The heap singleton; `None` until [`init`] (or the first allocation).
static HEAP: SpinLock<Option<Heap<SbrkRegion>>> = SpinLock::new(None);

/// Create the singleton if it does not exist yet (idempotent).
fn ensure_init() -> Result<(), HeapInitError> {
    HEAP.with_lock(|slot| {
        if slot.is_none() {
            // Safety: STORAGE is handed to exactly one region; the lock
            // serializes the handoff.
            let region = unsafe { (*(&raw mut STORAGE)).as_region() };
            *slot = Some(Heap::init(region)?);
        }
        Ok(())
    })
}

/// Set up the process-wide heap.
///
/// Calling this more than once is allowed and does nothing after the first
/// success. The other entry points initialize on demand, so calling it at
/// all is optional.
///
/// # Errors
/// [`HeapInitError`] when the reserved region cannot supply the initial
/// bytes.
pub fn init() -> Result<(), HeapInitError> {
    ensure_init()
}

/// Allocate `size` bytes from the process-wide heap.
#[must_use]
pub fn allocate(size: usize) -> Option<NonNull<u8>> {
    ensure_init().ok()?;
    HEAP.with_lock(|slot| slot.as_mut()?.allocate(size))
}

/// Release a block obtained from the process-wide heap. Null is a no-op.
///
/// # Safety
/// `ptr` must be null or a live pointer returned by [`allocate`],
/// [`realloc`] or [`calloc`].
pub unsafe fn free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    HEAP.with_lock(|slot| {
        if let Some(heap) = slot.as_mut() {
            // Safety: forwarded caller contract.
            unsafe { heap.free(ptr) };
        }
    });
}

/// Resize a block from the process-wide heap (see [`Heap::realloc`]).
///
/// # Safety
/// Same contract as [`free`] for non-null `ptr`.
pub unsafe fn realloc(ptr: *mut u8, size: usize) -> Option<NonNull<u8>> {
    ensure_init().ok()?;
    HEAP.with_lock(|slot| {
        // Safety: forwarded caller contract.
        unsafe { slot.as_mut()?.realloc(ptr, size) }
    })
}

/// Zero-filled array allocation from the process-wide heap.
#[must_use]
pub fn calloc(nmemb: usize, size: usize) -> Option<NonNull<u8>> {
    ensure_init().ok()?;
    HEAP.with_lock(|slot| slot.as_mut()?.calloc(nmemb, size))
}

/// Validate the process-wide heap (see [`Heap::check`]). A no-op before
/// initialization.
pub fn check_heap(verbose: bool) {
    HEAP.with_lock(|slot| {
        if let Some(heap) = slot.as_ref() {
            heap.check(verbose);
        }
    });
}

/// [`GlobalAlloc`] adaptor for the process-wide heap.
pub struct GlobalHeap;

unsafe impl GlobalAlloc for GlobalHeap {
    /// Allocate per `layout`. Alignments above 16 are not representable in
    /// the block format and yield null.
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return null_mut();
        }
        allocate(layout.size()).map_or(null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // Safety: the GlobalAlloc contract matches `free`'s.
        unsafe { free(ptr) };
    }

    /// Note: zeroing is performed after allocation succeeds.
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let p = unsafe { self.alloc(layout) };
        if !p.is_null() {
            // Safety: the fresh block holds `layout.size()` payload bytes.
            unsafe { ptr::write_bytes(p, 0, layout.size()) };
        }
        p
    }

    /// Resizes in place where the neighborhood allows it, falling back to
    /// allocate-copy-free.
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return null_mut();
        }
        // Safety: the GlobalAlloc contract matches `realloc`'s.
        unsafe { realloc(ptr, new_size) }.map_or(null_mut(), NonNull::as_ptr)
    }
}
