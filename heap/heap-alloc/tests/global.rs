//! Facade test for the process-wide heap.
//!
//! Everything lives in one `#[test]` because the singleton is shared by the
//! whole test binary and never resets.

use core::alloc::{GlobalAlloc, Layout};

use heap_alloc::GlobalHeap;
use heap_alloc::global::{allocate, calloc, check_heap, free, init, realloc};

#[test]
fn process_wide_heap_round_trip() {
    init().unwrap();
    // repeated init is fine
    init().unwrap();
    check_heap(false);

    let p = allocate(100).unwrap();
    assert_eq!(p.as_ptr() as usize % 16, 0);
    unsafe { p.as_ptr().write_bytes(0x42, 100) };
    check_heap(false);

    let p = unsafe { realloc(p.as_ptr(), 300) }.unwrap();
    check_heap(false);
    for off in 0..100 {
        assert_eq!(unsafe { p.as_ptr().add(off).read() }, 0x42);
    }

    let z = calloc(16, 16).unwrap();
    check_heap(false);
    for off in 0..256 {
        assert_eq!(unsafe { z.as_ptr().add(off).read() }, 0);
    }

    unsafe { free(p.as_ptr()) };
    unsafe { free(z.as_ptr()) };
    unsafe { free(core::ptr::null_mut()) };
    check_heap(false);

    // the GlobalAlloc adaptor drives the same heap
    let layout = Layout::from_size_align(64, 16).unwrap();
    let g = unsafe { GlobalHeap.alloc(layout) };
    assert!(!g.is_null());
    check_heap(false);

    let zeroed = unsafe { GlobalHeap.alloc_zeroed(layout) };
    assert!(!zeroed.is_null());
    for off in 0..64 {
        assert_eq!(unsafe { zeroed.add(off).read() }, 0);
    }

    let grown = unsafe { GlobalHeap.realloc(g, layout, 500) };
    assert!(!grown.is_null());
    check_heap(false);

    unsafe {
        GlobalHeap.dealloc(grown, Layout::from_size_align(500, 16).unwrap());
        GlobalHeap.dealloc(zeroed, layout);
    }
    check_heap(false);

    // over-aligned layouts are refused, not served misaligned
    let over = Layout::from_size_align(64, 64).unwrap();
    assert!(unsafe { GlobalHeap.alloc(over) }.is_null());
}
