//! Reallocation-path tests: shrink in place, tail-of-heap growth, growth
//! into free neighbors in every direction, and the move fallback.

use heap_alloc::Heap;
use heap_region::{HeapStorage, SbrkRegion};

fn new_heap<const N: usize>() -> (Box<HeapStorage<N>>, Heap<SbrkRegion>) {
    let mut storage = Box::new(HeapStorage::<N>::new());
    let heap = Heap::init(unsafe { storage.as_region() }).unwrap();
    (storage, heap)
}

fn fill(p: core::ptr::NonNull<u8>, len: usize) {
    for off in 0..len {
        unsafe { p.as_ptr().add(off).write((off % 251) as u8) };
    }
}

fn assert_filled(p: core::ptr::NonNull<u8>, len: usize) {
    for off in 0..len {
        assert_eq!(unsafe { p.as_ptr().add(off).read() }, (off % 251) as u8, "byte {off}");
    }
}

#[test]
fn null_and_zero_behave_like_alloc_and_free() {
    let (_storage, mut heap) = new_heap::<4096>();

    // realloc(null, n) allocates
    let p = unsafe { heap.realloc(core::ptr::null_mut(), 50) }.unwrap();
    heap.check(false);

    // realloc(p, 0) frees and returns nothing
    assert!(unsafe { heap.realloc(p.as_ptr(), 0) }.is_none());
    heap.check(false);
    assert_eq!(heap.free_bytes(), heap.managed_bytes());
}

#[test]
fn same_size_is_identity() {
    let (_storage, mut heap) = new_heap::<4096>();

    let p = heap.allocate(60).unwrap(); // 64-byte block
    fill(p, 60);

    let q = unsafe { heap.realloc(p.as_ptr(), 60) }.unwrap();
    heap.check(false);
    assert_eq!(q, p);
    assert_filled(q, 60);
}

#[test]
fn shrink_in_place_exposes_a_free_tail() {
    let (_storage, mut heap) = new_heap::<65536>();

    let p = heap.allocate(200).unwrap(); // 208-byte block
    let _pin = heap.allocate(8).unwrap();
    fill(p, 40);

    let q = unsafe { heap.realloc(p.as_ptr(), 40) }.unwrap(); // 48-byte block
    heap.check(false);
    assert_eq!(q, p, "shrinking must not move the block");
    assert_filled(q, 40);

    // the cut-off 160 bytes re-entered the free list
    assert_eq!(heap.free_list_len(), 1);
    assert_eq!(heap.largest_free_block(), 160);
}

#[test]
fn shrink_by_less_than_a_block_keeps_the_size() {
    let (_storage, mut heap) = new_heap::<4096>();

    let p = heap.allocate(60).unwrap(); // 64-byte block
    let q = unsafe { heap.realloc(p.as_ptr(), 56) }.unwrap(); // still 64

    heap.check(false);
    assert_eq!(q, p);
    assert_eq!(heap.free_list_len(), 0, "a 0-byte remainder cannot be split off");
}

#[test]
fn grow_at_heap_tail_extends_in_place() {
    let (_storage, mut heap) = new_heap::<65536>();

    let p = heap.allocate(100).unwrap(); // 112-byte block, last in the heap
    fill(p, 100);
    let end_before = heap.heap_end();

    let q = unsafe { heap.realloc(p.as_ptr(), 400) }.unwrap(); // 416-byte block
    heap.check(false);
    assert_eq!(q, p, "the tail block must grow in place");
    assert_eq!(heap.heap_end(), end_before + (416 - 112));
    assert_filled(q, 100);
}

#[test]
fn grow_into_free_right_neighbor_without_copy() {
    let (_storage, mut heap) = new_heap::<65536>();

    let a = heap.allocate(64).unwrap(); // 80-byte block
    let b = heap.allocate(64).unwrap();
    fill(a, 64);
    unsafe { heap.free(b.as_ptr()) };
    heap.check(false);

    let q = unsafe { heap.realloc(a.as_ptr(), 120) }.unwrap(); // 128 of 160
    heap.check(false);
    assert_eq!(q, a, "the block must not move");
    assert_filled(q, 64);

    // the unconsumed 32 bytes of the neighbor stay free
    assert_eq!(heap.free_list_len(), 1);
    assert_eq!(heap.largest_free_block(), 32);
}

#[test]
fn grow_into_free_left_neighbor_moves_payload_down() {
    let (_storage, mut heap) = new_heap::<65536>();

    let left = heap.allocate(60).unwrap(); // 64-byte block
    let mid = heap.allocate(28).unwrap(); // 32-byte block
    let _pin = heap.allocate(8).unwrap();
    fill(mid, 28);
    unsafe { heap.free(left.as_ptr()) };
    heap.check(false);

    // 96 combined bytes serve the 96-byte request exactly
    let q = unsafe { heap.realloc(mid.as_ptr(), 80) }.unwrap();
    heap.check(false);
    assert_eq!(q, left, "the block must slide into the left hole");
    assert_filled(q, 28);
    assert_eq!(heap.free_list_len(), 0);
}

#[test]
fn grow_into_overlapping_left_neighbor() {
    let (_storage, mut heap) = new_heap::<65536>();

    // a 16-byte hole directly below a 64-byte block: source and destination
    // of the payload copy overlap by 48 bytes
    let hole = heap.allocate(12).unwrap();
    let p = heap.allocate(60).unwrap();
    let _pin = heap.allocate(8).unwrap();
    fill(p, 60);
    unsafe { heap.free(hole.as_ptr()) };

    let q = unsafe { heap.realloc(p.as_ptr(), 76) }.unwrap(); // 80 of 16+64
    heap.check(false);
    assert_eq!(q, hole);
    assert_filled(q, 60);
}

#[test]
fn grow_into_both_neighbors() {
    let (_storage, mut heap) = new_heap::<65536>();

    let left = heap.allocate(60).unwrap(); // 64
    let mid = heap.allocate(28).unwrap(); // 32
    let right = heap.allocate(44).unwrap(); // 48
    let _pin = heap.allocate(8).unwrap();
    fill(mid, 28);
    unsafe { heap.free(left.as_ptr()) };
    unsafe { heap.free(right.as_ptr()) };
    heap.check(false);
    assert_eq!(heap.free_list_len(), 2);

    // 144 combined bytes, 128 used, 16 split back off
    let q = unsafe { heap.realloc(mid.as_ptr(), 120) }.unwrap();
    heap.check(false);
    assert_eq!(q, left, "the merged block starts at the left neighbor");
    assert_filled(q, 28);
    assert_eq!(heap.free_list_len(), 1);
    assert_eq!(heap.largest_free_block(), 16);
}

#[test]
fn surrounded_block_moves_as_a_last_resort() {
    let (_storage, mut heap) = new_heap::<65536>();

    let p = heap.allocate(40).unwrap(); // 48-byte block
    let _pin = heap.allocate(8).unwrap();
    fill(p, 40);

    let q = unsafe { heap.realloc(p.as_ptr(), 200) }.unwrap();
    heap.check(false);
    assert_ne!(q, p, "no neighbor space: the block has to move");
    assert_filled(q, 40);

    // the old block was freed
    assert_eq!(heap.free_list_len(), 1);
    assert_eq!(heap.largest_free_block(), 48);
}

#[test]
fn grow_failure_keeps_the_block_intact() {
    let (_storage, mut heap) = new_heap::<256>();

    let p = heap.allocate(100).unwrap();
    fill(p, 100);

    let end_before = heap.heap_end();
    assert!(unsafe { heap.realloc(p.as_ptr(), 1 << 20) }.is_none());
    heap.check(false);
    assert_eq!(heap.heap_end(), end_before, "failed growth must not move the break");
    assert_filled(p, 100);

    // the block is still live and can be freed normally
    unsafe { heap.free(p.as_ptr()) };
    heap.check(false);
}
