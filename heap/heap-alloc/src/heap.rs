//! # Allocation Policy
//!
//! [`Heap`] ties the boundary-tag layer and the free list together over an
//! sbrk-style [`HeapSource`]: best-fit search, splitting, coalescing, and
//! the in-place reallocation paths.
//!
//! ## Heap geometry
//!
//! ```text
//! base      base+12        base+28 = heap_start              heap_end
//! ├─ unused ┼─ prologue ───┼─ block ─┼─ block ─┼─ … ─────────┼ epilogue word
//! │ 12 B    │ 16 B, USED   │         managed blocks          │ USED, size 0
//! ```
//!
//! The prologue is a permanent 16-byte used block anchoring backwards
//! navigation; the epilogue is a permanent used header word at `heap_end`
//! anchoring forwards navigation. Starting the prologue 12 bytes above the
//! base keeps every payload on a 16-byte boundary (headers are 4 bytes, so
//! block addresses are ≡ 12 mod 16).
//!
//! Growing the heap relocates the epilogue word verbatim: its `prev_free`
//! bit describes the last real block, which the caller's subsequent
//! [`Block::make`] of the fresh block reads from the old location and then
//! corrects on the new one.

use core::cmp::min;
use core::ptr::{self, NonNull};

use heap_region::{HeapSource, RegionError};

use crate::free_list::FreeList;
use crate::tag::{ALIGNMENT, Block, BlockTag, MIN_BLOCK, WORD, block_size_for};

/// Failure to bootstrap a heap from its provider.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapInitError {
    /// The provider could not supply the prologue/epilogue bytes.
    #[error(transparent)]
    Region(#[from] RegionError),
}

/// A boundary-tag allocator over a growable region.
///
/// All state lives in the instance (and in-band in the managed memory);
/// there are no hidden globals, so independent heaps can coexist. The
/// instance is single-threaded by design; wrap it in a lock to share it,
/// as the process-wide facade in [`crate::global`] does.
#[derive(Debug)]
pub struct Heap<S> {
    source: S,
    /// Region base; free-list links are offsets against this.
    base: usize,
    /// Address of the first managed block.
    heap_start: usize,
    /// One past the last managed byte; the epilogue word lives here.
    heap_end: usize,
    list: FreeList,
}

impl<S: HeapSource> Heap<S> {
    /// Bootstrap a heap: take 32 bytes from `source` for the prologue block
    /// and the epilogue word.
    ///
    /// # Errors
    /// [`HeapInitError`] when the provider cannot supply the initial bytes.
    pub fn init(mut source: S) -> Result<Self, HeapInitError> {
        let grant = source.extend(2 * ALIGNMENT)?;
        let base = grant.as_ptr() as usize;
        debug_assert!(base % ALIGNMENT == 0, "provider broke the alignment contract");

        let heap_end = base + 7 * WORD;
        // Safety: the provider granted [base, base + 32); prologue header at
        // base + 12 and epilogue word at base + 28 both lie inside it.
        unsafe {
            Block::at(base + 3 * WORD).set_word(BlockTag::used_block(ALIGNMENT));
            Block::at(heap_end).set_word(BlockTag::used_block(0));
        }

        Ok(Self {
            source,
            base,
            heap_start: heap_end,
            heap_end,
            list: FreeList::new(base),
        })
    }

    /// Address of the first managed block.
    #[must_use]
    pub const fn heap_start(&self) -> usize {
        self.heap_start
    }

    /// One past the last managed byte (the epilogue word's address).
    #[must_use]
    pub const fn heap_end(&self) -> usize {
        self.heap_end
    }

    /// Total bytes in managed blocks.
    #[must_use]
    pub const fn managed_bytes(&self) -> usize {
        self.heap_end - self.heap_start
    }

    /// Number of blocks currently in the free list.
    #[must_use]
    pub fn free_list_len(&self) -> usize {
        let mut len = 0;
        let mut cursor = self.list.head();
        while let Some(block) = cursor {
            len += 1;
            // Safety: list members are live free blocks.
            cursor = unsafe { self.list.next_of(block) };
        }
        len
    }

    /// Total bytes sitting in free blocks.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        let mut total = 0;
        let mut cursor = self.list.head();
        while let Some(block) = cursor {
            // Safety: list members are live free blocks.
            unsafe {
                total += block.size();
                cursor = self.list.next_of(block);
            }
        }
        total
    }

    /// Size of the largest free block, or 0 when the list is empty.
    #[must_use]
    pub fn largest_free_block(&self) -> usize {
        let mut largest = 0;
        let mut cursor = self.list.head();
        while let Some(block) = cursor {
            // Safety: list members are live free blocks.
            unsafe {
                largest = largest.max(block.size());
                cursor = self.list.next_of(block);
            }
        }
        largest
    }

    /// Allocate `size` payload bytes.
    ///
    /// Returns a 16-byte aligned pointer, or `None` when `size` is zero or
    /// the provider refuses to grow the heap (the heap is left unchanged).
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let want = block_size_for(size);

        let block = if let Some(found) = self.best_fit(want) {
            // Safety: `found` is a member of the free list, so it is a live
            // free block large enough for `want`.
            unsafe {
                let avail = found.size();
                let prev_free = found.prev_is_free();
                self.list.remove(found);
                self.place_used(found, avail, want, prev_free);
            }
            found
        } else {
            let fresh = self.morecore(want)?;
            // Safety: the fresh block starts at the old epilogue word, whose
            // `prev_free` bit still describes the last real block.
            unsafe {
                let prev_free = fresh.prev_is_free();
                fresh.make(BlockTag::used_block(want).with_prev_free(prev_free), self.heap_end);
            }
            fresh
        };

        NonNull::new(block.payload())
    }

    /// Release a block obtained from this heap.
    ///
    /// A null `ptr` is a no-op.
    ///
    /// # Safety
    /// `ptr` must be null or a pointer previously returned by this heap's
    /// [`allocate`](Self::allocate), [`realloc`](Self::realloc) or
    /// [`calloc`](Self::calloc) and not freed since.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        // Safety: a live payload pointer names a used block of this heap.
        unsafe {
            let block = Block::from_payload(ptr);
            debug_assert!(block.is_used(), "freeing a free block");
            let tag = BlockTag::free_block(block.size()).with_prev_free(block.prev_is_free());
            block.make(tag, self.heap_end);
            self.coalesce(block);
        }
    }

    /// Resize a block, in place where the neighborhood allows it.
    ///
    /// `realloc(null, n)` allocates; `realloc(p, 0)` frees and returns
    /// `None`. On out-of-memory `None` is returned and the original block
    /// is left untouched and still owned by the caller.
    ///
    /// # Safety
    /// Same contract as [`free`](Self::free) for non-null `ptr`.
    pub unsafe fn realloc(&mut self, ptr: *mut u8, size: usize) -> Option<NonNull<u8>> {
        if ptr.is_null() {
            return self.allocate(size);
        }
        if size == 0 {
            // Safety: forwarded caller contract.
            unsafe { self.free(ptr) };
            return None;
        }

        // Safety: a live payload pointer names a used block of this heap.
        unsafe {
            let block = Block::from_payload(ptr);
            let have = block.size();
            let want = block_size_for(size);
            let prev_free = block.prev_is_free();

            // shrink (or keep): carve a free tail off when it is big enough
            if want <= have {
                self.place_used(block, have, want, prev_free);
                return NonNull::new(ptr);
            }

            // last block before the epilogue: extend the heap in place
            if block.addr() + have == self.heap_end {
                self.morecore(want - have)?;
                block.make(BlockTag::used_block(want).with_prev_free(prev_free), self.heap_end);
                return NonNull::new(ptr);
            }

            let next = Block::at(block.addr() + have);
            let next_free = next.is_free();
            let old_payload = have - WORD;

            // absorb both neighbors, moving the payload down into `prev`
            if prev_free && next_free {
                let prev = block.prev();
                let combined = prev.size() + have + next.size();
                if combined >= want {
                    debug_assert!(!prev.prev_is_free(), "adjacent free blocks");
                    self.list.remove(next);
                    self.list.remove(prev);
                    // overlapping forward copy: destination sits below source
                    ptr::copy(ptr, prev.payload(), min(size, old_payload));
                    self.place_used(prev, combined, want, false);
                    return NonNull::new(prev.payload());
                }
            }

            // absorb the left neighbor
            if prev_free {
                let prev = block.prev();
                let combined = prev.size() + have;
                if combined >= want {
                    debug_assert!(!prev.prev_is_free(), "adjacent free blocks");
                    self.list.remove(prev);
                    ptr::copy(ptr, prev.payload(), min(size, old_payload));
                    self.place_used(prev, combined, want, false);
                    return NonNull::new(prev.payload());
                }
            }

            // absorb the right neighbor; the block stays put, so the payload
            // needs no copy
            if next_free {
                let combined = have + next.size();
                if combined >= want {
                    self.list.remove(next);
                    self.place_used(block, combined, want, prev_free);
                    return NonNull::new(ptr);
                }
            }

            // no room around the block: move it
            log::trace!("realloc moving {have}-byte block for a {want}-byte request");
            let moved = self.allocate(size)?;
            ptr::copy_nonoverlapping(ptr.cast_const(), moved.as_ptr(), min(size, old_payload));
            // Safety: forwarded caller contract.
            self.free(ptr);
            Some(moved)
        }
    }

    /// Allocate a zero-filled array of `nmemb` elements of `size` bytes.
    ///
    /// Returns `None` when the total overflows or allocation fails.
    pub fn calloc(&mut self, nmemb: usize, size: usize) -> Option<NonNull<u8>> {
        let total = nmemb.checked_mul(size)?;
        let payload = self.allocate(total)?;
        // Safety: the new block holds at least `total` payload bytes.
        unsafe { ptr::write_bytes(payload.as_ptr(), 0, total) };
        Some(payload)
    }

    /// Best-fit scan: the smallest free block holding `want` bytes, ties
    /// broken by list (LIFO) order.
    fn best_fit(&self, want: usize) -> Option<Block> {
        let mut best: Option<(Block, usize)> = None;
        let mut cursor = self.list.head();
        while let Some(block) = cursor {
            // Safety: list members are live free blocks.
            unsafe {
                let size = block.size();
                if size >= want && best.is_none_or(|(_, best_size)| size < best_size) {
                    best = Some((block, size));
                }
                cursor = self.list.next_of(block);
            }
        }
        best.map(|(block, _)| block)
    }

    /// Write `block` as a used block of `want` bytes out of `avail`
    /// available, splitting off a coalesced free tail when the remainder can
    /// stand on its own.
    ///
    /// # Safety
    /// `[block, block + avail)` must be exclusively owned by the caller (not
    /// in the free list), with `want <= avail`.
    unsafe fn place_used(&mut self, block: Block, avail: usize, want: usize, prev_free: bool) {
        debug_assert!(want <= avail);
        // Safety: forwarded caller contract.
        unsafe {
            if avail - want >= MIN_BLOCK {
                block.make(BlockTag::used_block(want).with_prev_free(prev_free), self.heap_end);
                let tail = Block::at(block.addr() + want);
                tail.make(BlockTag::free_block(avail - want), self.heap_end);
                self.coalesce(tail);
            } else {
                block.make(BlockTag::used_block(avail).with_prev_free(prev_free), self.heap_end);
            }
        }
    }

    /// Merge a fresh free block with its free neighbors and enter the result
    /// into the free list. Returns the merged block.
    ///
    /// # Safety
    /// `block` must be a free block that is not in the free list; its
    /// neighbors' tags must be consistent (I1–I5 for the rest of the heap).
    unsafe fn coalesce(&mut self, block: Block) -> Block {
        // Safety: forwarded caller contract.
        unsafe {
            let prev_free = block.prev_is_free();
            // the epilogue word is permanently used, so it never merges
            let next_free = block.next(self.heap_end).filter(|next| next.is_free());

            match (prev_free, next_free) {
                (false, None) => {
                    self.list.push(block);
                    block
                }
                (false, Some(next)) => {
                    self.list.remove(next);
                    block.make(BlockTag::free_block(block.size() + next.size()), self.heap_end);
                    self.list.push(block);
                    block
                }
                (true, None) => {
                    let prev = block.prev();
                    debug_assert!(!prev.prev_is_free(), "adjacent free blocks");
                    self.list.remove(prev);
                    prev.make(BlockTag::free_block(prev.size() + block.size()), self.heap_end);
                    self.list.push(prev);
                    prev
                }
                (true, Some(next)) => {
                    let prev = block.prev();
                    debug_assert!(!prev.prev_is_free(), "adjacent free blocks");
                    self.list.remove(prev);
                    self.list.remove(next);
                    let merged = prev.size() + block.size() + next.size();
                    prev.make(BlockTag::free_block(merged), self.heap_end);
                    self.list.push(prev);
                    prev
                }
            }
        }
    }

    /// Grow the heap by `need` bytes and return the fresh block sitting at
    /// the old end. The epilogue word is relocated verbatim; the caller
    /// writes the fresh block's header (which fixes the relocated epilogue's
    /// `prev_free` bit).
    fn morecore(&mut self, need: usize) -> Option<Block> {
        debug_assert!(need > 0 && need % ALIGNMENT == 0);
        match self.source.extend(need) {
            Ok(grant) => {
                debug_assert_eq!(grant.as_ptr() as usize, self.heap_end);
                let old_end = self.heap_end;
                // Safety: the grant extends the region past the epilogue.
                unsafe {
                    let epilogue = Block::at(old_end).tag();
                    self.heap_end = old_end + need;
                    Block::at(self.heap_end).set_word(epilogue);
                }
                log::debug!("heap grown by {need} bytes to {:#x}", self.heap_end);
                Some(Block::at(old_end))
            }
            Err(err) => {
                log::debug!("heap growth refused: {err}");
                None
            }
        }
    }

    /// Validate the heap and, with `verbose`, log every block.
    ///
    /// Walks the blocks and the free list and asserts the structural
    /// invariants: exact coverage from `heap_start` to the epilogue, aligned
    /// sizes, header/footer agreement on free blocks, accurate `prev_free`
    /// flags, no adjacent free blocks, and a free list that is doubly
    /// consistent and in bijection with the free blocks of the walk.
    ///
    /// # Panics
    /// Panics when any invariant is violated; a corrupted heap must not
    /// keep serving requests.
    pub fn check(&self, verbose: bool) {
        let mut addr = self.heap_start;
        let mut prev_was_free = false;
        let mut walk_free_blocks = 0_usize;

        while addr < self.heap_end {
            let block = Block::at(addr);
            // Safety: the walk visits exactly the managed blocks; sizes are
            // validated before they are used to advance.
            unsafe {
                let tag = block.tag();
                let size = tag.size();
                assert!(
                    size >= MIN_BLOCK && size % ALIGNMENT == 0,
                    "bad block size {size} at {addr:#x}"
                );
                assert!(addr + size <= self.heap_end, "block at {addr:#x} overruns the heap");
                assert_eq!((block.payload() as usize) % ALIGNMENT, 0, "misaligned payload");
                assert_eq!(tag.prev_free(), prev_was_free, "stale prev-free flag at {addr:#x}");
                if tag.is_free() {
                    assert!(!prev_was_free, "adjacent free blocks at {addr:#x}");
                    assert_eq!(
                        block.footer().read(),
                        tag.into_bits(),
                        "header/footer mismatch at {addr:#x}"
                    );
                    walk_free_blocks += 1;
                }
                if verbose {
                    log::debug!(
                        "block {addr:#x}: size {size}, {}{}",
                        if tag.is_free() { "free" } else { "used" },
                        if tag.prev_free() { ", prev-free" } else { "" }
                    );
                }
                prev_was_free = tag.is_free();
            }
            // Safety: size validated above.
            addr += unsafe { block.size() };
        }
        assert_eq!(addr, self.heap_end, "block walk missed the epilogue");

        // Safety: the epilogue word is always present at heap_end.
        unsafe {
            let epilogue = Block::at(self.heap_end).tag();
            assert!(epilogue.used() && epilogue.size() == 0, "corrupt epilogue");
            assert_eq!(epilogue.prev_free(), prev_was_free, "stale epilogue prev-free flag");
        }

        // forward traversal: all members free, back-links mirror forward links
        let mut forward = 0_usize;
        let mut cursor = self.list.head();
        let mut last = None;
        while let Some(block) = cursor {
            // Safety: list membership is being validated block by block.
            unsafe {
                assert!(
                    block.addr() >= self.heap_start && block.addr() < self.heap_end,
                    "free-list entry outside the heap"
                );
                assert!(block.is_free(), "used block in the free list");
                assert_eq!(self.list.prev_of(block), last, "broken back-link");
                forward += 1;
                last = Some(block);
                cursor = self.list.next_of(block);
            }
        }
        assert_eq!(last, self.list.tail(), "tail does not terminate the list");

        let mut backward = 0_usize;
        let mut cursor = self.list.tail();
        while let Some(block) = cursor {
            backward += 1;
            // Safety: membership was validated by the forward pass.
            cursor = unsafe { self.list.prev_of(block) };
        }

        assert_eq!(forward, backward, "forward/backward list length mismatch");
        assert_eq!(forward, walk_free_blocks, "free list out of sync with the heap");

        if verbose {
            log::debug!(
                "heap check ok: {} managed bytes, {walk_free_blocks} free blocks",
                self.managed_bytes()
            );
        }
    }
}
