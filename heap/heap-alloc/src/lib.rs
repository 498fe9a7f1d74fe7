//! # Boundary-Tag Heap Allocator
//!
//! A general-purpose dynamic allocator serving the classic
//! allocate/free/realloc/calloc contract from a single, contiguous,
//! monotonically-growable region obtained through an sbrk-style provider
//! ([`heap_region::HeapSource`]).
//!
//! ## Architecture Overview
//!
//! The allocator is built from three layers, leaves first:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Policy ([`Heap`])                   │
//! │    • Best-fit search, splitting, coalescing         │
//! │    • In-place realloc across free neighbors         │
//! │    • Heap growth (morecore)                         │
//! └──────────────┬───────────────────┬──────────────────┘
//!                │                   │
//! ┌──────────────▼──────────┐ ┌──────▼──────────────────┐
//! │ Free list               │ │ Boundary tags           │
//! │ • doubly-linked, LIFO   │ │ • one u32 header word   │
//! │ • threaded through      │ │ • footer on free blocks │
//! │   free-block payloads   │ │   only (footer elision) │
//! │ • 32-bit offset links   │ │ • neighbor navigation   │
//! └─────────────────────────┘ └─────────────────────────┘
//! ```
//!
//! ## Block format
//!
//! Each block starts with a 4-byte tag holding the size (a multiple of 16)
//! and two flag bits: *used* and *prev-free*. Used blocks carry **no
//! footer**: their successor learns "is my predecessor free?" from its own
//! *prev-free* bit, which reclaims 4 bytes per allocation. Free blocks
//! duplicate the tag in a footer and thread two 32-bit list links through
//! their payload, which bounds the minimum block size at 16 bytes.
//!
//! ## Structural invariants
//!
//! Between public calls the heap satisfies, and [`Heap::check`] asserts:
//!
//! 1. The block walk from `heap_start` covers the heap exactly and ends at
//!    the epilogue word.
//! 2. Free blocks have identical header and footer.
//! 3. A block's *prev-free* flag mirrors its physical predecessor's state.
//! 4. No two adjacent blocks are free (coalescing is eager).
//! 5. The free list is doubly consistent and contains exactly the free
//!    blocks.
//! 6. Sizes are ≥ 16 and 16-byte aligned; payloads are 16-byte aligned.
//!
//! ## Concurrency
//!
//! A [`Heap`] instance is single-threaded; callers serialize access. The
//! [`global`] facade wraps one instance in a spinlock and adapts it to
//! [`core::alloc::GlobalAlloc`].
//!
//! ## Usage
//!
//! ```rust
//! use heap_alloc::Heap;
//! use heap_region::HeapStorage;
//!
//! let mut storage = Box::new(HeapStorage::<4096>::new());
//! let mut heap = Heap::init(unsafe { storage.as_region() }).unwrap();
//!
//! let p = heap.allocate(100).unwrap();
//! let p = unsafe { heap.realloc(p.as_ptr(), 200) }.unwrap();
//! unsafe { heap.free(p.as_ptr()) };
//!
//! heap.check(false);
//! assert_eq!(heap.free_list_len(), 1);
//! ```
//!
//! ## Limits
//!
//! - Payload alignment is exactly 16 bytes; larger alignments are refused.
//! - The heap only grows; memory is never returned to the provider.
//! - One arena per instance; no size classes, no thread caches.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod free_list;
pub mod global;
mod heap;
mod tag;

pub use global::GlobalHeap;
pub use heap::{Heap, HeapInitError};
pub use tag::ALIGNMENT;
