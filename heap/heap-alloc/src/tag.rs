//! # Boundary Tags
//!
//! Every block starts with one [`BlockTag`] word. Because block sizes are
//! multiples of [`ALIGNMENT`], the low four bits of the size are always zero
//! and the raw word is exactly `size | flags`:
//!
//! ```text
//! 31                                4   3   2   1   0
//! ├───────────── size / 16 ─────────┼─ 0 ─┼─ 0 ─┼ PF ┼ U ┤
//! ```
//!
//! - `U` (bit 0): the block is allocated.
//! - `PF` (bit 1): the **physically preceding** block is free. Carrying this
//!   bit in the successor is what lets used blocks drop their footer word;
//!   a block can answer "is my predecessor free?" from its own header.
//!
//! Free blocks duplicate the tag in a footer word at `size - 4` so that the
//! successor can navigate backwards, and thread their free-list links
//! through the first two payload words.
//!
//! [`Block`] wraps a header address with the O(1) tag operations. The one
//! rule that keeps the optimized layout consistent: the successor's `PF` bit
//! is written by [`Block::make`] and by nothing else.

use bitfield_struct::bitfield;

/// Width of a metadata word in bytes.
pub(crate) const WORD: usize = 4;

/// Block sizes and payload addresses are multiples of this.
pub const ALIGNMENT: usize = 16;

/// Smallest representable block: header + two link words + footer.
pub(crate) const MIN_BLOCK: usize = 16;

/// Round `size` up to the block alignment.
pub(crate) const fn align_up(size: usize) -> usize {
    (size + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Block size needed to serve a payload of `payload` bytes.
pub(crate) const fn block_size_for(payload: usize) -> usize {
    align_up(payload + WORD)
}

/// A boundary-tag header/footer word.
#[bitfield(u32)]
pub(crate) struct BlockTag {
    /// The block is allocated.
    pub used: bool,
    /// The physically preceding block is free.
    pub prev_free: bool,
    /// Always zero: block sizes are 16-byte aligned.
    #[bits(2)]
    __zero: u8,
    /// Block size in 16-byte units.
    #[bits(28)]
    size_units: u32,
}

impl BlockTag {
    /// Tag for a used block of `size` bytes (no `prev_free`).
    pub(crate) const fn used_block(size: usize) -> Self {
        Self::new().with_used(true).with_size(size)
    }

    /// Tag for a free block of `size` bytes (no `prev_free`).
    pub(crate) const fn free_block(size: usize) -> Self {
        Self::new().with_size(size)
    }

    /// Block size in bytes.
    pub(crate) const fn size(self) -> usize {
        (self.size_units() as usize) << 4
    }

    /// Replace the size, which must be 16-byte aligned.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn with_size(self, size: usize) -> Self {
        debug_assert!(size % ALIGNMENT == 0, "unaligned block size");
        self.with_size_units((size >> 4) as u32)
    }

    pub(crate) const fn is_free(self) -> bool {
        !self.used()
    }
}

/// A block, identified by the address of its header word.
///
/// All accessors are `unsafe`: a `Block` is nothing but an address, and the
/// caller asserts that it names a live header inside the managed heap.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) struct Block(usize);

impl Block {
    pub(crate) const fn at(addr: usize) -> Self {
        Self(addr)
    }

    pub(crate) const fn addr(self) -> usize {
        self.0
    }

    const fn word(self) -> *mut u32 {
        self.0 as *mut u32
    }

    /// Read the header word.
    ///
    /// # Safety
    /// `self` must name a live header (or the epilogue word).
    pub(crate) unsafe fn tag(self) -> BlockTag {
        BlockTag::from_bits(unsafe { self.word().read() })
    }

    /// Write the header word only, without touching footer or successor.
    ///
    /// Reserved for bootstrapping the prologue and epilogue; everything else
    /// goes through [`Block::make`].
    ///
    /// # Safety
    /// `self` must name writable heap memory.
    pub(crate) unsafe fn set_word(self, tag: BlockTag) {
        unsafe { self.word().write(tag.into_bits()) }
    }

    /// # Safety
    /// See [`Block::tag`].
    pub(crate) unsafe fn size(self) -> usize {
        unsafe { self.tag() }.size()
    }

    /// # Safety
    /// See [`Block::tag`].
    pub(crate) unsafe fn is_used(self) -> bool {
        unsafe { self.tag() }.used()
    }

    /// # Safety
    /// See [`Block::tag`].
    pub(crate) unsafe fn is_free(self) -> bool {
        unsafe { self.tag() }.is_free()
    }

    /// # Safety
    /// See [`Block::tag`].
    pub(crate) unsafe fn prev_is_free(self) -> bool {
        unsafe { self.tag() }.prev_free()
    }

    /// Address of the footer word. Meaningful only while the block is free.
    ///
    /// # Safety
    /// See [`Block::tag`].
    pub(crate) unsafe fn footer(self) -> *mut u32 {
        (self.0 + unsafe { self.size() } - WORD) as *mut u32
    }

    /// First payload byte.
    pub(crate) const fn payload(self) -> *mut u8 {
        (self.0 + WORD) as *mut u8
    }

    /// Recover the block from a payload pointer handed out earlier.
    pub(crate) fn from_payload(ptr: *const u8) -> Self {
        Self(ptr as usize - WORD)
    }

    /// The physically next block, or `None` past the end of the heap.
    ///
    /// The epilogue word at `heap_end` is returned like a block; it has
    /// size zero and is permanently marked used.
    ///
    /// # Safety
    /// See [`Block::tag`].
    pub(crate) unsafe fn next(self, heap_end: usize) -> Option<Self> {
        let next = self.0 + unsafe { self.size() };
        (next <= heap_end).then_some(Self(next))
    }

    /// The physically preceding block, located through its footer.
    ///
    /// # Safety
    /// The predecessor must be free (`prev_is_free`), otherwise it has no
    /// footer and the word below `self` is payload.
    pub(crate) unsafe fn prev(self) -> Self {
        debug_assert!(unsafe { self.prev_is_free() });
        let footer = BlockTag::from_bits(unsafe { ((self.0 - WORD) as *const u32).read() });
        Self(self.0 - footer.size())
    }

    /// Write the block's tags and fix up the successor.
    ///
    /// Writes the header; for a free block additionally duplicates the tag
    /// into the footer. The successor's `prev_free` bit is then set to this
    /// block's freeness. `make` owns that bit exclusively; callers never
    /// touch it directly.
    ///
    /// # Safety
    /// `[self, self + tag.size())` must lie within the managed heap, with
    /// the epilogue word intact at `heap_end`.
    pub(crate) unsafe fn make(self, tag: BlockTag, heap_end: usize) {
        unsafe {
            self.set_word(tag);
            if tag.is_free() {
                self.footer().write(tag.into_bits());
            }
            if let Some(next) = self.next(heap_end) {
                next.set_word(next.tag().with_prev_free(tag.is_free()));
            }
        }
    }
}
