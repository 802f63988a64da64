//! Region
//!
//! The Region is an offset-addressed window over the memory obtained from an Arena.
//!
//! The Region is anchored at the first `ALIGNMENT` boundary at or above the arena's high-water mark when a heap is
//! initialized; from then on, every block and every free-list node is referred to by its offset from that anchor, and
//! only the Region turns offsets into addresses.

use core::ptr::{self, NonNull};

use log::debug;

use crate::{Arena, utils::{ALIGNMENT, WORD_SIZE}};

/// Region.
pub(crate) struct Region<A> {
    arena: A,
    base: Option<NonNull<u8>>,
    len: usize,
}

//  Safety:
//  -   The region exclusively owns the memory its arena handed out, and `base` only ever points into it.
unsafe impl<A> Send for Region<A>
    where
        A: Send,
{}

impl<A> Region<A> {
    /// Creates an instance, not anchored yet.
    pub(crate) fn new(arena: A) -> Self { Self { arena, base: None, len: 0 } }

    /// Returns a reference to the arena.
    pub(crate) fn arena(&self) -> &A { &self.arena }

    /// Returns whether the region is anchored.
    pub(crate) fn is_anchored(&self) -> bool { self.base.is_some() }

    /// Returns the number of bytes obtained since anchoring.
    pub(crate) fn len(&self) -> usize { self.len }

    /// Returns the address of the byte at `offset`.
    ///
    /// `offset` may be equal to `self.len()`, pointing one past the end.
    pub(crate) fn address(&self, offset: usize) -> usize {
        debug_assert!(offset <= self.len, "{} > {}", offset, self.len);

        self.base.map(|base| base.as_ptr() as usize + offset).unwrap_or(0)
    }

    /// Returns the pointer to the byte at `offset`.
    ///
    /// #   Safety
    ///
    /// -   Assumes the region is anchored.
    /// -   Assumes `offset` is within the region, or one past its end.
    pub(crate) unsafe fn pointer(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset <= self.len, "{} > {}", offset, self.len);

        let base = self.anchor();

        //  Safety:
        //  -   `offset` is within the region, as per pre-condition, hence in bounds of the same allocation.
        //  -   The result is derived from a non-null pointer, without wrapping.
        NonNull::new_unchecked(base.as_ptr().add(offset))
    }

    /// Returns the offset of `pointer` within the region.
    ///
    /// #   Safety
    ///
    /// -   Assumes the region is anchored.
    /// -   Assumes `pointer` points within the region.
    pub(crate) unsafe fn offset_of(&self, pointer: NonNull<u8>) -> usize {
        let base = self.anchor().as_ptr() as usize;
        let address = pointer.as_ptr() as usize;

        debug_assert!(address >= base && address - base <= self.len,
            "{:x} not within [{:x}, {:x}]", address, base, base + self.len);

        address - base
    }

    /// Reads the word at `offset`.
    ///
    /// #   Safety
    ///
    /// -   Assumes the region is anchored.
    /// -   Assumes `[offset, offset + WORD_SIZE)` is within the region.
    /// -   Assumes `offset` is a multiple of `WORD_SIZE`.
    pub(crate) unsafe fn word(&self, offset: usize) -> usize {
        debug_assert!(offset + WORD_SIZE <= self.len, "{} + {} > {}", offset, WORD_SIZE, self.len);
        debug_assert!(offset % WORD_SIZE == 0, "{} not word-aligned", offset);

        //  Safety:
        //  -   In bounds, and aligned, as per pre-conditions, given that the anchor is aligned.
        #[allow(clippy::cast_ptr_alignment)]
        ptr::read(self.pointer(offset).as_ptr() as *const usize)
    }

    /// Overwrites the word at `offset`.
    ///
    /// #   Safety
    ///
    /// -   Assumes the region is anchored.
    /// -   Assumes `[offset, offset + WORD_SIZE)` is within the region, and not handed out to a client.
    /// -   Assumes `offset` is a multiple of `WORD_SIZE`.
    pub(crate) unsafe fn set_word(&mut self, offset: usize, value: usize) {
        debug_assert!(offset + WORD_SIZE <= self.len, "{} + {} > {}", offset, WORD_SIZE, self.len);
        debug_assert!(offset % WORD_SIZE == 0, "{} not word-aligned", offset);

        //  Safety:
        //  -   In bounds, and aligned, as per pre-conditions, given that the anchor is aligned.
        #[allow(clippy::cast_ptr_alignment)]
        ptr::write(self.pointer(offset).as_ptr() as *mut usize, value)
    }

    fn anchor(&self) -> NonNull<u8> {
        debug_assert!(self.base.is_some(), "Region not anchored");

        //  A dangling anchor is never dereferenced, as the region is then empty.
        self.base.unwrap_or_else(NonNull::dangling)
    }
}

impl<A> Region<A>
    where
        A: Arena,
{
    /// Anchors the region at the first `ALIGNMENT` boundary at or above the current high-water mark of the arena.
    ///
    /// Any memory previously obtained is forgotten. Returns None, and leaves the region untouched, if the arena cannot
    /// grow up to that boundary.
    pub(crate) fn reanchor(&mut self) -> Option<()> {
        let mark = self.arena.grow(0)?;
        let padding = ALIGNMENT.padding(mark.as_ptr() as usize);

        if padding > 0 {
            self.arena.grow(padding)?;
        }

        //  Safety:
        //  -   `mark + padding` is the high-water mark of the arena, hence non-null and within its memory.
        let base = unsafe { NonNull::new_unchecked(mark.as_ptr().add(padding)) };

        debug_assert!(base.as_ptr() as usize % ALIGNMENT == 0, "{:x} not aligned", base.as_ptr() as usize);

        self.base = Some(base);
        self.len = 0;

        debug!("reanchor: heap anchored at {:#x}", base.as_ptr() as usize);

        Some(())
    }

    /// Grows the region by `bytes`, returning the offset of the fresh space.
    ///
    /// Returns None, and leaves the region untouched, if the arena cannot grow.
    pub(crate) fn grow(&mut self, bytes: usize) -> Option<usize> {
        debug_assert!(self.is_anchored());

        let fresh = self.arena.grow(bytes)?;
        let offset = self.len;

        debug_assert_eq!(self.address(offset), fresh.as_ptr() as usize, "Arena is not contiguous");

        self.len += bytes;

        debug!("grow: {} bytes at {:#x}, heap now {} bytes", bytes, offset, self.len);

        Some(offset)
    }
}

// mod tests
