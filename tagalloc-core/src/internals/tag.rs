//! Tag
//!
//! A Tag is the in-band metadata word describing a block: its size, and whether it is allocated.
//!
//! Sizes are always multiples of `ALIGNMENT`, hence the low bit of the size is always 0, and is used to store the
//! allocation state.

use crate::utils::ALIGNMENT;

use super::region::Region;

/// Tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Tag(usize);

impl Tag {
    /// The zero-sized allocated tag, bounding the heap in the explicit strategy.
    pub(crate) const SENTINEL: Tag = Tag::new(0, true);

    const ALLOCATED: usize = 1;

    /// Creates a Tag.
    pub(crate) const fn new(size: usize, allocated: bool) -> Self {
        //  The low bit of `size` must be free.
        Self(size | allocated as usize)
    }

    /// Reinterprets a raw word as a Tag.
    pub(crate) const fn from_word(word: usize) -> Self { Self(word) }

    /// Returns the raw word.
    pub(crate) const fn word(&self) -> usize { self.0 }

    /// Returns the size of the block.
    pub(crate) const fn size(&self) -> usize { self.0 & !Self::ALLOCATED }

    /// Returns whether the block is allocated.
    pub(crate) const fn is_allocated(&self) -> bool { self.0 & Self::ALLOCATED != 0 }

    /// Returns whether the size is a non-zero multiple of `ALIGNMENT`.
    pub(crate) fn is_well_sized(&self) -> bool { self.size() != 0 && self.size() % ALIGNMENT == 0 }
}

impl<A> Region<A> {
    /// Reads the tag at `offset`.
    ///
    /// #   Safety
    ///
    /// -   As per `Region::word`.
    pub(crate) unsafe fn tag(&self, offset: usize) -> Tag { Tag::from_word(self.word(offset)) }

    /// Writes `size` and `allocated` as a tag at `offset`.
    ///
    /// #   Safety
    ///
    /// -   As per `Region::set_word`.
    pub(crate) unsafe fn set_tag(&mut self, offset: usize, size: usize, allocated: bool) {
        debug_assert!(size % ALIGNMENT == 0, "{} is not a multiple of {}", size, ALIGNMENT.value());

        self.set_word(offset, Tag::new(size, allocated).word());
    }
}

// mod tests
