//! The internals of tagalloc-core.
//!
//! The internals provide all the heavy-lifting: the layout of the blocks in memory, and the two strategies used to
//! track and reclaim free space.

pub(crate) mod explicit;
pub(crate) mod free_list;
pub(crate) mod implicit;
pub(crate) mod region;
pub(crate) mod tag;


use crate::{Arena, HeapError};

use region::Region;

/// Description of a block, as seen by a walk over the heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RawBlock {
    /// Offset of the payload.
    pub(crate) payload: usize,
    /// Capacity of the payload, in bytes.
    pub(crate) size: usize,
    /// Whether the block is allocated.
    pub(crate) allocated: bool,
}

/// FreeSpace
///
/// The interface shared by the strategies tracking which blocks are free.
///
/// All offsets designate payloads, except for `block` arguments, which designate blocks as returned by the walk.
pub(crate) trait FreeSpace {
    /// Lays out an empty heap at the current high-water mark of the region's arena.
    fn initialize<A: Arena>(&mut self, region: &mut Region<A>) -> Option<()>;

    /// Allocates a block with a payload of at least `size` bytes, returning the offset of its payload.
    ///
    /// Returns None if the arena is exhausted, or if `size` is too large to be represented.
    fn allocate<A: Arena>(&mut self, region: &mut Region<A>, size: usize) -> Option<usize>;

    /// Releases the block owning `payload`.
    ///
    /// #   Safety
    ///
    /// -   Assumes `payload` was returned by `allocate`, and was not released since.
    unsafe fn deallocate<A: Arena>(&mut self, region: &mut Region<A>, payload: usize);

    /// Returns the capacity of the payload at `payload`.
    ///
    /// #   Safety
    ///
    /// -   Assumes `payload` was returned by `allocate`, and was not released since.
    unsafe fn capacity<A: Arena>(&self, region: &Region<A>, payload: usize) -> usize;

    /// Returns the first block of the heap, if any.
    fn first_block<A: Arena>(&self, region: &Region<A>) -> Option<usize>;

    /// Returns the block following `block`, if any.
    ///
    /// #   Safety
    ///
    /// -   Assumes `block` was obtained from `first_block` or `next_block`, and that the heap was not modified since.
    unsafe fn next_block<A: Arena>(&self, region: &Region<A>, block: usize) -> Option<usize>;

    /// Describes `block`.
    ///
    /// #   Safety
    ///
    /// -   As per `next_block`.
    unsafe fn describe<A: Arena>(&self, region: &Region<A>, block: usize) -> RawBlock;

    /// Verifies the consistency of the heap, reporting the first violation found.
    fn check<A: Arena>(&self, region: &Region<A>) -> Result<(), HeapError>;
}
