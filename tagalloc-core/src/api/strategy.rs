//! Strategy
//!
//! The strategy used by a Heap to track, and reclaim, free space.

use core::fmt;

/// Strategy.
///
/// Both strategies share the same guarantees; they differ in their trade-offs:
///
/// -   `Implicit` keeps a single header per block, and defers merging free blocks to a sweep over the whole heap at
///     the start of each allocation. Allocation is O(n) in the number of blocks, deallocation is O(1).
/// -   `Explicit` keeps boundary tags around each block and a list of the free blocks, merging eagerly on
///     deallocation. Allocation is O(n) in the number of free blocks, deallocation is O(1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Implicit list, with deferred coalescing and first-fit in address order.
    Implicit,
    /// Explicit LIFO free list, with eager boundary-tag coalescing.
    Explicit,
}

impl Default for Strategy {
    fn default() -> Self { Strategy::Explicit }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Implicit => write!(f, "implicit"),
            Strategy::Explicit => write!(f, "explicit"),
        }
    }
}
