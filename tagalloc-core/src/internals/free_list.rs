//! Free List
//!
//! A doubly-linked list of the free blocks of a heap, bounded by two sentinel nodes.
//!
//! Nodes are never constructed: a node is the first two words of a free block's payload, and is referred to by its
//! offset within the region. Links are offsets too. The sentinels live in the region, ahead of the first block, and are
//! never part of the sequence of blocks.
//!
//! Only `push` and `remove` modify links once the list is initialized.

use crate::{
    Arena,
    HeapError,
    utils::WORD_SIZE,
};

use super::region::Region;

/// The number of bytes occupied by a node.
pub(crate) const NODE_SIZE: usize = 2 * WORD_SIZE;

//  Offsets of the links within a node.
const PREV: usize = 0;
const NEXT: usize = WORD_SIZE;

//  The link of a sentinel pointing outside the list.
const NIL: usize = usize::MAX;

/// FreeList.
#[derive(Debug, Default)]
pub(crate) struct FreeList {
    first: usize,
    last: usize,
}

impl FreeList {
    /// Creates an empty list, whose sentinels are laid out at `first` and `last`.
    ///
    /// #   Safety
    ///
    /// -   Assumes `[first, first + NODE_SIZE)` and `[last, last + NODE_SIZE)` are within the region, and reserved.
    pub(crate) unsafe fn initialize<A>(region: &mut Region<A>, first: usize, last: usize) -> Self {
        region.set_word(first + PREV, NIL);
        region.set_word(first + NEXT, last);
        region.set_word(last + PREV, first);
        region.set_word(last + NEXT, NIL);

        Self { first, last }
    }

    /// Returns whether the list is empty.
    ///
    /// #   Safety
    ///
    /// -   Assumes the list was initialized in this region.
    #[cfg(test)]
    pub(crate) unsafe fn is_empty<A>(&self, region: &Region<A>) -> bool {
        region.word(self.first + NEXT) == self.last
    }

    /// Returns the most recently pushed node, if any.
    ///
    /// #   Safety
    ///
    /// -   Assumes the list was initialized in this region.
    pub(crate) unsafe fn newest<A>(&self, region: &Region<A>) -> Option<usize> {
        let node = region.word(self.last + PREV);

        Some(node).filter(|&node| node != self.first)
    }

    /// Returns the node pushed just before `node`, if any.
    ///
    /// #   Safety
    ///
    /// -   Assumes `node` is linked in this list.
    pub(crate) unsafe fn older<A>(&self, region: &Region<A>, node: usize) -> Option<usize> {
        let node = region.word(node + PREV);

        Some(node).filter(|&node| node != self.first)
    }

    /// Links `node` as the newest node of the list.
    ///
    /// #   Safety
    ///
    /// -   Assumes `node` is the payload of a free block, of at least `NODE_SIZE` bytes.
    /// -   Assumes `node` is not already linked.
    pub(crate) unsafe fn push<A>(&self, region: &mut Region<A>, node: usize) {
        let prev = region.word(self.last + PREV);

        region.set_word(node + PREV, prev);
        region.set_word(node + NEXT, self.last);
        region.set_word(prev + NEXT, node);
        region.set_word(self.last + PREV, node);
    }

    /// Unlinks `node` from the list.
    ///
    /// #   Safety
    ///
    /// -   Assumes `node` is linked in this list, and is not a sentinel.
    pub(crate) unsafe fn remove<A>(&self, region: &mut Region<A>, node: usize) {
        debug_assert!(node != self.first && node != self.last, "Cannot remove sentinel {:#x}", node);

        let prev = region.word(node + PREV);
        let next = region.word(node + NEXT);

        region.set_word(prev + NEXT, next);
        region.set_word(next + PREV, prev);
    }

    /// Verifies the links of the list.
    ///
    /// A valid node lies within `[lowest, region.len())`, is accepted by `is_free`, and is mirrored by the node it
    /// points back to. The walk stops as soon as more than `free_blocks` nodes were seen.
    pub(crate) fn check<A, F>(&self, region: &Region<A>, lowest: usize, free_blocks: usize, is_free: F)
        -> Result<(), HeapError>
        where
            A: Arena,
            F: Fn(usize) -> bool,
    {
        let heap_size = region.len();

        let mut listed = 0;
        let mut previous = self.first;

        //  Safety:
        //  -   The sentinels were laid out within the region.
        let mut node = unsafe { region.word(self.first + NEXT) };

        while node != self.last {
            let in_bounds = node >= lowest
                && node % WORD_SIZE == 0
                && node.checked_add(NODE_SIZE).map_or(false, |end| end <= heap_size);

            if !in_bounds {
                return Err(HeapError::BrokenLink { node: previous });
            }

            //  Safety:
            //  -   `[node, node + NODE_SIZE)` is within the region, as checked above.
            if !is_free(node) || unsafe { region.word(node + PREV) } != previous {
                return Err(HeapError::BrokenLink { node });
            }

            listed += 1;

            if listed > free_blocks {
                return Err(HeapError::UnlistedFree { free_blocks, listed });
            }

            previous = node;

            //  Safety:
            //  -   `[node, node + NODE_SIZE)` is within the region, as checked above.
            node = unsafe { region.word(node + NEXT) };
        }

        //  Safety:
        //  -   The sentinels were laid out within the region.
        if unsafe { region.word(self.last + PREV) } != previous {
            return Err(HeapError::BrokenLink { node: self.last });
        }

        if listed != free_blocks {
            return Err(HeapError::UnlistedFree { free_blocks, listed });
        }

        Ok(())
    }
}

// mod tests
