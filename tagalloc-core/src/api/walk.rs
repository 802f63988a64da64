//! Walk
//!
//! Read-only views over the blocks of a Heap, for diagnostics and tests.

use core::{iter::FromIterator, ptr::NonNull};

use crate::Arena;
use crate::internals::{FreeSpace, region::Region};

use super::heap::Engine;

/// Description of a single block of the heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Pointer to the payload of the block.
    pub payload: NonNull<u8>,
    /// Capacity of the payload, in bytes.
    pub size: usize,
    /// Whether the block is currently handed out.
    pub allocated: bool,
}

/// Iterator over the blocks of a heap, in address order.
///
/// The walk trusts the in-band metadata: on a corrupted heap, use `Heap::check_heap` first.
pub struct Blocks<'a, A> {
    engine: &'a Engine,
    region: &'a Region<A>,
    cursor: Option<usize>,
}

impl<'a, A> Blocks<'a, A> {
    /// Creates an instance, starting the walk at `cursor`.
    pub(crate) fn new(engine: &'a Engine, region: &'a Region<A>, cursor: Option<usize>) -> Self {
        Self { engine, region, cursor }
    }
}

impl<'a, A> Iterator for Blocks<'a, A>
    where
        A: Arena,
{
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        let block = self.cursor?;

        //  Safety:
        //  -   `block` was obtained from `first_block` or `next_block`, and the heap is borrowed immutably meanwhile.
        let (raw, next) = unsafe {
            (self.engine.describe(self.region, block), self.engine.next_block(self.region, block))
        };

        self.cursor = next;

        //  Safety:
        //  -   The payload of a block lies within the region.
        let payload = unsafe { self.region.pointer(raw.payload) };

        Some(BlockInfo { payload, size: raw.size, allocated: raw.allocated })
    }
}

/// Summary of the occupancy of a heap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStatistics {
    /// Number of blocks.
    pub blocks: usize,
    /// Number of allocated blocks.
    pub allocated_blocks: usize,
    /// Number of free blocks.
    pub free_blocks: usize,
    /// Sum of the payload capacities of the allocated blocks.
    pub allocated_bytes: usize,
    /// Sum of the payload capacities of the free blocks.
    pub free_bytes: usize,
    /// Payload capacity of the largest free block, 0 if none.
    pub largest_free: usize,
}

impl HeapStatistics {
    /// Accounts for `block`.
    pub fn record(&mut self, block: &BlockInfo) {
        self.blocks += 1;

        if block.allocated {
            self.allocated_blocks += 1;
            self.allocated_bytes += block.size;
        } else {
            self.free_blocks += 1;
            self.free_bytes += block.size;
            self.largest_free = self.largest_free.max(block.size);
        }
    }
}

impl FromIterator<BlockInfo> for HeapStatistics {
    fn from_iter<I>(iter: I) -> Self
        where
            I: IntoIterator<Item = BlockInfo>,
    {
        let mut result = HeapStatistics::default();

        for block in iter {
            result.record(&block);
        }

        result
    }
}

#[cfg(test)]
mod tests {

use super::*;

#[test]
fn heap_statistics_collect() {
    let payload = NonNull::dangling();

    let blocks = vec!(
        BlockInfo { payload, size: 32, allocated: true },
        BlockInfo { payload, size: 64, allocated: false },
        BlockInfo { payload, size: 16, allocated: true },
        BlockInfo { payload, size: 48, allocated: false },
    );

    let statistics: HeapStatistics = blocks.into_iter().collect();

    assert_eq!(
        HeapStatistics {
            blocks: 4,
            allocated_blocks: 2,
            free_blocks: 2,
            allocated_bytes: 48,
            free_bytes: 112,
            largest_free: 64,
        },
        statistics
    );
}

#[test]
fn heap_statistics_empty() {
    let statistics: HeapStatistics = core::iter::empty().collect();

    assert_eq!(HeapStatistics::default(), statistics);
}

}
