//! Allocator

use core::ptr::NonNull;

use tagalloc_core::{Blocks, Heap, HeapError, HeapStatistics, Strategy};

use crate::platform::MmapArena;

/// The default amount of address space reserved by a `TagAllocator`: 1 GB.
///
/// Only the pages actually handed out are ever committed.
pub const DEFAULT_CAPACITY: usize = 1024 * 1024 * 1024;

/// Boundary-Tag Allocator.
///
/// A Heap bound to a reserved range of virtual memory.
pub struct TagAllocator(Heap<MmapArena>);

impl TagAllocator {
    /// Creates an instance, reserving `DEFAULT_CAPACITY` bytes of address space.
    ///
    /// Returns None if the address space cannot be reserved.
    pub fn new(strategy: Strategy) -> Option<Self> { Self::with_capacity(strategy, DEFAULT_CAPACITY) }

    /// Creates an instance, reserving `capacity` bytes of address space.
    ///
    /// Returns None if the address space cannot be reserved.
    pub fn with_capacity(strategy: Strategy, capacity: usize) -> Option<Self> {
        MmapArena::reserve(capacity).map(|arena| Self(Heap::new(arena, strategy)))
    }

    /// Returns the strategy in use.
    pub fn strategy(&self) -> Strategy { self.0.strategy() }

    /// Returns the number of bytes of address space reserved.
    pub fn capacity(&self) -> usize { self.0.arena().capacity() }

    /// Returns the number of bytes of address space in use.
    pub fn heap_size(&self) -> usize { self.0.heap_size() }

    /// Prepares the heap for allocation, discarding any previous allocation.
    ///
    /// Calling this function is optional: the first allocation initializes the heap if need be.
    #[cold]
    pub fn initialize(&mut self) -> Result<(), HeapError> { self.0.initialize() }

    /// Allocates `size` bytes of memory, aligned on at least `ALIGNMENT`.
    ///
    /// Returns None if the reserved address space is exhausted.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> { self.0.allocate(size) }

    /// Allocates `count * size` bytes of zeroed memory, aligned on at least `ALIGNMENT`.
    ///
    /// Returns None on overflow, or if the reserved address space is exhausted.
    pub fn zero_allocate(&mut self, count: usize, size: usize) -> Option<NonNull<u8>> {
        self.0.zero_allocate(count, size)
    }

    /// Deallocates the memory located at `pointer`.
    ///
    /// #   Safety
    ///
    /// -   Assumes `pointer` has been returned by a prior call to `allocate`, `zero_allocate`, or `reallocate`.
    /// -   Assumes `pointer` has not been deallocated since its allocation.
    /// -   Assumes the memory pointed by `pointer` is no longer in use.
    pub unsafe fn deallocate(&mut self, pointer: NonNull<u8>) { self.0.free(Some(pointer)) }

    /// Resizes the memory located at `pointer` to `size` bytes, as per `Heap::reallocate`.
    ///
    /// #   Safety
    ///
    /// -   Assumes `pointer` is None, or as per `deallocate`.
    pub unsafe fn reallocate(&mut self, pointer: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        self.0.reallocate(pointer, size)
    }

    /// Returns the number of bytes usable at `pointer`.
    ///
    /// #   Safety
    ///
    /// -   As per `deallocate`, except that the memory may still be in use.
    pub unsafe fn usable_size(&self, pointer: NonNull<u8>) -> usize { self.0.usable_size(pointer) }

    /// Verifies the consistency of the heap.
    pub fn check_heap(&self) -> Result<(), HeapError> { self.0.check_heap() }

    /// Returns an iterator over the blocks of the heap, in address order.
    pub fn blocks(&self) -> Blocks<'_, MmapArena> { self.0.blocks() }

    /// Returns a summary of the occupancy of the heap.
    pub fn statistics(&self) -> HeapStatistics { self.0.statistics() }
}
