//! Heap
//!
//! The Heap is the façade of tagalloc-core: it owns an Arena, carves it into blocks according to the selected
//! Strategy, and exposes the malloc family of operations on top.
//!
//! A Heap is single-threaded: it is `Send` whenever its Arena is, but all operations require exclusive access.
//!
//! The Arena's high-water mark need not be aligned: the heap is anchored at the first `ALIGNMENT` boundary above it.

use core::ptr::{self, NonNull};

use log::{debug, trace, warn};

use crate::{
    Arena,
    HeapError,
    internals::{FreeSpace, RawBlock, explicit::ExplicitList, implicit::ImplicitList, region::Region},
    utils::{self, ALIGNMENT},
};

use super::{
    strategy::Strategy,
    walk::{Blocks, HeapStatistics},
};

//  Forwards a method call to the list of the active strategy.
macro_rules! dispatch {
    ($engine:expr, $list:ident => $call:expr) => {
        match $engine {
            Engine::Implicit($list) => $call,
            Engine::Explicit($list) => $call,
        }
    };
}

/// The free-space tracking of a Heap, as per its Strategy.
pub(crate) enum Engine {
    Implicit(ImplicitList),
    Explicit(ExplicitList),
}

impl Engine {
    fn new(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Implicit => Engine::Implicit(ImplicitList::new()),
            Strategy::Explicit => Engine::Explicit(ExplicitList::new()),
        }
    }
}

impl FreeSpace for Engine {
    fn initialize<A: Arena>(&mut self, region: &mut Region<A>) -> Option<()> {
        dispatch!(self, list => list.initialize(region))
    }

    fn allocate<A: Arena>(&mut self, region: &mut Region<A>, size: usize) -> Option<usize> {
        dispatch!(self, list => list.allocate(region, size))
    }

    unsafe fn deallocate<A: Arena>(&mut self, region: &mut Region<A>, payload: usize) {
        dispatch!(self, list => list.deallocate(region, payload))
    }

    unsafe fn capacity<A: Arena>(&self, region: &Region<A>, payload: usize) -> usize {
        dispatch!(self, list => list.capacity(region, payload))
    }

    fn first_block<A: Arena>(&self, region: &Region<A>) -> Option<usize> {
        dispatch!(self, list => list.first_block(region))
    }

    unsafe fn next_block<A: Arena>(&self, region: &Region<A>, block: usize) -> Option<usize> {
        dispatch!(self, list => list.next_block(region, block))
    }

    unsafe fn describe<A: Arena>(&self, region: &Region<A>, block: usize) -> RawBlock {
        dispatch!(self, list => list.describe(region, block))
    }

    fn check<A: Arena>(&self, region: &Region<A>) -> Result<(), HeapError> {
        dispatch!(self, list => list.check(region))
    }
}

/// Heap.
///
/// A Heap hands out blocks carved from its Arena, never returning memory to it.
///
/// All payloads are aligned on `ALIGNMENT`, and the payloads of the blocks currently allocated never overlap.
pub struct Heap<A> {
    strategy: Strategy,
    engine: Engine,
    region: Region<A>,
    initialized: bool,
}

impl<A> Heap<A> {
    /// Creates a Heap, drawing memory from `arena`.
    ///
    /// The Heap is not initialized yet; it will be on the first call to `initialize` or `allocate`.
    pub fn new(arena: A, strategy: Strategy) -> Self {
        Self { strategy, engine: Engine::new(strategy), region: Region::new(arena), initialized: false }
    }

    /// Returns the strategy of the Heap.
    pub fn strategy(&self) -> Strategy { self.strategy }

    /// Returns a reference to the arena.
    pub fn arena(&self) -> &A { self.region.arena() }

    /// Returns whether the Heap is initialized.
    pub fn is_initialized(&self) -> bool { self.initialized }

    /// Returns the number of bytes obtained from the arena since the last initialization.
    pub fn heap_size(&self) -> usize { self.region.len() }
}

impl<A> Heap<A>
    where
        A: Arena,
{
    /// Lays out an empty heap at the current high-water mark of the arena.
    ///
    /// Any previous content of the Heap is discarded: the pointers it handed out must no longer be used.
    ///
    /// Returns an error if the arena cannot provide the initial bookkeeping space, in which case the Heap is left
    /// uninitialized.
    pub fn initialize(&mut self) -> Result<(), HeapError> {
        self.engine = Engine::new(self.strategy);
        self.initialized = self.engine.initialize(&mut self.region).is_some();

        if !self.initialized {
            warn!("initialize: {} heap, arena exhausted", self.strategy);
            return Err(HeapError::Exhausted);
        }

        debug!("initialize: {} heap, {} bytes of bookkeeping", self.strategy, self.region.len());

        Ok(())
    }

    /// Allocates a block with a payload of at least `size` bytes, initializing the Heap if need be.
    ///
    /// Returns None if the arena is exhausted; the Heap is then left untouched.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if !self.initialized {
            self.initialize().ok()?;
        }

        let payload = match self.engine.allocate(&mut self.region, size) {
            Some(payload) => payload,
            None => {
                warn!("allocate: {} bytes, arena exhausted with heap of {} bytes", size, self.region.len());
                return None;
            },
        };

        //  Safety:
        //  -   The payload of a block lies within the region.
        let pointer = unsafe { self.region.pointer(payload) };

        debug_assert!(utils::is_sufficiently_aligned_for(pointer, ALIGNMENT),
            "{:?} not aligned on {}", pointer, ALIGNMENT.value());

        trace!("allocate: {} bytes at {:?}", size, pointer);

        Some(pointer)
    }

    /// Releases the block owning `pointer`; does nothing if `pointer` is None.
    ///
    /// #   Safety
    ///
    /// -   Assumes `pointer` is None, or was returned by this Heap since its last initialization.
    /// -   Assumes `pointer` was not released since.
    pub unsafe fn free(&mut self, pointer: Option<NonNull<u8>>) {
        let pointer = match pointer {
            Some(pointer) => pointer,
            None => return,
        };

        debug_assert!(self.initialized, "Freeing {:?} in an uninitialized heap", pointer);

        trace!("free: {:?}", pointer);

        let payload = self.region.offset_of(pointer);

        self.engine.deallocate(&mut self.region, payload);
    }

    /// Resizes the block owning `pointer` to `size` bytes, possibly moving it.
    ///
    /// -   If `pointer` is None, behaves as `allocate(size)`.
    /// -   If `size` is 0, behaves as `free(pointer)` and returns None.
    /// -   Otherwise, the first `min(usable_size(pointer), size)` bytes are preserved. On failure, None is returned and
    ///     the original block is left untouched.
    ///
    /// #   Safety
    ///
    /// -   As per `free`.
    pub unsafe fn reallocate(&mut self, pointer: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        let old = match pointer {
            Some(old) => old,
            None => return self.allocate(size),
        };

        if size == 0 {
            self.free(Some(old));
            return None;
        }

        let capacity = self.usable_size(old);
        let new = self.allocate(size)?;

        trace!("reallocate: {:?} of {} bytes to {:?} of {} bytes", old, capacity, new, size);

        //  Safety:
        //  -   `old` is valid for `capacity` bytes, and `new` for `size` bytes.
        //  -   Both blocks are allocated, hence disjoint.
        ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), capacity.min(size));

        self.free(Some(old));

        Some(new)
    }

    /// Allocates a block for `count` elements of `size` bytes each, zeroing the payload.
    ///
    /// Returns None if `count * size` overflows, or if the arena is exhausted.
    pub fn zero_allocate(&mut self, count: usize, size: usize) -> Option<NonNull<u8>> {
        let bytes = match count.checked_mul(size) {
            Some(bytes) => bytes,
            None => {
                warn!("zero_allocate: {} x {} bytes overflows", count, size);
                return None;
            },
        };

        let pointer = self.allocate(bytes)?;

        //  Safety:
        //  -   `pointer` is valid for at least `bytes` bytes.
        unsafe { ptr::write_bytes(pointer.as_ptr(), 0, bytes) };

        Some(pointer)
    }

    /// Returns the capacity of the payload at `pointer`, at least the size requested.
    ///
    /// #   Safety
    ///
    /// -   Assumes `pointer` was returned by this Heap since its last initialization, and was not released since.
    pub unsafe fn usable_size(&self, pointer: NonNull<u8>) -> usize {
        let payload = self.region.offset_of(pointer);

        self.engine.capacity(&self.region, payload)
    }

    /// Verifies the consistency of the Heap, reporting the first violation found.
    ///
    /// An uninitialized Heap is consistent.
    pub fn check_heap(&self) -> Result<(), HeapError> {
        if !self.initialized {
            return Ok(());
        }

        let result = self.engine.check(&self.region);

        if let Err(error) = result {
            warn!("check_heap: {} heap is corrupted, {}", self.strategy, error);
        }

        result
    }

    /// Returns an iterator over the blocks of the Heap, in address order.
    pub fn blocks(&self) -> Blocks<'_, A> {
        let first = if self.initialized { self.engine.first_block(&self.region) } else { None };

        Blocks::new(&self.engine, &self.region, first)
    }

    /// Returns a summary of the occupancy of the Heap.
    pub fn statistics(&self) -> HeapStatistics { self.blocks().collect() }
}

impl<A> Default for Heap<A>
    where
        A: Default,
{
    fn default() -> Self { Self::new(A::default(), Strategy::default()) }
}

#[cfg(test)]
mod tests {

use core::slice;

use crate::{internals::test::{ArenaStore, StoreArena}, utils::WORD_SIZE};

use super::*;

const STRATEGIES: [Strategy; 2] = [Strategy::Implicit, Strategy::Explicit];

fn heap(store: &ArenaStore, strategy: Strategy) -> Heap<StoreArena<'_>> {
    Heap::new(StoreArena::new(store), strategy)
}

unsafe fn fill(pointer: NonNull<u8>, size: usize, value: u8) { ptr::write_bytes(pointer.as_ptr(), value, size) }

unsafe fn bytes<'a>(pointer: NonNull<u8>, size: usize) -> &'a [u8] { slice::from_raw_parts(pointer.as_ptr(), size) }

fn no_adjacent_free(heap: &Heap<StoreArena<'_>>) -> bool {
    let blocks: Vec<_> = heap.blocks().collect();

    blocks.windows(2).all(|pair| pair[0].allocated || pair[1].allocated)
}

#[test]
fn heap_lazy_initialize() {
    for &strategy in &STRATEGIES {
        let store = ArenaStore::default();
        let mut heap = heap(&store, strategy);

        assert_eq!(strategy, heap.strategy());
        assert!(!heap.is_initialized());
        assert_eq!(Ok(()), heap.check_heap());
        assert_eq!(0, heap.blocks().count());

        let pointer = heap.allocate(8);

        assert!(pointer.is_some());
        assert!(heap.is_initialized());
        assert_eq!(Ok(()), heap.check_heap());
        assert_eq!(1, heap.blocks().count());
    }
}

#[test]
fn heap_initialize_exhausted() {
    for &strategy in &STRATEGIES {
        let store = ArenaStore::default();
        let mut heap = Heap::new(StoreArena::starting_at(&store, ArenaStore::CAPACITY), strategy);

        assert_eq!(Err(HeapError::Exhausted), heap.initialize());
        assert!(!heap.is_initialized());
        assert_eq!(None, heap.allocate(1));
        assert_eq!(Ok(()), heap.check_heap());
    }
}

#[test]
fn heap_reinitialize_discards() {
    for &strategy in &STRATEGIES {
        let store = ArenaStore::default();
        let mut heap = heap(&store, strategy);

        heap.allocate(32).unwrap();
        heap.allocate(64).unwrap();
        assert_eq!(2, heap.statistics().blocks);

        heap.initialize().unwrap();

        assert_eq!(0, heap.statistics().blocks);
        assert_eq!(Ok(()), heap.check_heap());
        assert!(heap.allocate(32).is_some());
    }
}

#[test]
fn heap_alignment() {
    for &strategy in &STRATEGIES {
        let store = ArenaStore::default();
        let mut heap = heap(&store, strategy);

        for size in 0..48 {
            let pointer = heap.allocate(size).unwrap();

            assert_eq!(0, pointer.as_ptr() as usize % ALIGNMENT, "{} - {}", strategy, size);
            assert!(unsafe { heap.usable_size(pointer) } >= size);
        }

        assert_eq!(Ok(()), heap.check_heap());
    }
}

#[test]
fn heap_no_overlap_and_fidelity() {
    for &strategy in &STRATEGIES {
        let store = ArenaStore::default();
        let mut heap = heap(&store, strategy);

        let mut live = Vec::new();

        for (index, &size) in [24, 1, 100, 48, 16, 7, 64, 33].iter().enumerate() {
            let pointer = heap.allocate(size).unwrap();
            unsafe { fill(pointer, size, index as u8 + 1) };
            live.push((pointer, size, index as u8 + 1));
        }

        //  Release every other block, then allocate some more into the holes.
        let released: Vec<_> = live.iter().copied().skip(1).step_by(2).collect();
        live = live.into_iter().step_by(2).collect();

        for (pointer, _, _) in released {
            unsafe { heap.free(Some(pointer)) };
            assert_eq!(Ok(()), heap.check_heap());
        }

        for (index, &size) in [8, 90, 30, 16].iter().enumerate() {
            let pointer = heap.allocate(size).unwrap();
            unsafe { fill(pointer, size, 0x80 + index as u8) };
            live.push((pointer, size, 0x80 + index as u8));
        }

        let mut ranges: Vec<_> = live.iter()
            .map(|&(pointer, size, _)| (pointer.as_ptr() as usize, pointer.as_ptr() as usize + size))
            .collect();
        ranges.sort();

        for pair in ranges.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "{} - {:x?} overlaps {:x?}", strategy, pair[0], pair[1]);
        }

        for &(pointer, size, value) in &live {
            assert!(unsafe { bytes(pointer, size) }.iter().all(|&b| b == value), "{} - {:?}", strategy, pointer);
        }

        assert_eq!(Ok(()), heap.check_heap());
    }
}

#[test]
fn heap_free_none() {
    for &strategy in &STRATEGIES {
        let store = ArenaStore::default();
        let mut heap = heap(&store, strategy);

        unsafe { heap.free(None) };
        assert!(!heap.is_initialized());

        heap.allocate(16).unwrap();
        let before = heap.statistics();

        unsafe { heap.free(None) };

        assert_eq!(before, heap.statistics());
    }
}

#[test]
fn heap_free_reuse() {
    for &strategy in &STRATEGIES {
        let store = ArenaStore::default();
        let mut heap = heap(&store, strategy);

        let first = heap.allocate(16).unwrap();
        unsafe { heap.free(Some(first)) };

        let grows = heap.arena().grows();

        assert_eq!(Some(first), heap.allocate(16), "{}", strategy);
        assert_eq!(grows, heap.arena().grows());
    }
}

#[test]
fn heap_coalescing_closes_gaps() {
    for &strategy in &STRATEGIES {
        let store = ArenaStore::default();
        let mut heap = heap(&store, strategy);

        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(16).unwrap();
        let _guard = heap.allocate(16).unwrap();

        unsafe {
            heap.free(Some(a));
            heap.free(Some(b));
        }

        let (grows, size) = (heap.arena().grows(), heap.heap_size());

        assert_eq!(Some(a), heap.allocate(40), "{}", strategy);
        assert_eq!(grows, heap.arena().grows());
        assert_eq!(size, heap.heap_size());
        assert_eq!(Ok(()), heap.check_heap());
    }
}

#[test]
fn heap_explicit_no_adjacent_free() {
    let store = ArenaStore::default();
    let mut heap = heap(&store, Strategy::Explicit);

    let pointers: Vec<_> = (0..12).map(|i| heap.allocate(8 + 8 * (i % 5)).unwrap()).collect();

    for &index in &[3, 5, 4, 0, 11, 1, 9, 7, 8, 2, 10, 6] {
        unsafe { heap.free(Some(pointers[index])) };

        assert!(no_adjacent_free(&heap), "after freeing #{}", index);
        assert_eq!(Ok(()), heap.check_heap());
    }

    let statistics = heap.statistics();

    assert_eq!(1, statistics.blocks);
    assert_eq!(1, statistics.free_blocks);
    assert_eq!(statistics.free_bytes, statistics.largest_free);
}

#[test]
fn heap_reallocate_shrink() {
    for &strategy in &STRATEGIES {
        let store = ArenaStore::default();
        let mut heap = heap(&store, strategy);

        let pattern: Vec<u8> = (0..64).collect();

        let old = heap.allocate(64).unwrap();
        unsafe { ptr::copy_nonoverlapping(pattern.as_ptr(), old.as_ptr(), 64) };

        let new = unsafe { heap.reallocate(Some(old), 32) }.unwrap();

        assert_eq!(&pattern[..32], unsafe { bytes(new, 32) });
        assert_eq!(Ok(()), heap.check_heap());
    }
}

#[test]
fn heap_reallocate_grow() {
    for &strategy in &STRATEGIES {
        let store = ArenaStore::default();
        let mut heap = heap(&store, strategy);

        let old = heap.allocate(16).unwrap();
        unsafe { fill(old, 16, 0x5A) };

        let new = unsafe { heap.reallocate(Some(old), 64) }.unwrap();

        assert!(unsafe { heap.usable_size(new) } >= 64);
        assert!(unsafe { bytes(new, 16) }.iter().all(|&b| b == 0x5A));
        assert_eq!(Ok(()), heap.check_heap());

        //  The original block was released.
        let statistics = heap.statistics();
        assert_eq!(1, statistics.allocated_blocks, "{}", strategy);
    }
}

#[test]
fn heap_reallocate_none_and_zero() {
    for &strategy in &STRATEGIES {
        let store = ArenaStore::default();
        let mut heap = heap(&store, strategy);

        let pointer = unsafe { heap.reallocate(None, 24) }.unwrap();

        assert!(unsafe { heap.usable_size(pointer) } >= 24);
        assert_eq!(1, heap.statistics().allocated_blocks);

        assert_eq!(None, unsafe { heap.reallocate(Some(pointer), 0) });
        assert_eq!(0, heap.statistics().allocated_blocks);
        assert_eq!(Ok(()), heap.check_heap());
    }
}

#[test]
fn heap_reallocate_failure_preserves_original() {
    for &strategy in &STRATEGIES {
        let store = ArenaStore::default();
        let mut heap = heap(&store, strategy);

        let old = heap.allocate(48).unwrap();
        unsafe { fill(old, 48, 0xC3) };

        assert_eq!(None, unsafe { heap.reallocate(Some(old), ArenaStore::CAPACITY) });

        assert!(unsafe { bytes(old, 48) }.iter().all(|&b| b == 0xC3));
        assert_eq!(1, heap.statistics().allocated_blocks);
        assert_eq!(Ok(()), heap.check_heap());

        unsafe { heap.free(Some(old)) };
    }
}

#[test]
fn heap_zero_allocate() {
    for &strategy in &STRATEGIES {
        let store = ArenaStore::default();
        let mut heap = heap(&store, strategy);

        //  Dirty the block first, so zeroing is observable.
        let dirty = heap.allocate(40).unwrap();
        unsafe {
            fill(dirty, 40, 0xFF);
            heap.free(Some(dirty));
        }

        let pointer = heap.zero_allocate(10, 4).unwrap();

        assert_eq!(dirty, pointer, "{}", strategy);
        assert!(unsafe { bytes(pointer, 40) }.iter().all(|&b| b == 0));
    }
}

#[test]
fn heap_zero_allocate_overflow() {
    for &strategy in &STRATEGIES {
        let store = ArenaStore::default();
        let mut heap = heap(&store, strategy);

        assert_eq!(None, heap.zero_allocate(usize::MAX / 2, 3));
        assert_eq!(None, heap.zero_allocate(ArenaStore::CAPACITY, 2));
        assert_eq!(Ok(()), heap.check_heap());
    }
}

#[test]
fn heap_exhaustion() {
    for &strategy in &STRATEGIES {
        let store = ArenaStore::default();
        let mut heap = heap(&store, strategy);

        let kept = heap.allocate(100).unwrap();
        unsafe { fill(kept, 100, 0x11) };

        let size = heap.heap_size();

        assert_eq!(None, heap.allocate(ArenaStore::CAPACITY));
        assert_eq!(None, heap.allocate(usize::MAX));
        assert_eq!(size, heap.heap_size());

        assert!(unsafe { bytes(kept, 100) }.iter().all(|&b| b == 0x11));
        assert_eq!(Ok(()), heap.check_heap());

        //  Smaller requests still succeed.
        assert!(heap.allocate(100).is_some());
    }
}

#[test]
fn heap_statistics() {
    for &strategy in &STRATEGIES {
        let store = ArenaStore::default();
        let mut heap = heap(&store, strategy);

        let a = heap.allocate(32).unwrap();
        let _b = heap.allocate(32).unwrap();
        let c = heap.allocate(64).unwrap();
        let _d = heap.allocate(16).unwrap();

        let (capacity_a, capacity_c) = unsafe { (heap.usable_size(a), heap.usable_size(c)) };

        unsafe {
            heap.free(Some(a));
            heap.free(Some(c));
        }

        let statistics = heap.statistics();

        assert_eq!(4, statistics.blocks, "{}", strategy);
        assert_eq!(2, statistics.allocated_blocks);
        assert_eq!(2, statistics.free_blocks);
        assert_eq!(capacity_a + capacity_c, statistics.free_bytes);
        assert_eq!(capacity_c, statistics.largest_free);

        let walked: Vec<_> = heap.blocks().map(|block| (block.payload, block.allocated)).collect();

        assert_eq!(a, walked[0].0);
        assert!(!walked[0].1);
        assert_eq!(c, walked[2].0);
        assert!(!walked[2].1);
    }
}


#[test]
fn heap_misaligned_arena() {
    for &strategy in &STRATEGIES {
        for start in [1, 3, WORD_SIZE + 1, ALIGNMENT.value() - 1].iter().copied() {
            let store = ArenaStore::default();
            let mut heap = Heap::new(StoreArena::starting_at(&store, start), strategy);

            let a = heap.allocate(16).unwrap();
            let b = heap.allocate(40).unwrap();

            assert_eq!(0, a.as_ptr() as usize % ALIGNMENT, "{} - {}", strategy, start);
            assert_eq!(0, b.as_ptr() as usize % ALIGNMENT, "{} - {}", strategy, start);
            assert!(a.as_ptr() as usize >= store.address(start));
            assert_eq!(Ok(()), heap.check_heap());

            unsafe {
                fill(a, 16, 0xA5);
                fill(b, 40, 0x5A);

                assert!(bytes(a, 16).iter().all(|&byte| byte == 0xA5));

                heap.free(Some(a));
            }

            assert_eq!(Ok(()), heap.check_heap());
            assert_eq!(Some(a), heap.allocate(16));
        }
    }
}

#[test]
fn heap_is_send() {
    struct SendArena;

    unsafe impl Arena for SendArena {
        fn grow(&mut self, _: usize) -> Option<NonNull<u8>> { None }
    }

    fn assert_send<T: Send>() {}

    assert_send::<Heap<SendArena>>();
}

} // mod tests
