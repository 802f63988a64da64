//! Implicit List
//!
//! The implicit strategy keeps no record of which blocks are free: the heap itself is the list, each block's size
//! being the stride to the next block.
//!
//! Layout of a block, its size counting the header:
//!
//! ```text
//!   | header: size | allocated |  payload ...                     |
//!   ^ block                     ^ payload, aligned on ALIGNMENT
//! ```
//!
//! Freeing merely flips the allocation bit; adjacent free blocks are merged by a sweep over the whole heap at the start
//! of every allocation, followed by a first-fit search in address order.

use log::trace;

use crate::{
    Arena,
    HeapError,
    utils::{ALIGNMENT, WORD_SIZE},
};

use super::{FreeSpace, RawBlock, region::Region};

/// ImplicitList.
#[derive(Debug, Default)]
pub(crate) struct ImplicitList {
    //  First and last blocks of the heap, both None when the heap holds no block.
    first: Option<usize>,
    last: Option<usize>,
}

impl ImplicitList {
    /// Creates an instance.
    pub(crate) const fn new() -> Self { Self { first: None, last: None } }

    //  Returns the size of the block required to hold `size` bytes of payload.
    fn required_size(size: usize) -> Option<usize> {
        size.checked_add(WORD_SIZE).and_then(|size| ALIGNMENT.checked_round_up(size))
    }

    //  Merges every run of adjacent free blocks into its leading block.
    //
    //  #   Safety
    //
    //  -   Assumes the heap is consistent.
    unsafe fn coalesce<A: Arena>(&mut self, region: &mut Region<A>) {
        let last = match self.last {
            Some(last) => last,
            None => return,
        };

        let mut cursor = self.first;

        while let Some(block) = cursor {
            let tag = region.tag(block);
            let mut size = tag.size();

            if !tag.is_allocated() {
                let mut next = block + size;

                while next <= last {
                    let neighbour = region.tag(next);

                    if neighbour.is_allocated() {
                        break;
                    }

                    if next == last {
                        self.last = Some(block);
                    }

                    size += neighbour.size();
                    next += neighbour.size();
                }

                if size != tag.size() {
                    trace!("coalesce: block {:#x} grows from {} to {} bytes", block, tag.size(), size);

                    region.set_tag(block, size, false);
                }
            }

            cursor = Some(block + size).filter(|&next| next <= last);
        }
    }

    //  Returns the first free block of at least `size` bytes, in address order, after marking it allocated.
    //
    //  #   Safety
    //
    //  -   Assumes the heap is consistent.
    unsafe fn find_fit<A: Arena>(&mut self, region: &mut Region<A>, size: usize) -> Option<usize> {
        let last = self.last?;

        let mut cursor = self.first;

        while let Some(block) = cursor {
            let tag = region.tag(block);

            if !tag.is_allocated() && tag.size() >= size {
                self.place(region, block, tag.size(), size);
                return Some(block);
            }

            cursor = Some(block + tag.size()).filter(|&next| next <= last);
        }

        None
    }

    //  Marks `block` allocated, splitting off the excess as a free block if large enough to stand on its own.
    //
    //  #   Safety
    //
    //  -   Assumes `block` is a free block of `available` bytes, with `available >= size`.
    unsafe fn place<A: Arena>(&mut self, region: &mut Region<A>, block: usize, available: usize, size: usize) {
        debug_assert!(available >= size, "{} < {}", available, size);

        let leftover = available - size;

        if leftover < ALIGNMENT.value() {
            region.set_tag(block, available, true);
            return;
        }

        let remainder = block + size;

        trace!("split: block {:#x} of {} bytes, remainder {:#x} of {} bytes", block, available, remainder, leftover);

        region.set_tag(block, size, true);
        region.set_tag(remainder, leftover, false);

        if self.last == Some(block) {
            self.last = Some(remainder);
        }
    }
}

impl FreeSpace for ImplicitList {
    fn initialize<A: Arena>(&mut self, region: &mut Region<A>) -> Option<()> {
        region.reanchor()?;

        //  The first payload follows the first header, one word past an ALIGNMENT boundary.
        region.grow(ALIGNMENT.value() - WORD_SIZE)?;

        self.first = None;
        self.last = None;

        Some(())
    }

    fn allocate<A: Arena>(&mut self, region: &mut Region<A>, size: usize) -> Option<usize> {
        let size = Self::required_size(size)?;

        //  Safety:
        //  -   The heap is consistent between two calls.
        unsafe { self.coalesce(region) };

        //  Safety:
        //  -   The heap is consistent, having been coalesced.
        if let Some(block) = unsafe { self.find_fit(region, size) } {
            return Some(block + WORD_SIZE);
        }

        let block = region.grow(size)?;

        if self.first.is_none() {
            self.first = Some(block);
        }

        self.last = Some(block);

        //  Safety:
        //  -   `[block, block + size)` was just obtained from the arena.
        unsafe { region.set_tag(block, size, true) };

        Some(block + WORD_SIZE)
    }

    unsafe fn deallocate<A: Arena>(&mut self, region: &mut Region<A>, payload: usize) {
        let block = payload - WORD_SIZE;
        let tag = region.tag(block);

        debug_assert!(tag.is_allocated(), "Double free of block {:#x}", block);

        region.set_tag(block, tag.size(), false);
    }

    unsafe fn capacity<A: Arena>(&self, region: &Region<A>, payload: usize) -> usize {
        region.tag(payload - WORD_SIZE).size() - WORD_SIZE
    }

    fn first_block<A: Arena>(&self, _: &Region<A>) -> Option<usize> { self.first }

    unsafe fn next_block<A: Arena>(&self, region: &Region<A>, block: usize) -> Option<usize> {
        let last = self.last?;

        Some(block + region.tag(block).size()).filter(|&next| next <= last)
    }

    unsafe fn describe<A: Arena>(&self, region: &Region<A>, block: usize) -> RawBlock {
        let tag = region.tag(block);

        RawBlock { payload: block + WORD_SIZE, size: tag.size() - WORD_SIZE, allocated: tag.is_allocated() }
    }

    fn check<A: Arena>(&self, region: &Region<A>) -> Result<(), HeapError> {
        let heap_size = region.len();

        let (first, last) = match (self.first, self.last) {
            (Some(first), Some(last)) => (first, last),
            (None, None) => return Ok(()),
            (Some(offset), None) | (None, Some(offset)) => return Err(HeapError::TruncatedHeap { offset, heap_size }),
        };

        let mut block = first;

        loop {
            if block + WORD_SIZE > heap_size {
                return Err(HeapError::OutOfBounds { offset: block, size: WORD_SIZE, heap_size });
            }

            //  Safety:
            //  -   `[block, block + WORD_SIZE)` is within the region, as checked above.
            let tag = unsafe { region.tag(block) };
            let size = tag.size();

            if !tag.is_well_sized() {
                return Err(HeapError::InvalidSize { offset: block, size });
            }

            if region.address(block + WORD_SIZE) % ALIGNMENT != 0 {
                return Err(HeapError::Misaligned { offset: block });
            }

            let end = match block.checked_add(size) {
                Some(end) if end <= heap_size => end,
                _ => return Err(HeapError::OutOfBounds { offset: block, size, heap_size }),
            };

            if block == last {
                return if end == heap_size { Ok(()) } else { Err(HeapError::TruncatedHeap { offset: end, heap_size }) };
            }

            if end > last {
                return Err(HeapError::TruncatedHeap { offset: block, heap_size });
            }

            block = end;
        }
    }
}

#[cfg(test)]
mod tests {

use super::*;
use super::super::test::{ArenaStore, StoreArena};

const UNIT: usize = ALIGNMENT.value();

fn setup(store: &ArenaStore) -> (ImplicitList, Region<StoreArena<'_>>) {
    let mut list = ImplicitList::new();
    let mut region = Region::new(StoreArena::new(store));

    list.initialize(&mut region).expect("Initialized");

    (list, region)
}

fn tags(list: &ImplicitList, region: &Region<StoreArena<'_>>) -> Vec<(usize, bool)> {
    let mut result = Vec::new();
    let mut cursor = list.first_block(region);

    while let Some(block) = cursor {
        let tag = unsafe { region.tag(block) };
        result.push((tag.size(), tag.is_allocated()));
        cursor = unsafe { list.next_block(region, block) };
    }

    result
}

#[test]
fn implicit_required_size() {
    assert_eq!(Some(UNIT), ImplicitList::required_size(0));
    assert_eq!(Some(UNIT), ImplicitList::required_size(UNIT - WORD_SIZE));
    assert_eq!(Some(2 * UNIT), ImplicitList::required_size(UNIT));
    assert_eq!(None, ImplicitList::required_size(usize::MAX - 2));
}

#[test]
fn implicit_initialize_aligns_first_payload() {
    for start in 0..ALIGNMENT.value() {
        let store = ArenaStore::default();
        let mut list = ImplicitList::new();
        let mut region = Region::new(StoreArena::starting_at(&store, start));

        list.initialize(&mut region).expect("Initialized");

        let payload = list.allocate(&mut region, 1).expect("Allocated");
        assert_eq!(0, region.address(payload) % ALIGNMENT);
        assert_eq!(Ok(()), list.check(&region));
    }
}

#[test]
fn implicit_allocate_appends() {
    let store = ArenaStore::default();
    let (mut list, mut region) = setup(&store);

    let a = list.allocate(&mut region, 16).unwrap();
    let b = list.allocate(&mut region, 40).unwrap();

    let (r16, r40) = (ImplicitList::required_size(16).unwrap(), ImplicitList::required_size(40).unwrap());

    assert_eq!(a + r16, b);
    assert_eq!(vec!((r16, true), (r40, true)), tags(&list, &region));
    assert_eq!(Ok(()), list.check(&region));
}

#[test]
fn implicit_free_reuse() {
    let store = ArenaStore::default();
    let (mut list, mut region) = setup(&store);

    let a = list.allocate(&mut region, 16).unwrap();
    let _ = list.allocate(&mut region, 16).unwrap();

    unsafe { list.deallocate(&mut region, a) };
    let grows = region.arena().grows();

    assert_eq!(Some(a), list.allocate(&mut region, 16));
    assert_eq!(grows, region.arena().grows());
}

#[test]
fn implicit_split_and_coalesce() {
    let store = ArenaStore::default();
    let (mut list, mut region) = setup(&store);

    let a = list.allocate(&mut region, 64).unwrap();
    let b = list.allocate(&mut region, 64).unwrap();
    let c = list.allocate(&mut region, 64).unwrap();
    let _guard = list.allocate(&mut region, 8).unwrap();

    unsafe {
        list.deallocate(&mut region, a);
        list.deallocate(&mut region, b);
        list.deallocate(&mut region, c);
    }

    //  Freeing is deferred: three free blocks side by side.
    assert_eq!(3, tags(&list, &region).iter().filter(|(_, allocated)| !allocated).count());

    //  The sweep merges them, then the request is carved from the front.
    let d = list.allocate(&mut region, 8).unwrap();
    assert_eq!(a, d);

    let whole = 3 * ImplicitList::required_size(64).unwrap();
    let r8 = ImplicitList::required_size(8).unwrap();

    assert_eq!(vec!((r8, true), (whole - r8, false), (r8, true)), tags(&list, &region));
    assert_eq!(Ok(()), list.check(&region));
}

#[test]
fn implicit_coalesce_tail() {
    let store = ArenaStore::default();
    let (mut list, mut region) = setup(&store);

    let a = list.allocate(&mut region, 16).unwrap();
    let b = list.allocate(&mut region, 16).unwrap();
    let c = list.allocate(&mut region, 16).unwrap();

    unsafe {
        list.deallocate(&mut region, b);
        list.deallocate(&mut region, c);
    }

    //  Too large for the merged tail: the sweep still runs, and the tail becomes a single free block.
    let grows = region.arena().grows();
    let d = list.allocate(&mut region, 256).unwrap();

    assert_eq!(grows + 1, region.arena().grows());
    assert!(d > a);
    let (r16, r256) = (ImplicitList::required_size(16).unwrap(), ImplicitList::required_size(256).unwrap());

    assert_eq!(vec!((r16, true), (2 * r16, false), (r256, true)), tags(&list, &region));
    assert_eq!(Ok(()), list.check(&region));
}

#[test]
fn implicit_split_updates_last() {
    let store = ArenaStore::default();
    let (mut list, mut region) = setup(&store);

    let a = list.allocate(&mut region, 100).unwrap();
    unsafe { list.deallocate(&mut region, a) };

    assert_eq!(Some(a), list.allocate(&mut region, 10));

    //  The remainder is now the last block, and the next allocation appends after it.
    let b = list.allocate(&mut region, 200).unwrap();
    let blocks = tags(&list, &region);

    assert_eq!(3, blocks.len());
    assert_eq!((ImplicitList::required_size(200).unwrap(), true), blocks[2]);
    assert_eq!(region.len() - ImplicitList::required_size(200).unwrap() + WORD_SIZE, b);
    assert_eq!(Ok(()), list.check(&region));
}

#[test]
fn implicit_exhaustion() {
    let store = ArenaStore::default();
    let (mut list, mut region) = setup(&store);

    let a = list.allocate(&mut region, 32).unwrap();
    let before = region.len();

    assert_eq!(None, list.allocate(&mut region, ArenaStore::CAPACITY));
    assert_eq!(None, list.allocate(&mut region, usize::MAX));
    assert_eq!(before, region.len());

    let capacity = unsafe { list.capacity(&region, a) };

    assert!(capacity >= 32);
    assert_eq!(ImplicitList::required_size(32).unwrap() - WORD_SIZE, capacity);
    assert_eq!(Ok(()), list.check(&region));
}

#[test]
fn implicit_check_detects_corruption() {
    let store = ArenaStore::default();
    let (mut list, mut region) = setup(&store);

    let a = list.allocate(&mut region, 16).unwrap();
    let _ = list.allocate(&mut region, 16).unwrap();

    unsafe { region.set_word(a - WORD_SIZE, 3 * UNIT + 1) };

    assert!(list.check(&region).is_err());

    unsafe { region.set_word(a - WORD_SIZE, 0) };

    assert_eq!(Err(HeapError::InvalidSize { offset: a - WORD_SIZE, size: 0 }), list.check(&region));
}

} // mod tests
