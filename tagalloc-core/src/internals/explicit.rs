//! Explicit List
//!
//! The explicit strategy tracks free blocks in a dedicated doubly-linked list, whose nodes live in the payloads of the
//! free blocks themselves, and merges a freed block with its free neighbours immediately, using boundary tags.
//!
//! Layout of the heap:
//!
//! ```text
//!   | first | last | prologue | header | payload ... | footer | header | payload ... | footer | epilogue |
//!                  ^ block                           ^ block
//! ```
//!
//! -   A block starts with the footer of its predecessor, followed by its own header; the footer of the last block is
//!     followed by the epilogue.
//! -   Sizes are payload sizes: a block spans `ALIGNMENT + size` bytes up to the next block.
//! -   The prologue and epilogue are zero-sized allocated tags, so that neither end of the heap is ever merged.
//! -   `first` and `last` are the sentinels of the free list.

use log::trace;

use crate::{
    Arena,
    HeapError,
    utils::{ALIGNMENT, WORD_SIZE},
};

use super::{
    FreeSpace,
    RawBlock,
    free_list::{FreeList, NODE_SIZE},
    region::Region,
    tag::Tag,
};

/// ExplicitList.
#[derive(Debug, Default)]
pub(crate) struct ExplicitList {
    free: FreeList,
    //  Offset of the prologue, which is also the offset of the first block.
    prologue: usize,
}

impl ExplicitList {
    //  The smallest payload of a block, large enough to hold a free-list node.
    const MINIMUM_SIZE: usize = NODE_SIZE;

    /// Creates an instance.
    pub(crate) fn new() -> Self { Self::default() }

    //  Returns the payload size required to hold `size` bytes.
    fn required_size(size: usize) -> Option<usize> {
        ALIGNMENT.checked_round_up(size).map(|size| size.max(Self::MINIMUM_SIZE))
    }

    fn header(block: usize) -> usize { block + WORD_SIZE }

    fn payload(block: usize) -> usize { block + ALIGNMENT.value() }

    fn block_of(payload: usize) -> usize { payload - ALIGNMENT.value() }

    //  #   Safety
    //
    //  -   Assumes `block` is a block of the heap, or the epilogue.
    unsafe fn size<A>(region: &Region<A>, block: usize) -> usize { region.tag(Self::header(block)).size() }

    //  #   Safety
    //
    //  -   Assumes `block` is a block of the heap.
    unsafe fn next_of<A>(region: &Region<A>, block: usize) -> usize {
        Self::payload(block) + Self::size(region, block)
    }

    //  #   Safety
    //
    //  -   Assumes `block` is a block of the heap, whose predecessor is a block rather than the prologue.
    unsafe fn previous_of<A>(region: &Region<A>, block: usize) -> usize {
        block - region.tag(block).size() - ALIGNMENT.value()
    }

    //  #   Safety
    //
    //  -   Assumes `block` is a block of the heap.
    unsafe fn is_previous_allocated<A>(region: &Region<A>, block: usize) -> bool { region.tag(block).is_allocated() }

    //  The epilogue, being zero-sized, always counts as allocated.
    //
    //  #   Safety
    //
    //  -   Assumes `block` is a block of the heap.
    unsafe fn is_next_allocated<A>(region: &Region<A>, block: usize) -> bool {
        let next = region.tag(Self::header(Self::next_of(region, block)));

        next.size() == 0 || next.is_allocated()
    }

    //  Writes both the header and the footer of `block`.
    //
    //  #   Safety
    //
    //  -   Assumes `[block, block + 2 * ALIGNMENT + size)` is within the region, and not handed out to a client.
    unsafe fn set_tags<A>(region: &mut Region<A>, block: usize, size: usize, allocated: bool) {
        region.set_tag(Self::header(block), size, allocated);
        region.set_tag(Self::payload(block) + size, size, allocated);
    }

    //  Returns the first free block of at least `size` bytes, newest first, after marking it allocated.
    //
    //  #   Safety
    //
    //  -   Assumes the heap is consistent.
    unsafe fn find_fit<A>(&mut self, region: &mut Region<A>, size: usize) -> Option<usize> {
        let mut cursor = self.free.newest(region);

        while let Some(node) = cursor {
            let block = Self::block_of(node);
            let available = Self::size(region, block);

            if available >= size {
                self.place(region, block, available, size);
                return Some(block);
            }

            cursor = self.free.older(region, node);
        }

        None
    }

    //  Marks the free `block` allocated, splitting off the excess as a free block if large enough to stand on its own.
    //
    //  #   Safety
    //
    //  -   Assumes `block` is a listed free block of `available` bytes, with `available >= size`.
    unsafe fn place<A>(&mut self, region: &mut Region<A>, block: usize, available: usize, size: usize) {
        debug_assert!(available >= size, "{} < {}", available, size);

        self.free.remove(region, Self::payload(block));

        //  The remainder needs its own header and footer, and room for a node.
        if available - size < ALIGNMENT.value() + Self::MINIMUM_SIZE {
            Self::set_tags(region, block, available, true);
            return;
        }

        let remainder = Self::payload(block) + size;
        let leftover = available - size - ALIGNMENT.value();

        trace!("split: block {:#x} of {} bytes, remainder {:#x} of {} bytes", block, available, remainder, leftover);

        Self::set_tags(region, block, size, true);
        Self::set_tags(region, remainder, leftover, false);

        self.free.push(region, Self::payload(remainder));
    }

    //  Merges the freshly freed `block` with its free neighbours, if any.
    //
    //  The merged size is computed once, from the original sizes, and written once.
    //
    //  #   Safety
    //
    //  -   Assumes `block` is free, listed, and that the heap is otherwise consistent.
    unsafe fn coalesce<A>(&mut self, region: &mut Region<A>, block: usize) {
        let unit = ALIGNMENT.value();
        let size = Self::size(region, block);

        let previous_free = !Self::is_previous_allocated(region, block);
        let next_free = !Self::is_next_allocated(region, block);

        let (survivor, merged) = match (previous_free, next_free) {
            (false, false) => return,
            (true, false) => {
                let previous = Self::previous_of(region, block);

                self.free.remove(region, Self::payload(block));

                (previous, Self::size(region, previous) + unit + size)
            },
            (false, true) => {
                let next = Self::next_of(region, block);

                self.free.remove(region, Self::payload(next));

                (block, size + unit + Self::size(region, next))
            },
            (true, true) => {
                let previous = Self::previous_of(region, block);
                let next = Self::next_of(region, block);

                self.free.remove(region, Self::payload(block));
                self.free.remove(region, Self::payload(next));

                (previous, Self::size(region, previous) + size + Self::size(region, next) + 2 * unit)
            },
        };

        trace!("coalesce: block {:#x} absorbs its neighbours, now {} bytes", survivor, merged);

        Self::set_tags(region, survivor, merged, false);
    }
}

impl FreeSpace for ExplicitList {
    fn initialize<A: Arena>(&mut self, region: &mut Region<A>) -> Option<()> {
        region.reanchor()?;

        //  Sentinels, prologue and epilogue add up to a multiple of ALIGNMENT, hence the first payload, which
        //  follows them, is aligned as the anchor is.
        region.grow(2 * NODE_SIZE + 2 * WORD_SIZE)?;

        let first = 0;
        let last = first + NODE_SIZE;
        let prologue = last + NODE_SIZE;

        //  Safety:
        //  -   The sentinels, prologue and epilogue were just obtained from the arena.
        unsafe {
            region.set_word(prologue, Tag::SENTINEL.word());
            region.set_word(Self::header(prologue), Tag::SENTINEL.word());

            self.free = FreeList::initialize(region, first, last);
        }

        self.prologue = prologue;

        Some(())
    }

    fn allocate<A: Arena>(&mut self, region: &mut Region<A>, size: usize) -> Option<usize> {
        let size = Self::required_size(size)?;

        //  Safety:
        //  -   The heap is consistent between two calls.
        if let Some(block) = unsafe { self.find_fit(region, size) } {
            return Some(Self::payload(block));
        }

        //  The payload, its footer, and the new epilogue; the old epilogue becomes the header.
        let fresh = region.grow(size.checked_add(ALIGNMENT.value())?)?;
        let block = fresh - ALIGNMENT.value();

        //  Safety:
        //  -   `[block, fresh)` holds the last footer, or prologue, and the old epilogue.
        //  -   `[fresh, fresh + size + ALIGNMENT)` was just obtained from the arena.
        unsafe {
            Self::set_tags(region, block, size, true);

            let epilogue = Self::header(Self::next_of(region, block));
            region.set_word(epilogue, Tag::SENTINEL.word());
        }

        Some(Self::payload(block))
    }

    unsafe fn deallocate<A: Arena>(&mut self, region: &mut Region<A>, payload: usize) {
        let block = Self::block_of(payload);
        let size = Self::size(region, block);

        debug_assert!(region.tag(Self::header(block)).is_allocated(), "Double free of block {:#x}", block);

        Self::set_tags(region, block, size, false);

        self.free.push(region, payload);

        self.coalesce(region, block);
    }

    unsafe fn capacity<A: Arena>(&self, region: &Region<A>, payload: usize) -> usize {
        Self::size(region, Self::block_of(payload))
    }

    fn first_block<A: Arena>(&self, region: &Region<A>) -> Option<usize> {
        if !region.is_anchored() || region.len() == 0 {
            return None;
        }

        //  Safety:
        //  -   The prologue and the header following it were laid out on initialization.
        Some(self.prologue).filter(|&block| unsafe { Self::size(region, block) } != 0)
    }

    unsafe fn next_block<A: Arena>(&self, region: &Region<A>, block: usize) -> Option<usize> {
        let next = Self::next_of(region, block);

        Some(next).filter(|&next| Self::size(region, next) != 0)
    }

    unsafe fn describe<A: Arena>(&self, region: &Region<A>, block: usize) -> RawBlock {
        let tag = region.tag(Self::header(block));

        RawBlock { payload: Self::payload(block), size: tag.size(), allocated: tag.is_allocated() }
    }

    fn check<A: Arena>(&self, region: &Region<A>) -> Result<(), HeapError> {
        let heap_size = region.len();

        if heap_size == 0 {
            return Ok(());
        }

        //  Safety:
        //  -   The prologue was laid out on initialization.
        if unsafe { region.tag(self.prologue) } != Tag::SENTINEL {
            return Err(HeapError::BadSentinel { offset: self.prologue });
        }

        let mut block = self.prologue;
        let mut free_blocks = 0;
        let mut previous_free: Option<usize> = None;

        loop {
            let header = Self::header(block);

            if header + WORD_SIZE > heap_size {
                return Err(HeapError::TruncatedHeap { offset: header, heap_size });
            }

            //  Safety:
            //  -   `[header, header + WORD_SIZE)` is within the region, as checked above.
            let tag = unsafe { region.tag(header) };
            let size = tag.size();

            if size == 0 {
                if !tag.is_allocated() {
                    return Err(HeapError::BadSentinel { offset: header });
                }

                if header + WORD_SIZE != heap_size {
                    return Err(HeapError::TruncatedHeap { offset: header + WORD_SIZE, heap_size });
                }

                break;
            }

            if !tag.is_well_sized() {
                return Err(HeapError::InvalidSize { offset: block, size });
            }

            if region.address(Self::payload(block)) % ALIGNMENT != 0 {
                return Err(HeapError::Misaligned { offset: block });
            }

            //  The footer, then at least the epilogue.
            let footer = match Self::payload(block).checked_add(size) {
                Some(footer) if footer + 2 * WORD_SIZE <= heap_size => footer,
                _ => return Err(HeapError::OutOfBounds { offset: block, size, heap_size }),
            };

            //  Safety:
            //  -   `[footer, footer + WORD_SIZE)` is within the region, as checked above.
            if unsafe { region.tag(footer) } != tag {
                return Err(HeapError::TagMismatch { offset: block });
            }

            if !tag.is_allocated() {
                if let Some(previous) = previous_free {
                    return Err(HeapError::AdjacentFree { offset: previous });
                }

                free_blocks += 1;
                previous_free = Some(block);
            } else {
                previous_free = None;
            }

            block = footer;
        }

        let is_free = |node: usize| {
            //  Safety:
            //  -   `node` is within the region, and past the prologue, as checked by `FreeList::check`.
            let tag = unsafe { region.tag(node - WORD_SIZE) };

            !tag.is_allocated() && tag.is_well_sized()
        };

        self.free.check(region, Self::payload(self.prologue), free_blocks, is_free)
    }
}

// mod tests
