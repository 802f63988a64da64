//! Errors reported by a Heap.
//!
//! Allocation failures are signalled by `None`; `HeapError` is reserved for initialization and for the verdicts of the
//! consistency checker. Offsets are relative to the start of the heap.

use core::fmt;

/// HeapError.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeapError {
    /// The arena could not be grown.
    Exhausted,
    /// A payload is not aligned on `ALIGNMENT`.
    Misaligned {
        /// Offset of the block.
        offset: usize,
    },
    /// A block size is zero, or not a multiple of `ALIGNMENT`.
    InvalidSize {
        /// Offset of the block.
        offset: usize,
        /// Declared size.
        size: usize,
    },
    /// A block extends past the end of the heap.
    OutOfBounds {
        /// Offset of the block.
        offset: usize,
        /// Declared size.
        size: usize,
        /// Number of bytes of the heap.
        heap_size: usize,
    },
    /// The walk over the blocks stopped short of the end of the heap.
    TruncatedHeap {
        /// Offset at which the walk stopped.
        offset: usize,
        /// Number of bytes of the heap.
        heap_size: usize,
    },
    /// The prologue or epilogue is not a zero-sized allocated tag.
    BadSentinel {
        /// Offset of the sentinel.
        offset: usize,
    },
    /// The header of a block disagrees with its footer.
    TagMismatch {
        /// Offset of the block.
        offset: usize,
    },
    /// Two address-adjacent blocks are both free.
    AdjacentFree {
        /// Offset of the first of the two blocks.
        offset: usize,
    },
    /// A free-list link points outside the heap, to an allocated block, or is not mirrored by its target.
    BrokenLink {
        /// Offset of the node.
        node: usize,
    },
    /// The free list does not contain exactly the free blocks of the heap.
    UnlistedFree {
        /// Number of free blocks found by walking the heap.
        free_blocks: usize,
        /// Number of nodes found by walking the free list.
        listed: usize,
    },
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use HeapError::*;

        match *self {
            Exhausted => write!(f, "arena exhausted"),
            Misaligned { offset } => write!(f, "block at {:#x} has a misaligned payload", offset),
            InvalidSize { offset, size } => write!(f, "block at {:#x} has invalid size {}", offset, size),
            OutOfBounds { offset, size, heap_size } =>
                write!(f, "block at {:#x} of size {} overruns heap of {} bytes", offset, size, heap_size),
            TruncatedHeap { offset, heap_size } =>
                write!(f, "block walk stopped at {:#x} in heap of {} bytes", offset, heap_size),
            BadSentinel { offset } => write!(f, "sentinel at {:#x} is not a zero-sized allocated tag", offset),
            TagMismatch { offset } => write!(f, "block at {:#x} has mismatched header and footer", offset),
            AdjacentFree { offset } => write!(f, "block at {:#x} and its successor are both free", offset),
            BrokenLink { node } => write!(f, "free list node at {:#x} is corrupted", node),
            UnlistedFree { free_blocks, listed } =>
                write!(f, "{} free blocks in heap, but {} in free list", free_blocks, listed),
        }
    }
}
