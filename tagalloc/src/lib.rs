#![no_std]
#![deny(missing_docs)]

//! A Boundary-Tag Memory Allocator library.
//!
//! The type `TagAllocator` provides a malloc-like allocator, carving a single reserved range of virtual memory into
//! blocks, with either of the strategies of tagalloc-core.
//!
//! #   Warning
//!
//! This allocator is single-threaded: it requires exclusive access for every operation, and is thus not suitable as a
//! global allocator without external synchronization.

mod allocator;
mod platform;

pub use allocator::{DEFAULT_CAPACITY, TagAllocator};
pub use tagalloc_core::{ALIGNMENT, BlockInfo, Blocks, HeapError, HeapStatistics, Strategy};

#[cfg(target_os = "linux")]
pub use platform::MmapArena;
