#![cfg_attr(not(test), no_std)]

#![deny(missing_docs)]

//! Building blocks for a boundary-tag allocator.
//!
//! tagalloc-core carves a single, contiguous, growable region of memory into blocks, and hands out their payloads. It
//! contains:
//! -   An arena trait, used to obtain the memory to be carved up, one contiguous extension at a time.
//! -   Two strategies to track free space: an implicit list, merging free blocks lazily, and an explicit free list,
//!     merging free blocks eagerly thanks to boundary tags.
//! -   A `Heap` façade, offering the malloc family of operations, and a consistency checker.

mod api;
mod internals;
mod utils;

pub use api::*;
pub use utils::{PowerOf2, ALIGNMENT, WORD_SIZE};
