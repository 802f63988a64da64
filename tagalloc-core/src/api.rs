//! The API of tagalloc-core.

mod arena;
mod error;
mod heap;
mod strategy;
mod walk;

pub use arena::Arena;
pub use error::HeapError;
pub use heap::Heap;
pub use strategy::Strategy;
pub use walk::{BlockInfo, Blocks, HeapStatistics};
