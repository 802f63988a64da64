#![deny(missing_docs)]

//! Test tooling for tagalloc.
//!
//! -   `TestArena`, an in-memory arena of fixed capacity, recording how it is grown.
//! -   `Shadow`, a model of the live allocations, verifying alignment, disjointness, and byte fidelity.
//! -   `Trace`, a sequence of allocation requests, either parsed from text or generated at random.
//! -   `Replayer`, which replays a `Trace` against a `Heap`, verifying the heap after each step.

mod arena;
mod replay;
mod shadow;
mod trace;

pub use arena::TestArena;
pub use replay::{Replayer, ReplayError};
pub use shadow::{Allocation, Shadow, ShadowError};
pub use trace::{Operation, ParseError, Trace};
