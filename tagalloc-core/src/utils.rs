//! A collection of utilities.

use core::{mem, ptr::NonNull};

mod power_of_2;

pub use power_of_2::PowerOf2;

/// The size of a machine word, the unit of all in-band metadata.
pub const WORD_SIZE: usize = mem::size_of::<usize>();

/// The alignment of every payload handed out, and the granularity of every block size.
//  Safety:
//  -   `usize` has a power of 2 size on every supported target, and so has twice that.
pub const ALIGNMENT: PowerOf2 = unsafe { PowerOf2::new_unchecked(2 * WORD_SIZE) };

/// Returns whether the pointer is sufficiently aligned for the given alignment.
pub(crate) fn is_sufficiently_aligned_for(ptr: NonNull<u8>, alignment: PowerOf2) -> bool {
    (ptr.as_ptr() as usize) % alignment == 0
}
