//! Arena
//!
//! The Arena trait is the sole source of memory of a Heap. By abstracting the underlying growth primitive, it becomes
//! possible to back a Heap by `sbrk`, a reserved range of virtual memory, or a plain buffer for testing purposes.

use core::ptr::NonNull;

/// Abstraction of a contiguous, monotonically growable, region of memory.
///
/// #   Safety
///
/// Implementors guarantee that:
///
/// -   A successful `grow(bytes)` returns the current high-water mark, then raises it by exactly `bytes`.
/// -   Successive regions are contiguous: the pointer returned by one call plus its `bytes` is the pointer returned by
///     the next call.
/// -   The memory returned is readable and writable, and remains valid and exclusive to the caller for as long as the
///     arena lives.
/// -   A failed call leaves the high-water mark untouched.
///
/// The high-water mark need not be aligned in any way.
pub unsafe trait Arena {
    /// Extends the region by `bytes`, returning a pointer to the start of the fresh space.
    ///
    /// Returns None if the region cannot be extended; `grow(0)` merely returns the current high-water mark.
    fn grow(&mut self, bytes: usize) -> Option<NonNull<u8>>;
}

unsafe impl<'a, A> Arena for &'a mut A
    where
        A: Arena + ?Sized,
{
    fn grow(&mut self, bytes: usize) -> Option<NonNull<u8>> { (**self).grow(bytes) }
}
