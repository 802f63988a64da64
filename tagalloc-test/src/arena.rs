//! An in-memory Arena, for tests.

use std::ptr::{self, NonNull};

use tagalloc_core::Arena;

//  The unit of storage, guaranteeing the alignment of the buffer.
#[derive(Clone, Copy)]
#[repr(C, align(16))]
struct Chunk([u8; 16]);

/// An Arena over a heap-allocated buffer of fixed capacity.
///
/// The arena counts the calls to `grow`, and the successful growths by a non-zero number of bytes, so that tests can
/// assert whether an operation did, or did not, extend the heap.
pub struct TestArena {
    buffer: NonNull<Chunk>,
    chunks: usize,
    len: usize,
    calls: usize,
    grows: usize,
}

impl TestArena {
    /// Creates an arena of at least `capacity` bytes, aligned on 16 bytes.
    pub fn new(capacity: usize) -> Self {
        let chunks = (capacity + 15) / 16;
        let buffer = vec!(Chunk([0; 16]); chunks).into_boxed_slice();

        //  Safety:
        //  -   `Box::into_raw` never returns null.
        let buffer = unsafe { NonNull::new_unchecked(Box::into_raw(buffer) as *mut Chunk) };

        Self { buffer, chunks, len: 0, calls: 0, grows: 0 }
    }

    /// Returns the capacity, in bytes.
    pub fn capacity(&self) -> usize { self.chunks * 16 }

    /// Returns the number of bytes handed out.
    pub fn len(&self) -> usize { self.len }

    /// Returns whether no byte was handed out yet.
    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Returns the number of calls to `grow`, successful or not.
    pub fn calls(&self) -> usize { self.calls }

    /// Returns the number of successful calls to `grow` by a non-zero number of bytes.
    pub fn grows(&self) -> usize { self.grows }

    /// Returns whether `pointer` points within the bytes handed out.
    pub fn contains(&self, pointer: NonNull<u8>) -> bool {
        let base = self.buffer.as_ptr() as usize;
        let address = pointer.as_ptr() as usize;

        address >= base && address < base + self.len
    }
}

unsafe impl Arena for TestArena {
    fn grow(&mut self, bytes: usize) -> Option<NonNull<u8>> {
        self.calls += 1;

        if bytes > self.capacity() - self.len {
            return None;
        }

        //  Safety:
        //  -   `self.len` is at most the capacity, hence the result is within the buffer, or pointing to its end.
        let fresh = unsafe { (self.buffer.as_ptr() as *mut u8).add(self.len) };

        self.len += bytes;

        if bytes > 0 {
            self.grows += 1;
        }

        NonNull::new(fresh)
    }
}

impl Drop for TestArena {
    fn drop(&mut self) {
        let slice = ptr::slice_from_raw_parts_mut(self.buffer.as_ptr(), self.chunks);

        //  Safety:
        //  -   `slice` was obtained from `Box::into_raw`, with the same length.
        drop(unsafe { Box::from_raw(slice) });
    }
}
