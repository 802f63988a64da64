//! Implementation of Linux specific calls.

use core::ptr;

use log::debug;

use tagalloc_core::Arena;

/// Implementation of the Arena trait, for Linux.
///
/// The arena reserves a range of virtual memory up-front, without committing it, then hands it out linearly: the
/// kernel only backs the pages actually touched.
pub struct MmapArena {
    base: ptr::NonNull<u8>,
    capacity: usize,
    len: usize,
}

impl MmapArena {
    /// Reserves `capacity` bytes of address space.
    ///
    /// Returns None if `capacity` is 0, or if the address space cannot be reserved.
    pub fn reserve(capacity: usize) -> Option<Self> {
        let base = mmap_reserve(capacity)?;

        debug!("reserve: {} bytes at {:x}", capacity, base.as_ptr() as usize);

        Some(Self { base, capacity, len: 0 })
    }

    /// Returns the number of bytes reserved.
    pub fn capacity(&self) -> usize { self.capacity }

    /// Returns the number of bytes handed out.
    pub fn len(&self) -> usize { self.len }

    /// Returns whether no byte was handed out yet.
    pub fn is_empty(&self) -> bool { self.len == 0 }
}

unsafe impl Arena for MmapArena {
    fn grow(&mut self, bytes: usize) -> Option<ptr::NonNull<u8>> {
        if bytes > self.capacity - self.len {
            return None;
        }

        //  Safety:
        //  -   `self.len` is at most `self.capacity`, hence the result is within the reservation, or pointing to its end.
        let fresh = unsafe { self.base.as_ptr().add(self.len) };

        self.len += bytes;

        ptr::NonNull::new(fresh)
    }
}

impl Drop for MmapArena {
    fn drop(&mut self) {
        //  Safety:
        //  -   `self.base` points to a `mmap`ed area of `self.capacity` bytes.
        //  -   The arena being dropped, its memory is no longer in use.
        unsafe { munmap_deallocate(self.base.as_ptr(), self.capacity) };
    }
}

//  Safety:
//  -   The reservation is exclusively owned by the arena.
unsafe impl Send for MmapArena {}

//  Wrapper around `mmap`.
//
//  Returns a pointer to `size` bytes of readable and writable memory, aligned on a page boundary, whose pages are only
//  committed on first touch.
fn mmap_reserve(size: usize) -> Option<ptr::NonNull<u8>> {
    if size == 0 {
        return None;
    }

    let length = size;
    let prot = libc::PROT_READ | libc::PROT_WRITE;
    let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;

    //  No specific address hint.
    let addr = ptr::null_mut();
    //  When used in conjunction with MAP_ANONYMOUS, fd is mandated to be -1 on some implementations.
    let fd = -1;
    //  When used in conjunction with MAP_ANONYMOUS, offset is mandated to be 0 on some implementations.
    let offset = 0;

    //  Safety:
    //  -   `addr`, `fd`, and `offset` are suitable for MAP_ANONYMOUS.
    let result = unsafe { libc::mmap(addr, length, prot, flags, fd, offset) };

    let result = if result != libc::MAP_FAILED { result as *mut u8 } else { ptr::null_mut() };
    ptr::NonNull::new(result)
}

//  Wrapper around `munmap`.
//
//  #   Panics
//
//  If `munmap` returns a non-0 result.
//
//  #   Safety
//
//  -   Assumes that `addr` points to a `mmap`ed area of at least `size` bytes.
//  -   Assumes that the range `[addr, addr + size)` is no longer in use.
unsafe fn munmap_deallocate(addr: *mut u8, size: usize) {
    let result = libc::munmap(addr as *mut libc::c_void, size);
    assert!(result == 0, "Could not munmap {:x}, {}: {}", addr as usize, size, result);
}

#[cfg(test)]
mod tests {

use super::*;

#[test]
fn mmap_arena_reserve() {
    assert!(MmapArena::reserve(0).is_none());

    let arena = MmapArena::reserve(1 << 20).expect("Reserved");

    assert_eq!(1 << 20, arena.capacity());
    assert!(arena.is_empty());
}

#[test]
fn mmap_arena_grow() {
    let mut arena = MmapArena::reserve(4096).expect("Reserved");

    let base = arena.grow(0).expect("High-water mark");
    let first = arena.grow(64).expect("Grown");
    let second = arena.grow(32).expect("Grown");

    assert_eq!(base, first);
    assert_eq!(first.as_ptr() as usize + 64, second.as_ptr() as usize);
    assert_eq!(96, arena.len());

    //  Fresh pages are readable and writable.
    unsafe {
        ptr::write_bytes(first.as_ptr(), 0xAB, 96);
        assert_eq!(0xAB, *second.as_ptr().add(31));
    }

    assert_eq!(None, arena.grow(4096));
    assert_eq!(96, arena.len());

    assert!(arena.grow(4000).is_some());
    assert_eq!(None, arena.grow(1));
}

}
