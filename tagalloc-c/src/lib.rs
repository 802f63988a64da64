#![deny(missing_docs)]

//! Exposition of TagAllocator API via a C ABI.
//!
//! All functions operate on a single process-wide heap, reserving `tagalloc::DEFAULT_CAPACITY` bytes of address space
//! on first use. The strategy is the explicit free list, unless the `implicit-list` feature is enabled.
//!
//! #   Warning
//!
//! The process-wide heap is not synchronized: none of these functions may be called concurrently.

use std::{cell::UnsafeCell, ptr::{self, NonNull}};

use log::{info, warn};

use tagalloc::{Strategy, TagAllocator};

/// Discards the process-wide heap, if any, and prepares a fresh one.
///
/// Returns 0 on success, and -1 otherwise. All pointers previously handed out become dangling.
///
/// #   Safety
///
/// -   Assumes no other function of this library is executing concurrently.
#[cold]
#[no_mangle]
pub unsafe extern "C" fn tag_init() -> i32 {
    match HEAP.reset().map(|allocator| allocator.initialize()) {
        Some(Ok(())) => 0,
        _ => -1,
    }
}

/// Allocates `size` bytes of memory, aligned on twice the size of a pointer.
///
/// Returns NULL if the allocation fails.
///
/// #   Safety
///
/// -   Assumes no other function of this library is executing concurrently.
#[no_mangle]
pub unsafe extern "C" fn tag_malloc(size: usize) -> *mut u8 {
    into_raw(HEAP.get().and_then(|allocator| allocator.allocate(size)))
}

/// Deallocates the memory located at `pointer`; does nothing if `pointer` is NULL.
///
/// #   Safety
///
/// -   Assumes no other function of this library is executing concurrently.
/// -   Assumes `pointer` is NULL, or has been returned by a prior call to `tag_malloc`, `tag_calloc`, or `tag_realloc`
///     since the last call to `tag_init`.
/// -   Assumes `pointer` has not been deallocated since its allocation.
/// -   Assumes the memory pointed by `pointer` is no longer in use.
#[no_mangle]
pub unsafe extern "C" fn tag_free(pointer: *mut u8) {
    let pointer = match NonNull::new(pointer) {
        Some(pointer) => pointer,
        None => return,
    };

    if let Some(allocator) = HEAP.get() {
        allocator.deallocate(pointer);
    }
}

/// Resizes the memory located at `pointer` to `size` bytes, preserving its content up to the lesser of both sizes.
///
/// -   If `pointer` is NULL, behaves as `tag_malloc(size)`.
/// -   If `size` is 0, behaves as `tag_free(pointer)` and returns NULL.
/// -   If the allocation fails, returns NULL and leaves the memory located at `pointer` untouched.
///
/// #   Safety
///
/// -   As per `tag_free`.
#[no_mangle]
pub unsafe extern "C" fn tag_realloc(pointer: *mut u8, size: usize) -> *mut u8 {
    into_raw(HEAP.get().and_then(|allocator| allocator.reallocate(NonNull::new(pointer), size)))
}

/// Allocates `count * size` bytes of zeroed memory, aligned on twice the size of a pointer.
///
/// Returns NULL if `count * size` overflows, or if the allocation fails.
///
/// #   Safety
///
/// -   Assumes no other function of this library is executing concurrently.
#[no_mangle]
pub unsafe extern "C" fn tag_calloc(count: usize, size: usize) -> *mut u8 {
    into_raw(HEAP.get().and_then(|allocator| allocator.zero_allocate(count, size)))
}

/// Returns the number of bytes usable at `pointer`, or 0 if `pointer` is NULL.
///
/// #   Safety
///
/// -   As per `tag_free`, except that the memory may still be in use.
#[no_mangle]
pub unsafe extern "C" fn tag_usable_size(pointer: *mut u8) -> usize {
    match (NonNull::new(pointer), HEAP.get()) {
        (Some(pointer), Some(allocator)) => allocator.usable_size(pointer),
        _ => 0,
    }
}

/// Verifies the consistency of the process-wide heap.
///
/// Returns 0 if the heap is consistent, or was never used, and -1 otherwise. If `verbose` is non-zero, the occupancy
/// of the heap is logged.
///
/// #   Safety
///
/// -   Assumes no other function of this library is executing concurrently.
#[cold]
#[no_mangle]
pub unsafe extern "C" fn tag_checkheap(verbose: i32) -> i32 {
    let allocator = match HEAP.peek() {
        Some(allocator) => allocator,
        None => return 0,
    };

    if verbose != 0 {
        info!("checkheap: {} heap of {} bytes, {:?}", allocator.strategy(), allocator.heap_size(), allocator.statistics());
    }

    match allocator.check_heap() {
        Ok(()) => 0,
        Err(error) => {
            warn!("checkheap: {}", error);
            -1
        },
    }
}

//
//  Implementation
//

const STRATEGY: Strategy = if cfg!(feature = "implicit-list") { Strategy::Implicit } else { Strategy::Explicit };

static HEAP: GlobalHeap = GlobalHeap(UnsafeCell::new(None));

//  The process-wide heap, created on first use.
struct GlobalHeap(UnsafeCell<Option<TagAllocator>>);

impl GlobalHeap {
    //  Returns the heap, creating it if need be.
    //
    //  #   Safety
    //
    //  -   Assumes no other reference to the heap is alive.
    unsafe fn get(&self) -> Option<&mut TagAllocator> {
        let slot = &mut *self.0.get();

        if slot.is_none() {
            *slot = TagAllocator::new(STRATEGY);
        }

        slot.as_mut()
    }

    //  Returns the heap, if created.
    //
    //  #   Safety
    //
    //  -   Assumes no mutable reference to the heap is alive.
    unsafe fn peek(&self) -> Option<&TagAllocator> { (*self.0.get()).as_ref() }

    //  Replaces the heap with a fresh one, releasing the previous reservation.
    //
    //  #   Safety
    //
    //  -   Assumes no other reference to the heap is alive.
    unsafe fn reset(&self) -> Option<&mut TagAllocator> {
        let slot = &mut *self.0.get();

        *slot = None;
        *slot = TagAllocator::new(STRATEGY);

        slot.as_mut()
    }
}

//  Safety:
//  -   The C ABI requires its callers not to call it concurrently.
unsafe impl Sync for GlobalHeap {}

fn into_raw(pointer: Option<NonNull<u8>>) -> *mut u8 { pointer.map_or(ptr::null_mut(), NonNull::as_ptr) }
