//! Replays traces against a Heap.

use std::{collections::HashMap, error, fmt, ptr::NonNull};

use tagalloc_core::{ALIGNMENT, Arena, Heap, HeapError};

use super::{
    shadow::{Shadow, ShadowError},
    trace::{Operation, Trace},
};

/// A failure while replaying a trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayError {
    /// The heap could not satisfy a request.
    Exhausted {
        /// Index of the operation.
        step: usize,
        /// Number of bytes requested.
        size: usize,
    },
    /// An identifier was allocated while still live.
    DuplicateId {
        /// Index of the operation.
        step: usize,
        /// Identifier of the allocation.
        id: usize,
    },
    /// An identifier was freed, or reallocated, while not live.
    UnknownId {
        /// Index of the operation.
        step: usize,
        /// Identifier of the allocation.
        id: usize,
    },
    /// The usable size of a payload is less than requested.
    Undersized {
        /// Index of the operation.
        step: usize,
        /// Number of bytes requested.
        size: usize,
        /// Number of bytes usable.
        usable: usize,
    },
    /// The live payloads violate the guarantees of the heap.
    Shadow {
        /// Index of the operation.
        step: usize,
        /// Violation.
        error: ShadowError,
    },
    /// The heap is inconsistent.
    Heap {
        /// Index of the operation.
        step: usize,
        /// Inconsistency.
        error: HeapError,
    },
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ReplayError::Exhausted { step, size } => write!(f, "step {}: failed to allocate {} bytes", step, size),
            ReplayError::DuplicateId { step, id } => write!(f, "step {}: allocation {} is already live", step, id),
            ReplayError::UnknownId { step, id } => write!(f, "step {}: allocation {} is not live", step, id),
            ReplayError::Undersized { step, size, usable } =>
                write!(f, "step {}: {} bytes requested, only {} usable", step, size, usable),
            ReplayError::Shadow { step, error } => write!(f, "step {}: {}", step, error),
            ReplayError::Heap { step, error } => write!(f, "step {}: {}", step, error),
        }
    }
}

impl error::Error for ReplayError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            ReplayError::Shadow { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Replayer.
///
/// Owns a Heap, and applies operations to it, filling each payload with a pattern derived from its identifier. After
/// each operation, the heap is checked for consistency, and every live payload for its pattern.
pub struct Replayer<A> {
    heap: Heap<A>,
    shadow: Shadow,
    pointers: HashMap<usize, NonNull<u8>>,
    steps: usize,
}

impl<A> Replayer<A>
    where
        A: Arena,
{
    /// Creates an instance, driving `heap`.
    pub fn new(heap: Heap<A>) -> Self {
        Self { heap, shadow: Shadow::new(ALIGNMENT.value()), pointers: HashMap::new(), steps: 0 }
    }

    /// Returns a reference to the heap.
    pub fn heap(&self) -> &Heap<A> { &self.heap }

    /// Returns the heap, forgetting about the live allocations.
    pub fn into_heap(self) -> Heap<A> { self.heap }

    /// Returns the shadow model of the live allocations.
    pub fn shadow(&self) -> &Shadow { &self.shadow }

    /// Returns the number of operations applied so far.
    pub fn steps(&self) -> usize { self.steps }

    /// Applies every operation of `trace`, stopping at the first failure.
    pub fn run(&mut self, trace: &Trace) -> Result<(), ReplayError> {
        trace.operations().iter().try_for_each(|operation| self.apply(*operation))
    }

    /// Applies a single operation.
    pub fn apply(&mut self, operation: Operation) -> Result<(), ReplayError> {
        let step = self.steps;
        self.steps += 1;

        match operation {
            Operation::Allocate { id, size } => {
                self.ensure_fresh(step, id)?;

                let pointer = self.heap.allocate(size).ok_or(ReplayError::Exhausted { step, size })?;

                self.track(step, id, pointer, size)?;
            },
            Operation::ZeroAllocate { id, count, size } => {
                self.ensure_fresh(step, id)?;

                let bytes = count.saturating_mul(size);
                let pointer = self.heap.zero_allocate(count, size).ok_or(ReplayError::Exhausted { step, size: bytes })?;

                //  Safety:
                //  -   `pointer` is valid for `bytes` bytes.
                unsafe { Shadow::verify_bytes(pointer, bytes, 0) }
                    .map_err(|error| ReplayError::Shadow { step, error })?;

                self.track(step, id, pointer, bytes)?;
            },
            Operation::Free { id } => {
                let pointer = self.pointers.remove(&id).ok_or(ReplayError::UnknownId { step, id })?;

                self.shadow.remove(pointer);

                //  Safety:
                //  -   `pointer` was allocated by `self.heap`, and is forgotten from now on.
                unsafe { self.heap.free(Some(pointer)) };
            },
            Operation::Reallocate { id, size } => {
                let old = *self.pointers.get(&id).ok_or(ReplayError::UnknownId { step, id })?;
                let allocation = self.shadow.get(old).ok_or(ReplayError::UnknownId { step, id })?;

                //  Safety:
                //  -   `old` was allocated by `self.heap`, and is forgotten on success.
                let new = unsafe { self.heap.reallocate(Some(old), size) };

                if size == 0 {
                    self.pointers.remove(&id);
                    self.shadow.remove(old);
                } else {
                    //  On failure, the original allocation is left untouched, and remains tracked.
                    let new = new.ok_or(ReplayError::Exhausted { step, size })?;

                    self.pointers.remove(&id);
                    self.shadow.remove(old);

                    //  Safety:
                    //  -   `new` is valid for `size` bytes, hence for the preserved prefix.
                    unsafe { Shadow::verify_bytes(new, allocation.size.min(size), allocation.pattern) }
                        .map_err(|error| ReplayError::Shadow { step, error })?;

                    self.track(step, id, new, size)?;
                }
            },
        }

        self.verify(step)
    }

    /// Frees every live allocation, verifying the heap after each.
    pub fn release_all(&mut self) -> Result<(), ReplayError> {
        let mut ids: Vec<usize> = self.pointers.keys().copied().collect();
        ids.sort_unstable();

        ids.into_iter().try_for_each(|id| self.apply(Operation::Free { id }))
    }

    fn ensure_fresh(&self, step: usize, id: usize) -> Result<(), ReplayError> {
        if self.pointers.contains_key(&id) {
            return Err(ReplayError::DuplicateId { step, id });
        }

        Ok(())
    }

    fn track(&mut self, step: usize, id: usize, pointer: NonNull<u8>, size: usize) -> Result<(), ReplayError> {
        //  Safety:
        //  -   `pointer` was just handed out by `self.heap`, and is live.
        let usable = unsafe { self.heap.usable_size(pointer) };

        if usable < size {
            return Err(ReplayError::Undersized { step, size, usable });
        }

        //  Safety:
        //  -   `pointer` is valid for `size` bytes.
        unsafe { self.shadow.insert(pointer, size, Self::pattern(id)) }
            .map_err(|error| ReplayError::Shadow { step, error })?;

        self.pointers.insert(id, pointer);

        Ok(())
    }

    fn verify(&self, step: usize) -> Result<(), ReplayError> {
        self.heap.check_heap().map_err(|error| ReplayError::Heap { step, error })?;

        //  Safety:
        //  -   All live allocations are tracked, and still allocated.
        unsafe { self.shadow.verify() }.map_err(|error| ReplayError::Shadow { step, error })
    }

    //  Never 0, so that zeroed memory is told apart.
    fn pattern(id: usize) -> u8 { (id % 255) as u8 + 1 }
}
