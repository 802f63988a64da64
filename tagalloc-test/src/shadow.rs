//! A shadow model of the live allocations of a heap.

use std::{collections::BTreeMap, error, fmt, ptr::NonNull, slice};

/// A live allocation, as recorded by the Shadow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    /// Number of bytes requested.
    pub size: usize,
    /// Byte the payload is filled with.
    pub pattern: u8,
}

/// A violation of the guarantees of an allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShadowError {
    /// A payload is not aligned as expected.
    Misaligned {
        /// Address of the payload.
        address: usize,
    },
    /// A payload overlaps with another live payload.
    Overlap {
        /// Address of the new payload.
        address: usize,
        /// Address of the live payload it overlaps with.
        other: usize,
    },
    /// A payload does not hold the expected bytes.
    Corrupted {
        /// Address of the payload.
        address: usize,
        /// Offset of the first unexpected byte.
        offset: usize,
        /// Expected byte.
        expected: u8,
        /// Actual byte.
        actual: u8,
    },
}

impl fmt::Display for ShadowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ShadowError::Misaligned { address } => write!(f, "payload {:#x} is misaligned", address),
            ShadowError::Overlap { address, other } =>
                write!(f, "payload {:#x} overlaps live payload {:#x}", address, other),
            ShadowError::Corrupted { address, offset, expected, actual } =>
                write!(f, "payload {:#x} holds {:#x} at offset {}, expected {:#x}", address, actual, offset, expected),
        }
    }
}

impl error::Error for ShadowError {}

/// Shadow.
///
/// Keeps track of the live allocations, by address, and of the pattern each was filled with.
#[derive(Debug)]
pub struct Shadow {
    alignment: usize,
    live: BTreeMap<usize, Allocation>,
}

impl Shadow {
    /// Creates an instance, expecting payloads aligned on `alignment`.
    pub fn new(alignment: usize) -> Self {
        assert!(alignment.is_power_of_two(), "{} is not a power of 2", alignment);

        Self { alignment, live: BTreeMap::new() }
    }

    /// Returns the number of live allocations.
    pub fn len(&self) -> usize { self.live.len() }

    /// Returns whether there is no live allocation.
    pub fn is_empty(&self) -> bool { self.live.is_empty() }

    /// Returns the sum of the sizes of the live allocations.
    pub fn live_bytes(&self) -> usize { self.live.values().map(|allocation| allocation.size).sum() }

    /// Returns the allocation at `pointer`, if live.
    pub fn get(&self, pointer: NonNull<u8>) -> Option<Allocation> { self.live.get(&(pointer.as_ptr() as usize)).copied() }

    /// Records a fresh allocation of `size` bytes at `pointer`, then fills it with `pattern`.
    ///
    /// Nothing is recorded, nor written, if the payload is misaligned or overlaps a live payload.
    ///
    /// #   Safety
    ///
    /// -   Assumes `pointer` is valid for writes of `size` bytes.
    pub unsafe fn insert(&mut self, pointer: NonNull<u8>, size: usize, pattern: u8) -> Result<(), ShadowError> {
        let address = pointer.as_ptr() as usize;

        if address % self.alignment != 0 {
            return Err(ShadowError::Misaligned { address });
        }

        if let Some((&other, allocation)) = self.live.range(..=address).next_back() {
            if other == address || other + allocation.size > address {
                return Err(ShadowError::Overlap { address, other });
            }
        }

        if let Some((&other, _)) = self.live.range(address..).next() {
            if other < address + size {
                return Err(ShadowError::Overlap { address, other });
            }
        }

        pointer.as_ptr().write_bytes(pattern, size);

        self.live.insert(address, Allocation { size, pattern });

        Ok(())
    }

    /// Forgets the allocation at `pointer`, returning it if it was live.
    pub fn remove(&mut self, pointer: NonNull<u8>) -> Option<Allocation> { self.live.remove(&(pointer.as_ptr() as usize)) }

    /// Verifies that the first `size` bytes at `pointer` all equal `pattern`.
    ///
    /// #   Safety
    ///
    /// -   Assumes `pointer` is valid for reads of `size` bytes.
    pub unsafe fn verify_bytes(pointer: NonNull<u8>, size: usize, pattern: u8) -> Result<(), ShadowError> {
        let bytes = slice::from_raw_parts(pointer.as_ptr(), size);

        match bytes.iter().position(|&byte| byte != pattern) {
            None => Ok(()),
            Some(offset) => Err(ShadowError::Corrupted {
                address: pointer.as_ptr() as usize,
                offset,
                expected: pattern,
                actual: bytes[offset],
            }),
        }
    }

    /// Verifies that every live allocation still holds its pattern.
    ///
    /// #   Safety
    ///
    /// -   Assumes every live allocation is still valid for reads.
    pub unsafe fn verify(&self) -> Result<(), ShadowError> {
        for (&address, allocation) in &self.live {
            //  Safety:
            //  -   Live addresses were obtained from non-null pointers.
            let pointer = NonNull::new_unchecked(address as *mut u8);

            Self::verify_bytes(pointer, allocation.size, allocation.pattern)?;
        }

        Ok(())
    }
}
