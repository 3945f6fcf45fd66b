//! Backing storage for the arena.
//!
//! The allocator never talks to the kernel directly. It owns one [`Backing`],
//! a single contiguous reservation that may or may not be accessible from the
//! start:
//!
//! - [`VirtualMemory`] reserves address space up front and commits it one page
//!   at a time as the stacks grow towards each other.
//! - [`HeapMemory`] takes one eagerly allocated buffer from the global allocator.
//!   It is portable and handy for tests that must not depend on the OS.

use std::{
    alloc::{self, Layout},
    ptr::NonNull,
};

use tracing::debug;

use crate::{kernel, utils::align};

/// Alignment of the [`HeapMemory`] buffer. Matches a typical page so that
/// offsets computed on top of it behave like those of a fresh mapping.
pub const HEAP_ALIGNMENT: usize = 4096;

/// A contiguous reservation the arena lives in.
///
/// # Safety
///
/// Implementors guarantee that `base()` points to a reservation of at least
/// `len()` bytes that stays at the same address for the lifetime of the value,
/// and that every byte of `[offset, offset + len)` is valid for reads and writes
/// after `commit(offset, len)` returned `true` (or from the start when
/// `is_committed()` is `true`).
pub unsafe trait Backing {
    /// Number of reserved bytes.
    fn len(&self) -> usize;

    /// Granularity of [`Backing::commit`]. Always a power of two.
    fn page_size(&self) -> usize;

    /// Start of the reservation.
    fn base(&self) -> NonNull<u8>;

    /// `true` if the whole reservation can be used without committing anything.
    fn is_committed(&self) -> bool;

    /// Makes `[offset, offset + len)` accessible. `offset` and `len` are
    /// multiples of [`Backing::page_size`] (except for the tail of the reservation).
    fn commit(&mut self, offset: usize, len: usize) -> bool;
}

/// Address space reserved with the platform virtual memory API and committed lazily.
#[derive(Debug)]
pub struct VirtualMemory {
    base: NonNull<u8>,
    len: usize,
    page_size: usize,
}

impl VirtualMemory {
    /// Reserves at least `capacity` bytes (and at least one page), rounded up to
    /// whole pages. Nothing is committed yet.
    pub fn reserve(capacity: usize) -> Option<Self> {
        let page_size = kernel::page_size();
        let len = align(capacity.max(1), page_size)?;

        let base = unsafe { kernel::reserve(len) };

        match base {
            Some(base) => {
                debug!(len, page_size, "reserved virtual memory");
                Some(Self { base, len, page_size })
            }
            None => {
                debug!(len, "virtual memory reservation failed");
                None
            }
        }
    }
}

unsafe impl Backing for VirtualMemory {
    fn len(&self) -> usize {
        self.len
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn base(&self) -> NonNull<u8> {
        self.base
    }

    fn is_committed(&self) -> bool {
        false
    }

    fn commit(&mut self, offset: usize, len: usize) -> bool {
        if offset.checked_add(len).is_none_or(|end| end > self.len) {
            return false;
        }

        unsafe { kernel::commit(self.base.add(offset), len) }
    }
}

impl Drop for VirtualMemory {
    fn drop(&mut self) {
        unsafe { kernel::release(self.base, self.len) };
    }
}

/// One eagerly allocated, zeroed buffer taken from the global allocator.
#[derive(Debug)]
pub struct HeapMemory {
    base: NonNull<u8>,
    layout: Layout,
}

impl HeapMemory {
    /// Allocates `capacity` bytes (at least one) aligned to [`HEAP_ALIGNMENT`].
    pub fn allocate(capacity: usize) -> Option<Self> {
        let layout = Layout::from_size_align(capacity.max(1), HEAP_ALIGNMENT).ok()?;

        // SAFETY: layout has a nonzero size.
        let base = NonNull::new(unsafe { alloc::alloc_zeroed(layout) });

        match base {
            Some(base) => Some(Self { base, layout }),
            None => {
                debug!(len = layout.size(), "heap allocation for arena failed");
                None
            }
        }
    }
}

unsafe impl Backing for HeapMemory {
    fn len(&self) -> usize {
        self.layout.size()
    }

    fn page_size(&self) -> usize {
        HEAP_ALIGNMENT
    }

    fn base(&self) -> NonNull<u8> {
        self.base
    }

    fn is_committed(&self) -> bool {
        true
    }

    fn commit(&mut self, offset: usize, len: usize) -> bool {
        offset.checked_add(len).is_some_and(|end| end <= self.len())
    }
}

impl Drop for HeapMemory {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) };
    }
}

/// The backing picked by [`crate::StackConfig::lazy_growth`].
#[derive(Debug)]
pub enum Memory {
    Virtual(VirtualMemory),
    Heap(HeapMemory),
}

impl Memory {
    /// Reserves `capacity` bytes, lazily committed if `lazy` is set.
    pub fn reserve(capacity: usize, lazy: bool) -> Option<Self> {
        if lazy {
            VirtualMemory::reserve(capacity).map(Self::Virtual)
        } else {
            HeapMemory::allocate(capacity).map(Self::Heap)
        }
    }
}

unsafe impl Backing for Memory {
    fn len(&self) -> usize {
        match self {
            Self::Virtual(memory) => memory.len(),
            Self::Heap(memory) => memory.len(),
        }
    }

    fn page_size(&self) -> usize {
        match self {
            Self::Virtual(memory) => memory.page_size(),
            Self::Heap(memory) => memory.page_size(),
        }
    }

    fn base(&self) -> NonNull<u8> {
        match self {
            Self::Virtual(memory) => memory.base(),
            Self::Heap(memory) => memory.base(),
        }
    }

    fn is_committed(&self) -> bool {
        match self {
            Self::Virtual(memory) => memory.is_committed(),
            Self::Heap(memory) => memory.is_committed(),
        }
    }

    fn commit(&mut self, offset: usize, len: usize) -> bool {
        match self {
            Self::Virtual(memory) => memory.commit(offset, len),
            Self::Heap(memory) => memory.commit(offset, len),
        }
    }
}
