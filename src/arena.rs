//! The arena: one reservation, the part of it handed to the two stacks and
//! the part of it that is committed.
//!
//! Every read and write the allocator does goes through here as an offset
//! into the reservation. Nothing outside this file turns an offset into a
//! reference, and nothing here hands out a reference to memory that is not
//! committed.
//!
//! ```text
//!  0                                                            capacity  len
//!  +------------------+--------------------------+------------------+----+
//!  |  committed from  |      not committed       |  committed from  |    |
//!  |    the front     |                          |     the back     |    |
//!  +------------------+--------------------------+------------------+----+
//!                     ^                          ^
//!              committed_front            committed_back
//! ```
//!
//! Both limits only ever move inward. Once they meet the whole reservation is
//! committed and no more commits are issued.

use std::{ops::Range, ptr::NonNull, slice};

use tracing::debug;

use crate::{
    block::{CANARY, CANARY_SIZE, METADATA_SIZE, Metadata},
    error::AllocError,
    memory::Backing,
    utils::{align, align_down},
};

#[derive(Debug)]
pub(crate) struct Arena<B: Backing> {
    memory: B,
    /// Usable bytes, never more than the reservation.
    capacity: usize,
    page_size: usize,
    committed_front: usize,
    committed_back: usize,
}

impl<B: Backing> Arena<B> {
    pub fn new(memory: B, capacity: usize) -> Self {
        let len = memory.len();
        let page_size = memory.page_size();

        let (committed_front, committed_back) = if memory.is_committed() { (len, 0) } else { (0, len) };

        Self {
            capacity: capacity.min(len),
            memory,
            page_size,
            committed_front,
            committed_back,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Bytes currently backed by committed pages.
    pub fn committed(&self) -> usize {
        if self.fronts_met() {
            self.memory.len()
        } else {
            self.committed_front + (self.memory.len() - self.committed_back)
        }
    }

    #[inline]
    fn fronts_met(&self) -> bool {
        self.committed_back <= self.committed_front
    }

    /// Pointer to the byte at `offset`. Only meaningful for offsets the caller
    /// knows to be inside the arena.
    #[inline]
    pub fn ptr(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset <= self.memory.len());

        unsafe { self.memory.base().add(offset) }
    }

    /// Smallest offset `>= offset` whose absolute address is a multiple of `alignment`.
    pub fn align_up(&self, offset: usize, alignment: usize) -> Option<usize> {
        let base = self.memory.base().as_ptr() as usize;

        align(base.checked_add(offset)?, alignment)?.checked_sub(base)
    }

    /// Largest offset `<= offset` whose absolute address is a multiple of `alignment`.
    pub fn align_down(&self, offset: usize, alignment: usize) -> Option<usize> {
        let base = self.memory.base().as_ptr() as usize;

        align_down(base.checked_add(offset)?, alignment).checked_sub(base)
    }

    /// Commits pages from the front until every byte below `end` is accessible.
    ///
    /// Pages committed before a failing commit stay committed.
    pub fn grow_front(&mut self, end: usize) -> Result<(), AllocError> {
        while self.committed_front < end {
            if self.fronts_met() {
                // Everything past here was committed from the back.
                break;
            }

            let offset = self.committed_front;
            let len = self.page_size.min(self.committed_back - offset);

            if !self.memory.commit(offset, len) {
                debug!(offset, len, "front page commit failed");
                return Err(AllocError::GrowthFailure { offset, len });
            }

            debug!(offset, len, "committed front page");
            self.committed_front += len;
        }

        Ok(())
    }

    /// Commits pages from the back until every byte from `start` on is accessible.
    pub fn grow_back(&mut self, start: usize) -> Result<(), AllocError> {
        while start < self.committed_back {
            if self.fronts_met() {
                break;
            }

            let offset = align_down(self.committed_back - 1, self.page_size).max(self.committed_front);
            let len = self.committed_back - offset;

            if !self.memory.commit(offset, len) {
                debug!(offset, len, "back page commit failed");
                return Err(AllocError::GrowthFailure { offset, len });
            }

            debug!(offset, len, "committed back page");
            self.committed_back = offset;
        }

        Ok(())
    }

    /// Whether every byte of `range` lies in committed memory.
    pub fn is_committed(&self, range: &Range<usize>) -> bool {
        range.start <= range.end
            && range.end <= self.memory.len()
            && (self.fronts_met() || range.end <= self.committed_front || range.start >= self.committed_back)
    }

    pub fn slice(&self, range: Range<usize>) -> Option<&[u8]> {
        if !self.is_committed(&range) {
            return None;
        }

        // SAFETY: the range is inside the reservation and committed, and the
        // arena owns the reservation.
        unsafe { Some(slice::from_raw_parts(self.ptr(range.start).as_ptr(), range.len())) }
    }

    pub fn slice_mut(&mut self, range: Range<usize>) -> Option<&mut [u8]> {
        if !self.is_committed(&range) {
            return None;
        }

        // SAFETY: same as `slice`, and `&mut self` makes the view exclusive.
        unsafe { Some(slice::from_raw_parts_mut(self.ptr(range.start).as_ptr(), range.len())) }
    }

    /// Reads the metadata stored right before the content starting at `content`.
    pub fn read_metadata(&self, content: usize) -> Option<Metadata> {
        let start = content.checked_sub(METADATA_SIZE)?;
        let bytes = self.slice(start..content)?;

        Some(Metadata::decode(bytes.try_into().ok()?))
    }

    /// Writes `metadata` right before the content starting at `content`.
    pub fn write_metadata(&mut self, content: usize, metadata: Metadata) -> bool {
        let Some(start) = content.checked_sub(METADATA_SIZE) else {
            return false;
        };

        match self.slice_mut(start..content) {
            Some(bytes) => {
                bytes.copy_from_slice(&metadata.encode());
                true
            }
            None => false,
        }
    }

    /// Reads the two bytes at `offset` as a canary slot.
    pub fn read_canary(&self, offset: usize) -> Option<u16> {
        let bytes = self.slice(offset..offset.checked_add(CANARY_SIZE)?)?;

        Some(u16::from_ne_bytes(bytes.try_into().ok()?))
    }

    pub fn write_canary(&mut self, offset: usize) -> bool {
        let Some(end) = offset.checked_add(CANARY_SIZE) else {
            return false;
        };

        match self.slice_mut(offset..end) {
            Some(bytes) => {
                bytes.copy_from_slice(&CANARY.to_ne_bytes());
                true
            }
            None => false,
        }
    }
}
