//! Allocator error types.

use thiserror::Error;

use crate::allocator::Side;

/// Errors returned by [`crate::DoubleEndedStack`] operations.
///
/// Everything except [`AllocError::CorruptionDetected`] leaves the allocator
/// exactly as it was before the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The arena could not be reserved at construction.
    #[error("allocator is not initialized: arena reservation failed")]
    NotInitialized,

    /// Alignment is zero or not a power of two.
    #[error("alignment {alignment} is not a power of two")]
    InvalidAlignment {
        /// The rejected alignment.
        alignment: usize,
    },

    /// The block would overlap the other side's live region.
    #[error("out of space on the {side} side: requested {requested} bytes, {available} available")]
    OutOfSpace {
        /// Side that was allocated from.
        side: Side,
        /// Content bytes requested.
        requested: usize,
        /// Bytes between the two watermarks at the time of the call.
        available: usize,
    },

    /// The OS refused to commit a page and the growth fronts have not met.
    #[error("could not commit {len} bytes at offset {offset}")]
    GrowthFailure {
        /// Offset of the page that failed to commit.
        offset: usize,
        /// Length of the commit request.
        len: usize,
    },

    /// Free on a side with no live allocation.
    #[error("nothing to free on the {side} side")]
    EmptySide {
        /// The empty side.
        side: Side,
    },

    /// The freed allocation is not the most recent one on its side.
    #[error("free of offset {offset} on the {side} side is not LIFO: top is {top}")]
    NotLifo {
        /// Side the free was requested on.
        side: Side,
        /// Offset of the allocation passed in.
        offset: usize,
        /// Offset of the current top allocation.
        top: usize,
    },

    /// The allocation no longer lies in the used region of its side.
    #[error("allocation at offset {offset} on the {side} side is not live")]
    NotLive {
        /// Side of the allocation.
        side: Side,
        /// Offset of the allocation.
        offset: usize,
    },

    /// A canary or chain check failed. Sticky: every later mutating call
    /// returns this same error.
    #[error("memory corruption detected: {0}")]
    CorruptionDetected(Corruption),
}

/// What a release found wrong with the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Corruption {
    #[error("metadata of the block at offset {offset} lies outside committed memory")]
    UnreadableMetadata { offset: usize },

    #[error("block at offset {offset} links to impossible previous offset {previous}")]
    BrokenChain { offset: usize, previous: usize },

    #[error("block at offset {offset} reports size {size} past its side's used region")]
    SizeOutOfBounds { offset: usize, size: usize },

    #[error("leading canary of the block at offset {offset} was overwritten")]
    LeadingCanary { offset: usize },

    #[error("trailing canary of the block at offset {offset} was overwritten")]
    TrailingCanary { offset: usize },

    #[error("leading canary of the previous block at offset {offset} was overwritten")]
    PreviousLeadingCanary { offset: usize },

    #[error("trailing canary of the previous block at offset {offset} was overwritten")]
    PreviousTrailingCanary { offset: usize },
}

impl Corruption {
    /// Content offset of the block the check failed on.
    pub fn offset(&self) -> usize {
        match *self {
            Self::UnreadableMetadata { offset }
            | Self::BrokenChain { offset, .. }
            | Self::SizeOutOfBounds { offset, .. }
            | Self::LeadingCanary { offset }
            | Self::TrailingCanary { offset }
            | Self::PreviousLeadingCanary { offset }
            | Self::PreviousTrailingCanary { offset } => offset,
        }
    }
}
