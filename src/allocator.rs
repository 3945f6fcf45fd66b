//! The double-ended stack allocator.
//!
//! Blocks are pushed from both ends of the arena towards the middle. Each side
//! is a stack of its own: the block pushed last is the only one that can be
//! popped, and popping it gives back exactly the space pushing it took.
//!
//! ```text
//!  0                                                                 capacity
//!  +--------+--------+--------+----------------------+--------+--------+
//!  | block  | block  | block  |      available       | block  | block  |
//!  +--------+--------+--------+----------------------+--------+--------+
//!                     ^        ^                      ^        ^
//!                 top_front  free_front           free_back  top_back
//! ```
//!
//! `top_*` is the content offset of the last block pushed on a side (or the
//! arena edge if the side is empty) and `free_*` is the first byte a new block
//! on that side may use. The layout of a single block is described in `block.rs`.

use std::{alloc::Layout, fmt, ptr::NonNull};

use tracing::{debug, error, trace};

use crate::{
    arena::Arena,
    block::{CANARY, Framing, Metadata},
    config::StackConfig,
    error::{AllocError, Corruption},
    memory::{Backing, Memory},
    utils::is_power_of_two,
};

/// End of the arena a block is pushed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Low addresses, grows up.
    Front,
    /// High addresses, grows down.
    Back,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Front => f.write_str("front"),
            Self::Back => f.write_str("back"),
        }
    }
}

/// Health of an allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// The arena could not be reserved. Nothing can be allocated.
    Uninitialized,
    /// Usable.
    Valid,
    /// A release found the arena corrupted. Terminal: only a new allocator
    /// gets out of this state.
    Corrupted(Corruption),
}

/// A live block handed out by [`DoubleEndedStack`].
///
/// The handle is plain data. It stays valid until its block is freed, the
/// allocator is reset or the allocator is dropped; the allocator cannot tell
/// a stale handle from a live one except through its checks on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    ptr: NonNull<u8>,
    offset: usize,
    size: usize,
    side: Side,
}

impl Allocation {
    /// Offset of the content from the start of the arena.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes requested.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn side(&self) -> Side {
        self.side
    }

    /// Start of the content.
    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Absolute address of the content.
    #[inline]
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
}

/// Snapshot of how the arena is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    /// Bytes below the front watermark.
    pub front: usize,
    /// Bytes above the back watermark.
    pub back: usize,
    /// Bytes between the two watermarks.
    pub available: usize,
    /// Bytes of the reservation backed by committed pages.
    pub committed: usize,
    /// Live blocks on the front side.
    pub live_front: usize,
    /// Live blocks on the back side.
    pub live_back: usize,
    /// Highest `front + back` seen since construction.
    pub peak: usize,
}

/// Fixed-capacity stack allocator working from both ends of one arena.
///
/// Single owner, single thread. Blocks must be freed in reverse order of
/// allocation on each side; anything else is refused with
/// [`AllocError::NotLifo`].
///
/// ```
/// use destack::DoubleEndedStack;
///
/// let mut stack = DoubleEndedStack::new(1024);
///
/// let frame = stack.allocate(64, 16).unwrap();
/// let level = stack.allocate_back(128, 8).unwrap();
/// assert_eq!(0, frame.addr() % 16);
///
/// stack.bytes_mut(&frame).unwrap().fill(0xAA);
///
/// stack.free(frame).unwrap();
/// stack.free_back(level).unwrap();
/// assert!(stack.is_valid());
/// ```
#[derive(Debug)]
pub struct DoubleEndedStack<B: Backing = Memory> {
    arena: Option<Arena<B>>,
    config: StackConfig,
    framing: Framing,
    state: State,

    top_front: usize,
    top_back: usize,
    free_front: usize,
    free_back: usize,

    live_front: usize,
    live_back: usize,
    peak: usize,
}

impl DoubleEndedStack {
    /// Creates an allocator for `capacity` bytes with the default configuration.
    ///
    /// Never fails: if the arena cannot be reserved the allocator is created in
    /// [`State::Uninitialized`] and every allocation returns
    /// [`AllocError::NotInitialized`].
    pub fn new(capacity: usize) -> Self {
        Self::with_config(capacity, StackConfig::default())
    }

    /// Creates an allocator for `capacity` bytes. With
    /// [`StackConfig::lazy_growth`] the arena is reserved in whole pages and
    /// committed as the stacks grow, otherwise it is allocated up front.
    ///
    /// Only the reservation is rounded up to pages. The usable
    /// [`capacity`](DoubleEndedStack::capacity) stays `capacity` bytes for every
    /// configuration, so the back stack starts at the same offset whether the
    /// arena grows lazily or not.
    pub fn with_config(capacity: usize, config: StackConfig) -> Self {
        match Memory::reserve(capacity, config.lazy_growth) {
            Some(memory) => Self::from_backing(memory, capacity, config),
            None => {
                debug!(capacity, "arena reservation failed, allocator is uninitialized");
                Self::uninitialized(config)
            }
        }
    }

    /// Like [`DoubleEndedStack::with_config`] but reports a failed reservation.
    pub fn try_with_config(capacity: usize, config: StackConfig) -> Result<Self, AllocError> {
        let stack = Self::with_config(capacity, config);

        match stack.state {
            State::Uninitialized => Err(AllocError::NotInitialized),
            _ => Ok(stack),
        }
    }
}

impl<B: Backing> DoubleEndedStack<B> {
    /// Creates an allocator over an existing backing. Only the first
    /// `capacity` bytes of it are used. [`StackConfig::lazy_growth`] is
    /// ignored: the backing decides whether it needs committing.
    pub fn from_backing(memory: B, capacity: usize, config: StackConfig) -> Self {
        let arena = Arena::new(memory, capacity);
        let capacity = arena.capacity();

        debug!(
            capacity,
            page_size = arena.page_size(),
            committed = arena.committed(),
            canaries = config.canaries,
            "double-ended stack created"
        );

        Self {
            arena: Some(arena),
            config,
            framing: Framing::new(config.canaries),
            state: State::Valid,
            top_front: 0,
            top_back: capacity,
            free_front: 0,
            free_back: capacity,
            live_front: 0,
            live_back: 0,
            peak: 0,
        }
    }

    fn uninitialized(config: StackConfig) -> Self {
        Self {
            arena: None,
            config,
            framing: Framing::new(config.canaries),
            state: State::Uninitialized,
            top_front: 0,
            top_back: 0,
            free_front: 0,
            free_back: 0,
            live_front: 0,
            live_back: 0,
            peak: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> State {
        self.state
    }

    /// `false` if the arena was never reserved or corruption was detected.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.state == State::Valid
    }

    #[inline]
    pub fn config(&self) -> StackConfig {
        self.config
    }

    /// Usable bytes of the arena, framing included.
    pub fn capacity(&self) -> usize {
        self.arena.as_ref().map_or(0, Arena::capacity)
    }

    /// Commit granularity of the backing, zero when uninitialized.
    pub fn page_size(&self) -> usize {
        self.arena.as_ref().map_or(0, Arena::page_size)
    }

    pub fn usage(&self) -> Usage {
        let Some(arena) = self.arena.as_ref() else {
            return Usage::default();
        };

        Usage {
            front: self.free_front,
            back: arena.capacity() - self.free_back,
            available: self.free_back - self.free_front,
            committed: arena.committed(),
            live_front: self.live_front,
            live_back: self.live_back,
            peak: self.peak,
        }
    }

    fn check_state(&self) -> Result<(), AllocError> {
        match self.state {
            State::Valid => Ok(()),
            State::Uninitialized => Err(AllocError::NotInitialized),
            State::Corrupted(reason) => Err(AllocError::CorruptionDetected(reason)),
        }
    }

    fn check_alignment(alignment: usize) -> Result<(), AllocError> {
        if is_power_of_two(alignment) {
            Ok(())
        } else {
            Err(AllocError::InvalidAlignment { alignment })
        }
    }

    /// Pushes a block of `size` bytes on the front, its content aligned to
    /// `alignment` (a power of two).
    ///
    /// On failure nothing changes, though pages committed while growing are kept.
    pub fn allocate(&mut self, size: usize, alignment: usize) -> Result<Allocation, AllocError> {
        self.push_front(size, alignment)
            .inspect(|allocation| trace!(offset = allocation.offset, size, alignment, "allocated front"))
            .inspect_err(|error| debug!(%error, size, alignment, "front allocation refused"))
    }

    /// Pushes a block of `size` bytes on the back, its content aligned to
    /// `alignment` (a power of two).
    pub fn allocate_back(&mut self, size: usize, alignment: usize) -> Result<Allocation, AllocError> {
        self.push_back(size, alignment)
            .inspect(|allocation| trace!(offset = allocation.offset, size, alignment, "allocated back"))
            .inspect_err(|error| debug!(%error, size, alignment, "back allocation refused"))
    }

    pub fn allocate_layout(&mut self, layout: Layout) -> Result<Allocation, AllocError> {
        self.allocate(layout.size(), layout.align())
    }

    pub fn allocate_back_layout(&mut self, layout: Layout) -> Result<Allocation, AllocError> {
        self.allocate_back(layout.size(), layout.align())
    }

    fn push_front(&mut self, size: usize, alignment: usize) -> Result<Allocation, AllocError> {
        self.check_state()?;
        Self::check_alignment(alignment)?;

        let Some(arena) = self.arena.as_mut() else {
            return Err(AllocError::NotInitialized);
        };

        let framing = self.framing;
        let footprint = size.max(1);
        let out_of_space = AllocError::OutOfSpace {
            side: Side::Front,
            requested: size,
            available: self.free_back - self.free_front,
        };

        let content = self
            .free_front
            .checked_add(framing.header())
            .and_then(|candidate| arena.align_up(candidate, alignment))
            .ok_or(out_of_space)?;

        let end = content
            .checked_add(footprint)
            .and_then(|end| end.checked_add(framing.canary()))
            .filter(|&end| end <= self.free_back)
            .ok_or(out_of_space)?;

        arena.grow_front(end)?;
        Self::frame(arena, framing, content, footprint, self.top_front)?;

        self.top_front = content;
        self.free_front = end;
        self.live_front += 1;
        self.record_peak();

        Ok(Allocation {
            ptr: self.content_ptr(content)?,
            offset: content,
            size,
            side: Side::Front,
        })
    }

    fn push_back(&mut self, size: usize, alignment: usize) -> Result<Allocation, AllocError> {
        self.check_state()?;
        Self::check_alignment(alignment)?;

        let Some(arena) = self.arena.as_mut() else {
            return Err(AllocError::NotInitialized);
        };

        let framing = self.framing;
        let footprint = size.max(1);
        let out_of_space = AllocError::OutOfSpace {
            side: Side::Back,
            requested: size,
            available: self.free_back - self.free_front,
        };

        let content = footprint
            .checked_add(framing.canary())
            .and_then(|trailer| self.free_back.checked_sub(trailer))
            .and_then(|candidate| arena.align_down(candidate, alignment))
            .ok_or(out_of_space)?;

        let start = content
            .checked_sub(framing.header())
            .filter(|&start| start >= self.free_front)
            .ok_or(out_of_space)?;

        arena.grow_back(start)?;
        Self::frame(arena, framing, content, footprint, self.top_back)?;

        self.top_back = content;
        self.free_back = start;
        self.live_back += 1;
        self.record_peak();

        Ok(Allocation {
            ptr: self.content_ptr(content)?,
            offset: content,
            size,
            side: Side::Back,
        })
    }

    /// Writes metadata and canaries around the content at `content`. Cursors are
    /// only moved by the caller once this succeeded.
    fn frame(
        arena: &mut Arena<B>,
        framing: Framing,
        content: usize,
        footprint: usize,
        previous: usize,
    ) -> Result<(), AllocError> {
        let start = content - framing.header();
        let metadata = Metadata { content_size: footprint, previous };

        let written = arena.write_metadata(content, metadata)
            && (!framing.has_canaries() || (arena.write_canary(start) && arena.write_canary(content + footprint)));

        if written {
            Ok(())
        } else {
            Err(AllocError::GrowthFailure { offset: start, len: framing.span(footprint) })
        }
    }

    fn content_ptr(&self, content: usize) -> Result<NonNull<u8>, AllocError> {
        self.arena
            .as_ref()
            .map(|arena| arena.ptr(content))
            .ok_or(AllocError::NotInitialized)
    }

    fn record_peak(&mut self) {
        let used = self.free_front + (self.capacity() - self.free_back);
        self.peak = self.peak.max(used);
    }

    /// Pops the last block pushed on the front. `allocation` must be that block.
    ///
    /// Canaries of the block and of the one below it are checked first. If
    /// any check fails the allocator turns [`State::Corrupted`] for good.
    pub fn free(&mut self, allocation: Allocation) -> Result<(), AllocError> {
        self.pop_front(allocation)
            .inspect(|_| trace!(offset = allocation.offset, "freed front"))
    }

    /// Pops the last block pushed on the back. `allocation` must be that block.
    pub fn free_back(&mut self, allocation: Allocation) -> Result<(), AllocError> {
        self.pop_back(allocation)
            .inspect(|_| trace!(offset = allocation.offset, "freed back"))
    }

    fn pop_front(&mut self, allocation: Allocation) -> Result<(), AllocError> {
        self.check_state()?;

        let Some(arena) = self.arena.as_ref() else {
            return Err(AllocError::NotInitialized);
        };

        let top = self.top_front;
        if top == 0 {
            return Err(AllocError::EmptySide { side: Side::Front });
        }
        if allocation.offset != top {
            return Err(AllocError::NotLifo { side: Side::Front, offset: allocation.offset, top });
        }

        match Self::inspect_front(arena, self.framing, top, self.free_front) {
            Ok(Some((previous, below))) => {
                self.top_front = previous;
                self.free_front = previous + below.content_size + self.framing.canary();
            }
            Ok(None) => {
                self.top_front = 0;
                self.free_front = 0;
            }
            Err(reason) => return Err(self.corrupt(reason)),
        }

        self.live_front -= 1;
        Ok(())
    }

    fn pop_back(&mut self, allocation: Allocation) -> Result<(), AllocError> {
        self.check_state()?;

        let Some(arena) = self.arena.as_ref() else {
            return Err(AllocError::NotInitialized);
        };

        let top = self.top_back;
        let capacity = arena.capacity();
        if top == capacity {
            return Err(AllocError::EmptySide { side: Side::Back });
        }
        if allocation.offset != top {
            return Err(AllocError::NotLifo { side: Side::Back, offset: allocation.offset, top });
        }

        match Self::inspect_back(arena, self.framing, top) {
            Ok(Some((previous, _))) => {
                self.top_back = previous;
                self.free_back = previous - self.framing.header();
            }
            Ok(None) => {
                self.top_back = capacity;
                self.free_back = capacity;
            }
            Err(reason) => return Err(self.corrupt(reason)),
        }

        self.live_back -= 1;
        Ok(())
    }

    /// Validates the front top block at `top`. Returns the block below it, if
    /// any, as `(offset, metadata)`.
    fn inspect_front(
        arena: &Arena<B>,
        framing: Framing,
        top: usize,
        free_front: usize,
    ) -> Result<Option<(usize, Metadata)>, Corruption> {
        let header = framing.header();
        let metadata = arena
            .read_metadata(top)
            .ok_or(Corruption::UnreadableMetadata { offset: top })?;

        let previous = metadata.previous;
        if previous != 0 && (previous < header || previous >= top) {
            return Err(Corruption::BrokenChain { offset: top, previous });
        }

        // The top block always ends exactly at the watermark.
        let end = top
            .checked_add(metadata.content_size)
            .and_then(|end| end.checked_add(framing.canary()));
        if end != Some(free_front) {
            return Err(Corruption::SizeOutOfBounds { offset: top, size: metadata.content_size });
        }

        Self::check_canaries(arena, framing, top, metadata.content_size, false)?;

        if previous == 0 {
            return Ok(None);
        }

        let below = arena
            .read_metadata(previous)
            .ok_or(Corruption::UnreadableMetadata { offset: previous })?;

        let below_end = previous
            .checked_add(below.content_size)
            .and_then(|end| end.checked_add(framing.canary()));
        if below_end.is_none_or(|end| end > top - header) {
            return Err(Corruption::SizeOutOfBounds { offset: previous, size: below.content_size });
        }

        Self::check_canaries(arena, framing, previous, below.content_size, true)?;

        Ok(Some((previous, below)))
    }

    /// Validates the back top block at `top`. Returns the block below it (at a
    /// higher offset), if any.
    fn inspect_back(
        arena: &Arena<B>,
        framing: Framing,
        top: usize,
    ) -> Result<Option<(usize, Metadata)>, Corruption> {
        let header = framing.header();
        let capacity = arena.capacity();
        let metadata = arena
            .read_metadata(top)
            .ok_or(Corruption::UnreadableMetadata { offset: top })?;

        let previous = metadata.previous;
        if previous <= top || previous > capacity || (previous != capacity && previous < top + header) {
            return Err(Corruption::BrokenChain { offset: top, previous });
        }

        // Everything up to the previous block's leading canary belongs to this one.
        let limit = if previous == capacity { capacity } else { previous - header };
        let end = top
            .checked_add(metadata.content_size)
            .and_then(|end| end.checked_add(framing.canary()));
        if end.is_none_or(|end| end > limit) {
            return Err(Corruption::SizeOutOfBounds { offset: top, size: metadata.content_size });
        }

        Self::check_canaries(arena, framing, top, metadata.content_size, false)?;

        if previous == capacity {
            return Ok(None);
        }

        let below = arena
            .read_metadata(previous)
            .ok_or(Corruption::UnreadableMetadata { offset: previous })?;

        let below_end = previous
            .checked_add(below.content_size)
            .and_then(|end| end.checked_add(framing.canary()));
        if below_end.is_none_or(|end| end > capacity) {
            return Err(Corruption::SizeOutOfBounds { offset: previous, size: below.content_size });
        }

        Self::check_canaries(arena, framing, previous, below.content_size, true)?;

        Ok(Some((previous, below)))
    }

    fn check_canaries(
        arena: &Arena<B>,
        framing: Framing,
        content: usize,
        content_size: usize,
        below: bool,
    ) -> Result<(), Corruption> {
        if !framing.has_canaries() {
            return Ok(());
        }

        let leading = content - framing.header();
        if arena.read_canary(leading) != Some(CANARY) {
            return Err(if below {
                Corruption::PreviousLeadingCanary { offset: content }
            } else {
                Corruption::LeadingCanary { offset: content }
            });
        }

        let trailing = content.checked_add(content_size);
        if trailing.and_then(|offset| arena.read_canary(offset)) != Some(CANARY) {
            return Err(if below {
                Corruption::PreviousTrailingCanary { offset: content }
            } else {
                Corruption::TrailingCanary { offset: content }
            });
        }

        Ok(())
    }

    fn corrupt(&mut self, reason: Corruption) -> AllocError {
        error!(%reason, "memory corruption detected, allocator is no longer usable");
        self.state = State::Corrupted(reason);

        AllocError::CorruptionDetected(reason)
    }

    /// Drops every block on both sides. Reservation and committed pages stay
    /// as they are. Not a way out of [`State::Corrupted`].
    pub fn reset(&mut self) -> Result<(), AllocError> {
        self.check_state()?;

        let capacity = self.capacity();
        self.top_front = 0;
        self.free_front = 0;
        self.top_back = capacity;
        self.free_back = capacity;
        self.live_front = 0;
        self.live_back = 0;

        debug!(capacity, "double-ended stack reset");
        Ok(())
    }

    /// Content of a live block.
    pub fn bytes(&self, allocation: &Allocation) -> Result<&[u8], AllocError> {
        self.check_state()?;
        let range = self.live_range(allocation)?;

        self.arena
            .as_ref()
            .and_then(|arena| arena.slice(range))
            .ok_or(AllocError::NotLive { side: allocation.side, offset: allocation.offset })
    }

    /// Mutable content of a live block.
    pub fn bytes_mut(&mut self, allocation: &Allocation) -> Result<&mut [u8], AllocError> {
        self.check_state()?;
        let range = self.live_range(allocation)?;

        self.arena
            .as_mut()
            .and_then(|arena| arena.slice_mut(range))
            .ok_or(AllocError::NotLive { side: allocation.side, offset: allocation.offset })
    }

    /// Content range of `allocation` if it is one of the blocks currently
    /// pushed on its side, with the size it was allocated with.
    fn live_range(&self, allocation: &Allocation) -> Result<std::ops::Range<usize>, AllocError> {
        let Allocation { offset, size, side, .. } = *allocation;
        let not_live = AllocError::NotLive { side, offset };

        let arena = self.arena.as_ref().ok_or(AllocError::NotInitialized)?;
        let footprint = size.max(1);

        let found = match side {
            Side::Front => Self::chain_contains(arena, self.top_front, 0, offset, footprint),
            Side::Back => Self::chain_contains(arena, self.top_back, arena.capacity(), offset, footprint),
        };

        if found { Ok(offset..offset + size) } else { Err(not_live) }
    }

    /// Walks the chain of one side from `top` towards `edge` looking for a
    /// block at `offset` holding `footprint` bytes. Offsets strictly move
    /// towards the edge on every step, anything else ends the walk.
    fn chain_contains(arena: &Arena<B>, top: usize, edge: usize, offset: usize, footprint: usize) -> bool {
        let towards_edge = |from: usize, to: usize| if edge == 0 { to < from } else { to > from };

        let mut block = top;
        while block != edge {
            let Some(metadata) = arena.read_metadata(block) else {
                return false;
            };

            if block == offset {
                return metadata.content_size == footprint;
            }
            // Past the handle, it can't be further down the chain.
            if !towards_edge(block, offset) {
                return false;
            }
            if metadata.previous != edge && !towards_edge(block, metadata.previous) {
                return false;
            }

            block = metadata.previous;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{CANARY_SIZE, METADATA_SIZE};
    use crate::memory::HeapMemory;

    fn heap(capacity: usize, canaries: bool) -> DoubleEndedStack<HeapMemory> {
        let memory = HeapMemory::allocate(capacity).unwrap();

        DoubleEndedStack::from_backing(memory, capacity, StackConfig::eager().with_canaries(canaries))
    }

    #[test]
    fn first_front_block_sits_after_its_header() {
        let mut stack = heap(1024, true);

        let a = stack.allocate(32, 1).unwrap();
        assert_eq!(CANARY_SIZE + METADATA_SIZE, a.offset());
        assert_eq!(a.offset() + 32 + CANARY_SIZE, stack.usage().front);

        let b = stack.allocate(8, 64).unwrap();
        assert_eq!(0, b.offset() % 64);
        assert_eq!(2, stack.usage().live_front);
    }

    #[test]
    fn first_back_block_ends_before_its_trailer() {
        let mut stack = heap(1024, true);

        let a = stack.allocate_back(32, 1).unwrap();
        assert_eq!(1024 - CANARY_SIZE - 32, a.offset());
        assert_eq!(CANARY_SIZE + METADATA_SIZE + 32 + CANARY_SIZE, stack.usage().back);

        let b = stack.allocate_back(10, 16).unwrap();
        assert_eq!(0, b.addr() % 16);
        assert!(b.offset() + 10 + CANARY_SIZE <= a.offset() - METADATA_SIZE - CANARY_SIZE);
    }

    #[test]
    fn blocks_without_canaries_are_packed() {
        let mut stack = heap(256, false);

        let a = stack.allocate(8, 1).unwrap();
        assert_eq!(METADATA_SIZE, a.offset());
        let b = stack.allocate(8, 1).unwrap();
        assert_eq!(a.offset() + 8 + METADATA_SIZE, b.offset());

        let c = stack.allocate_back(8, 1).unwrap();
        assert_eq!(256 - 8, c.offset());
    }

    #[test]
    fn zero_sized_blocks_are_distinct() {
        let mut stack = heap(256, false);

        let a = stack.allocate_back(0, 1).unwrap();
        assert!(a.offset() < 256);
        let b = stack.allocate_back(0, 1).unwrap();
        assert_ne!(a.offset(), b.offset());

        stack.free_back(b).unwrap();
        stack.free_back(a).unwrap();
        assert_eq!(0, stack.usage().back);
    }

    #[test]
    fn bad_alignment_is_refused() {
        let mut stack = heap(256, true);

        assert_eq!(Err(AllocError::InvalidAlignment { alignment: 0 }), stack.allocate(8, 0));
        assert_eq!(Err(AllocError::InvalidAlignment { alignment: 6 }), stack.allocate_back(8, 6));
        assert_eq!(0, stack.usage().live_front);
        assert_eq!(256, stack.usage().available);
    }

    #[test]
    fn huge_requests_do_not_overflow() {
        let mut stack = heap(256, true);

        assert!(matches!(stack.allocate(usize::MAX, 8), Err(AllocError::OutOfSpace { .. })));
        assert!(matches!(stack.allocate_back(usize::MAX, 8), Err(AllocError::OutOfSpace { .. })));
        assert!(matches!(stack.allocate(8, 1 << (usize::BITS - 1)), Err(AllocError::OutOfSpace { .. })));
        assert_eq!(256, stack.usage().available);
    }

    #[test]
    fn free_of_empty_side() {
        let mut stack = heap(256, true);
        let a = stack.allocate(8, 8).unwrap();
        let b = stack.allocate_back(8, 8).unwrap();
        stack.free(a).unwrap();
        stack.free_back(b).unwrap();

        assert_eq!(Err(AllocError::EmptySide { side: Side::Front }), stack.free(a));
        assert_eq!(Err(AllocError::EmptySide { side: Side::Back }), stack.free_back(b));
        assert!(stack.is_valid());
    }

    #[test]
    fn front_handle_on_back_side_is_not_lifo() {
        let mut stack = heap(256, true);
        let a = stack.allocate(8, 8).unwrap();
        let b = stack.allocate_back(8, 8).unwrap();

        assert_eq!(
            Err(AllocError::NotLifo { side: Side::Back, offset: a.offset(), top: b.offset() }),
            stack.free_back(a)
        );
        assert!(stack.is_valid());
    }

    #[test]
    fn broken_leading_canary_is_detected() {
        let mut stack = heap(256, true);
        let a = stack.allocate(16, 8).unwrap();

        unsafe { a.as_ptr().sub(METADATA_SIZE + 1).write(0) };

        assert_eq!(
            Err(AllocError::CorruptionDetected(Corruption::LeadingCanary { offset: a.offset() })),
            stack.free(a)
        );
        assert_eq!(State::Corrupted(Corruption::LeadingCanary { offset: a.offset() }), stack.state());
    }

    #[test]
    fn corrupted_size_is_detected() {
        let mut stack = heap(256, true);
        let a = stack.allocate_back(16, 8).unwrap();

        // content_size is the first word of the metadata.
        unsafe {
            a.as_ptr()
                .sub(METADATA_SIZE)
                .cast::<usize>()
                .write_unaligned(10_000)
        };

        assert_eq!(
            Err(AllocError::CorruptionDetected(Corruption::SizeOutOfBounds { offset: a.offset(), size: 10_000 })),
            stack.free_back(a)
        );
    }

    #[test]
    fn broken_chain_is_detected() {
        let mut stack = heap(256, true);
        let _a = stack.allocate(16, 8).unwrap();
        let b = stack.allocate(16, 8).unwrap();

        // previous is the second word of the metadata; point it past the top.
        unsafe {
            b.as_ptr()
                .sub(METADATA_SIZE / 2)
                .cast::<usize>()
                .write_unaligned(b.offset() + 4)
        };

        assert_eq!(
            Err(AllocError::CorruptionDetected(Corruption::BrokenChain {
                offset: b.offset(),
                previous: b.offset() + 4
            })),
            stack.free(b)
        );
    }

    #[test]
    fn overrun_into_previous_block_is_detected() {
        let mut stack = heap(256, true);
        let a = stack.allocate(16, 8).unwrap();
        let b = stack.allocate(16, 8).unwrap();

        // The front top is fine, the block below lost its trailing canary.
        unsafe { a.as_ptr().add(16).write(0xFF) };

        assert_eq!(
            Err(AllocError::CorruptionDetected(Corruption::PreviousTrailingCanary { offset: a.offset() })),
            stack.free(b)
        );
        // Cursors were not moved.
        assert_eq!(b.offset() + 16 + CANARY_SIZE, stack.usage().front);
        assert_eq!(2, stack.usage().live_front);
    }

    #[test]
    fn back_block_below_lost_its_leading_canary() {
        let mut stack = heap(1024, true);
        let a = stack.allocate_back(16, 8).unwrap();
        let b = stack.allocate_back(16, 8).unwrap();
        let usage = stack.usage();

        unsafe { a.as_ptr().sub(METADATA_SIZE + CANARY_SIZE).write_bytes(0, CANARY_SIZE) };

        assert_eq!(
            Err(AllocError::CorruptionDetected(Corruption::PreviousLeadingCanary { offset: a.offset() })),
            stack.free_back(b)
        );
        assert_eq!(usage.back, stack.usage().back);
        assert_eq!(2, stack.usage().live_back);
        assert!(!stack.is_valid());
    }

    #[test]
    fn back_block_below_lost_its_trailing_canary() {
        let mut stack = heap(1024, true);
        let a = stack.allocate_back(16, 8).unwrap();
        let b = stack.allocate_back(16, 8).unwrap();
        let usage = stack.usage();

        unsafe { a.as_ptr().add(16).write(0xFF) };

        assert_eq!(
            Err(AllocError::CorruptionDetected(Corruption::PreviousTrailingCanary { offset: a.offset() })),
            stack.free_back(b)
        );
        assert_eq!(usage.back, stack.usage().back);
        assert_eq!(2, stack.usage().live_back);
        assert!(!stack.is_valid());
    }

    #[test]
    fn canaries_off_skips_checks() {
        let mut stack = heap(256, false);
        let a = stack.allocate(16, 8).unwrap();

        unsafe { a.as_ptr().write_bytes(0xEE, 18) };

        stack.free(a).unwrap();
        assert!(stack.is_valid());
    }

    #[test]
    fn corrupted_allocator_refuses_everything() {
        let mut stack = heap(256, true);
        let a = stack.allocate(4, 4).unwrap();
        unsafe { a.as_ptr().write_bytes(0, 6) };

        let error = stack.free(a).unwrap_err();
        assert!(matches!(error, AllocError::CorruptionDetected(Corruption::TrailingCanary { .. })));

        assert_eq!(Err(error), stack.allocate(4, 4));
        assert_eq!(Err(error), stack.allocate_back(4, 4));
        assert_eq!(Err(error), stack.free(a));
        assert_eq!(Err(error), stack.reset());
        assert_eq!(Err(error), stack.bytes(&a).map(|_| ()));
        assert!(!stack.is_valid());
    }

    #[test]
    fn uninitialized_allocator() {
        let mut stack = DoubleEndedStack::<HeapMemory>::uninitialized(StackConfig::default());

        assert_eq!(State::Uninitialized, stack.state());
        assert!(!stack.is_valid());
        assert_eq!(0, stack.capacity());
        assert_eq!(0, stack.page_size());
        assert_eq!(StackConfig::default(), stack.config());
        assert_eq!(Err(AllocError::NotInitialized), stack.allocate(8, 8));
        assert_eq!(Err(AllocError::NotInitialized), stack.allocate_back(8, 8));
        assert_eq!(Err(AllocError::NotInitialized), stack.reset());
        assert_eq!(Usage::default(), stack.usage());
    }

    #[test]
    fn content_views_follow_liveness() {
        let mut stack = heap(256, true);
        let a = stack.allocate(4, 4).unwrap();
        let b = stack.allocate_back(3, 1).unwrap();

        stack.bytes_mut(&a).unwrap().copy_from_slice(&[1, 2, 3, 4]);
        stack.bytes_mut(&b).unwrap().copy_from_slice(&[5, 6, 7]);
        assert_eq!(&[1, 2, 3, 4], stack.bytes(&a).unwrap());
        assert_eq!(&[5, 6, 7], stack.bytes(&b).unwrap());

        stack.free(a).unwrap();
        stack.free_back(b).unwrap();
        assert_eq!(Err(AllocError::NotLive { side: Side::Front, offset: a.offset() }), stack.bytes(&a).map(<[u8]>::len));
        assert_eq!(Err(AllocError::NotLive { side: Side::Back, offset: b.offset() }), stack.bytes(&b).map(<[u8]>::len));
        assert!(stack.is_valid());
    }

    #[test]
    fn freed_handle_under_newer_blocks_is_not_live() {
        let mut stack = heap(1024, true);

        let a = stack.allocate(100, 8).unwrap();
        stack.free(a).unwrap();
        let b = stack.allocate(10, 8).unwrap();
        let c = stack.allocate(80, 8).unwrap();
        assert!(c.offset() < a.offset() + a.size());

        assert_eq!(Err(AllocError::NotLive { side: Side::Front, offset: a.offset() }), stack.bytes_mut(&a).map(|bytes| bytes.len()));

        stack.free(c).unwrap();
        stack.free(b).unwrap();
        assert!(stack.is_valid());
    }

    #[test]
    fn freed_back_handle_under_newer_blocks_is_not_live() {
        let mut stack = heap(1024, true);

        let a = stack.allocate_back(100, 8).unwrap();
        stack.free_back(a).unwrap();
        let b = stack.allocate_back(10, 8).unwrap();
        let c = stack.allocate_back(80, 8).unwrap();
        assert!(c.offset() + c.size() > a.offset());

        assert_eq!(Err(AllocError::NotLive { side: Side::Back, offset: a.offset() }), stack.bytes(&a).map(<[u8]>::len));

        stack.free_back(c).unwrap();
        stack.free_back(b).unwrap();
        assert!(stack.is_valid());
    }

    #[test]
    fn reused_offset_needs_the_same_size() {
        let mut stack = heap(1024, true);

        let a = stack.allocate(100, 8).unwrap();
        stack.free(a).unwrap();
        let d = stack.allocate(40, 8).unwrap();
        assert_eq!(a.offset(), d.offset());

        assert_eq!(Err(AllocError::NotLive { side: Side::Front, offset: a.offset() }), stack.bytes(&a).map(<[u8]>::len));
        assert_eq!(40, stack.bytes(&d).unwrap().len());
    }

    #[test]
    fn blocks_below_the_top_stay_viewable() {
        let mut stack = heap(1024, true);
        let a = stack.allocate(16, 8).unwrap();
        let _b = stack.allocate(32, 8).unwrap();
        let c = stack.allocate_back(0, 1).unwrap();
        let _d = stack.allocate_back(8, 8).unwrap();

        stack.bytes_mut(&a).unwrap().fill(7);
        assert_eq!(&[7; 16], stack.bytes(&a).unwrap());
        assert!(stack.bytes(&c).unwrap().is_empty());
    }

    #[test]
    fn layout_allocation() {
        let mut stack = heap(256, true);

        let a = stack.allocate_layout(Layout::new::<u64>()).unwrap();
        assert_eq!(8, a.size());
        assert_eq!(0, a.addr() % std::mem::align_of::<u64>());

        let b = stack.allocate_back_layout(Layout::new::<[u32; 3]>()).unwrap();
        assert_eq!(12, b.size());
        assert_eq!(Side::Back, b.side());
    }

    #[test]
    fn usage_tracks_peak() {
        let mut stack = heap(512, true);
        let a = stack.allocate(100, 8).unwrap();
        let b = stack.allocate_back(100, 8).unwrap();
        let peak = stack.usage().front + stack.usage().back;

        stack.free_back(b).unwrap();
        stack.free(a).unwrap();

        let usage = stack.usage();
        assert_eq!(0, usage.front);
        assert_eq!(0, usage.back);
        assert_eq!(512, usage.available);
        assert_eq!(peak, usage.peak);
        assert_eq!(512, usage.committed);
    }
}
