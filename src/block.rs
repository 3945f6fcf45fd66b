use std::mem;

/// Sentinel written around every block when canaries are enabled.
pub const CANARY: u16 = 0x0DD0;

/// Bytes taken by one [`CANARY`].
pub const CANARY_SIZE: usize = mem::size_of::<u16>();

/// Bytes taken by one encoded [`Metadata`] record.
pub const METADATA_SIZE: usize = 2 * mem::size_of::<usize>();

/// This is the header of a block, placed right before its content. It's
/// all we need to pop the block later: how far its content goes and where
/// the block below it on the same side starts.
///
/// The following diagram represents a block with canaries enabled. Without
/// canaries the two canary slots are simply not there.
///
/// ```text
///          +---------------------+ <------+
///          |    canary (2b)      |        |
///          +---------------------+        |
///          |    content_size     |        | -> Header
///          +---------------------+        |
///          |      previous       |        |
///  top --> +---------------------+ <------+
///          |       Content       |        |
///          |         ...         |        | -> Addressable content (aligned)
///          |                     |        |
///          +---------------------+ <------+
///          |    canary (2b)      |          -> Trailer
///          +---------------------+
/// ```
///
/// There might be padding in front of the leading canary, since the content has
/// to start at an aligned address. The padding belongs to nobody.
///
/// `previous` is the content offset of the block pushed before this one on the
/// same side, or the arena edge (`0` for the front, the capacity for the back)
/// if this is the first one. Following it is how the stack gets popped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Metadata {
    /// Footprint of the content, `max(size, 1)`, not the requested size.
    pub content_size: usize,
    /// Content offset of the previous block on the same side.
    pub previous: usize,
}

impl Metadata {
    pub fn encode(&self) -> [u8; METADATA_SIZE] {
        const WORD: usize = mem::size_of::<usize>();

        let mut bytes = [0; METADATA_SIZE];
        bytes[..WORD].copy_from_slice(&self.content_size.to_ne_bytes());
        bytes[WORD..].copy_from_slice(&self.previous.to_ne_bytes());

        bytes
    }

    pub fn decode(bytes: &[u8; METADATA_SIZE]) -> Self {
        const WORD: usize = mem::size_of::<usize>();

        let (size, previous) = bytes.split_at(WORD);

        // Both halves are exactly one word long.
        let mut word = [0; WORD];
        word.copy_from_slice(size);
        let content_size = usize::from_ne_bytes(word);
        word.copy_from_slice(previous);
        let previous = usize::from_ne_bytes(word);

        Self { content_size, previous }
    }
}

/// Sizes of the framing around a block for one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Framing {
    canaries: bool,
}

impl Framing {
    pub const fn new(canaries: bool) -> Self {
        Self { canaries }
    }

    #[inline]
    pub const fn has_canaries(&self) -> bool {
        self.canaries
    }

    /// Bytes of one canary slot, zero when disabled.
    #[inline]
    pub const fn canary(&self) -> usize {
        if self.canaries { CANARY_SIZE } else { 0 }
    }

    /// Bytes between the start of the leading canary and the content.
    #[inline]
    pub const fn header(&self) -> usize {
        self.canary() + METADATA_SIZE
    }

    /// Smallest span a block with `footprint` content bytes can take.
    #[inline]
    pub const fn span(&self, footprint: usize) -> usize {
        self.header() + footprint + self.canary()
    }
}
