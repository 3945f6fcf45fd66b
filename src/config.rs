//! Allocator configuration.

/// Construction-time knobs of a [`crate::DoubleEndedStack`].
///
/// Fixed once the allocator exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackConfig {
    /// Frame every block with canaries and validate them on release.
    ///
    /// Costs two 2-byte canaries per block plus the checks in `free`.
    pub canaries: bool,

    /// Reserve address space only and commit pages as the stacks grow,
    /// instead of taking the whole capacity from the heap up front.
    ///
    /// The capacity is rounded up to whole pages of the host.
    pub lazy_growth: bool,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self::debug()
    }
}

impl StackConfig {
    /// Canaries and lazy growth.
    pub const fn debug() -> Self {
        Self { canaries: true, lazy_growth: true }
    }

    /// Canaries over one eagerly allocated buffer.
    pub const fn eager() -> Self {
        Self { canaries: true, lazy_growth: false }
    }

    /// Minimal overhead: no canaries, eager buffer.
    pub const fn performance() -> Self {
        Self { canaries: false, lazy_growth: false }
    }

    /// Same as `self` with canaries switched to `canaries`.
    pub const fn with_canaries(self, canaries: bool) -> Self {
        Self { canaries, ..self }
    }

    /// Same as `self` with lazy growth switched to `lazy_growth`.
    pub const fn with_lazy_growth(self, lazy_growth: bool) -> Self {
        Self { lazy_growth, ..self }
    }
}
