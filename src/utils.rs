//! This file contains all the helper functions for the allocator.
//! This are functions that don't particularly belong to any concrete module of the program.

/// It aligns `to_be_aligned` up to the next multiple of `aligment`.
///
/// This method is used to round reservation sizes up to a multiple of the page size
/// and to place content starts of front allocations. `aligment` must be a power of two.
/// Returns `None` if rounding up would overflow.
#[inline]
pub fn align(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    debug_assert!(is_power_of_two(aligment));

    Some(to_be_aligned.checked_add(aligment - 1)? & !(aligment - 1))
}

/// It aligns `to_be_aligned` down to the previous multiple of `aligment`.
///
/// Back allocations grow towards lower addresses, so their content start is
/// rounded down instead of up. `aligment` must be a power of two.
#[inline]
pub fn align_down(to_be_aligned: usize, aligment: usize) -> usize {
    debug_assert!(is_power_of_two(aligment));

    to_be_aligned & !(aligment - 1)
}

/// Zero is not a power of two, one is.
#[inline]
pub const fn is_power_of_two(value: usize) -> bool {
    value != 0 && value & (value - 1) == 0
}
