use crate::{PageSize, Size4K};

/// Base page granularity in bytes.
#[allow(clippy::cast_possible_truncation)]
pub const PAGE_SIZE: usize = Size4K::SIZE as usize;

/// Round `len` up to the next page boundary.
///
/// Returns `None` if the rounded length does not fit in `usize`.
#[inline]
#[must_use]
pub const fn page_align(len: usize) -> Option<usize> {
    len.checked_next_multiple_of(PAGE_SIZE)
}

/// Number of pages needed to hold `len` bytes.
#[inline]
#[must_use]
pub const fn pages_for(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE)
}

/// Allocation order for `size` bytes: `log2` of the page count, rounded up.
///
/// A zero size yields order 0 just like a single page.
#[inline]
#[must_use]
pub const fn get_order(size: usize) -> u32 {
    let pages = pages_for(size);
    if pages <= 1 {
        return 0;
    }
    match pages.checked_next_power_of_two() {
        Some(p) => p.trailing_zeros(),
        None => usize::BITS,
    }
}
