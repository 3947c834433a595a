use alloc::collections::TryReserveError;
use alloc::vec::Vec;

const BITS: usize = u64::BITS as usize;

/// One bit per frame: `1` = allocated, `0` = free.
pub struct FrameBitmap {
    words: Vec<u64>,
    len: usize,
}

impl FrameBitmap {
    /// A bitmap of `len` clear bits.
    pub fn try_new(len: usize) -> Result<Self, TryReserveError> {
        let n = len.div_ceil(BITS);
        let mut words = Vec::new();
        words.try_reserve_exact(n)?;
        words.resize(n, 0);
        Ok(Self { words, len })
    }

    #[inline]
    fn is_set(&self, i: usize) -> bool {
        self.words[i / BITS] & (1 << (i % BITS)) != 0
    }

    pub fn set_range(&mut self, start: usize, count: usize) {
        for i in start..start + count {
            self.words[i / BITS] |= 1 << (i % BITS);
        }
    }

    pub fn clear_range(&mut self, start: usize, count: usize) {
        for i in start..start + count {
            self.words[i / BITS] &= !(1 << (i % BITS));
        }
    }

    pub fn is_range_set(&self, start: usize, count: usize) -> bool {
        (start..start + count).all(|i| self.is_set(i))
    }

    pub fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Highest set bit in `[start, end)`.
    fn last_set_in(&self, start: usize, end: usize) -> Option<usize> {
        (start..end).rev().find(|&i| self.is_set(i))
    }

    /// First index `i = first + k * step` such that `[i, i + count)` is clear.
    pub fn find_clear_run(&self, count: usize, first: usize, step: usize) -> Option<usize> {
        debug_assert!(count > 0 && step > 0);
        let mut start = first;
        loop {
            let end = start.checked_add(count)?;
            if end > self.len {
                return None;
            }
            match self.last_set_in(start, end) {
                None => return Some(start),
                Some(busy) => {
                    // Skip past the blocker to the next aligned candidate.
                    let skip = (busy + 1 - first).div_ceil(step);
                    start = first.checked_add(skip.checked_mul(step)?)?;
                }
            }
        }
    }

    /// Length of the longest run of clear bits.
    pub fn longest_clear_run(&self) -> usize {
        let mut best = 0;
        let mut current = 0;
        for i in 0..self.len {
            if self.is_set(i) {
                current = 0;
            } else {
                current += 1;
                best = best.max(current);
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_bitmap_is_clear() {
        let b = FrameBitmap::try_new(130).unwrap();
        assert_eq!(b.len, 130);
        assert_eq!(b.count_set(), 0);
        assert_eq!(b.longest_clear_run(), 130);
    }

    #[test]
    fn set_and_clear_ranges_across_words() {
        let mut b = FrameBitmap::try_new(200).unwrap();
        b.set_range(60, 10);
        assert_eq!(b.count_set(), 10);
        assert!(b.is_range_set(60, 10));
        assert!(!b.is_range_set(59, 2));
        b.clear_range(62, 3);
        assert_eq!(b.count_set(), 7);
        assert!(!b.is_range_set(60, 10));
    }

    #[test]
    fn find_clear_run_honours_alignment() {
        let mut b = FrameBitmap::try_new(64).unwrap();
        b.set_range(1, 1);
        // Unaligned search starts right after the blocker.
        assert_eq!(b.find_clear_run(4, 0, 1), Some(2));
        // Aligned to 4: index 0 is blocked, 4 is the next candidate.
        assert_eq!(b.find_clear_run(4, 0, 4), Some(4));
        // Alignment offset shifts the candidate grid.
        assert_eq!(b.find_clear_run(4, 3, 4), Some(3));
    }

    #[test]
    fn find_clear_run_fails_when_fragmented() {
        let mut b = FrameBitmap::try_new(16).unwrap();
        for i in (0..16).step_by(4) {
            b.set_range(i, 1);
        }
        assert_eq!(b.longest_clear_run(), 3);
        assert_eq!(b.find_clear_run(4, 0, 1), None);
        assert_eq!(b.find_clear_run(3, 0, 1), Some(1));
    }

    #[test]
    fn find_clear_run_rejects_oversized_requests() {
        let b = FrameBitmap::try_new(8).unwrap();
        assert_eq!(b.find_clear_run(9, 0, 1), None);
        assert_eq!(b.find_clear_run(8, 1, 1), None);
        assert_eq!(b.find_clear_run(8, 0, 8), Some(0));
    }
}
