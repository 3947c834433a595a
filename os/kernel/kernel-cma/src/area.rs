use crate::bitmap::FrameBitmap;
use alloc::string::String;
use core::fmt;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalPage, Size4K};
use kernel_sync::SpinLock;
use log::{debug, trace, warn};

/// A run of physically contiguous frames handed out by a [`CmaArea`].
///
/// A run is plain data: dropping it does **not** return the frames. Pass it
/// back to [`CmaArea::release`] exactly once.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CmaRun {
    first: PhysicalPage<Size4K>,
    count: usize,
}

impl CmaRun {
    #[inline]
    #[must_use]
    pub const fn first(&self) -> PhysicalPage<Size4K> {
        self.first
    }

    #[inline]
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// The highest frame of the run.
    #[inline]
    #[must_use]
    pub fn last(&self) -> PhysicalPage<Size4K> {
        self.first.add(self.count.saturating_sub(1) as u64)
    }

    /// Size of the run in bytes.
    #[inline]
    #[must_use]
    pub const fn bytes(&self) -> usize {
        self.count * PAGE_SIZE
    }

    /// The frames of the run in ascending order.
    pub fn frames(&self) -> impl ExactSizeIterator<Item = PhysicalPage<Size4K>> + use<> {
        let first = self.first;
        (0..self.count).map(move |i| first.add(i as u64))
    }
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum CmaError {
    #[error("a contiguous area must span at least one frame")]
    EmptyArea,
    #[error("area starting at {base} with {count} frames exceeds the physical address space")]
    AreaOverflow {
        base: PhysicalPage<Size4K>,
        count: usize,
    },
    #[error("out of memory while creating area bookkeeping")]
    OutOfMemory,
    #[error("cannot allocate an empty run")]
    ZeroCount,
    #[error("no free run of {count} frames aligned to order {order}")]
    Exhausted { count: usize, order: u32 },
    #[error("run at {first} with {count} frames does not belong to this area")]
    OutOfRange {
        first: PhysicalPage<Size4K>,
        count: usize,
    },
    #[error("run at {first} with {count} frames is not currently allocated")]
    NotAllocated {
        first: PhysicalPage<Size4K>,
        count: usize,
    },
}

/// A reserved range of physical frames that serves contiguous allocations.
///
/// ### Invariants
/// - `free_size() + allocated == size()` at every lock release.
/// - A frame is part of at most one live [`CmaRun`].
pub struct CmaArea {
    name: String,
    base: PhysicalPage<Size4K>,
    count: usize,
    bitmap: SpinLock<FrameBitmap>,
}

impl CmaArea {
    /// Create an area over `count` frames starting at `base`, all free.
    ///
    /// # Errors
    /// - [`CmaError::EmptyArea`] if `count` is zero.
    /// - [`CmaError::AreaOverflow`] if the range wraps the frame number space.
    /// - [`CmaError::OutOfMemory`] if the bitmap cannot be allocated.
    pub fn new(
        name: impl Into<String>,
        base: PhysicalPage<Size4K>,
        count: usize,
    ) -> Result<Self, CmaError> {
        if count == 0 {
            return Err(CmaError::EmptyArea);
        }
        if base.checked_add(count as u64).is_none() {
            return Err(CmaError::AreaOverflow { base, count });
        }
        let bitmap = FrameBitmap::try_new(count).map_err(|_| CmaError::OutOfMemory)?;
        let name = name.into();
        debug!("cma: {name}: {count} frames at {base}");
        Ok(Self {
            name,
            base,
            count,
            bitmap: SpinLock::new(bitmap),
        })
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> PhysicalPage<Size4K> {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn frame_count(&self) -> usize {
        self.count
    }

    /// Total size of the area in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.count * PAGE_SIZE
    }

    /// Bytes currently not part of any run.
    #[must_use]
    pub fn free_size(&self) -> usize {
        let used = self.bitmap.with_lock(|b| b.count_set());
        (self.count - used) * PAGE_SIZE
    }

    /// Size in bytes of the longest contiguous free stretch.
    #[must_use]
    pub fn largest_free_run(&self) -> usize {
        self.bitmap.with_lock(|b| b.longest_clear_run()) * PAGE_SIZE
    }

    /// Allocate `count` contiguous frames whose first frame number is a
    /// multiple of `2^align_order`.
    ///
    /// Unless `no_warn` is set, a failed allocation is reported at warn level.
    ///
    /// # Errors
    /// - [`CmaError::ZeroCount`] if `count` is zero.
    /// - [`CmaError::Exhausted`] if no suitably aligned free run exists.
    pub fn alloc(&self, count: usize, align_order: u32, no_warn: bool) -> Result<CmaRun, CmaError> {
        if count == 0 {
            return Err(CmaError::ZeroCount);
        }

        let found = self.first_aligned(align_order).and_then(|(first, step)| {
            self.bitmap.with_lock(|b| {
                let start = b.find_clear_run(count, first, step)?;
                b.set_range(start, count);
                Some(start)
            })
        });

        match found {
            Some(start) => {
                let run = CmaRun {
                    first: self.base.add(start as u64),
                    count,
                };
                trace!("cma: {}: allocated {count} frames at {}", self.name, run.first);
                Ok(run)
            }
            None => {
                if !no_warn {
                    warn!(
                        "cma: {}: alloc failed, req-size: {count} pages, order: {align_order}",
                        self.name
                    );
                }
                Err(CmaError::Exhausted {
                    count,
                    order: align_order,
                })
            }
        }
    }

    /// Return a run previously handed out by [`CmaArea::alloc`].
    ///
    /// # Errors
    /// - [`CmaError::OutOfRange`] if the run is not inside this area.
    /// - [`CmaError::NotAllocated`] if any frame of the run is already free.
    pub fn release(&self, run: CmaRun) -> Result<(), CmaError> {
        let start = self.index_of(run).ok_or(CmaError::OutOfRange {
            first: run.first,
            count: run.count,
        })?;

        self.bitmap.with_lock(|b| {
            if !b.is_range_set(start, run.count) {
                return Err(CmaError::NotAllocated {
                    first: run.first,
                    count: run.count,
                });
            }
            b.clear_range(start, run.count);
            Ok(())
        })?;

        trace!("cma: {}: released {} frames at {}", self.name, run.count, run.first);
        Ok(())
    }

    /// Bitmap index of the first frame of `run`, if the run lies inside the area.
    fn index_of(&self, run: CmaRun) -> Option<usize> {
        let offset = run.first.pfn().checked_sub(self.base.pfn())?;
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(run.count)?;
        (run.count > 0 && end <= self.count).then_some(start)
    }

    /// The first bitmap index whose frame number is `2^order` aligned, and the
    /// stride between aligned indices.
    fn first_aligned(&self, order: u32) -> Option<(usize, usize)> {
        let step = 1usize.checked_shl(order)?;
        let step_u64 = step as u64;
        let misalign = self.base.pfn() % step_u64;
        let first = usize::try_from((step_u64 - misalign) % step_u64).ok()?;
        Some((first, step))
    }
}

impl fmt::Debug for CmaArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CmaArea")
            .field("name", &self.name)
            .field("base", &self.base)
            .field("count", &self.count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(base_pfn: u64, count: usize) -> CmaArea {
        CmaArea::new("test", PhysicalPage::from_pfn(base_pfn), count).unwrap()
    }

    #[test]
    fn rejects_empty_and_overflowing_areas() {
        assert_eq!(
            CmaArea::new("e", PhysicalPage::from_pfn(0), 0).unwrap_err(),
            CmaError::EmptyArea
        );
        let top = PhysicalPage::from_pfn(u64::MAX >> 12);
        assert!(matches!(
            CmaArea::new("o", top, 2),
            Err(CmaError::AreaOverflow { .. })
        ));
    }

    #[test]
    fn alloc_respects_pfn_alignment_with_unaligned_base() {
        let a = area(0x101, 64);
        let run = a.alloc(4, 3, false).unwrap();
        assert_eq!(run.first().pfn() % 8, 0);
        assert_eq!(run.first().pfn(), 0x108);
        assert_eq!(run.count(), 4);
    }

    #[test]
    fn stats_track_allocations() {
        let a = area(0, 16);
        assert_eq!(a.size(), 16 * PAGE_SIZE);
        assert_eq!(a.free_size(), a.size());
        assert_eq!(a.largest_free_run(), a.size());

        let first = a.alloc(4, 0, false).unwrap();
        let second = a.alloc(4, 0, false).unwrap();
        a.release(first).unwrap();

        assert_eq!(a.free_size(), 12 * PAGE_SIZE);
        assert_eq!(a.largest_free_run(), 8 * PAGE_SIZE);
        a.release(second).unwrap();
        assert_eq!(a.largest_free_run(), a.size());
    }

    #[test]
    fn exhaustion_is_reported() {
        let a = area(0, 4);
        let _run = a.alloc(3, 0, true).unwrap();
        assert_eq!(
            a.alloc(2, 0, true),
            Err(CmaError::Exhausted { count: 2, order: 0 })
        );
        assert_eq!(a.alloc(0, 0, true), Err(CmaError::ZeroCount));
    }

    #[test]
    fn huge_alignment_order_fails_cleanly() {
        let a = area(0, 4);
        assert!(matches!(
            a.alloc(1, usize::BITS, true),
            Err(CmaError::Exhausted { .. })
        ));
    }

    #[test]
    fn double_and_foreign_release_are_rejected() {
        let a = area(0x10, 8);
        let run = a.alloc(2, 0, false).unwrap();
        a.release(run).unwrap();
        assert!(matches!(a.release(run), Err(CmaError::NotAllocated { .. })));

        let other = area(0x100, 8);
        let foreign = other.alloc(2, 0, false).unwrap();
        assert!(matches!(a.release(foreign), Err(CmaError::OutOfRange { .. })));
    }

    #[test]
    fn run_frames_are_consecutive() {
        let a = area(0x20, 8);
        let run = a.alloc(3, 0, false).unwrap();
        let pfns: Vec<u64> = run.frames().map(PhysicalPage::pfn).collect();
        assert_eq!(pfns, vec![0x20, 0x21, 0x22]);
        assert_eq!(run.bytes(), 3 * PAGE_SIZE);
        assert_eq!(run.last().pfn(), 0x22);
    }
}
