//! # Physical Frame Access
//!
//! Code can only write through virtual addresses. A [`PhysMapper`] answers two
//! questions for a physical frame:
//!
//! - Is it permanently reachable through the kernel's linear map? Then
//!   [`PhysMapper::linear`] returns a pointer and a whole run can be touched in
//!   one go.
//! - Otherwise it is *high memory*: it has to be mapped one frame at a time
//!   via [`PhysMapper::kmap`] and unmapped again afterwards. Use
//!   [`TemporaryMapping`] so the unmap cannot be forgotten.
//!
//! Two implementations are provided:
//! - [`HhdmPhysMapper`] for kernels with a higher-half direct map covering all
//!   of RAM (no high memory).
//! - [`OffsetPhysMapper`] for a single physical window visible at some virtual
//!   base, with an optional high-memory tail.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage, Size4K};

pub trait PhysMapper: Send + Sync {
    /// Pointer to `pa` through the permanent linear map, or `None` if `pa` is
    /// high memory.
    fn linear(&self, pa: PhysicalAddress) -> Option<NonNull<u8>>;

    /// Map a single frame and return its virtual address.
    ///
    /// # Safety
    /// - `frame` must be RAM owned by the caller.
    /// - The pointer is valid for [`PAGE_SIZE`] bytes until the matching
    ///   [`PhysMapper::kunmap`].
    unsafe fn kmap(&self, frame: PhysicalPage<Size4K>) -> NonNull<u8>;

    /// Undo a [`PhysMapper::kmap`].
    ///
    /// # Safety
    /// `va` must come from `kmap(frame)` on this mapper and must not be used
    /// afterwards.
    unsafe fn kunmap(&self, frame: PhysicalPage<Size4K>, va: NonNull<u8>);

    /// Whether `frame` lies outside the linear map.
    #[inline]
    fn is_highmem(&self, frame: PhysicalPage<Size4K>) -> bool {
        self.linear(frame.base()).is_none()
    }
}

/// A frame mapped through [`PhysMapper::kmap`], unmapped on drop.
pub struct TemporaryMapping<'m, M: PhysMapper + ?Sized> {
    mapper: &'m M,
    frame: PhysicalPage<Size4K>,
    va: NonNull<u8>,
}

impl<'m, M: PhysMapper + ?Sized> TemporaryMapping<'m, M> {
    /// # Safety
    /// Same contract as [`PhysMapper::kmap`].
    pub unsafe fn new(mapper: &'m M, frame: PhysicalPage<Size4K>) -> Self {
        let va = unsafe { mapper.kmap(frame) };
        Self { mapper, frame, va }
    }

    #[inline]
    #[must_use]
    pub const fn frame(&self) -> PhysicalPage<Size4K> {
        self.frame
    }

    /// The mapped frame as bytes.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: kmap guarantees PAGE_SIZE valid bytes until kunmap, which
        // only happens on drop.
        unsafe { core::slice::from_raw_parts_mut(self.va.as_ptr(), PAGE_SIZE) }
    }
}

impl<M: PhysMapper + ?Sized> Drop for TemporaryMapping<'_, M> {
    fn drop(&mut self) {
        // SAFETY: `va` came from `kmap(frame)` and the borrow ends here.
        unsafe { self.mapper.kunmap(self.frame, self.va) }
    }
}

/// [`PhysMapper`] for kernels with a higher-half direct map (HHDM).
///
/// Every physical address is reachable at `base + pa`, so there is no high
/// memory and `kmap` is the linear translation.
#[derive(Copy, Clone, Debug)]
pub struct HhdmPhysMapper {
    base: u64,
}

impl HhdmPhysMapper {
    /// Conventional HHDM base of the x86-64 kernel layout.
    pub const DEFAULT_BASE: u64 = 0xffff_8000_0000_0000;

    /// # Safety
    /// All RAM must be mapped writable at `base + pa`.
    #[must_use]
    pub const unsafe fn new(base: u64) -> Self {
        Self { base }
    }
}

impl PhysMapper for HhdmPhysMapper {
    fn linear(&self, pa: PhysicalAddress) -> Option<NonNull<u8>> {
        let va = self.base.checked_add(pa.as_u64())?;
        NonNull::new(usize::try_from(va).ok()? as *mut u8)
    }

    unsafe fn kmap(&self, frame: PhysicalPage<Size4K>) -> NonNull<u8> {
        let va = self.base.wrapping_add(frame.base().as_u64());
        #[allow(clippy::cast_possible_truncation)]
        let ptr = va as usize as *mut u8;
        // SAFETY: the caller guarantees `frame` is RAM, which the HHDM covers
        // at a non-zero address.
        unsafe { NonNull::new_unchecked(ptr) }
    }

    unsafe fn kunmap(&self, _frame: PhysicalPage<Size4K>, _va: NonNull<u8>) {}
}

/// [`PhysMapper`] over one physical window `[phys_start, phys_start + len)`
/// that is visible at `virt_base`.
///
/// Frames at or above the high-memory boundary are not linearly mapped; they
/// are still reachable through `kmap`, which counts every temporary mapping so
/// callers can observe the access pattern.
pub struct OffsetPhysMapper {
    phys_start: u64,
    len: u64,
    virt_base: NonNull<u8>,
    highmem_start: u64,
    kmaps: AtomicUsize,
    live: AtomicUsize,
}

// SAFETY: the mapper only hands out pointers; the window it describes is
// required to stay valid for the mapper's lifetime (see `new`).
unsafe impl Send for OffsetPhysMapper {}
// SAFETY: see `Send`; the counters are atomics.
unsafe impl Sync for OffsetPhysMapper {}

impl OffsetPhysMapper {
    /// A window without high memory.
    ///
    /// # Safety
    /// `[virt_base, virt_base + len)` must be valid, writable memory for as
    /// long as the mapper or any pointer obtained from it is in use.
    #[must_use]
    pub const unsafe fn new(phys_start: PhysicalAddress, virt_base: NonNull<u8>, len: u64) -> Self {
        Self {
            phys_start: phys_start.as_u64(),
            len,
            virt_base,
            highmem_start: phys_start.as_u64().saturating_add(len),
            kmaps: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
        }
    }

    /// Treat everything from `boundary` upwards as high memory.
    #[must_use]
    pub const fn with_highmem_start(mut self, boundary: PhysicalAddress) -> Self {
        self.highmem_start = boundary.as_u64();
        self
    }

    /// Number of `kmap` calls served so far.
    #[must_use]
    pub fn temporary_mappings(&self) -> usize {
        self.kmaps.load(Ordering::Relaxed)
    }

    /// Number of `kmap`s not yet undone by `kunmap`.
    #[must_use]
    pub fn live_mappings(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    fn translate(&self, pa: u64) -> Option<NonNull<u8>> {
        let offset = pa.checked_sub(self.phys_start)?;
        if offset >= self.len {
            return None;
        }
        let offset = usize::try_from(offset).ok()?;
        // SAFETY: `offset < len`, which stays inside the window promised in `new`.
        Some(unsafe { self.virt_base.add(offset) })
    }
}

impl PhysMapper for OffsetPhysMapper {
    fn linear(&self, pa: PhysicalAddress) -> Option<NonNull<u8>> {
        if pa.as_u64() >= self.highmem_start {
            return None;
        }
        self.translate(pa.as_u64())
    }

    unsafe fn kmap(&self, frame: PhysicalPage<Size4K>) -> NonNull<u8> {
        let pa = frame.base().as_u64();
        debug_assert!(self.translate(pa).is_some(), "kmap outside the window");
        self.kmaps.fetch_add(1, Ordering::Relaxed);
        self.live.fetch_add(1, Ordering::Relaxed);
        let offset = pa.wrapping_sub(self.phys_start);
        #[allow(clippy::cast_possible_truncation)]
        let offset = offset as usize;
        // SAFETY: the caller guarantees `frame` is inside the window.
        unsafe { self.virt_base.add(offset) }
    }

    unsafe fn kunmap(&self, _frame: PhysicalPage<Size4K>, _va: NonNull<u8>) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}
