use crate::{PageSize, PhysicalAddress};
use core::fmt;
use core::marker::PhantomData;

/// Physical frame of size `S`, identified by its page frame number.
///
/// ### Invariants
/// - The base address is always `S`-aligned.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let frame = PhysicalPage::<Size4K>::from_pfn(0x80);
/// assert_eq!(frame.base(), PhysicalAddress::new(0x80_000));
/// assert_eq!(frame.add(2).pfn(), 0x82);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage<S: PageSize> {
    pfn: u64,
    _size: PhantomData<S>,
}

impl<S: PageSize> PhysicalPage<S> {
    #[inline]
    #[must_use]
    pub const fn from_pfn(pfn: u64) -> Self {
        Self {
            pfn,
            _size: PhantomData,
        }
    }

    /// The frame containing `pa` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing(pa: PhysicalAddress) -> Self {
        Self::from_pfn(pa.as_u64() >> S::SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn pfn(self) -> u64 {
        self.pfn
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.pfn << S::SHIFT)
    }

    /// The frame `n` frames above this one.
    ///
    /// # Panics
    /// In debug builds, if the frame number overflows.
    #[inline]
    #[must_use]
    pub const fn add(self, n: u64) -> Self {
        Self::from_pfn(self.pfn + n)
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, n: u64) -> Option<Self> {
        match self.pfn.checked_add(n) {
            Some(pfn) if pfn <= (u64::MAX >> S::SHIFT) => Some(Self::from_pfn(pfn)),
            _ => None,
        }
    }

    /// Whether the frame number is a multiple of `2^order`.
    #[inline]
    #[must_use]
    pub const fn is_aligned_to_order(self, order: u32) -> bool {
        if order >= u64::BITS {
            self.pfn == 0
        } else {
            self.pfn & ((1 << order) - 1) == 0
        }
    }
}

impl<S: PageSize> fmt::Debug for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PhysicalPage<{}>({:#018X})",
            core::any::type_name::<S>(),
            self.base().as_u64()
        )
    }
}

impl<S: PageSize> fmt::Display for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pfn {:#x}", self.pfn)
    }
}

impl<S: PageSize> From<PhysicalPage<S>> for PhysicalAddress {
    fn from(value: PhysicalPage<S>) -> Self {
        value.base()
    }
}
