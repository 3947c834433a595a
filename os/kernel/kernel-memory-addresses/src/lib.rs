//! # Physical Memory Address Types
//!
//! Strongly typed wrappers for physical addresses and page frames, plus the
//! page-granularity arithmetic used by physical allocators.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A byte address in host RAM. |
//! | [`PhysicalPage<S>`] | The page-aligned base of a frame of size `S`. |
//! | [`PageSize`] | Marker trait carrying `SIZE` and `SHIFT` for a page size. |
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0010_2042);
//! let frame = pa.page::<Size4K>();
//! assert_eq!(frame.base().as_u64(), 0x0010_2000);
//! assert_eq!(frame.pfn(), 0x102);
//!
//! // Requests are rounded up to whole pages before they reach an allocator.
//! assert_eq!(page_align(5000), Some(8192));
//! assert_eq!(pages_for(8192), 2);
//! assert_eq!(get_order(3 * 4096), 2);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod align;
mod page_size;
mod physical_address;
mod physical_page;

pub use align::{PAGE_SIZE, get_order, page_align, pages_for};
pub use page_size::{PageSize, Size4K};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
