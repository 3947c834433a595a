//! # Contiguous Memory Areas
//!
//! Physical page pools that hand out **physically contiguous**, aligned runs
//! of 4 KiB frames, in the spirit of the Linux CMA allocator.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ CmaArea "reserved"  base pfn 0x80000, 4096 frames         │
//! │ ┌──────┬──────────────┬────┬──────────────────────────┐  │
//! │ │ used │     free     │used│           free           │  │
//! │ └──────┴──────────────┴────┴──────────────────────────┘  │
//! │   one bit per frame, guarded by a SpinLock               │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Components
//!
//! - [`CmaArea`]: a fixed range of frames with `alloc` / `release` and live
//!   size statistics (`size`, `free_size`, `largest_free_run`).
//! - [`CmaRun`]: a run of frames handed out by an area.
//! - [`PhysMapper`]: turns frames into writable pointers. Frames inside the
//!   linear map are reachable directly; high-memory frames have to be mapped
//!   one at a time through a [`TemporaryMapping`].
//! - [`OffsetPhysMapper`]: a mapper for a physical window that is visible at a
//!   constant virtual offset, optionally with a high-memory tail.
//!
//! ## Concurrency
//!
//! Each area serializes `alloc`/`release` on its own lock, so allocations from
//! different areas never contend. The statistics getters take the lock one at
//! a time; a caller sampling several of them may observe a concurrent
//! allocation between two reads.
//!
//! ## Example
//! ```rust
//! use kernel_cma::CmaArea;
//! use kernel_memory_addresses::{PhysicalPage, Size4K, PAGE_SIZE};
//!
//! let area = CmaArea::new("camera", PhysicalPage::<Size4K>::from_pfn(0x400), 64).unwrap();
//! let run = area.alloc(4, 2, false).unwrap();
//! assert_eq!(run.first().pfn() % 4, 0);
//! assert_eq!(area.free_size(), 60 * PAGE_SIZE);
//! area.release(run).unwrap();
//! assert_eq!(area.free_size(), area.size());
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod area;
mod bitmap;
pub mod phys_mapper;

pub use area::{CmaArea, CmaError, CmaRun};
pub use phys_mapper::{HhdmPhysMapper, OffsetPhysMapper, PhysMapper, TemporaryMapping};
