//! # DMA-BUF Heaps
//!
//! A registry of named memory pools ("heaps") that clients allocate shareable,
//! physically backed buffers from through one control protocol.
//!
//! ```text
//!  client ── open(devt) ──► HeapRegistry ──► HeapFile
//!                                              │ ioctl(DMA_HEAP_IOC_ALLOC)
//!                                              ▼
//!                              validate, page-align, DmaHeap::ops()
//!                                              │
//!                                              ▼
//!                  CmaHeap: CmaArea::alloc → zero → page array → HeapBuffer
//!                                              │
//!                                              ▼
//!                   DmaBufExporter::export → install_fd → descriptor
//! ```
//!
//! ## Pieces
//! - [`HeapRegistry`]: minor allocation in `[0, NUM_HEAP_MINORS)`, endpoint
//!   exposure with rollback, lookup and open. A process-wide instance is set
//!   up with [`init`] and reached through [`registry`].
//! - [`HeapFile`]: the opened endpoint; validates allocation requests.
//! - [`HeapBuffer`]: pages, vmap count, attachments and the backend's release
//!   routine, which runs exactly once when the buffer drops.
//! - [`DmaBuf`] / [`FdTable`]: reference-counted handles and a client
//!   descriptor table implementing [`DmaBufExporter`].
//! - [`heaps::cma`]: the contiguous memory backend with live pool statistics.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use kernel_cma::{CmaArea, HhdmPhysMapper};
//! use kernel_dma_heap::heaps::cma::add_cma_heap;
//! use kernel_dma_heap::{DevNodeTable, HeapRegistry};
//! use kernel_memory_addresses::PhysicalPage;
//!
//! let registry = HeapRegistry::new(240, Box::new(DevNodeTable::new()));
//! let area = Arc::new(CmaArea::new("reserved", PhysicalPage::from_pfn(0x8000), 256).unwrap());
//! let mapper = Arc::new(unsafe { HhdmPhysMapper::new(HhdmPhysMapper::DEFAULT_BASE) });
//! let heap = add_cma_heap(&registry, area, mapper).unwrap();
//! assert_eq!(heap.devnode(), "dma_heap/reserved");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

#[macro_use]
mod macros;

mod buffer;
mod debug;
mod dma_buf;
mod endpoint;
mod error;
mod file;
mod heap;
pub mod heaps;
mod registry;
pub mod uapi;

pub use buffer::{Attachment, AttachmentId, HeapBuffer, ReleaseFn};
pub use debug::PoolStats;
pub use dma_buf::{DmaBuf, DmaBufExporter, ExportError, FdTable, RawFd};
pub use endpoint::{DEVNAME, DevNodeTable, DeviceNumber, EndpointError, EndpointExposer, devnode_path};
pub use error::{DmaHeapError, errno};
pub use file::{HeapFile, UserCopy};
pub use heap::{DmaHeap, HeapDebug, HeapExportInfo, HeapKind, HeapOps};
pub use registry::{HeapRegistry, NUM_HEAP_MINORS, init, registry};
pub use uapi::{AllocationData, DMA_HEAP_IOC_ALLOC, FdFlags};
