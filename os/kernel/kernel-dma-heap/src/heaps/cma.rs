//! # CMA Heap
//!
//! Serves each contiguous memory area as its own heap. Buffers are single
//! physically contiguous runs, zeroed before they reach the client.
//!
//! ## Allocation
//! 1. `len` pages are requested from the area, aligned to
//!    `min(get_order(len), max_align_order)`.
//! 2. The run is zeroed: through the linear map in one pass, or frame by frame
//!    through temporary mappings if it starts in high memory.
//! 3. A page array is built and wrapped, with the release routine, into a
//!    [`HeapBuffer`] that is exported and installed as a descriptor.
//!
//! Each step's resources are owned by guards, so any failure unwinds in
//! reverse order: page array, then the run.

use crate::buffer::HeapBuffer;
use crate::debug::PoolStats;
use crate::dma_buf::{DmaBufExporter, RawFd};
use crate::error::DmaHeapError;
use crate::heap::{DmaHeap, HeapDebug, HeapExportInfo, HeapKind, HeapOps};
use crate::registry::HeapRegistry;
use crate::uapi::FdFlags;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use kernel_cma::{CmaArea, CmaError, CmaRun, PhysMapper, TemporaryMapping};
use kernel_memory_addresses::{PAGE_SIZE, get_order, page_align};
use log::error;

/// Default upper bound for the alignment order of a CMA allocation.
pub const CMA_ALIGNMENT: u32 = 8;

/// An area plus its last sampled statistics.
struct CmaPool {
    area: Arc<CmaArea>,
    heap_size: AtomicUsize,
    free_size: AtomicUsize,
    allocated_size: AtomicUsize,
    allocated_peak: AtomicUsize,
    largest_free_buf: AtomicUsize,
}

impl CmaPool {
    fn new(area: Arc<CmaArea>) -> Self {
        Self {
            area,
            heap_size: AtomicUsize::new(0),
            free_size: AtomicUsize::new(0),
            allocated_size: AtomicUsize::new(0),
            allocated_peak: AtomicUsize::new(0),
            largest_free_buf: AtomicUsize::new(0),
        }
    }

    /// Re-read the area's figures. The peak only ever grows.
    fn update(&self) -> PoolStats {
        let heap_size = self.area.size();
        let free_size = self.area.free_size();
        let allocated_size = heap_size.saturating_sub(free_size);
        let largest_free_buf = self.area.largest_free_run();

        self.heap_size.store(heap_size, Ordering::Relaxed);
        self.free_size.store(free_size, Ordering::Relaxed);
        self.allocated_size.store(allocated_size, Ordering::Relaxed);
        let allocated_peak = self
            .allocated_peak
            .fetch_max(allocated_size, Ordering::Relaxed)
            .max(allocated_size);
        self.largest_free_buf.store(largest_free_buf, Ordering::Relaxed);

        PoolStats {
            heap_size,
            free_size,
            allocated_size,
            allocated_peak,
            largest_free_buf,
        }
    }

    fn snapshot(&self) -> PoolStats {
        PoolStats {
            heap_size: self.heap_size.load(Ordering::Relaxed),
            free_size: self.free_size.load(Ordering::Relaxed),
            allocated_size: self.allocated_size.load(Ordering::Relaxed),
            allocated_peak: self.allocated_peak.load(Ordering::Relaxed),
            largest_free_buf: self.largest_free_buf.load(Ordering::Relaxed),
        }
    }
}

/// A run owned by an allocation; returned to the area on drop.
struct RunGuard {
    pool: Arc<CmaPool>,
    run: CmaRun,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Err(e) = self.pool.area.release(self.run) {
            error!("dma_heap: cma: {}: {e}", self.pool.area.name());
        }
        self.pool.update();
    }
}

/// Heap backend over one [`CmaArea`].
pub struct CmaHeap<M: PhysMapper> {
    pool: Arc<CmaPool>,
    mapper: Arc<M>,
    max_align_order: u32,
}

impl<M: PhysMapper + 'static> CmaHeap<M> {
    #[must_use]
    pub fn new(area: Arc<CmaArea>, mapper: Arc<M>) -> Self {
        Self {
            pool: Arc::new(CmaPool::new(area)),
            mapper,
            max_align_order: CMA_ALIGNMENT,
        }
    }

    /// Clamp allocation alignment to `2^order` pages instead of
    /// [`CMA_ALIGNMENT`].
    #[must_use]
    pub fn with_max_align_order(mut self, order: u32) -> Self {
        self.max_align_order = order;
        self
    }

    #[inline]
    #[must_use]
    pub fn area(&self) -> &Arc<CmaArea> {
        &self.pool.area
    }

    #[inline]
    #[must_use]
    pub const fn max_align_order(&self) -> u32 {
        self.max_align_order
    }

    /// Re-read the pool figures.
    pub fn update_pool_state(&self) {
        self.pool.update();
    }

    /// The figures as of the last update.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.pool.snapshot()
    }

    /// Register this backend as a heap named after its area.
    ///
    /// # Errors
    /// See [`HeapRegistry::add`].
    pub fn register(self: &Arc<Self>, registry: &HeapRegistry) -> Result<Arc<DmaHeap>, DmaHeapError> {
        let info = HeapExportInfo::new(self.pool.area.name(), Arc::clone(self) as Arc<dyn HeapOps>)
            .with_kind(HeapKind::Cma)
            .with_debug(Arc::clone(self) as Arc<dyn HeapDebug>);
        let heap = registry.add(info)?;
        self.update_pool_state();
        Ok(heap)
    }

    fn clear_run(&self, run: CmaRun) {
        if !self.mapper.is_highmem(run.last())
            && let Some(va) = self.mapper.linear(run.first().base())
        {
            // SAFETY: the run is ours and the linear map covers both ends of it.
            unsafe { core::ptr::write_bytes(va.as_ptr(), 0, run.bytes()) };
            return;
        }
        // The run reaches into high memory; every frame has to be checked.
        for frame in run.frames() {
            if let Some(va) = self.mapper.linear(frame.base()) {
                // SAFETY: the frame belongs to the run we own.
                unsafe { core::ptr::write_bytes(va.as_ptr(), 0, PAGE_SIZE) };
            } else {
                // SAFETY: the frame belongs to the run we own.
                let mut map = unsafe { TemporaryMapping::new(&*self.mapper, frame) };
                map.as_mut_slice().fill(0);
            }
        }
    }
}

impl<M: PhysMapper + 'static> HeapOps for CmaHeap<M> {
    fn allocate(
        &self,
        heap: &Arc<DmaHeap>,
        len: usize,
        fd_flags: FdFlags,
        heap_flags: u32,
        exporter: &dyn DmaBufExporter,
    ) -> Result<RawFd, DmaHeapError> {
        let size = page_align(len).ok_or(DmaHeapError::InvalidArgument("length overflows"))?;
        let nr_pages = size / PAGE_SIZE;
        let align = get_order(size).min(self.max_align_order);

        let run = self
            .pool
            .area
            .alloc(nr_pages, align, false)
            .map_err(|e| match e {
                CmaError::ZeroCount => DmaHeapError::InvalidArgument("zero length"),
                _ => DmaHeapError::AllocationFailed {
                    pages: nr_pages,
                    order: align,
                },
            })?;
        let run = RunGuard {
            pool: Arc::clone(&self.pool),
            run,
        };

        self.clear_run(run.run);

        let mut pages = Vec::new();
        pages
            .try_reserve_exact(nr_pages)
            .map_err(|_| DmaHeapError::OutOfMemory)?;
        pages.extend(run.run.frames());

        let buffer = HeapBuffer::new(
            Arc::clone(heap),
            len,
            heap_flags,
            pages,
            Box::new(move |buffer: &mut HeapBuffer| {
                drop(buffer.take_pages());
                drop(run);
            }),
        );

        let dmabuf = exporter.export(buffer, fd_flags)?;
        let fd = exporter.install_fd(dmabuf, fd_flags)?;
        self.pool.update();
        Ok(fd)
    }
}

impl<M: PhysMapper + 'static> HeapDebug for CmaHeap<M> {
    fn show(&self, heap: &DmaHeap, out: &mut dyn fmt::Write) -> fmt::Result {
        out.write_str("\n----- DMA CMA HEAP DEBUG -----\n")?;
        if heap.kind() == HeapKind::Cma {
            self.pool.update().write_rows(out)?;
        } else {
            error!("dma_heap: {}: invalid heap type for debug: {:?}", heap.name(), heap.kind());
        }
        out.write_str("\n")
    }
}

impl<M: PhysMapper> fmt::Debug for CmaHeap<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CmaHeap")
            .field("area", &self.pool.area)
            .field("max_align_order", &self.max_align_order)
            .finish_non_exhaustive()
    }
}

/// Register one heap for `area`.
///
/// # Errors
/// See [`HeapRegistry::add`].
pub fn add_cma_heap<M: PhysMapper + 'static>(
    registry: &HeapRegistry,
    area: Arc<CmaArea>,
    mapper: Arc<M>,
) -> Result<Arc<DmaHeap>, DmaHeapError> {
    Arc::new(CmaHeap::new(area, mapper)).register(registry)
}

/// Register one heap per area. Failures are logged and skipped.
///
/// Returns the heaps that were added.
pub fn add_cma_heaps<M: PhysMapper + 'static>(
    registry: &HeapRegistry,
    areas: impl IntoIterator<Item = Arc<CmaArea>>,
    mapper: &Arc<M>,
) -> Vec<Arc<DmaHeap>> {
    areas
        .into_iter()
        .filter_map(|area| {
            let name = String::from(area.name());
            add_cma_heap(registry, area, Arc::clone(mapper))
                .inspect_err(|e: &DmaHeapError| {
                    error!("dma_heap: cma: cannot add heap for area {name}: {e}");
                })
                .ok()
        })
        .collect()
}
