//! Registered heaps and the interfaces a backend implements.

use crate::dma_buf::{DmaBufExporter, RawFd};
use crate::endpoint::{DeviceNumber, devnode_path};
use crate::error::DmaHeapError;
use crate::uapi::FdFlags;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;
use kernel_memory_addresses::page_align;

/// Which kind of backend serves a heap.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum HeapKind {
    #[default]
    Unspecified,
    Cma,
}

/// Allocation backend of a heap.
pub trait HeapOps: Send + Sync {
    /// Allocate `len` bytes (already page aligned, non-zero) and install the
    /// result as a descriptor through `exporter`.
    ///
    /// On error every resource acquired so far must already be released.
    ///
    /// # Errors
    /// Backend specific; collaborator errors are passed through unchanged.
    fn allocate(
        &self,
        heap: &Arc<DmaHeap>,
        len: usize,
        fd_flags: FdFlags,
        heap_flags: u32,
        exporter: &dyn DmaBufExporter,
    ) -> Result<RawFd, DmaHeapError>;
}

/// Optional statistics renderer of a heap.
pub trait HeapDebug: Send + Sync {
    /// Render the heap's live statistics into `out`.
    ///
    /// # Errors
    /// Only errors from `out`.
    fn show(&self, heap: &DmaHeap, out: &mut dyn fmt::Write) -> fmt::Result;
}

/// What a backend hands to [`HeapRegistry::add`](crate::HeapRegistry::add).
pub struct HeapExportInfo {
    pub name: String,
    pub ops: Option<Arc<dyn HeapOps>>,
    pub kind: HeapKind,
    pub debug: Option<Arc<dyn HeapDebug>>,
}

impl HeapExportInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, ops: Arc<dyn HeapOps>) -> Self {
        Self {
            name: name.into(),
            ops: Some(ops),
            kind: HeapKind::Unspecified,
            debug: None,
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: HeapKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: Arc<dyn HeapDebug>) -> Self {
        self.debug = Some(debug);
        self
    }
}

/// A registered heap.
pub struct DmaHeap {
    name: String,
    ops: Arc<dyn HeapOps>,
    debug: Option<Arc<dyn HeapDebug>>,
    kind: HeapKind,
    devt: DeviceNumber,
}

impl DmaHeap {
    pub(crate) fn new(
        name: String,
        ops: Arc<dyn HeapOps>,
        debug: Option<Arc<dyn HeapDebug>>,
        kind: HeapKind,
        devt: DeviceNumber,
    ) -> Self {
        Self {
            name,
            ops,
            debug,
            kind,
            devt,
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backend serving this heap.
    #[inline]
    #[must_use]
    pub fn ops(&self) -> &Arc<dyn HeapOps> {
        &self.ops
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> HeapKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub const fn devt(&self) -> DeviceNumber {
        self.devt
    }

    #[inline]
    #[must_use]
    pub const fn minor(&self) -> u32 {
        self.devt.minor()
    }

    #[must_use]
    pub fn devnode(&self) -> String {
        devnode_path(&self.name)
    }

    #[must_use]
    pub fn has_debug(&self) -> bool {
        self.debug.is_some()
    }

    /// Render the heap's statistics; heaps without a renderer print nothing.
    ///
    /// # Errors
    /// Only errors from `out`.
    pub fn debug_show(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        match &self.debug {
            Some(debug) => debug.show(self, out),
            None => Ok(()),
        }
    }

    /// Round `len` to whole pages and hand the request to the backend.
    pub(crate) fn buffer_alloc(
        self: &Arc<Self>,
        len: usize,
        fd_flags: FdFlags,
        heap_flags: u32,
        exporter: &dyn DmaBufExporter,
    ) -> Result<RawFd, DmaHeapError> {
        let len = page_align(len)
            .filter(|&len| len != 0)
            .ok_or(DmaHeapError::InvalidArgument("zero or oversized length"))?;
        self.ops.allocate(self, len, fd_flags, heap_flags, exporter)
    }
}

impl fmt::Debug for DmaHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaHeap")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("devt", &self.devt)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::buffer::HeapBuffer;
    use crate::dma_buf::FdTable;
    use alloc::boxed::Box;
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use kernel_memory_addresses::{PAGE_SIZE, PhysicalPage};

    /// Hands out page-less buffers and counts what it sees.
    #[derive(Default)]
    pub struct CountingOps {
        pub allocs: AtomicUsize,
        pub last_len: AtomicUsize,
        pub releases: Arc<AtomicUsize>,
    }

    impl HeapOps for CountingOps {
        fn allocate(
            &self,
            heap: &Arc<DmaHeap>,
            len: usize,
            fd_flags: FdFlags,
            heap_flags: u32,
            exporter: &dyn DmaBufExporter,
        ) -> Result<RawFd, DmaHeapError> {
            self.allocs.fetch_add(1, Ordering::SeqCst);
            self.last_len.store(len, Ordering::SeqCst);
            let releases = Arc::clone(&self.releases);
            let pages = (0..len / PAGE_SIZE)
                .map(|i| PhysicalPage::from_pfn(i as u64))
                .collect::<Vec<_>>();
            let buffer = HeapBuffer::new(
                Arc::clone(heap),
                len,
                heap_flags,
                pages,
                Box::new(move |_| {
                    releases.fetch_add(1, Ordering::SeqCst);
                }),
            );
            let buf = exporter.export(buffer, fd_flags)?;
            Ok(exporter.install_fd(buf, fd_flags)?)
        }
    }

    pub fn test_heap(name: &str, ops: Arc<dyn HeapOps>) -> Arc<DmaHeap> {
        Arc::new(DmaHeap::new(
            name.into(),
            ops,
            None,
            HeapKind::Unspecified,
            DeviceNumber::mkdev(240, 0),
        ))
    }

    #[test]
    fn buffer_alloc_rounds_to_pages() {
        let ops = Arc::new(CountingOps::default());
        let heap = test_heap("round", ops.clone());
        let fds = FdTable::new();

        heap.buffer_alloc(1, FdFlags::RDWR, 0, &fds).unwrap();
        assert_eq!(ops.last_len.load(Ordering::SeqCst), PAGE_SIZE);
        heap.buffer_alloc(PAGE_SIZE + 1, FdFlags::RDWR, 0, &fds).unwrap();
        assert_eq!(ops.last_len.load(Ordering::SeqCst), 2 * PAGE_SIZE);
        assert_eq!(fds.get(1).unwrap().buffer().page_count(), 2);
    }

    #[test]
    fn buffer_alloc_rejects_zero_and_overflowing_lengths() {
        let ops = Arc::new(CountingOps::default());
        let heap = test_heap("zero", ops.clone());
        let fds = FdTable::new();

        assert!(matches!(
            heap.buffer_alloc(0, FdFlags::empty(), 0, &fds),
            Err(DmaHeapError::InvalidArgument(_))
        ));
        assert!(matches!(
            heap.buffer_alloc(usize::MAX, FdFlags::empty(), 0, &fds),
            Err(DmaHeapError::InvalidArgument(_))
        ));
        assert_eq!(ops.allocs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn heap_without_renderer_prints_nothing() {
        let heap = test_heap("quiet", Arc::new(CountingOps::default()));
        let mut out = String::new();
        heap.debug_show(&mut out).unwrap();
        assert!(out.is_empty());
        assert!(!heap.has_debug());
        assert_eq!(heap.devnode(), "dma_heap/quiet");
    }
}
