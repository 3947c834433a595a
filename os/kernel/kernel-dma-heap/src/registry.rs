//! The process-wide table of registered heaps.

use crate::dma_buf::DmaBufExporter;
use crate::endpoint::{DeviceNumber, EndpointExposer};
use crate::error::DmaHeapError;
use crate::file::HeapFile;
use crate::heap::{DmaHeap, HeapExportInfo};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use kernel_sync::{RwSpinLock, SyncOnceCell};
use log::{debug, error, warn};

/// Number of heap minors; identities live in `[0, NUM_HEAP_MINORS)`.
pub const NUM_HEAP_MINORS: u32 = 128;

enum Slot {
    /// Minor taken by a registration that has not finished exposing its node.
    Reserved,
    Live(Arc<DmaHeap>),
}

/// Maps minor numbers to heaps and dispatches opens to them.
///
/// Registrations serialize on the table's write lock only while reserving
/// and publishing a minor. Node exposure runs unlocked, so lookups are never
/// held up by it.
pub struct HeapRegistry {
    major: u32,
    heaps: RwSpinLock<BTreeMap<u32, Slot>>,
    endpoints: Box<dyn EndpointExposer>,
}

/// Releases a reserved minor unless the registration was committed.
struct MinorReservation<'r> {
    registry: &'r HeapRegistry,
    minor: u32,
    committed: bool,
}

impl MinorReservation<'_> {
    fn commit(mut self, heap: Arc<DmaHeap>) {
        self.registry.heaps.with_write(|heaps| {
            heaps.insert(self.minor, Slot::Live(heap));
        });
        self.committed = true;
    }
}

impl Drop for MinorReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.heaps.with_write(|heaps| {
                heaps.remove(&self.minor);
            });
        }
    }
}

impl HeapRegistry {
    /// Registry for heaps under `major`. Majors wider than the 12-bit field
    /// of a [`DeviceNumber`] are truncated to it, as `MKDEV` would.
    #[must_use]
    pub fn new(major: u32, endpoints: Box<dyn EndpointExposer>) -> Self {
        let devt_major = DeviceNumber::mkdev(major, 0).major();
        if devt_major != major {
            warn!("dma_heap: major {major} does not fit a device number, using {devt_major}");
        }
        Self {
            major: devt_major,
            heaps: RwSpinLock::new(BTreeMap::new()),
            endpoints,
        }
    }

    #[inline]
    #[must_use]
    pub const fn major(&self) -> u32 {
        self.major
    }

    /// Register a heap under the lowest free minor and expose its node.
    ///
    /// # Errors
    /// - [`DmaHeapError::InvalidArgument`] for an empty name or missing ops.
    /// - [`DmaHeapError::ResourceExhausted`] if all minors are taken.
    /// - [`DmaHeapError::Endpoint`] if the node cannot be created; the minor
    ///   is released again.
    pub fn add(&self, info: HeapExportInfo) -> Result<Arc<DmaHeap>, DmaHeapError> {
        let HeapExportInfo {
            name,
            ops,
            kind,
            debug,
        } = info;

        if name.is_empty() {
            error!("dma_heap: Cannot add heap without a name");
            return Err(DmaHeapError::InvalidArgument("heap without a name"));
        }
        let Some(ops) = ops else {
            error!("dma_heap: Cannot add heap with invalid ops struct");
            return Err(DmaHeapError::InvalidArgument("heap without ops"));
        };

        let reservation = self.reserve_minor().ok_or_else(|| {
            error!("dma_heap: Unable to get minor number for heap");
            DmaHeapError::ResourceExhausted
        })?;
        let devt = DeviceNumber::mkdev(self.major, reservation.minor);

        if let Err(e) = self.endpoints.expose(devt, &name) {
            error!("dma_heap: Unable to create device for {name}: {e}");
            return Err(e.into());
        }

        let heap = Arc::new(DmaHeap::new(name, ops, debug, kind, devt));
        reservation.commit(Arc::clone(&heap));
        debug!("dma_heap: added {} at {devt}", heap.name());
        Ok(heap)
    }

    fn reserve_minor(&self) -> Option<MinorReservation<'_>> {
        let minor = self.heaps.with_write(|heaps| {
            // Keys are sorted, so the first gap is the lowest free minor.
            let minor = (0..NUM_HEAP_MINORS)
                .zip(heaps.keys().copied().chain(core::iter::once(u32::MAX)))
                .find(|(want, have)| want != have)
                .map(|(want, _)| want)?;
            heaps.insert(minor, Slot::Reserved);
            Some(minor)
        })?;
        Some(MinorReservation {
            registry: self,
            minor,
            committed: false,
        })
    }

    /// The heap registered under `minor`.
    ///
    /// # Errors
    /// [`DmaHeapError::NotFound`] if no heap is live at `minor`.
    pub fn lookup(&self, minor: u32) -> Result<Arc<DmaHeap>, DmaHeapError> {
        self.heaps
            .with_read(|heaps| match heaps.get(&minor) {
                Some(Slot::Live(heap)) => Some(Arc::clone(heap)),
                Some(Slot::Reserved) | None => None,
            })
            .ok_or(DmaHeapError::NotFound(DeviceNumber::mkdev(self.major, minor)))
    }

    /// Open the endpoint `devt` on behalf of a client whose descriptors live
    /// in `exporter`.
    ///
    /// # Errors
    /// [`DmaHeapError::NotFound`] if `devt` does not name a registered heap.
    pub fn open<'e>(
        &self,
        devt: DeviceNumber,
        exporter: &'e dyn DmaBufExporter,
    ) -> Result<HeapFile<'e>, DmaHeapError> {
        let heap = if devt.major() == self.major {
            self.lookup(devt.minor())
        } else {
            Err(DmaHeapError::NotFound(devt))
        };
        heap.map(|heap| HeapFile::new(heap, exporter)).inspect_err(|_| {
            error!("dma_heap: minor {} unknown.", devt.minor());
        })
    }

    /// All live heaps in minor order.
    #[must_use]
    pub fn heaps(&self) -> Vec<Arc<DmaHeap>> {
        self.heaps.with_read(|heaps| {
            heaps
                .values()
                .filter_map(|slot| match slot {
                    Slot::Live(heap) => Some(Arc::clone(heap)),
                    Slot::Reserved => None,
                })
                .collect()
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heaps().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render the statistics of every heap that has a renderer.
    ///
    /// # Errors
    /// Only errors from `out`.
    pub fn debug_show_all(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        self.heaps()
            .iter()
            .filter(|heap| heap.has_debug())
            .try_for_each(|heap| {
                writeln!(out, "{}:", heap.name())?;
                heap.debug_show(out)
            })
    }
}

impl fmt::Debug for HeapRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapRegistry")
            .field("major", &self.major)
            .field("heaps", &self.heaps())
            .finish_non_exhaustive()
    }
}

static DMA_HEAPS: SyncOnceCell<HeapRegistry> = SyncOnceCell::new();

/// Create the process-wide registry. Heaps are never torn down.
///
/// # Errors
/// [`DmaHeapError::AlreadyInitialized`] on a second call.
pub fn init(
    major: u32,
    endpoints: Box<dyn EndpointExposer>,
) -> Result<&'static HeapRegistry, DmaHeapError> {
    DMA_HEAPS
        .set(HeapRegistry::new(major, endpoints))
        .map_err(|_| DmaHeapError::AlreadyInitialized)
}

/// The process-wide registry, once [`init`] has run.
#[must_use]
pub fn registry() -> Option<&'static HeapRegistry> {
    DMA_HEAPS.get()
}
