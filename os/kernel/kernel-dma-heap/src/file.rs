//! An opened heap endpoint and its ioctl handler.

use crate::dma_buf::DmaBufExporter;
use crate::error::DmaHeapError;
use crate::heap::DmaHeap;
use crate::uapi::{
    AllocationData, DMA_HEAP_IOC_ALLOC, DMA_HEAP_VALID_FD_FLAGS, DMA_HEAP_VALID_HEAP_FLAGS, FdFlags,
};
use alloc::sync::Arc;
use log::warn;

/// Moves an ioctl argument between client and kernel memory.
pub trait UserCopy<T> {
    /// # Errors
    /// [`DmaHeapError::Fault`] if the client memory is not readable.
    fn copy_from_user(&self) -> Result<T, DmaHeapError>;

    /// # Errors
    /// [`DmaHeapError::Fault`] if the client memory is not writable.
    fn copy_to_user(&mut self, value: &T) -> Result<(), DmaHeapError>;
}

impl UserCopy<Self> for AllocationData {
    fn copy_from_user(&self) -> Result<Self, DmaHeapError> {
        Ok(*self)
    }

    fn copy_to_user(&mut self, value: &Self) -> Result<(), DmaHeapError> {
        *self = *value;
        Ok(())
    }
}

/// A heap endpoint opened by one client.
pub struct HeapFile<'e> {
    heap: Arc<DmaHeap>,
    exporter: &'e dyn DmaBufExporter,
}

impl<'e> HeapFile<'e> {
    pub(crate) fn new(heap: Arc<DmaHeap>, exporter: &'e dyn DmaBufExporter) -> Self {
        Self { heap, exporter }
    }

    #[inline]
    #[must_use]
    pub const fn heap(&self) -> &Arc<DmaHeap> {
        &self.heap
    }

    /// Dispatch an ioctl command.
    ///
    /// # Errors
    /// [`DmaHeapError::NotSupported`] for unknown commands, otherwise the
    /// errors of the command handler.
    pub fn ioctl(
        &self,
        cmd: u32,
        arg: &mut dyn UserCopy<AllocationData>,
    ) -> Result<(), DmaHeapError> {
        match cmd {
            DMA_HEAP_IOC_ALLOC => self.ioctl_allocate(arg),
            _ => Err(DmaHeapError::NotSupported(cmd)),
        }
    }

    fn ioctl_allocate(&self, arg: &mut dyn UserCopy<AllocationData>) -> Result<(), DmaHeapError> {
        let mut data = arg.copy_from_user()?;

        if data.fd != 0 || data.reserved0 != 0 || data.reserved1 != 0 || data.reserved2 != 0 {
            warn_once!("dma_heap: ioctl data not valid");
            return Err(DmaHeapError::InvalidArgument("ioctl data not valid"));
        }

        if data.fd_flags & !DMA_HEAP_VALID_FD_FLAGS.bits() != 0 {
            warn_once!("dma_heap: fd_flags has invalid or unsupported flags set");
            return Err(DmaHeapError::InvalidArgument("unsupported fd_flags"));
        }
        let fd_flags = FdFlags::from_bits_retain(data.fd_flags);

        if data.heap_flags & !DMA_HEAP_VALID_HEAP_FLAGS != 0 {
            warn_once!("dma_heap: heap flags has invalid or unsupported flags set");
            return Err(DmaHeapError::InvalidArgument("unsupported heap_flags"));
        }

        let len = usize::try_from(data.len)
            .map_err(|_| DmaHeapError::InvalidArgument("length exceeds address space"))?;
        let fd = self
            .heap
            .buffer_alloc(len, fd_flags, data.heap_flags, self.exporter)?;

        data.fd = fd;
        if let Err(e) = arg.copy_to_user(&data) {
            if let Err(close) = self.exporter.close(fd) {
                warn!("dma_heap: cannot close undelivered descriptor {fd}: {close}");
            }
            return Err(e);
        }
        Ok(())
    }
}
