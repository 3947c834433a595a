//! The bookkeeping record behind every heap allocation.

use crate::error::DmaHeapError;
use crate::heap::DmaHeap;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::ptr::NonNull;
use kernel_memory_addresses::{PhysicalPage, Size4K};
use kernel_sync::SpinLock;
use log::warn;

/// Backend routine that frees a buffer's memory. Runs exactly once, when the
/// buffer is dropped.
pub type ReleaseFn = Box<dyn FnOnce(&mut HeapBuffer) + Send + Sync>;

/// Identifies one attachment of a buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AttachmentId(u64);

/// One consumer that registered interest in the buffer's pages.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Attachment {
    pub id: AttachmentId,
    pub device: String,
}

struct BufferState {
    vmap_cnt: usize,
    vaddr: Option<NonNull<u8>>,
    attachments: Vec<Attachment>,
    next_attachment: u64,
}

// SAFETY: `vaddr` is a cached address handed back to the mapping callbacks;
// the buffer never dereferences it.
unsafe impl Send for BufferState {}

/// A heap allocation: its pages plus mapping and attachment bookkeeping.
///
/// Only backends create buffers. Once exported, the buffer lives inside a
/// [`DmaBuf`](crate::DmaBuf) and is dropped when the last holder lets go,
/// which runs the backend's [`ReleaseFn`].
pub struct HeapBuffer {
    heap: Arc<DmaHeap>,
    size: usize,
    flags: u32,
    pages: Vec<PhysicalPage<Size4K>>,
    state: SpinLock<BufferState>,
    release: Option<ReleaseFn>,
}

impl HeapBuffer {
    #[must_use]
    pub fn new(
        heap: Arc<DmaHeap>,
        size: usize,
        flags: u32,
        pages: Vec<PhysicalPage<Size4K>>,
        release: ReleaseFn,
    ) -> Self {
        Self {
            heap,
            size,
            flags,
            pages,
            state: SpinLock::new(BufferState {
                vmap_cnt: 0,
                vaddr: None,
                attachments: Vec::new(),
                next_attachment: 0,
            }),
            release: Some(release),
        }
    }

    #[inline]
    #[must_use]
    pub const fn heap(&self) -> &Arc<DmaHeap> {
        &self.heap
    }

    /// Size requested by the client.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[inline]
    #[must_use]
    pub const fn flags(&self) -> u32 {
        self.flags
    }

    #[inline]
    #[must_use]
    pub fn pages(&self) -> &[PhysicalPage<Size4K>] {
        &self.pages
    }

    #[inline]
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Detach the page array, leaving the buffer without pages.
    pub fn take_pages(&mut self) -> Vec<PhysicalPage<Size4K>> {
        core::mem::take(&mut self.pages)
    }

    /// Map the buffer into the kernel address space.
    ///
    /// The first caller creates the mapping through `map`; later callers get
    /// the cached address. `map` runs under the buffer lock and must not call
    /// back into this buffer.
    ///
    /// # Errors
    /// Whatever `map` returns; the mapping count is left unchanged.
    pub fn vmap_with<E>(
        &self,
        map: impl FnOnce(&[PhysicalPage<Size4K>]) -> Result<NonNull<u8>, E>,
    ) -> Result<NonNull<u8>, E> {
        self.state.with_lock(|state| {
            if let Some(vaddr) = state.vaddr {
                state.vmap_cnt += 1;
                return Ok(vaddr);
            }
            let vaddr = map(&self.pages)?;
            state.vaddr = Some(vaddr);
            state.vmap_cnt = 1;
            Ok(vaddr)
        })
    }

    /// Drop one mapping reference; the last one tears the mapping down
    /// through `unmap`.
    ///
    /// # Errors
    /// [`DmaHeapError::InvalidArgument`] if the buffer is not mapped.
    pub fn vunmap_with(&self, unmap: impl FnOnce(NonNull<u8>)) -> Result<(), DmaHeapError> {
        self.state.with_lock(|state| {
            let Some(vaddr) = state.vaddr else {
                return Err(DmaHeapError::InvalidArgument("vunmap of unmapped buffer"));
            };
            state.vmap_cnt -= 1;
            if state.vmap_cnt == 0 {
                state.vaddr = None;
                unmap(vaddr);
            }
            Ok(())
        })
    }

    #[must_use]
    pub fn vmap_count(&self) -> usize {
        self.state.with_lock(|state| state.vmap_cnt)
    }

    #[must_use]
    pub fn vaddr(&self) -> Option<NonNull<u8>> {
        self.state.with_lock(|state| state.vaddr)
    }

    /// Record a new consumer of the buffer's pages.
    ///
    /// # Errors
    /// [`DmaHeapError::OutOfMemory`] if the attachment list cannot grow.
    pub fn attach(&self, device: impl Into<String>) -> Result<AttachmentId, DmaHeapError> {
        let device = device.into();
        self.state.with_lock(|state| {
            state
                .attachments
                .try_reserve(1)
                .map_err(|_| DmaHeapError::OutOfMemory)?;
            let id = AttachmentId(state.next_attachment);
            state.next_attachment += 1;
            state.attachments.push(Attachment { id, device });
            Ok(id)
        })
    }

    /// # Errors
    /// [`DmaHeapError::InvalidArgument`] if `id` is not attached.
    pub fn detach(&self, id: AttachmentId) -> Result<Attachment, DmaHeapError> {
        self.state.with_lock(|state| {
            let index = state
                .attachments
                .iter()
                .position(|a| a.id == id)
                .ok_or(DmaHeapError::InvalidArgument("unknown attachment"))?;
            Ok(state.attachments.remove(index))
        })
    }

    /// Visit every attachment in attach order, under the buffer lock.
    pub fn for_each_attachment(&self, mut f: impl FnMut(&Attachment)) {
        self.state.with_lock(|state| state.attachments.iter().for_each(&mut f));
    }

    #[must_use]
    pub fn attachment_count(&self) -> usize {
        self.state.with_lock(|state| state.attachments.len())
    }
}

impl Drop for HeapBuffer {
    fn drop(&mut self) {
        let vmap_cnt = self.state.get_mut().vmap_cnt;
        if vmap_cnt > 0 {
            warn!(
                "dma_heap: {}: buffer released with {vmap_cnt} active vmap(s)",
                self.heap.name()
            );
        }
        if let Some(release) = self.release.take() {
            release(self);
        }
    }
}

impl fmt::Debug for HeapBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapBuffer")
            .field("heap", &self.heap.name())
            .field("size", &self.size)
            .field("flags", &self.flags)
            .field("pages", &self.pages.len())
            .finish_non_exhaustive()
    }
}
