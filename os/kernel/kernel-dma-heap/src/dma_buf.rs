//! The shareable buffer handle and the descriptor table that hands it out.

use crate::buffer::HeapBuffer;
use crate::error::errno;
use crate::uapi::FdFlags;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use kernel_sync::SpinLock;

/// Descriptor number handed to clients.
pub type RawFd = u32;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ExportError {
    #[error("too many open descriptors")]
    TooManyDescriptors,
    #[error("descriptor {0} is not open")]
    BadDescriptor(RawFd),
    #[error("out of memory")]
    OutOfMemory,
}

impl ExportError {
    #[must_use]
    pub const fn errno(&self) -> i32 {
        match self {
            Self::TooManyDescriptors => -errno::EMFILE,
            Self::BadDescriptor(_) => -errno::EBADF,
            Self::OutOfMemory => -errno::ENOMEM,
        }
    }
}

/// A reference-counted handle to a [`HeapBuffer`].
///
/// Every clone is one holder. The buffer, and with it the backend memory, is
/// released when the last clone is dropped.
#[derive(Clone)]
pub struct DmaBuf {
    buffer: Arc<HeapBuffer>,
    flags: FdFlags,
}

impl DmaBuf {
    #[must_use]
    pub fn new(buffer: HeapBuffer, flags: FdFlags) -> Self {
        Self {
            buffer: Arc::new(buffer),
            flags,
        }
    }

    #[inline]
    #[must_use]
    pub fn buffer(&self) -> &HeapBuffer {
        &self.buffer
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.buffer.size()
    }

    /// Flags the buffer was exported with.
    #[inline]
    #[must_use]
    pub const fn flags(&self) -> FdFlags {
        self.flags
    }

    /// Number of live handles to the buffer.
    #[must_use]
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.buffer)
    }

    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.buffer, &b.buffer)
    }
}

impl fmt::Debug for DmaBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaBuf")
            .field("buffer", &self.buffer)
            .field("flags", &self.flags)
            .field("holders", &self.holders())
            .finish()
    }
}

/// Turns heap buffers into client descriptors.
///
/// Both operations take ownership of what they are given. On failure the
/// buffer or handle is dropped, which releases it exactly like a final
/// `close` would.
pub trait DmaBufExporter: Send + Sync {
    /// Wrap `buffer` into a shareable handle.
    ///
    /// # Errors
    /// Any [`ExportError`].
    fn export(&self, buffer: HeapBuffer, flags: FdFlags) -> Result<DmaBuf, ExportError>;

    /// Install `buf` under a new descriptor.
    ///
    /// # Errors
    /// Any [`ExportError`].
    fn install_fd(&self, buf: DmaBuf, flags: FdFlags) -> Result<RawFd, ExportError>;

    /// Drop the descriptor's reference.
    ///
    /// # Errors
    /// [`ExportError::BadDescriptor`] if `fd` is not open.
    fn close(&self, fd: RawFd) -> Result<(), ExportError>;
}

/// A per-client descriptor table.
///
/// New descriptors take the lowest free number.
#[derive(Default)]
pub struct FdTable {
    slots: SpinLock<Vec<Option<(DmaBuf, FdFlags)>>>,
    limit: Option<usize>,
}

impl FdTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: SpinLock::new(Vec::new()),
            limit: None,
        }
    }

    /// A table holding at most `limit` open descriptors.
    #[must_use]
    pub const fn with_limit(limit: usize) -> Self {
        Self {
            slots: SpinLock::new(Vec::new()),
            limit: Some(limit),
        }
    }

    /// A new holder reference for the buffer behind `fd`.
    ///
    /// # Errors
    /// [`ExportError::BadDescriptor`] if `fd` is not open.
    pub fn get(&self, fd: RawFd) -> Result<DmaBuf, ExportError> {
        self.with_slot(fd, |(buf, _)| buf.clone())
    }

    /// Flags `fd` was installed with.
    ///
    /// # Errors
    /// [`ExportError::BadDescriptor`] if `fd` is not open.
    pub fn fd_flags(&self, fd: RawFd) -> Result<FdFlags, ExportError> {
        self.with_slot(fd, |(_, flags)| *flags)
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.slots.with_lock(|slots| slots.iter().flatten().count())
    }

    fn with_slot<R>(
        &self,
        fd: RawFd,
        f: impl FnOnce(&(DmaBuf, FdFlags)) -> R,
    ) -> Result<R, ExportError> {
        let index = usize::try_from(fd).map_err(|_| ExportError::BadDescriptor(fd))?;
        self.slots.with_lock(|slots| {
            slots
                .get(index)
                .and_then(Option::as_ref)
                .map(f)
                .ok_or(ExportError::BadDescriptor(fd))
        })
    }
}

impl DmaBufExporter for FdTable {
    fn export(&self, buffer: HeapBuffer, flags: FdFlags) -> Result<DmaBuf, ExportError> {
        Ok(DmaBuf::new(buffer, flags))
    }

    fn install_fd(&self, buf: DmaBuf, flags: FdFlags) -> Result<RawFd, ExportError> {
        let mut pending = Some(buf);
        let installed = self.slots.with_lock(|slots| {
            let index = if let Some(free) = slots.iter().position(Option::is_none) {
                free
            } else {
                if self.limit.is_some_and(|limit| slots.len() >= limit) {
                    return Err(ExportError::TooManyDescriptors);
                }
                slots
                    .try_reserve(1)
                    .map_err(|_| ExportError::OutOfMemory)?;
                slots.push(None);
                slots.len() - 1
            };
            let fd = RawFd::try_from(index).map_err(|_| ExportError::TooManyDescriptors)?;
            slots[index] = pending.take().map(|buf| (buf, flags));
            Ok(fd)
        });
        // A handle that could not be installed is released outside the lock.
        drop(pending);
        installed
    }

    fn close(&self, fd: RawFd) -> Result<(), ExportError> {
        let index = usize::try_from(fd).map_err(|_| ExportError::BadDescriptor(fd))?;
        let closed = self
            .slots
            .with_lock(|slots| slots.get_mut(index).and_then(Option::take));
        // The final release may run backend code; keep it outside the lock.
        closed.map(drop).ok_or(ExportError::BadDescriptor(fd))
    }
}

impl fmt::Debug for FdTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FdTable")
            .field("open", &self.open_count())
            .field("limit", &self.limit)
            .finish()
    }
}
