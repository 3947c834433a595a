use crate::dma_buf::ExportError;
use crate::endpoint::{DeviceNumber, EndpointError};

/// Linux error numbers used at the control protocol boundary.
pub mod errno {
    pub const EBADF: i32 = 9;
    pub const ENOMEM: i32 = 12;
    pub const EFAULT: i32 = 14;
    pub const EBUSY: i32 = 16;
    pub const EEXIST: i32 = 17;
    pub const ENODEV: i32 = 19;
    pub const EINVAL: i32 = 22;
    pub const EMFILE: i32 = 24;
    pub const ENOTTY: i32 = 25;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum DmaHeapError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("no heap registered at {0}")]
    NotFound(DeviceNumber),
    #[error("no free heap minor left")]
    ResourceExhausted,
    #[error("contiguous allocation of {pages} pages at order {order} failed")]
    AllocationFailed { pages: usize, order: u32 },
    #[error("out of memory")]
    OutOfMemory,
    #[error("unsupported ioctl command {0:#010x}")]
    NotSupported(u32),
    #[error("bad user address")]
    Fault,
    #[error("the heap registry is already initialized")]
    AlreadyInitialized,
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

impl DmaHeapError {
    /// The negative errno reported to the client for this error.
    #[must_use]
    pub const fn errno(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) => -errno::EINVAL,
            Self::NotFound(_) => -errno::ENODEV,
            Self::ResourceExhausted | Self::AlreadyInitialized => -errno::EBUSY,
            Self::AllocationFailed { .. } | Self::OutOfMemory => -errno::ENOMEM,
            Self::NotSupported(_) => -errno::ENOTTY,
            Self::Fault => -errno::EFAULT,
            Self::Endpoint(e) => e.errno(),
            Self::Export(e) => e.errno(),
        }
    }
}
