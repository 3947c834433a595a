//! Endpoint identities and their exposure as `dma_heap/<name>` nodes.

use crate::error::errno;
use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use bitfield_struct::bitfield;
use core::fmt;
use kernel_sync::SpinLock;

/// Device class name and directory of every heap node.
pub const DEVNAME: &str = "dma_heap";

/// Character device number: 20 minor bits, 12 major bits (`MKDEV`).
#[bitfield(u32)]
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceNumber {
    /// Bits 0–19.
    #[bits(20)]
    pub minor: u32,
    /// Bits 20–31.
    #[bits(12)]
    pub major: u32,
}

const MINORMASK: u32 = (1 << 20) - 1;
const MAJORMASK: u32 = (1 << 12) - 1;

impl DeviceNumber {
    /// Combine `major` and `minor`; bits outside either field are dropped.
    #[must_use]
    pub const fn mkdev(major: u32, minor: u32) -> Self {
        Self::new()
            .with_minor(minor & MINORMASK)
            .with_major(major & MAJORMASK)
    }
}

impl fmt::Display for DeviceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major(), self.minor())
    }
}

/// Node path of the heap called `name`.
#[must_use]
pub fn devnode_path(name: &str) -> String {
    format!("{DEVNAME}/{name}")
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum EndpointError {
    #[error("a node with this name already exists")]
    NameInUse,
    #[error("device {0} is already exposed")]
    DeviceInUse(DeviceNumber),
    #[error("unable to create device node")]
    Unavailable,
}

impl EndpointError {
    #[must_use]
    pub const fn errno(&self) -> i32 {
        match self {
            Self::NameInUse | Self::DeviceInUse(_) => -errno::EEXIST,
            Self::Unavailable => -errno::ENOMEM,
        }
    }
}

/// Makes a registered heap reachable by clients.
pub trait EndpointExposer: Send + Sync {
    /// Create the node for `devt`, named after the heap.
    ///
    /// # Errors
    /// Any [`EndpointError`]; the registry then rolls the registration back.
    fn expose(&self, devt: DeviceNumber, name: &str) -> Result<(), EndpointError>;
}

/// In-memory node directory: `devt -> "dma_heap/<name>"`.
#[derive(Debug, Default)]
pub struct DevNodeTable {
    nodes: SpinLock<BTreeMap<DeviceNumber, String>>,
    capacity: Option<usize>,
}

impl DevNodeTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nodes: SpinLock::new(BTreeMap::new()),
            capacity: None,
        }
    }

    /// A table that fails node creation once `capacity` nodes exist.
    #[must_use]
    pub const fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: SpinLock::new(BTreeMap::new()),
            capacity: Some(capacity),
        }
    }

    #[must_use]
    pub fn path(&self, devt: DeviceNumber) -> Option<String> {
        self.nodes.with_lock(|nodes| nodes.get(&devt).cloned())
    }

    /// Resolve a node path back to its device number.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<DeviceNumber> {
        self.nodes
            .with_lock(|nodes| nodes.iter().find(|(_, p)| p.as_str() == path).map(|(d, _)| *d))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.with_lock(|nodes| nodes.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EndpointExposer for DevNodeTable {
    fn expose(&self, devt: DeviceNumber, name: &str) -> Result<(), EndpointError> {
        let path = devnode_path(name);
        self.nodes.with_lock(|nodes| {
            if self.capacity.is_some_and(|cap| nodes.len() >= cap) {
                return Err(EndpointError::Unavailable);
            }
            if nodes.contains_key(&devt) {
                return Err(EndpointError::DeviceInUse(devt));
            }
            if nodes.values().any(|p| *p == path) {
                return Err(EndpointError::NameInUse);
            }
            nodes.insert(devt, path);
            Ok(())
        })
    }
}
