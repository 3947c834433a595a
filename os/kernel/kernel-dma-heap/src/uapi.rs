//! Userspace-visible control protocol: the allocation request structure,
//! ioctl command encoding and the recognised flag sets.

use bitfield_struct::bitfield;

/// Ioctl type byte shared by all heap commands.
pub const DMA_HEAP_IOC_MAGIC: u8 = b'H';

/// Allocation request, read from and written back to the client.
///
/// `fd` and the reserved words must be zero on input. On success `fd`
/// receives the descriptor of the new buffer.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct AllocationData {
    pub len: u64,
    pub fd: u32,
    pub fd_flags: u32,
    pub heap_flags: u32,
    pub reserved0: u32,
    pub reserved1: u32,
    pub reserved2: u32,
}

const _: () = assert!(size_of::<AllocationData>() == 32);

impl AllocationData {
    #[must_use]
    pub const fn new(len: u64, fd_flags: FdFlags, heap_flags: u32) -> Self {
        Self {
            len,
            fd: 0,
            fd_flags: fd_flags.bits(),
            heap_flags,
            reserved0: 0,
            reserved1: 0,
            reserved2: 0,
        }
    }
}

/// Linux `_IOC` command word.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct IoctlCommand {
    /// Bits 0–7: command number within the type.
    pub nr: u8,
    /// Bits 8–15: driver type byte.
    pub ty: u8,
    /// Bits 16–29: size of the argument structure.
    #[bits(14)]
    pub size: u16,
    /// Bits 30–31: transfer direction.
    #[bits(2)]
    pub dir: u8,
}

impl IoctlCommand {
    pub const DIR_NONE: u8 = 0;
    pub const DIR_WRITE: u8 = 1;
    pub const DIR_READ: u8 = 2;

    /// `_IOWR(ty, nr, size)`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn iowr(ty: u8, nr: u8, size: usize) -> Self {
        Self::new()
            .with_nr(nr)
            .with_ty(ty)
            .with_size(size as u16)
            .with_dir(Self::DIR_READ | Self::DIR_WRITE)
    }
}

/// Allocate a buffer from the heap behind the open endpoint.
pub const DMA_HEAP_IOC_ALLOC: u32 =
    IoctlCommand::iowr(DMA_HEAP_IOC_MAGIC, 0x0, size_of::<AllocationData>()).into_bits();

bitflags::bitflags! {
    /// Descriptor flags a client may request for a new buffer.
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct FdFlags: u32 {
        const WRONLY = 0o1;
        const RDWR = 0o2;
        const CLOEXEC = 0o2_000_000;

        const ACCMODE = Self::WRONLY.bits() | Self::RDWR.bits();
    }
}

/// Every descriptor flag is valid for a heap buffer.
pub const DMA_HEAP_VALID_FD_FLAGS: FdFlags = FdFlags::all();

/// No heap flags are defined yet; any set bit is rejected.
pub const DMA_HEAP_VALID_HEAP_FLAGS: u32 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_command_matches_linux_encoding() {
        assert_eq!(DMA_HEAP_IOC_ALLOC, 0xC020_4800);
        let cmd = IoctlCommand::from_bits(DMA_HEAP_IOC_ALLOC);
        assert_eq!(cmd.ty(), b'H');
        assert_eq!(cmd.nr(), 0);
        assert_eq!(cmd.size(), 32);
        assert_eq!(cmd.dir(), 3);
    }

    #[test]
    fn valid_fd_flags_are_accmode_and_cloexec() {
        assert_eq!(DMA_HEAP_VALID_FD_FLAGS.bits(), 0o2_000_003);
        assert!(FdFlags::from_bits(0o4).is_none());
        assert_eq!(
            FdFlags::from_bits(0o2_000_002),
            Some(FdFlags::RDWR | FdFlags::CLOEXEC)
        );
    }

    #[test]
    fn new_request_has_clear_output_and_reserved_fields() {
        let data = AllocationData::new(4096, FdFlags::RDWR, 0);
        assert_eq!(data.fd, 0);
        assert_eq!(data.fd_flags, 2);
        assert_eq!((data.reserved0, data.reserved1, data.reserved2), (0, 0, 0));
    }
}
