#![allow(dead_code)]

use kernel_cma::{CmaArea, OffsetPhysMapper};
use kernel_dma_heap::{DevNodeTable, HeapRegistry};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage, Size4K};
use std::ptr::NonNull;
use std::sync::Arc;

pub const MAJOR: u32 = 240;

/// Simulated physical memory: `frames` frames starting at `base_pfn`, backed
/// by a leaked host allocation.
pub struct HostMemory {
    base: NonNull<u8>,
    base_pfn: u64,
    frames: usize,
    pub mapper: Arc<OffsetPhysMapper>,
}

impl HostMemory {
    pub fn new(base_pfn: u64, frames: usize) -> Self {
        Self::build(base_pfn, frames, None)
    }

    /// Like [`HostMemory::new`], with every frame from `first_high` on in high memory.
    pub fn with_highmem(base_pfn: u64, frames: usize, first_high: usize) -> Self {
        Self::build(base_pfn, frames, Some(first_high))
    }

    fn build(base_pfn: u64, frames: usize, first_high: Option<usize>) -> Self {
        let backing: &'static mut [u8] = Box::leak(vec![0u8; frames * PAGE_SIZE].into_boxed_slice());
        let base = NonNull::new(backing.as_mut_ptr()).unwrap();
        let phys = PhysicalAddress::new(base_pfn << 12);
        let mut mapper = unsafe { OffsetPhysMapper::new(phys, base, (frames * PAGE_SIZE) as u64) };
        if let Some(first_high) = first_high {
            mapper = mapper.with_highmem_start(PhysicalAddress::new((base_pfn + first_high as u64) << 12));
        }
        Self {
            base,
            base_pfn,
            frames,
            mapper: Arc::new(mapper),
        }
    }

    /// A CMA area spanning all of the memory.
    pub fn area(&self, name: &str) -> Arc<CmaArea> {
        Arc::new(CmaArea::new(name, PhysicalPage::from_pfn(self.base_pfn), self.frames).unwrap())
    }

    pub fn fill(&self, byte: u8) {
        unsafe { std::ptr::write_bytes(self.base.as_ptr(), byte, self.frames * PAGE_SIZE) };
    }

    pub fn frame_bytes(&self, frame: PhysicalPage<Size4K>) -> Vec<u8> {
        let index = usize::try_from(frame.pfn() - self.base_pfn).unwrap();
        assert!(index < self.frames);
        let mut out = vec![0u8; PAGE_SIZE];
        unsafe {
            std::ptr::copy_nonoverlapping(self.base.as_ptr().add(index * PAGE_SIZE), out.as_mut_ptr(), PAGE_SIZE);
        }
        out
    }
}

pub fn registry() -> HeapRegistry {
    HeapRegistry::new(MAJOR, Box::new(DevNodeTable::new()))
}
