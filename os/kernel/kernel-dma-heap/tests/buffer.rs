mod common;

use common::{HostMemory, registry};
use kernel_dma_heap::heaps::cma::add_cma_heap;
use kernel_dma_heap::{AllocationData, DMA_HEAP_IOC_ALLOC, DmaBuf, DmaHeapError, FdFlags, FdTable};
use std::cell::Cell;
use std::ptr::NonNull;

fn setup(mem: &HostMemory, fds: &FdTable) -> DmaBuf {
    let registry = registry();
    let heap = add_cma_heap(&registry, mem.area("buffers"), mem.mapper.clone()).unwrap();
    let file = registry.open(heap.devt(), fds).unwrap();
    let mut data = AllocationData::new(2 * 4096, FdFlags::RDWR, 0);
    file.ioctl(DMA_HEAP_IOC_ALLOC, &mut data).unwrap();
    fds.get(data.fd).unwrap()
}

#[test]
fn vmap_is_created_once_and_torn_down_by_the_last_vunmap() {
    let mem = HostMemory::new(0x100, 4);
    let fds = FdTable::new();
    let buf = setup(&mem, &fds);
    let buffer = buf.buffer();

    let maps = Cell::new(0);
    let unmaps = Cell::new(0);
    let fake = NonNull::<u8>::dangling();
    let map = |pages: &[_]| {
        assert_eq!(pages.len(), 2);
        maps.set(maps.get() + 1);
        Ok::<_, ()>(fake)
    };

    assert_eq!(buffer.vmap_with(map), Ok(fake));
    assert_eq!(buffer.vmap_with(map), Ok(fake));
    assert_eq!(maps.get(), 1);
    assert_eq!(buffer.vmap_count(), 2);

    buffer.vunmap_with(|_| unmaps.set(unmaps.get() + 1)).unwrap();
    assert_eq!(unmaps.get(), 0);
    buffer.vunmap_with(|va| {
        assert_eq!(va, fake);
        unmaps.set(unmaps.get() + 1);
    })
    .unwrap();
    assert_eq!(unmaps.get(), 1);
    assert_eq!(buffer.vaddr(), None);
    assert!(matches!(
        buffer.vunmap_with(|_| unreachable!()),
        Err(DmaHeapError::InvalidArgument(_))
    ));
}

#[test]
fn failed_vmap_leaves_buffer_unmapped() {
    let mem = HostMemory::new(0x100, 4);
    let fds = FdTable::new();
    let buf = setup(&mem, &fds);

    assert_eq!(buf.buffer().vmap_with(|_| Err("no space")), Err("no space"));
    assert_eq!(buf.buffer().vmap_count(), 0);
    assert_eq!(buf.buffer().vaddr(), None);
}

#[test]
fn attachments_are_listed_in_order_and_detach_once() {
    let mem = HostMemory::new(0x100, 4);
    let fds = FdTable::new();
    let buf = setup(&mem, &fds);
    let buffer = buf.buffer();

    let gpu = buffer.attach("gpu").unwrap();
    let isp = buffer.attach("isp").unwrap();
    assert_ne!(gpu, isp);

    let mut seen = Vec::new();
    buffer.for_each_attachment(|a| seen.push(a.device.clone()));
    assert_eq!(seen, ["gpu", "isp"]);

    assert_eq!(buffer.detach(gpu).unwrap().device, "gpu");
    assert!(buffer.detach(gpu).is_err());
    assert_eq!(buffer.attachment_count(), 1);
}

#[test]
fn buffer_remembers_heap_and_flags() {
    let mem = HostMemory::new(0x100, 4);
    let fds = FdTable::new();
    let buf = setup(&mem, &fds);

    assert_eq!(buf.buffer().heap().name(), "buffers");
    assert_eq!(buf.buffer().flags(), 0);
    assert_eq!(buf.flags(), FdFlags::RDWR);
    assert!(DmaBuf::ptr_eq(&buf, &fds.get(0).unwrap()));
}
