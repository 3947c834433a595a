mod common;

use common::{HostMemory, MAJOR, registry};
use kernel_dma_heap::heaps::cma::{add_cma_heap, add_cma_heaps};
use kernel_dma_heap::{
    AllocationData, DMA_HEAP_IOC_ALLOC, DevNodeTable, DeviceNumber, DmaBufExporter, DmaHeapError,
    EndpointError,
    FdFlags, FdTable, HeapRegistry, NUM_HEAP_MINORS,
};
use kernel_memory_addresses::PAGE_SIZE;
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn concurrent_alloc_free_cycles_restore_free_size() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 100;

    let mem = HostMemory::new(0x1000, 64);
    let other = HostMemory::new(0x2000, 64);
    let registry = Arc::new(registry());
    let first = mem.area("first");
    let second = other.area("second");
    let heaps = [
        add_cma_heap(&registry, first.clone(), mem.mapper.clone()).unwrap(),
        add_cma_heap(&registry, second.clone(), other.mapper.clone()).unwrap(),
    ];
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            let devt = heaps[t % 2].devt();
            thread::spawn(move || {
                let fds = FdTable::new();
                let file = registry.open(devt, &fds).unwrap();
                barrier.wait();
                let mut ok = 0;
                for i in 0..ROUNDS {
                    let pages = 1 + (t + i) % 4;
                    let mut data = AllocationData::new((pages * PAGE_SIZE) as u64, FdFlags::RDWR, 0);
                    match file.ioctl(DMA_HEAP_IOC_ALLOC, &mut data) {
                        Ok(()) => {
                            assert_eq!(fds.get(data.fd).unwrap().size(), pages * PAGE_SIZE);
                            fds.close(data.fd).unwrap();
                            ok += 1;
                        }
                        Err(DmaHeapError::AllocationFailed { .. }) => {}
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
                ok
            })
        })
        .collect();

    let succeeded: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert!(succeeded > 0);
    assert_eq!(first.free_size(), first.size());
    assert_eq!(second.free_size(), second.size());
}

#[test]
fn concurrent_registrations_get_distinct_minors() {
    const THREADS: usize = 16;

    let registry = Arc::new(registry());
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mem = HostMemory::new(0x100, 1);
                let area = mem.area(&format!("heap{t}"));
                barrier.wait();
                add_cma_heap(&registry, area, mem.mapper.clone()).unwrap().minor()
            })
        })
        .collect();

    let minors: BTreeSet<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(minors, (0..THREADS as u32).collect::<BTreeSet<_>>());
    assert_eq!(registry.len(), THREADS);
}

#[test]
fn bulk_registration_exposes_every_area() {
    let nodes = Arc::new(DevNodeTable::new());
    let registry = HeapRegistry::new(MAJOR, Box::new(SharedNodes(Arc::clone(&nodes))));
    let mem = HostMemory::new(0x100, 4);
    let areas = ["camera", "video", "camera"].map(|name| mem.area(name));

    let added = add_cma_heaps(&registry, areas, &mem.mapper);
    assert_eq!(added.len(), 2);
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes.resolve("dma_heap/video"), Some(DeviceNumber::mkdev(MAJOR, 1)));
    assert_eq!(nodes.path(DeviceNumber::mkdev(MAJOR, 0)).as_deref(), Some("dma_heap/camera"));

    let fds = FdTable::new();
    assert!(registry.open(DeviceNumber::mkdev(MAJOR, 2), &fds).is_err());
}

#[test]
fn failed_node_creation_leaves_no_heap_behind() {
    let registry = HeapRegistry::new(MAJOR, Box::new(DevNodeTable::with_capacity(1)));
    let mem = HostMemory::new(0x100, 4);

    add_cma_heap(&registry, mem.area("kept"), mem.mapper.clone()).unwrap();
    let err = add_cma_heap(&registry, mem.area("dropped"), mem.mapper.clone()).unwrap_err();
    assert_eq!(err, DmaHeapError::Endpoint(EndpointError::Unavailable));
    assert_eq!(registry.len(), 1);
    assert!(registry.lookup(1).is_err());
}

#[test]
fn every_minor_can_be_used_once() {
    let registry = registry();
    let mem = HostMemory::new(0x100, 1);
    for i in 0..NUM_HEAP_MINORS {
        add_cma_heap(&registry, mem.area(&format!("h{i}")), mem.mapper.clone()).unwrap();
    }
    let err = add_cma_heap(&registry, mem.area("late"), mem.mapper.clone()).unwrap_err();
    assert_eq!(err, DmaHeapError::ResourceExhausted);
    assert_eq!(err.errno(), -16);
}

#[test]
fn global_registry_initializes_once() {
    assert!(kernel_dma_heap::registry().is_none());
    let registry = kernel_dma_heap::init(MAJOR, Box::new(DevNodeTable::new())).unwrap();
    assert_eq!(registry.major(), MAJOR);
    assert!(std::ptr::eq(kernel_dma_heap::registry().unwrap(), registry));
    assert_eq!(
        kernel_dma_heap::init(MAJOR, Box::new(DevNodeTable::new())).unwrap_err(),
        DmaHeapError::AlreadyInitialized
    );
}

/// Lets the test keep a handle on the node table the registry owns.
struct SharedNodes(Arc<DevNodeTable>);

impl kernel_dma_heap::EndpointExposer for SharedNodes {
    fn expose(&self, devt: DeviceNumber, name: &str) -> Result<(), EndpointError> {
        self.0.expose(devt, name)
    }
}
