//! Payload drop tests: unreachable payloads are dropped when their slot is
//! reused, and resident payloads when the heap is dropped.

use pagemark::{registry, Heap, Member, Trace};
use std::sync::atomic::{AtomicUsize, Ordering};

static REUSE_DROPS: AtomicUsize = AtomicUsize::new(0);
static HEAP_DROPS: AtomicUsize = AtomicUsize::new(0);

#[derive(Default, Trace)]
struct DroppedOnReuse {
    id: u32,
}

impl Drop for DroppedOnReuse {
    fn drop(&mut self) {
        REUSE_DROPS.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default, Trace)]
struct DroppedWithHeap {
    next: Member<DroppedWithHeap>,
}

impl Drop for DroppedWithHeap {
    fn drop(&mut self) {
        HEAP_DROPS.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_payload_dropped_on_reuse() {
    // Discovery drops its probe; get that out of the way first.
    registry::register::<DroppedOnReuse>();
    let before = REUSE_DROPS.load(Ordering::SeqCst);

    let heap = Heap::new().unwrap();
    let garbage = heap.allocate_with(DroppedOnReuse { id: 1 }).unwrap();
    let garbage_ptr = garbage.as_ptr();
    drop(garbage);

    heap.collect();
    // Sweeping frees the slot but does not run the destructor.
    assert_eq!(REUSE_DROPS.load(Ordering::SeqCst), before);

    let next = heap.allocate_with(DroppedOnReuse { id: 2 }).unwrap();
    assert_eq!(next.as_ptr(), garbage_ptr);
    assert_eq!(REUSE_DROPS.load(Ordering::SeqCst), before + 1);
    assert_eq!(next.id, 2);
}

#[test]
fn test_payloads_dropped_with_heap() {
    registry::register::<DroppedWithHeap>();
    let before = HEAP_DROPS.load(Ordering::SeqCst);

    let heap = Heap::new().unwrap();
    {
        let a = heap.allocate::<DroppedWithHeap>().unwrap();
        let b = heap.allocate::<DroppedWithHeap>().unwrap();
        a.next.set(&b);
        let _c = heap.allocate::<DroppedWithHeap>().unwrap();
    }
    heap.collect();
    assert_eq!(HEAP_DROPS.load(Ordering::SeqCst), before);

    drop(heap);
    assert_eq!(HEAP_DROPS.load(Ordering::SeqCst), before + 3);
}

#[test]
fn test_owned_payloads_are_released() {
    let heap = Heap::new().unwrap();
    let text = heap.allocate_with(String::from("pagemark")).unwrap();
    for i in 0..500 {
        let scratch = heap.allocate_with(format!("scratch {i}")).unwrap();
        assert!(scratch.starts_with("scratch"));
    }
    heap.collect();
    assert_eq!(text.as_str(), "pagemark");
    assert_eq!(heap.stats().live_objects, 1);
}
