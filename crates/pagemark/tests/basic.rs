//! Basic allocation and dereference tests for pagemark.

use pagemark::{Error, GrowthPolicy, Heap, HeapConfig, Member, Root, Trace};
use std::cell::Cell;

#[derive(Default, Trace)]
struct Node {
    value: Cell<i32>,
    next: Member<Node>,
}

#[test]
fn test_allocate_default() {
    let heap = Heap::new().unwrap();
    let node = heap.allocate::<Node>().unwrap();
    assert!(!node.is_empty());
    assert_eq!(node.value.get(), 0);
    assert!(node.next.is_empty());

    node.value.set(7);
    assert_eq!(node.get().map(|n| n.value.get()), Some(7));
}

#[test]
fn test_allocate_with_value() {
    let heap = Heap::new().unwrap();
    let number = heap.allocate_with(42u64).unwrap();
    let text = heap.allocate_with(String::from("hello")).unwrap();
    assert_eq!(*number, 42);
    assert_eq!(text.as_str(), "hello");
    assert_eq!(text.len(), 5);
}

#[test]
fn test_values_survive_collection() {
    let heap = Heap::new().unwrap();
    let roots: Vec<Root<'_, u64>> = (0..20).map(|i| heap.allocate_with(i).unwrap()).collect();
    heap.collect();
    heap.collect();
    for (i, root) in (0u64..).zip(&roots) {
        assert_eq!(**root, i);
    }
    assert_eq!(heap.stats().live_objects, 20);
}

#[test]
fn test_distinct_allocations_do_not_overlap() {
    let heap = Heap::new().unwrap();
    let roots: Vec<Root<'_, Node>> = (0..100).map(|_| heap.allocate().unwrap()).collect();
    let mut addrs: Vec<usize> = roots.iter().map(|r| r.as_ptr() as usize).collect();
    addrs.sort_unstable();
    addrs.dedup();
    assert_eq!(addrs.len(), 100);
    for pair in addrs.windows(2) {
        assert!(pair[1] - pair[0] >= heap.config().get_slot_size());
    }
}

#[test]
fn test_empty_root() {
    let root: Root<'_, Node> = Root::empty();
    assert!(root.is_empty());
    assert!(root.get().is_none());
    assert!(root.as_ptr().is_null());
    assert!(root.heap().is_none());
    assert_eq!(format!("{root:?}"), "Root(empty)");

    let default: Root<'_, Node> = Root::default();
    assert!(default.is_empty());
    assert!(Root::ptr_eq(&root, &default));
}

#[test]
#[should_panic(expected = "dereferenced an empty root")]
fn test_deref_empty_root_panics() {
    let root: Root<'_, Node> = Root::empty();
    let _ = root.value.get();
}

#[test]
fn test_clone_roots_same_object() {
    let heap = Heap::new().unwrap();
    let a = heap.allocate::<Node>().unwrap();
    assert_eq!(heap.stats().roots, 1);

    let b = a.clone();
    assert!(Root::ptr_eq(&a, &b));
    assert_eq!(heap.stats().roots, 2);

    b.value.set(3);
    assert_eq!(a.value.get(), 3);
}

#[derive(Default, Trace)]
struct Big {
    data: [u64; 16],
}

#[test]
fn test_object_too_large() {
    let heap = Heap::new().unwrap();
    let err = heap.allocate::<Big>().unwrap_err();
    assert!(matches!(
        err,
        Error::ObjectTooLarge {
            size: 136,
            slot_size: 64,
            ..
        }
    ));

    let roomy = Heap::with_config(HeapConfig::new().slot_size(256)).unwrap();
    let big = roomy.allocate::<Big>().unwrap();
    assert_eq!(big.data, [0; 16]);
}

#[derive(Default, Trace)]
#[repr(align(32))]
struct Wide {
    value: u8,
}

#[test]
fn test_unsupported_alignment() {
    let heap = Heap::with_config(HeapConfig::new().slot_size(128)).unwrap();
    let err = heap.allocate::<Wide>().unwrap_err();
    assert!(matches!(err, Error::UnsupportedAlignment { align: 32, .. }));
}

#[test]
fn test_invalid_config_is_rejected() {
    let err = Heap::with_config(HeapConfig::new().slot_size(100)).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));

    let err = Heap::with_config(
        HeapConfig::new()
            .initial_pages(4)
            .growth(GrowthPolicy::Bounded { max_pages: 2 }),
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn test_initial_pages() {
    let heap = Heap::with_config(HeapConfig::new().initial_pages(3).slot_size(32)).unwrap();
    let stats = heap.stats();
    assert_eq!(stats.pages, 3);
    assert_eq!(stats.slot_size, 32);
    assert_eq!(stats.capacity, 3 * (pagemark::page::capacity_for(32) - 1));
    assert_eq!(stats.live_objects, 0);
    assert_eq!(stats.free_slots(), stats.capacity);
}

#[test]
fn test_heaps_are_independent() {
    let first = Heap::new().unwrap();
    let second = Heap::new().unwrap();
    assert_ne!(first.id(), second.id());

    let a = first.allocate_with(1u32).unwrap();
    let b = second.allocate_with(2u32).unwrap();
    assert!(first.contains(a.as_ptr()));
    assert!(!first.contains(b.as_ptr()));
    assert!(second.contains(b.as_ptr()));
    assert_eq!(*a + *b, 3);
}
