//! Tests for `#[derive(Trace)]`.

#![cfg(feature = "derive")]

use pagemark::registry;
use pagemark::{Heap, Member, Trace};
use std::cell::{Cell, RefCell};
use std::mem::offset_of;

#[derive(Default, Trace)]
struct Edges {
    first: Member<Vertex>,
    second: Member<Vertex>,
}

#[derive(Default, Trace)]
struct Vertex {
    id: Cell<u32>,
    edges: Edges,
    ring: [Member<Vertex>; 2],
}

#[test]
fn test_nested_struct_and_array_members() {
    let descriptor = registry::register::<Vertex>();
    let edges = offset_of!(Vertex, edges);
    let ring = offset_of!(Vertex, ring);
    let slot = std::mem::size_of::<Member<Vertex>>();

    let mut expected = vec![
        edges + offset_of!(Edges, first),
        edges + offset_of!(Edges, second),
        ring,
        ring + slot,
    ];
    expected.sort_unstable();
    assert_eq!(descriptor.offsets(), expected.as_slice());
}

#[test]
fn test_nested_members_are_traced() {
    let heap = Heap::with_config(pagemark::HeapConfig::new().slot_size(128)).unwrap();
    let hub = heap.allocate::<Vertex>().unwrap();
    let a = heap.allocate::<Vertex>().unwrap();
    let b = heap.allocate::<Vertex>().unwrap();
    a.id.set(1);
    b.id.set(2);
    hub.edges.second.set(&a);
    hub.ring[1].set(&b);
    drop((a, b));

    let metrics = heap.collect();
    assert_eq!(metrics.objects_marked, 3);
    assert_eq!(hub.edges.second.root(&heap).unwrap().id.get(), 1);
    assert_eq!(hub.ring[1].root(&heap).unwrap().id.get(), 2);
}

#[derive(Default, Trace)]
struct Cached {
    next: Member<Cached>,
    #[pagemark(skip)]
    scratch: RefCell<Vec<u8>>,
    #[pagemark(skip)]
    weak: Member<Cached>,
}

#[test]
fn test_skipped_fields_are_not_slots() {
    let descriptor = registry::register::<Cached>();
    assert_eq!(descriptor.offsets(), &[offset_of!(Cached, next)]);

    let heap = Heap::new().unwrap();
    let owner = heap.allocate::<Cached>().unwrap();
    let target = heap.allocate::<Cached>().unwrap();
    owner.weak.set(&target);
    owner.scratch.borrow_mut().push(1);
    let target_ptr = target.as_ptr();
    drop(target);

    heap.collect();
    assert_eq!(heap.is_marked_ptr(target_ptr), Some(false));
    assert_eq!(owner.scratch.borrow().as_slice(), &[1]);
}

#[derive(Default, Trace)]
struct Pair<T> {
    value: T,
    next: Member<Pair<T>>,
}

#[test]
fn test_generic_struct() {
    let heap = Heap::new().unwrap();
    let a = heap.allocate_with(Pair {
        value: 1u16,
        next: Member::new(),
    })
    .unwrap();
    let b = heap.allocate::<Pair<u16>>().unwrap();
    a.next.set(&b);
    drop(b);

    heap.collect();
    assert_eq!(heap.stats().live_objects, 2);
    assert_eq!(a.value, 1);
    assert_eq!(
        registry::descriptor::<Pair<u16>>().unwrap().offsets(),
        &[offset_of!(Pair<u16>, next)]
    );
    // Each instantiation is its own type.
    assert!(registry::descriptor::<Pair<u64>>().is_none());
}

#[derive(Default, Trace)]
struct Wrapper(Member<Wrapper>, u8);

#[derive(Default, Trace)]
struct Unit;

#[test]
fn test_tuple_and_unit_structs() {
    assert_eq!(
        registry::register::<Wrapper>().offsets(),
        &[offset_of!(Wrapper, 0)]
    );
    assert!(registry::register::<Unit>().offsets().is_empty());

    let heap = Heap::new().unwrap();
    let unit = heap.allocate::<Unit>().unwrap();
    assert!(!unit.is_empty());
}
