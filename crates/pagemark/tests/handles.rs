//! Root handle and indirection table tests for pagemark.

use pagemark::handles::table::ENTRIES_PER_PAGE;
use pagemark::{Heap, Member, Root, Trace};
use std::cell::{Cell, RefCell};

#[derive(Default, Trace)]
struct Node {
    value: Cell<i32>,
    next: Member<Node>,
}

#[test]
fn test_released_entries_are_recycled() {
    let heap = Heap::new().unwrap();
    let a = heap.allocate::<Node>().unwrap();
    let b = heap.allocate::<Node>().unwrap();
    assert_eq!(heap.stats().roots, 2);

    drop(a);
    assert_eq!(heap.stats().roots, 1);

    let c = heap.allocate::<Node>().unwrap();
    assert_eq!(heap.stats().roots, 2);
    assert_eq!(heap.stats().table_pages, 1);
    drop((b, c));
    assert_eq!(heap.stats().roots, 0);
}

#[test]
fn test_many_roots_spill_to_new_table_page() {
    let heap = Heap::new().unwrap();
    let node = heap.allocate::<Node>().unwrap();
    let clones: Vec<_> = (0..ENTRIES_PER_PAGE).map(|_| node.clone()).collect();
    assert_eq!(heap.stats().roots, ENTRIES_PER_PAGE + 1);
    assert_eq!(heap.stats().table_pages, 2);

    drop(clones);
    assert_eq!(heap.stats().roots, 1);
    let metrics = heap.collect();
    assert_eq!(metrics.roots_scanned, 1);
    assert_eq!(metrics.objects_marked, 1);
}

#[test]
fn test_set_rebinds_in_place() {
    let heap = Heap::new().unwrap();
    let a = heap.allocate::<Node>().unwrap();
    let b = heap.allocate::<Node>().unwrap();
    b.value.set(5);
    a.next.set(&b);
    drop(b);

    let mut cursor = a.clone();
    assert_eq!(heap.stats().roots, 2);
    cursor.set(&a.next).unwrap();
    assert_eq!(heap.stats().roots, 2);
    assert_eq!(cursor.value.get(), 5);
    assert!(a.next.points_to(&cursor));

    cursor.set(&Member::new()).unwrap();
    assert!(cursor.is_empty());
    assert_eq!(heap.stats().roots, 1);

    // The emptied root remembers its heap and can be bound again.
    cursor.set(&a.next).unwrap();
    assert_eq!(cursor.value.get(), 5);
}

#[test]
fn test_rooted_member_target_keeps_object_alive() {
    let heap = Heap::new().unwrap();
    let a = heap.allocate::<Node>().unwrap();
    let b = heap.allocate::<Node>().unwrap();
    b.value.set(9);
    a.next.set(&b);
    drop(b);

    let b = a.next.root(&heap).unwrap();
    a.next.clear();
    heap.collect();
    assert!(heap.is_marked(&b));
    assert_eq!(b.value.get(), 9);
}

#[test]
fn test_root_of_empty_member() {
    let heap = Heap::new().unwrap();
    let a = heap.allocate::<Node>().unwrap();
    let empty = a.next.root(&heap).unwrap();
    assert!(empty.is_empty());
    assert!(std::ptr::eq(empty.heap().unwrap(), &heap));
    assert_eq!(heap.stats().roots, 1);
}

#[test]
#[should_panic(expected = "Root::empty")]
fn test_binding_a_heapless_root_panics() {
    let heap = Heap::new().unwrap();
    let a = heap.allocate::<Node>().unwrap();
    a.next.set(&a);
    let mut root: Root<'_, Node> = Root::empty();
    let _ = root.set(&a.next);
}

#[test]
fn test_assign_between_roots() {
    let heap = Heap::new().unwrap();
    let a = heap.allocate::<Node>().unwrap();
    let b = heap.allocate::<Node>().unwrap();
    b.value.set(1);

    let mut root = a.clone();
    root.assign(&b).unwrap();
    assert!(Root::ptr_eq(&root, &b));
    assert_eq!(heap.stats().roots, 3);

    let mut empty: Root<'_, Node> = Root::empty();
    empty.assign(&a).unwrap();
    assert!(Root::ptr_eq(&empty, &a));
    assert_eq!(heap.stats().roots, 4);

    root.assign(&Root::empty()).unwrap();
    assert!(root.is_empty());
    assert_eq!(heap.stats().roots, 3);
}

#[test]
fn test_assign_across_heaps() {
    let first = Heap::new().unwrap();
    let second = Heap::new().unwrap();
    let a = first.allocate::<Node>().unwrap();
    let b = second.allocate::<Node>().unwrap();

    let mut root = a.clone();
    root.assign(&b).unwrap();
    assert!(std::ptr::eq(root.heap().unwrap(), &second));
    assert_eq!(first.stats().roots, 1);
    assert_eq!(second.stats().roots, 2);
}

#[test]
fn test_follow_walks_and_releases() {
    let heap = Heap::new().unwrap();
    let a = heap.allocate::<Node>().unwrap();
    let b = heap.allocate::<Node>().unwrap();
    a.next.set(&b);

    let mut cursor = a.clone();
    cursor.follow(|n| &n.next);
    assert!(Root::ptr_eq(&cursor, &b));
    assert_eq!(heap.stats().roots, 3);

    cursor.follow(|n| &n.next);
    assert!(cursor.is_empty());
    assert_eq!(heap.stats().roots, 2);

    // Following from an empty root is a no-op.
    cursor.follow(|n| &n.next);
    assert!(cursor.is_empty());
}

#[test]
fn test_root_debug_and_identity() {
    let heap = Heap::new().unwrap();
    let a = heap.allocate::<Node>().unwrap();
    let b = a.try_clone().unwrap();
    assert_eq!(a.as_ptr(), b.as_ptr());
    assert!(format!("{a:?}").starts_with("Root(0x"));
    assert!(heap.contains(a.as_ptr()));
}

#[derive(Default, Trace)]
struct Holder {
    link: RefCell<Member<Node>>,
}

#[derive(Default, Trace)]
struct Text {
    text: String,
}

/// Moves a member out of the heap, lets its target be collected and reuses
/// the target's slot for a `Text`. Returns the detached member.
fn detach_and_reuse<'heap>(
    heap: &'heap Heap,
    holder: &Root<'heap, Holder>,
) -> (Member<Node>, Root<'heap, Text>) {
    let node = heap.allocate::<Node>().unwrap();
    node.value.set(5);
    holder.link.borrow().set(&node);
    let detached = holder.link.replace(Member::new());
    drop(node);

    heap.collect();
    let text = heap
        .allocate_with(Text {
            text: String::from("hello"),
        })
        .unwrap();
    assert_eq!(text.as_ptr(), detached.as_ptr());
    (detached, text)
}

#[test]
#[should_panic(expected = "does not belong to heap")]
fn test_member_outside_heap_cannot_be_set() {
    let heap = Heap::new().unwrap();
    let node = heap.allocate::<Node>().unwrap();
    let outside: Member<Node> = Member::new();
    outside.set(&node);
}

#[test]
fn test_member_outside_heap_accepts_empty_root() {
    let outside: Member<Node> = Member::new();
    outside.set(&Root::empty());
    assert!(outside.is_empty());
}

#[test]
#[should_panic(expected = "is not stored in heap")]
fn test_detached_member_cannot_rebind_root() {
    let heap = Heap::new().unwrap();
    let holder = heap.allocate::<Holder>().unwrap();
    let (detached, _text) = detach_and_reuse(&heap, &holder);

    let mut cursor = heap.allocate::<Node>().unwrap();
    let _ = cursor.set(&detached);
}

#[test]
#[should_panic(expected = "is not stored in heap")]
fn test_detached_member_cannot_be_rooted() {
    let heap = Heap::new().unwrap();
    let holder = heap.allocate::<Holder>().unwrap();
    let (detached, _text) = detach_and_reuse(&heap, &holder);
    let _ = detached.root(&heap);
}

#[test]
#[should_panic(expected = "is not stored in heap")]
fn test_detached_member_cannot_be_followed() {
    let heap = Heap::new().unwrap();
    let holder = heap.allocate::<Holder>().unwrap();
    let (detached, _text) = detach_and_reuse(&heap, &holder);
    let detached: &'static Member<Node> = Box::leak(Box::new(detached));

    let mut cursor = heap.allocate::<Node>().unwrap();
    cursor.follow(|_| detached);
}

#[test]
#[should_panic(expected = "no longer holds one")]
fn test_member_reattached_after_reuse_is_rejected() {
    let heap = Heap::new().unwrap();
    let holder = heap.allocate::<Holder>().unwrap();
    let (detached, _text) = detach_and_reuse(&heap, &holder);
    drop(holder.link.replace(detached));

    let mut cursor = heap.allocate::<Node>().unwrap();
    let _ = cursor.set(&holder.link.borrow());
}

#[test]
#[should_panic(expected = "must not hold references")]
fn test_value_with_references_cannot_be_moved_in() {
    let heap = Heap::new().unwrap();
    let holder = heap.allocate::<Holder>().unwrap();
    let node = heap.allocate::<Node>().unwrap();
    holder.link.borrow().set(&node);

    let detached = holder.link.replace(Member::new());
    let _ = heap.allocate_with(Holder {
        link: RefCell::new(detached),
    });
}
