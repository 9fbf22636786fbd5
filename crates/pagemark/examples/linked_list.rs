//! Builds a linked list on a collected heap, drops half of it, and reports
//! what the collector found.
//!
//! ```text
//! cargo run --example linked_list
//! ```

use pagemark::{Heap, Member, Root, Trace};
use std::cell::Cell;

#[derive(Default, Trace)]
struct Node {
    value: Cell<i32>,
    next: Member<Node>,
}

fn main() -> pagemark::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .init();

    let heap = Heap::new()?;
    let head = heap.allocate::<Node>()?;
    let mut tail = head.try_clone()?;
    for i in 1..100 {
        let node = heap.allocate::<Node>()?;
        node.value.set(i);
        tail.next.set(&node);
        tail.assign(&node)?;
    }
    drop(tail);

    let metrics = heap.collect();
    println!(
        "full list: {} marked, {} reclaimed in {:?}",
        metrics.objects_marked, metrics.objects_reclaimed, metrics.duration
    );

    // Cut the list after node 49.
    let mut cursor: Root<'_, Node> = head.try_clone()?;
    for _ in 0..49 {
        cursor.follow(|n| &n.next);
    }
    cursor.next.clear();
    drop(cursor);

    let metrics = heap.collect();
    println!(
        "cut list: {} marked, {} reclaimed",
        metrics.objects_marked, metrics.objects_reclaimed
    );

    let mut sum = 0;
    let mut cursor = head.try_clone()?;
    while let Some(node) = cursor.get() {
        sum += node.value.get();
        cursor.follow(|n| &n.next);
    }
    println!("sum of remaining values: {sum}");
    println!("{:?}", heap.stats());
    Ok(())
}
