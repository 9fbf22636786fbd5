//! Mark phase: depth-first traversal with an explicit worker stack.

use std::ptr::NonNull;

use crate::page::{PageHeader, MAGIC_DATA_PAGE, PAGE_MASK};
use crate::ptr::{ObjectHeader, RawMember};

/// Addresses of the reference slots of `object`.
///
/// # Safety
///
/// `object` must point to an initialized object.
pub unsafe fn children(object: NonNull<ObjectHeader>) -> impl Iterator<Item = NonNull<RawMember>> {
    // SAFETY: forwarded from the caller.
    let descriptor = unsafe { ObjectHeader::descriptor_of(object) };
    // SAFETY: as above.
    let payload = unsafe { ObjectHeader::payload(object) };
    descriptor
        .offsets()
        .iter()
        // SAFETY: offsets were measured inside a payload of this type.
        .map(move |&offset| unsafe { payload.add(offset).cast::<RawMember>() })
}

/// The worker stack of one collection.
///
/// Objects are marked when pushed, so each object is pushed at most once
/// and the traversal terminates on cycles.
pub struct MarkStack {
    heap_id: u64,
    /// Sorted base addresses of the heap's data pages.
    pages: Vec<usize>,
    stack: Vec<NonNull<ObjectHeader>>,
    marked: usize,
}

impl MarkStack {
    /// An empty stack for a collection of heap `heap_id`, whose data pages
    /// start at `pages`.
    pub fn new(heap_id: u64, mut pages: Vec<usize>) -> Self {
        pages.sort_unstable();
        Self {
            heap_id,
            pages,
            stack: Vec::new(),
            marked: 0,
        }
    }

    /// Set the mark bit of `object`. Returns `true` if it was not marked yet.
    ///
    /// # Panics
    ///
    /// Panics if `object` is not an object in one of this heap's pages,
    /// which happens when a reference slot was moved between heaps or out
    /// of the heap and back.
    ///
    /// # Safety
    ///
    /// No reference to the page headers of this heap may be held.
    unsafe fn mark(&mut self, object: NonNull<ObjectHeader>) -> bool {
        let addr = object.as_ptr().cast::<u8>().cast_const();
        assert!(
            self.pages.binary_search(&((addr as usize) & PAGE_MASK)).is_ok(),
            "object {addr:p} does not belong to heap {}",
            self.heap_id
        );
        // SAFETY: the page is one of ours and mapped.
        let header = unsafe { &mut *PageHeader::containing(addr).as_ptr() };
        debug_assert_eq!(header.magic, MAGIC_DATA_PAGE);
        debug_assert_eq!(header.heap_id, self.heap_id);
        let index = header
            .slot_index(addr)
            .filter(|&index| index != header.sentinel() && header.pointer(index).cast::<ObjectHeader>() == object);
        let Some(index) = index else {
            panic!("reference {addr:p} does not point at an object slot");
        };
        // SAFETY: slot headers of a mapped page are always readable.
        if unsafe { (*object.as_ptr()).descriptor }.is_none() {
            panic!("reference {addr:p} points at a slot that never held an object");
        }
        if header.is_marked(index) {
            return false;
        }
        header.mark(index);
        true
    }

    /// Mark a root and queue it for scanning.
    ///
    /// # Safety
    ///
    /// No reference to the page headers of this heap may be held.
    pub unsafe fn mark_root(&mut self, object: NonNull<ObjectHeader>) {
        // SAFETY: forwarded from the caller.
        if unsafe { self.mark(object) } {
            self.marked += 1;
            self.stack.push(object);
        }
    }

    /// Pop and scan objects until the stack is empty.
    ///
    /// # Safety
    ///
    /// No reference to the page headers of this heap may be held.
    pub unsafe fn drain(&mut self) {
        while let Some(object) = self.stack.pop() {
            // SAFETY: only objects with a descriptor in our pages are pushed.
            for slot in unsafe { children(object) } {
                // SAFETY: slots lie inside the object's payload.
                if let Some(child) = unsafe { slot.as_ref() }.get() {
                    // SAFETY: forwarded from the caller; `mark` validates `child`.
                    unsafe { self.mark_root(child) };
                }
            }
        }
    }

    /// Objects marked so far.
    pub const fn marked(&self) -> usize {
        self.marked
    }
}
