//! Object layout and the in-object reference wrapper.

use std::cell::Cell;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::handles::Root;
use crate::heap::Heap;
use crate::page;
use crate::registry::{Discovery, TypeDescriptor};
use crate::trace::Trace;
use crate::Result;

// ============================================================================
// ObjectHeader - The first word of every collected object
// ============================================================================

/// The header every collected object starts with.
///
/// The payload follows at `descriptor.payload_offset()`. A slot that has
/// never held an object reads as `None` because fresh pages are zero-filled.
#[repr(C)]
pub struct ObjectHeader {
    pub(crate) descriptor: Option<&'static TypeDescriptor>,
}

impl ObjectHeader {
    /// Runtime type of the object.
    ///
    /// # Safety
    ///
    /// `object` must point to an initialized object.
    #[inline]
    pub(crate) unsafe fn descriptor_of(object: NonNull<Self>) -> &'static TypeDescriptor {
        // SAFETY: forwarded from the caller.
        let descriptor = unsafe { (*object.as_ptr()).descriptor };
        debug_assert!(descriptor.is_some(), "object header without a descriptor");
        // SAFETY: initialized objects always carry a descriptor.
        unsafe { descriptor.unwrap_unchecked() }
    }

    /// Address of the payload.
    ///
    /// # Safety
    ///
    /// `object` must point to an initialized object.
    #[inline]
    pub(crate) unsafe fn payload(object: NonNull<Self>) -> NonNull<u8> {
        // SAFETY: forwarded from the caller.
        let offset = unsafe { Self::descriptor_of(object) }.payload_offset();
        // SAFETY: the payload lies inside the object's slot.
        unsafe { object.cast::<u8>().add(offset) }
    }

    /// Borrow the payload as `T`.
    ///
    /// # Safety
    ///
    /// `object` must point to an initialized object of type `T` that stays
    /// resident for `'a`.
    #[inline]
    pub(crate) unsafe fn value<'a, T: 'static>(object: NonNull<Self>) -> &'a T {
        // SAFETY: forwarded from the caller.
        unsafe {
            debug_assert_eq!(
                Self::descriptor_of(object).type_id(),
                std::any::TypeId::of::<T>()
            );
            Self::payload(object).cast::<T>().as_ref()
        }
    }
}

/// The storage of a `Member`, independent of its target type.
pub(crate) type RawMember = Cell<Option<NonNull<ObjectHeader>>>;

// ============================================================================
// Member - The in-object reference slot
// ============================================================================

/// A reference slot inside a collected object.
///
/// `Member<T>` is what the collector follows when it traces: the registry
/// learns where each `Member` of a payload type lives, and the mark phase
/// reads those slots in every object of that type. A `Member` does not own
/// its target and does not keep it alive on its own; the owning object must
/// itself be reachable.
///
/// Members are empty by default. Assignment rebinds the slot and never
/// copies the pointee. Only a member stored inside an object of the
/// target's heap can be pointed at something; a `Member` on the stack or in
/// another heap stays empty.
///
/// Only declare `Member`s as plain (possibly nested struct or array) fields.
/// A `Member` behind `Option`, `Box` or `Vec` would not sit at a fixed offset
/// and could not be described.
///
/// ```
/// use pagemark::{Heap, Member, Trace};
/// use std::cell::Cell;
///
/// #[derive(Default, Trace)]
/// struct Node {
///     value: Cell<i32>,
///     next: Member<Node>,
/// }
///
/// let heap = Heap::new()?;
/// let a = heap.allocate::<Node>()?;
/// let b = heap.allocate::<Node>()?;
/// a.next.set(&b);
/// assert!(a.next.points_to(&b));
/// # Ok::<(), pagemark::Error>(())
/// ```
#[repr(transparent)]
pub struct Member<T> {
    target: RawMember,
    _marker: PhantomData<*const T>,
}

impl<T> Member<T> {
    /// An empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            target: Cell::new(None),
            _marker: PhantomData,
        }
    }

    /// Whether the slot references nothing.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.target.get().is_none()
    }

    /// Make the slot empty.
    #[inline]
    pub fn clear(&self) {
        self.target.set(None);
    }

    /// Copy the target of another slot, possibly one of a different owner.
    ///
    /// # Panics
    ///
    /// Panics if `other` is non-empty and this slot is not stored in the
    /// heap of its target.
    pub fn set_member(&self, other: &Self) {
        if let Some(target) = other.target.get() {
            let heap = page::owner_of(target.as_ptr().cast_const().cast());
            self.check_stored_in(heap);
        }
        self.target.set(other.target.get());
    }

    fn check_stored_in(&self, heap: Option<u64>) {
        let slot = std::ptr::from_ref(self).cast::<u8>();
        let owner = page::owner_of(slot);
        assert!(
            owner.is_some() && owner == heap,
            "member at {slot:p} does not belong to heap {} of its target",
            heap.map_or_else(|| "<unmapped>".to_owned(), |id| id.to_string())
        );
    }

    /// Address of the target object, or null when empty.
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.target
            .get()
            .map_or(std::ptr::null(), |p| p.as_ptr().cast_const().cast())
    }

    /// Whether both slots reference the same object (or are both empty).
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.target.get() == other.target.get()
    }

    #[inline]
    pub(crate) fn target(&self) -> Option<NonNull<ObjectHeader>> {
        self.target.get()
    }
}

impl<T: Trace + 'static> Member<T> {
    /// Point the slot at the object behind `root`; an empty root empties it.
    ///
    /// # Panics
    ///
    /// Panics if `root` is non-empty and this slot is not stored inside an
    /// object of `root`'s heap.
    pub fn set(&self, root: &Root<'_, T>) {
        let object = root.object();
        if object.is_some() {
            self.check_stored_in(root.heap().map(Heap::id));
        }
        self.target.set(object);
    }

    /// Whether the slot references the object behind `root`.
    #[must_use]
    pub fn points_to(&self, root: &Root<'_, T>) -> bool {
        self.target.get() == root.object()
    }

    /// A root handle to the target, keeping it alive independently of the
    /// object holding this slot. An empty slot yields an empty root bound to
    /// `heap`.
    ///
    /// # Errors
    ///
    /// Fails only if a new indirection table page cannot be mapped.
    ///
    /// # Panics
    ///
    /// Panics if the slot is non-empty but not stored in `heap`, or if its
    /// target is no longer a live `T`. Both happen only when a member was
    /// moved out of its object, e.g. with `RefCell::replace`.
    pub fn root<'heap>(&self, heap: &'heap Heap) -> Result<Root<'heap, T>> {
        match heap.resolve(self) {
            Some(object) => heap.root_object(object),
            None => Ok(Root::unbound(heap)),
        }
    }

    /// Borrow the target without rooting it.
    ///
    /// # Safety
    ///
    /// The target must stay reachable for as long as the returned reference
    /// is used: neither this slot nor any slot on the path from a root to it
    /// may be rebound before the borrow ends, or a later allocation may reuse
    /// the target's storage.
    #[must_use]
    pub unsafe fn get(&self) -> Option<&T> {
        // SAFETY: a non-empty `Member<T>` only ever holds `T` objects, and the
        // caller keeps the target resident.
        self.target.get().map(|object| unsafe { ObjectHeader::value(object) })
    }
}

impl<T> Default for Member<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Member<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.target.get() {
            None => f.write_str("Member(empty)"),
            Some(p) => write!(f, "Member({p:p})"),
        }
    }
}

unsafe impl<T> Trace for Member<T> {
    #[inline]
    fn register_slots(&self, discovery: &mut Discovery) {
        discovery.record(self);
    }
}

const _: () = assert!(std::mem::size_of::<Member<()>>() == std::mem::size_of::<RawMember>());
