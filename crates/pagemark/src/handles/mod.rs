//! Root handles.
//!
//! A [`Root`] is the only way to keep an object alive from outside the
//! heap. It owns one entry of its heap's [indirection table](table); the
//! collector enumerates occupied entries as the root set. Dropping the root
//! releases the entry.

pub mod table;

use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::heap::Heap;
use crate::ptr::{Member, ObjectHeader};
use crate::trace::Trace;
use crate::Result;

use table::IndirectEntry;

/// A rooted reference to an object of type `T` on `'heap`.
///
/// Roots borrow their heap, so a heap cannot be dropped while any of its
/// roots exist. A root may be empty; [`Root::get`] then returns `None` and
/// dereferencing panics.
///
/// ```
/// use pagemark::{Heap, Root};
///
/// let heap = Heap::new()?;
/// let value: Root<'_, u64> = heap.allocate_with(7)?;
/// heap.collect();
/// assert_eq!(*value, 7);
/// # Ok::<(), pagemark::Error>(())
/// ```
pub struct Root<'heap, T> {
    heap: Option<&'heap Heap>,
    entry: Option<NonNull<IndirectEntry>>,
    _marker: PhantomData<*const T>,
}

impl<'heap, T> Root<'heap, T> {
    /// A root that references nothing and belongs to no heap.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            heap: None,
            entry: None,
            _marker: PhantomData,
        }
    }

    /// An empty root that can later be bound within `heap`.
    pub(crate) const fn unbound(heap: &'heap Heap) -> Self {
        Self {
            heap: Some(heap),
            entry: None,
            _marker: PhantomData,
        }
    }

    /// # Safety
    ///
    /// `entry` must be a fresh, occupied entry of `heap`'s table whose
    /// target is an object of type `T`.
    pub(crate) const unsafe fn from_entry(heap: &'heap Heap, entry: NonNull<IndirectEntry>) -> Self {
        Self {
            heap: Some(heap),
            entry: Some(entry),
            _marker: PhantomData,
        }
    }

    /// Whether the root references nothing.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entry.is_none()
    }

    /// The heap this root belongs to, if any.
    #[must_use]
    pub const fn heap(&self) -> Option<&'heap Heap> {
        self.heap
    }

    /// The referenced object.
    #[inline]
    pub(crate) fn object(&self) -> Option<NonNull<ObjectHeader>> {
        // SAFETY: our entry stays occupied until we release it.
        self.entry.map(|entry| unsafe { table::target(entry) })
    }

    /// Address of the referenced object, or null when empty.
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.object()
            .map_or(std::ptr::null(), |p| p.as_ptr().cast_const().cast())
    }

    /// Whether both roots reference the same object (or are both empty).
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.object() == other.object()
    }

    fn release(&mut self) {
        if let Some(entry) = self.entry.take() {
            // SAFETY: the entry is ours and is not used afterwards.
            unsafe { table::release(entry) };
        }
    }
}

impl<'heap, T: Trace + 'static> Root<'heap, T> {
    /// Borrow the referenced object.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: a rooted object is always marked, so its slot is never
        // reused while this root exists.
        self.object().map(|object| unsafe { ObjectHeader::value(object) })
    }

    /// A second, independent root to the same object.
    ///
    /// # Errors
    ///
    /// Fails only if a new indirection table page cannot be mapped.
    pub fn try_clone(&self) -> Result<Self> {
        match (self.heap, self.object()) {
            (Some(heap), Some(object)) => heap.root_object(object),
            (heap, _) => Ok(Self {
                heap,
                entry: None,
                _marker: PhantomData,
            }),
        }
    }

    /// Rebind this root to whatever `member` references, in place.
    ///
    /// The existing table entry is updated, so no entry is allocated unless
    /// the root was empty. An empty member empties the root.
    ///
    /// # Errors
    ///
    /// Fails only if a new indirection table page cannot be mapped.
    ///
    /// # Panics
    ///
    /// Panics if `member` is non-empty and this root was created with
    /// [`Root::empty`], since it then belongs to no heap. Also panics if
    /// `member` is not stored in this root's heap or no longer refers to a
    /// live `T` (see [`Member::root`]).
    pub fn set(&mut self, member: &Member<T>) -> Result<()> {
        let object = match self.heap {
            Some(heap) => heap.resolve(member),
            None => member.target(),
        };
        self.rebind(object)
    }

    /// Rebind this root to the object behind `other`, in place.
    ///
    /// # Errors
    ///
    /// Fails only if a new indirection table page cannot be mapped.
    pub fn assign(&mut self, other: &Self) -> Result<()> {
        match (self.heap, other.heap) {
            (Some(mine), Some(theirs)) if std::ptr::eq(mine, theirs) => self.rebind(other.object()),
            _ => {
                *self = other.try_clone()?;
                Ok(())
            }
        }
    }

    /// Advance to the object referenced by a member of the current object.
    ///
    /// This is the rooted form of `node = node.next`; it reuses the root's
    /// table entry. An empty root stays empty.
    ///
    /// ```
    /// use pagemark::{Heap, Member, Trace};
    ///
    /// #[derive(Default, Trace)]
    /// struct Link {
    ///     next: Member<Link>,
    /// }
    ///
    /// let heap = Heap::new()?;
    /// let head = heap.allocate::<Link>()?;
    /// let tail = heap.allocate::<Link>()?;
    /// head.next.set(&tail);
    ///
    /// let mut cursor = head.try_clone()?;
    /// cursor.follow(|link| &link.next);
    /// assert!(pagemark::Root::ptr_eq(&cursor, &tail));
    /// cursor.follow(|link| &link.next);
    /// assert!(cursor.is_empty());
    /// # Ok::<(), pagemark::Error>(())
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the selected member is not stored in this root's heap or no
    /// longer refers to a live `T` (see [`Member::root`]).
    pub fn follow<F>(&mut self, select: F)
    where
        F: FnOnce(&T) -> &Member<T>,
    {
        let (Some(heap), Some(value)) = (self.heap, self.get()) else {
            return;
        };
        let next = heap.resolve(select(value));
        match (self.entry, next) {
            (Some(_), None) => self.release(),
            (Some(entry), Some(object)) => {
                // SAFETY: our entry is occupied; `resolve` checked `object`.
                unsafe { table::retarget(entry, object) };
            }
            (None, _) => {}
        }
    }

    fn rebind(&mut self, object: Option<NonNull<ObjectHeader>>) -> Result<()> {
        match (self.entry, object) {
            (_, None) => self.release(),
            // SAFETY: our entry is occupied.
            (Some(entry), Some(object)) => unsafe { table::retarget(entry, object) },
            (None, Some(object)) => {
                let Some(heap) = self.heap else {
                    panic!("cannot bind a root created with `Root::empty`; root the object through its heap");
                };
                *self = heap.root_object(object)?;
            }
        }
        Ok(())
    }
}

impl<T: Trace + 'static> Deref for Root<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!(
                "dereferenced an empty root of `{}`",
                std::any::type_name::<T>()
            ),
        }
    }
}

impl<T: Trace + 'static> Clone for Root<'_, T> {
    /// # Panics
    ///
    /// Panics if a new indirection table page cannot be mapped; use
    /// [`Root::try_clone`] to handle that case.
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(root) => root,
            Err(err) => panic!("failed to clone a root: {err}"),
        }
    }
}

impl<T> Default for Root<'_, T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Drop for Root<'_, T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> std::fmt::Debug for Root<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.object() {
            None => f.write_str("Root(empty)"),
            Some(p) => write!(f, "Root({p:p})"),
        }
    }
}
