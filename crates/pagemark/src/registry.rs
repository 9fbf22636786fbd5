//! Slot Descriptor Registry.
//!
//! For every payload type the collector needs the byte offsets of the
//! `Member` fields inside it. Nobody writes those offsets down. Instead, the
//! first time a type is registered, the registry builds one throwaway *probe*
//! instance with `Default`, pins it at a fixed address, and asks it to
//! [`Trace::register_slots`]. Each `Member` inside the probe records its own
//! address with the [`Discovery`] recorder; subtracting the probe's base
//! address turns those addresses into offsets that hold for every instance
//! of the type.
//!
//! Per type the registry moves through `Empty → Discovering → Finalized`
//! exactly once per process. Finalized descriptors are leaked to `'static`
//! and never change again.

use std::any::TypeId;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::mem::{align_of, size_of};
use std::sync::LazyLock;
use std::thread::{self, ThreadId};

use parking_lot::RwLock;

use crate::ptr::{Member, ObjectHeader};
use crate::trace::Trace;

/// Discovery state of a payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorState {
    /// The type has never been registered.
    Empty,
    /// A probe instance is being inspected right now.
    Discovering,
    /// Offsets are known and fixed.
    Finalized,
}

/// Finalized layout metadata for one payload type.
///
/// Every collected object starts with a pointer to its type's descriptor,
/// so the tracer resolves children from the object's runtime type.
pub struct TypeDescriptor {
    type_id: TypeId,
    type_name: &'static str,
    size: usize,
    align: usize,
    payload_offset: usize,
    offsets: Box<[usize]>,
    drop_fn: Option<unsafe fn(*mut u8)>,
}

impl TypeDescriptor {
    /// `TypeId` of the payload type.
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Name of the payload type, for diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// `size_of` the payload.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// `align_of` the payload.
    #[must_use]
    pub const fn align(&self) -> usize {
        self.align
    }

    /// Offset of the payload from the start of the object header.
    #[must_use]
    pub const fn payload_offset(&self) -> usize {
        self.payload_offset
    }

    /// Bytes an object of this type occupies in a slot, header included.
    #[must_use]
    pub const fn object_size(&self) -> usize {
        self.payload_offset + self.size
    }

    /// Sorted byte offsets of the `Member` slots, relative to the payload.
    #[must_use]
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Drops a payload of this type in place.
    ///
    /// # Safety
    ///
    /// `payload` must point to a valid, initialized value of this type that
    /// is not used again.
    pub(crate) unsafe fn drop_payload(&self, payload: *mut u8) {
        if let Some(drop_fn) = self.drop_fn {
            // SAFETY: forwarded from the caller.
            unsafe { drop_fn(payload) };
        }
    }
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("type_name", &self.type_name)
            .field("size", &self.size)
            .field("align", &self.align)
            .field("payload_offset", &self.payload_offset)
            .field("offsets", &self.offsets)
            .finish_non_exhaustive()
    }
}

/// Most slots a payload of `size` bytes can hold.
///
/// A footprint-derived upper bound rather than an exact field count.
#[must_use]
pub const fn slot_capacity(size: usize) -> usize {
    size / size_of::<Member<()>>()
}

/// Records `Member` addresses while a probe instance is inspected.
///
/// Only the registry creates one, and only for the duration of a single
/// type's discovery, so registration outside discovery is impossible.
pub struct Discovery {
    type_name: &'static str,
    base: usize,
    size: usize,
    capacity: usize,
    addresses: Vec<usize>,
}

impl Discovery {
    fn new<T>(probe: &T) -> Self {
        let size = size_of::<T>();
        Self {
            type_name: std::any::type_name::<T>(),
            base: std::ptr::from_ref(probe) as usize,
            size,
            capacity: slot_capacity(size),
            addresses: Vec::new(),
        }
    }

    /// Record a `Member` found inside the probe.
    pub(crate) fn record<T>(&mut self, member: &Member<T>) {
        let addr = std::ptr::from_ref(member) as usize;
        assert!(
            addr >= self.base && addr + size_of::<Member<T>>() <= self.base + self.size,
            "`{}` registered a slot outside of its own storage",
            self.type_name
        );
        assert!(
            self.addresses.len() < self.capacity,
            "`{}` declares more reference slots than its size can hold ({})",
            self.type_name,
            self.capacity
        );
        self.addresses.push(addr);
    }

    /// Number of slots recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Whether nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Turn recorded addresses into sorted payload-relative offsets.
    fn finish(self) -> Box<[usize]> {
        let mut offsets: Vec<usize> = self.addresses.iter().map(|a| a - self.base).collect();
        offsets.sort_unstable();
        for pair in offsets.windows(2) {
            assert!(
                pair[0] != pair[1],
                "`{}` registered the slot at offset {} twice",
                self.type_name,
                pair[0]
            );
        }
        for offset in &offsets {
            assert!(
                offset % align_of::<Member<()>>() == 0,
                "`{}` has a misaligned slot at offset {offset}",
                self.type_name
            );
        }
        offsets.into_boxed_slice()
    }
}

#[derive(Clone, Copy)]
enum Slot {
    Discovering(ThreadId),
    Finalized(&'static TypeDescriptor),
}

static REGISTRY: LazyLock<RwLock<HashMap<TypeId, Slot>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Discovery state of `T`.
#[must_use]
pub fn state<T: 'static>() -> DescriptorState {
    match REGISTRY.read().get(&TypeId::of::<T>()) {
        None => DescriptorState::Empty,
        Some(Slot::Discovering(_)) => DescriptorState::Discovering,
        Some(Slot::Finalized(_)) => DescriptorState::Finalized,
    }
}

/// The finalized descriptor of `T`, if `T` has been registered.
#[must_use]
pub fn descriptor<T: 'static>() -> Option<&'static TypeDescriptor> {
    match REGISTRY.read().get(&TypeId::of::<T>()) {
        Some(&Slot::Finalized(descriptor)) => Some(descriptor),
        _ => None,
    }
}

/// Number of finalized types in the process.
#[must_use]
pub fn registered_types() -> usize {
    REGISTRY
        .read()
        .values()
        .filter(|slot| matches!(slot, Slot::Finalized(_)))
        .count()
}

/// Describe `T`, running discovery if this is the first request.
///
/// Call this up front to fix the discovery order; allocation calls it
/// implicitly otherwise. Later calls return the same descriptor without
/// constructing anything.
///
/// # Panics
///
/// Panics if `T`'s `Default` impl registers `T` again, or if the probe
/// reports an inconsistent slot (outside the instance, duplicated,
/// misaligned, or more slots than the type's size allows).
pub fn register<T: Trace + Default + 'static>() -> &'static TypeDescriptor {
    let type_id = TypeId::of::<T>();
    loop {
        if let Some(&Slot::Finalized(descriptor)) = REGISTRY.read().get(&type_id) {
            return descriptor;
        }

        let mut registry = REGISTRY.write();
        let claimed = match registry.entry(type_id) {
            Entry::Occupied(entry) => match *entry.get() {
                Slot::Finalized(descriptor) => return descriptor,
                Slot::Discovering(owner) if owner == thread::current().id() => {
                    panic!(
                        "`{}` was registered again while its own probe was being built",
                        std::any::type_name::<T>()
                    );
                }
                // Another thread owns the discovery; wait for it.
                Slot::Discovering(_) => false,
            },
            Entry::Vacant(entry) => {
                entry.insert(Slot::Discovering(thread::current().id()));
                true
            }
        };
        drop(registry);

        if claimed {
            return discover::<T>();
        }
        thread::yield_now();
    }
}

/// Removes a `Discovering` entry if the probe panics.
struct DiscoveryGuard {
    type_id: TypeId,
    finished: bool,
}

impl Drop for DiscoveryGuard {
    fn drop(&mut self) {
        if !self.finished {
            REGISTRY.write().remove(&self.type_id);
        }
    }
}

fn discover<T: Trace + Default + 'static>() -> &'static TypeDescriptor {
    let mut guard = DiscoveryGuard {
        type_id: TypeId::of::<T>(),
        finished: false,
    };

    // The probe must not move between construction of the recorder and
    // the last registration, so both borrow it in place.
    let probe = T::default();
    let mut discovery = Discovery::new(&probe);
    probe.register_slots(&mut discovery);
    let offsets = discovery.finish();
    drop(probe);

    let descriptor: &'static TypeDescriptor = Box::leak(Box::new(TypeDescriptor {
        type_id: TypeId::of::<T>(),
        type_name: std::any::type_name::<T>(),
        size: size_of::<T>(),
        align: align_of::<T>(),
        payload_offset: size_of::<ObjectHeader>().next_multiple_of(align_of::<T>()),
        offsets,
        drop_fn: std::mem::needs_drop::<T>().then_some(drop_payload::<T> as unsafe fn(*mut u8)),
    }));

    crate::tracing::log_type_discovered(descriptor.type_name, descriptor.offsets.len());

    REGISTRY
        .write()
        .insert(TypeId::of::<T>(), Slot::Finalized(descriptor));
    guard.finished = true;
    descriptor
}

unsafe fn drop_payload<T>(payload: *mut u8) {
    // SAFETY: the caller passes a valid, initialized `T`.
    unsafe { std::ptr::drop_in_place(payload.cast::<T>()) };
}
