//! Heap manager: page ownership, slot allocation and collection entry points.
//!
//! A [`Heap`] owns a list of data pages of one slot size and an indirection
//! table. Allocation scans the pages from a `(page, slot)` cursor for a slot
//! whose allocation bit is clear. When every page is exhausted the heap
//! collects (if configured), scans again, and finally grows according to its
//! [`GrowthPolicy`](crate::GrowthPolicy).
//!
//! # Example
//!
//! ```
//! use pagemark::{Heap, Member, Trace};
//! use std::cell::Cell;
//!
//! #[derive(Default, Trace)]
//! struct Node {
//!     value: Cell<i32>,
//!     next: Member<Node>,
//! }
//!
//! let heap = Heap::new()?;
//! let head = heap.allocate::<Node>()?;
//! let tail = heap.allocate::<Node>()?;
//! tail.value.set(2);
//! head.next.set(&tail);
//! drop(tail);
//!
//! heap.collect();
//! let tail = head.next.root(&heap)?;
//! assert_eq!(tail.value.get(), 2);
//! # Ok::<(), pagemark::Error>(())
//! ```

use std::any::TypeId;
use std::cell::{Cell, RefCell};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::HeapConfig;
use crate::error::{Error, Result};
use crate::gc;
use crate::handles::table::IndirectTable;
use crate::handles::Root;
use crate::metrics::{CollectionTrigger, GcMetrics, HeapStats};
use crate::page::{self, Page, PageHeader, SLOT_ALIGN};
use crate::ptr::{Member, ObjectHeader, RawMember};
use crate::registry::{self, TypeDescriptor};
use crate::trace::Trace;
use crate::tracing::{log_out_of_memory, log_page_growth};

static NEXT_HEAP_ID: AtomicU64 = AtomicU64::new(1);

/// The data pages of a heap and the allocation cursor.
pub(crate) struct Pages {
    pub(crate) list: Vec<Page>,
    next_page: usize,
    next_slot: usize,
}

impl Pages {
    /// Claim the first free slot at or after the cursor.
    fn claim_free(&mut self) -> Option<NonNull<u8>> {
        while self.next_page < self.list.len() {
            let header = self.list[self.next_page].header_mut();
            if let Some(index) = header.find_free(self.next_slot) {
                header.claim(index);
                self.next_slot = index + 1;
                return Some(header.pointer(index));
            }
            self.next_page += 1;
            self.next_slot = 0;
        }
        None
    }

    /// Map one more page and move the cursor onto it.
    fn grow(&mut self, heap_id: u64, slot_size: usize) -> Result<()> {
        let index = u32::try_from(self.list.len())
            .map_err(|_| Error::InvalidConfig("page count exceeds the page index range"))?;
        self.list.push(Page::new(heap_id, index, slot_size)?);
        self.next_page = self.list.len() - 1;
        self.next_slot = 0;
        Ok(())
    }

    /// Point the cursor back at the first slot of the first page.
    pub(crate) fn rewind(&mut self) {
        self.next_page = 0;
        self.next_slot = 0;
    }

    fn find(&self, addr: *const u8) -> Option<&Page> {
        self.list.iter().find(|page| page.contains(addr))
    }
}

/// Sets a flag for the lifetime of the guard.
struct FlagGuard<'a>(&'a Cell<bool>);

impl<'a> FlagGuard<'a> {
    fn set(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// A garbage-collected heap.
///
/// All operations take `&self`; roots borrow the heap, which therefore
/// outlives every root and every object reachable from one. A heap is
/// neither `Send` nor `Sync`.
pub struct Heap {
    pub(crate) id: u64,
    config: HeapConfig,
    pub(crate) pages: RefCell<Pages>,
    pub(crate) table: RefCell<IndirectTable>,
    pub(crate) collecting: Cell<bool>,
    pub(crate) dropping: Cell<bool>,
    pub(crate) metrics: Cell<GcMetrics>,
}

impl Heap {
    /// A heap with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Map`] if the initial page cannot be mapped.
    pub fn new() -> Result<Self> {
        Self::with_config(HeapConfig::default())
    }

    /// A heap with `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a rejected configuration, or
    /// [`Error::Map`] if the initial pages cannot be mapped.
    pub fn with_config(config: HeapConfig) -> Result<Self> {
        config.validate()?;
        let id = NEXT_HEAP_ID.fetch_add(1, Ordering::Relaxed);
        let mut pages = Pages {
            list: Vec::with_capacity(config.get_initial_pages()),
            next_page: 0,
            next_slot: 0,
        };
        for _ in 0..config.get_initial_pages() {
            pages.grow(id, config.get_slot_size())?;
        }
        pages.rewind();

        Ok(Self {
            id,
            config,
            pages: RefCell::new(pages),
            table: RefCell::new(IndirectTable::new(id)),
            collecting: Cell::new(false),
            dropping: Cell::new(false),
            metrics: Cell::new(GcMetrics::new()),
        })
    }

    /// Process-unique identity of this heap.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// The configuration the heap was created with.
    #[must_use]
    pub const fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Allocate a default-constructed `T` and root it.
    ///
    /// # Errors
    ///
    /// See [`Heap::allocate_with`].
    pub fn allocate<T: Trace + Default + 'static>(&self) -> Result<Root<'_, T>> {
        self.allocate_with(T::default())
    }

    /// Move `value` into the heap and root it.
    ///
    /// The first allocation of a type registers it (see
    /// [`registry::register`]). Every member of `value` must be empty: a
    /// reference slot outside the heap is not traced, so its target could
    /// not be kept alive. Set members after allocation instead.
    ///
    /// # Errors
    ///
    /// - [`Error::ObjectTooLarge`] or [`Error::UnsupportedAlignment`] if `T`
    ///   cannot be stored in this heap's slots.
    /// - [`Error::OutOfMemory`] if no slot is free after collecting and the
    ///   growth policy refuses another page.
    /// - [`Error::Map`] if the operating system refuses a page.
    ///
    /// # Panics
    ///
    /// Panics if called during a collection, if discovery of `T` fails, or
    /// if a member of `value` is not empty.
    pub fn allocate_with<T: Trace + Default + 'static>(&self, value: T) -> Result<Root<'_, T>> {
        assert!(
            !self.collecting.get(),
            "allocation while a collection of this heap is in progress"
        );
        let descriptor = registry::register::<T>();
        self.check_fits(descriptor)?;
        assert!(
            members_are_empty(descriptor, &value),
            "a `{}` moved into the heap must not hold references",
            descriptor.type_name()
        );

        let slot = self.claim_slot()?;
        // SAFETY: the slot was just claimed and is large enough for `T`.
        let object = unsafe { self.install(slot, descriptor, value) };
        self.root_object(object)
    }

    fn check_fits(&self, descriptor: &TypeDescriptor) -> Result<()> {
        if descriptor.align() > SLOT_ALIGN {
            return Err(Error::UnsupportedAlignment {
                type_name: descriptor.type_name(),
                align: descriptor.align(),
            });
        }
        let slot_size = self.config.get_slot_size();
        if descriptor.object_size() > slot_size {
            return Err(Error::ObjectTooLarge {
                type_name: descriptor.type_name(),
                size: descriptor.object_size(),
                slot_size,
            });
        }
        Ok(())
    }

    fn claim_slot(&self) -> Result<NonNull<u8>> {
        if let Some(slot) = self.pages.borrow_mut().claim_free() {
            return Ok(slot);
        }

        if self.config.get_collect_on_exhaustion() {
            gc::collect(self, CollectionTrigger::Exhaustion);
            if let Some(slot) = self.pages.borrow_mut().claim_free() {
                return Ok(slot);
            }
        }

        let mut pages = self.pages.borrow_mut();
        if self.config.get_growth().allows(pages.list.len()) {
            pages.grow(self.id, self.config.get_slot_size())?;
            log_page_growth(self.id, pages.list.len());
            if let Some(slot) = pages.claim_free() {
                return Ok(slot);
            }
        }

        log_out_of_memory(self.id, pages.list.len());
        Err(Error::OutOfMemory {
            pages: pages.list.len(),
            slot_size: self.config.get_slot_size(),
        })
    }

    /// Drop whatever a previous epoch left in `slot`, then write `value`.
    ///
    /// # Safety
    ///
    /// `slot` must be freshly claimed and fit `descriptor`'s objects.
    unsafe fn install<T>(
        &self,
        slot: NonNull<u8>,
        descriptor: &'static TypeDescriptor,
        value: T,
    ) -> NonNull<ObjectHeader> {
        let object = slot.cast::<ObjectHeader>();
        // SAFETY: slot headers are always readable; zeroed pages read `None`.
        let previous = unsafe { (*object.as_ptr()).descriptor.take() };
        if let Some(previous) = previous {
            let _dropping = FlagGuard::set(&self.dropping);
            // SAFETY: the header said the slot held an initialized object of
            // `previous`, and it was unreachable, so nothing uses it again.
            unsafe {
                previous.drop_payload(slot.add(previous.payload_offset()).as_ptr());
            }
        }

        // SAFETY: the caller checked that header and payload fit the slot.
        unsafe {
            object.write(ObjectHeader {
                descriptor: Some(descriptor),
            });
            slot.add(descriptor.payload_offset()).cast::<T>().write(value);
        }
        object
    }

    /// Create a root for an existing object of this heap.
    pub(crate) fn root_object<T>(&self, object: NonNull<ObjectHeader>) -> Result<Root<'_, T>> {
        let entry = self.table.borrow_mut().allocate(object)?;
        // SAFETY: the entry is fresh and targets `object`.
        Ok(unsafe { Root::from_entry(self, entry) })
    }

    /// The target of `member`, checked to be a live `T` of this heap.
    ///
    /// # Panics
    ///
    /// Panics if `member` is non-empty but not stored in one of this heap's
    /// pages, or if its target is not a live `T` here. Both happen only
    /// when a reference slot was moved out of its object.
    pub(crate) fn resolve<T: 'static>(&self, member: &Member<T>) -> Option<NonNull<ObjectHeader>> {
        let object = member.target()?;
        let slot = std::ptr::from_ref(member).cast::<u8>();
        assert!(
            page::owner_of(slot) == Some(self.id),
            "member of `{}` at {slot:p} is not stored in heap {}",
            std::any::type_name::<T>(),
            self.id
        );

        let addr = object.as_ptr().cast::<u8>().cast_const();
        let live = page::owner_of(addr) == Some(self.id) && {
            // SAFETY: `addr` lies in a mapped page of this heap.
            let header = unsafe { PageHeader::containing(addr).as_ref() };
            header.slot_index(addr).is_some_and(|index| {
                index != header.sentinel()
                    && header.is_allocated(index)
                    && header.pointer(index).cast::<ObjectHeader>() == object
            })
        };
        // SAFETY: `live` established that `object` is an allocated slot of a
        // mapped page, whose header word is always readable.
        let holds_t = live
            && unsafe { (*object.as_ptr()).descriptor }
                .is_some_and(|d| d.type_id() == TypeId::of::<T>());
        assert!(
            holds_t,
            "member of `{}` refers to storage that no longer holds one",
            std::any::type_name::<T>()
        );
        Some(object)
    }

    /// Run a full collection and return its metrics.
    ///
    /// # Panics
    ///
    /// Panics if a collection of this heap is already in progress, if called
    /// from a payload's `Drop`, or if a member references another heap.
    pub fn collect(&self) -> GcMetrics {
        gc::collect(self, CollectionTrigger::Explicit)
    }

    /// Whether the last collection found `root`'s object reachable.
    ///
    /// Objects allocated since the last collection report `false`.
    #[must_use]
    pub fn is_marked<T>(&self, root: &Root<'_, T>) -> bool {
        self.is_marked_ptr(root.as_ptr()).unwrap_or(false)
    }

    /// Mark bit of the slot containing `ptr`, or `None` if `ptr` is not in a
    /// slot of this heap.
    #[must_use]
    pub fn is_marked_ptr(&self, ptr: *const u8) -> Option<bool> {
        let pages = self.pages.borrow();
        let header = pages.find(ptr)?.header();
        header
            .slot_index(ptr)
            .filter(|&index| index != header.sentinel())
            .map(|index| header.is_marked(index))
    }

    /// Whether `ptr` points into a slot of this heap.
    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.is_marked_ptr(ptr).is_some()
    }

    /// Current occupancy.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let pages = self.pages.borrow();
        let table = self.table.borrow();
        let (capacity, live_objects) = pages.list.iter().fold((0, 0), |(cap, live), page| {
            let header = page.header();
            (cap + header.sentinel(), live + header.live_count())
        });
        HeapStats {
            pages: pages.list.len(),
            slot_size: self.config.get_slot_size(),
            capacity,
            live_objects,
            roots: table.occupied(),
            table_pages: table.page_count(),
        }
    }

    /// Metrics of the most recent collection of this heap.
    #[must_use]
    pub fn last_gc_metrics(&self) -> GcMetrics {
        self.metrics.get()
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        for page in &self.pages.get_mut().list {
            let header = page.header();
            for index in 0..header.sentinel() {
                let object = header.pointer(index).cast::<ObjectHeader>();
                // SAFETY: every slot header is readable; a `Some` descriptor
                // means the slot holds an initialized, not yet dropped object.
                unsafe {
                    if let Some(descriptor) = (*object.as_ptr()).descriptor.take() {
                        let payload = object.cast::<u8>().add(descriptor.payload_offset());
                        descriptor.drop_payload(payload.as_ptr());
                    }
                }
            }
        }
    }
}

/// Whether every reference slot of a not yet installed value is empty.
fn members_are_empty<T>(descriptor: &TypeDescriptor, value: &T) -> bool {
    let base = std::ptr::from_ref(value).cast::<u8>();
    descriptor.offsets().iter().all(|&offset| {
        // SAFETY: offsets were measured inside a `T`.
        unsafe { (*base.add(offset).cast::<RawMember>()).get() }.is_none()
    })
}
