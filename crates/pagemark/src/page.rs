//! Page-resident object storage.
//!
//! Every data page is a `PAGE_SIZE` mapping aligned to `PAGE_SIZE`. The
//! header sits at the start of the page; the slots fill the tail:
//!
//! ```text
//! ┌─────────────────────────────┐ page base (PAGE_SIZE aligned)
//! │ PageHeader                  │ magic, heap id, slot size, capacity,
//! │   allocated: SlotBitmap     │ free/used map for the current epoch
//! │   marked:    SlotBitmap     │ reachability from the last collection
//! ├─────────────────────────────┤ PAGE_SIZE - capacity * slot_size
//! │ slot 0                      │
//! │ ...                         │
//! │ slot capacity-1 (sentinel)  │ never handed out
//! └─────────────────────────────┘
//! ```
//!
//! Slots are packed at 8/9 density, leaving room for the header. Because
//! pages are aligned, the header of the page holding any object is found by
//! masking the object's address with [`PAGE_MASK`].
//!
//! Masking is only sound for addresses already known to lie in a data page.
//! [`owner_of`] answers that question for arbitrary addresses from a
//! process-wide directory of mapped data pages.

use std::collections::BTreeMap;
use std::io;
use std::ptr::NonNull;

use pagemark_sys::MmapOptions;
use parking_lot::RwLock;

pub use crate::bitmap::{SlotBitmap, BITMAP_BITS};

/// Size of every collector page.
pub const PAGE_SIZE: usize = 4096;

/// Mask for extracting the page base from an interior address.
pub const PAGE_MASK: usize = !(PAGE_SIZE - 1);

/// Magic number identifying a data page ("PMDP" in ASCII).
pub const MAGIC_DATA_PAGE: u32 = 0x504D_4450;

/// Smallest supported slot size.
pub const MIN_SLOT_SIZE: usize = 16;

/// Largest supported slot size.
pub const MAX_SLOT_SIZE: usize = 1024;

/// Alignment every slot is guaranteed to have.
pub const SLOT_ALIGN: usize = MIN_SLOT_SIZE;

/// Number of slots in a page of `slot_size`-byte slots, sentinel included.
#[must_use]
pub const fn capacity_for(slot_size: usize) -> usize {
    PAGE_SIZE / slot_size * 8 / 9
}

/// Byte offset of slot 0 from the page base.
#[must_use]
pub const fn data_offset(slot_size: usize) -> usize {
    PAGE_SIZE - capacity_for(slot_size) * slot_size
}

const _: () = assert!(capacity_for(MIN_SLOT_SIZE) <= BITMAP_BITS);
const _: () = assert!(std::mem::size_of::<PageHeader>() <= data_offset(MIN_SLOT_SIZE));
const _: () = assert!(capacity_for(MAX_SLOT_SIZE) >= 2);

/// Metadata stored at the beginning of each data page.
#[repr(C)]
pub struct PageHeader {
    /// Always [`MAGIC_DATA_PAGE`].
    pub magic: u32,
    /// Size of each slot in bytes.
    pub slot_size: u32,
    /// Number of slots, sentinel included.
    pub capacity: u32,
    /// Position of this page in its heap's page list.
    pub index: u32,
    /// Identity of the owning heap. A lookup key, not an owning pointer.
    pub heap_id: u64,
    allocated: SlotBitmap,
    marked: SlotBitmap,
}

impl PageHeader {
    /// Header of the page containing `addr`.
    ///
    /// # Safety
    ///
    /// `addr` must point into a live data page.
    #[inline]
    #[must_use]
    pub unsafe fn containing(addr: *const u8) -> NonNull<Self> {
        let base = (addr as usize) & PAGE_MASK;
        // SAFETY: caller guarantees a live page at `base`, which is non-null.
        unsafe { NonNull::new_unchecked(base as *mut Self) }
    }

    /// Index of the last slot, permanently reserved.
    #[inline]
    #[must_use]
    pub const fn sentinel(&self) -> usize {
        self.capacity as usize - 1
    }

    fn base(&self) -> usize {
        std::ptr::from_ref(self) as usize
    }

    fn data_start(&self) -> usize {
        self.base() + data_offset(self.slot_size as usize)
    }

    /// Storage address of slot `index`.
    #[inline]
    #[must_use]
    pub fn pointer(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.capacity as usize);
        let addr = self.data_start() + index * self.slot_size as usize;
        // SAFETY: derived from the page base, which is non-null.
        unsafe { NonNull::new_unchecked(addr as *mut u8) }
    }

    /// Slot index of `addr`, or `None` if it does not fall on a slot.
    #[must_use]
    pub fn slot_index(&self, addr: *const u8) -> Option<usize> {
        let addr = addr as usize;
        let start = self.data_start();
        if addr < start || addr >= self.base() + PAGE_SIZE {
            return None;
        }
        let index = (addr - start) / self.slot_size as usize;
        (index < self.capacity as usize).then_some(index)
    }

    /// Set the reachability bit of `index`.
    #[inline]
    pub fn mark(&mut self, index: usize) {
        self.marked.set(index);
    }

    /// Test the reachability bit of `index`.
    #[inline]
    #[must_use]
    pub const fn is_marked(&self, index: usize) -> bool {
        self.marked.get(index)
    }

    /// Whether slot `index` is in use in the current allocation epoch.
    #[inline]
    #[must_use]
    pub const fn is_allocated(&self, index: usize) -> bool {
        self.allocated.get(index)
    }

    /// Clear every mark, then mark the sentinel slot.
    pub fn reset(&mut self) {
        self.marked.clear();
        let sentinel = self.sentinel();
        self.marked.set(sentinel);
    }

    /// Mark the slot `index` as in use.
    #[inline]
    pub fn claim(&mut self, index: usize) {
        debug_assert!(!self.allocated.get(index), "slot {index} claimed twice");
        self.allocated.set(index);
    }

    /// First free slot at or after `from`.
    #[must_use]
    pub fn find_free(&self, from: usize) -> Option<usize> {
        self.allocated.first_clear(from, self.capacity as usize)
    }

    /// The reachability map of the finished mark phase becomes the free/used
    /// map of the next allocation epoch.
    pub fn sweep(&mut self) {
        self.allocated = self.marked;
    }

    /// Slots in use, sentinel excluded.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.allocated.count_ones() - usize::from(self.allocated.get(self.sentinel()))
    }

    /// Slots marked by the last collection, sentinel excluded.
    #[must_use]
    pub fn marked_count(&self) -> usize {
        self.marked.count_ones() - usize::from(self.marked.get(self.sentinel()))
    }
}

/// Base address of every mapped data page, with the id of its heap.
static DIRECTORY: RwLock<BTreeMap<usize, u64>> = RwLock::new(BTreeMap::new());

/// Id of the heap owning the data page that contains `addr`, or `None` if
/// `addr` is not inside a mapped data page.
#[must_use]
pub fn owner_of(addr: *const u8) -> Option<u64> {
    DIRECTORY.read().get(&((addr as usize) & PAGE_MASK)).copied()
}

/// An owned data page.
pub struct Page {
    _map: pagemark_sys::Mmap,
    header: NonNull<PageHeader>,
}

impl Page {
    /// Map and initialize a page of `slot_size`-byte slots.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the mapping is refused.
    pub fn new(heap_id: u64, index: u32, slot_size: usize) -> io::Result<Self> {
        debug_assert!(slot_size.is_power_of_two());
        debug_assert!((MIN_SLOT_SIZE..=MAX_SLOT_SIZE).contains(&slot_size));

        // A system page larger than ours is mapped whole so that unmapping
        // releases everything the kernel handed out.
        let len = PAGE_SIZE.max(pagemark_sys::page_size());
        let map = MmapOptions::new().len(len).map_anon()?;
        if !map.is_aligned_to(PAGE_SIZE) {
            return Err(io::Error::other("mapping is not aligned to the collector page size"));
        }

        #[allow(clippy::cast_ptr_alignment)]
        let header = map.ptr().cast::<PageHeader>();
        let capacity = capacity_for(slot_size);

        // SAFETY: the mapping is fresh, writable, and at least PAGE_SIZE long.
        unsafe {
            #[allow(clippy::cast_possible_truncation)]
            header.write(PageHeader {
                magic: MAGIC_DATA_PAGE,
                slot_size: slot_size as u32,
                capacity: capacity as u32,
                index,
                heap_id,
                allocated: SlotBitmap::new(),
                marked: SlotBitmap::new(),
            });
            (*header).allocated.set(capacity - 1);
            (*header).reset();
        }

        DIRECTORY.write().insert(header as usize, heap_id);
        Ok(Self {
            _map: map,
            // SAFETY: mmap never returns null on success.
            header: unsafe { NonNull::new_unchecked(header) },
        })
    }

    /// Shared access to the header.
    #[inline]
    #[must_use]
    pub fn header(&self) -> &PageHeader {
        // SAFETY: the header lives as long as the mapping we own.
        unsafe { self.header.as_ref() }
    }

    /// Exclusive access to the header.
    #[inline]
    pub fn header_mut(&mut self) -> &mut PageHeader {
        // SAFETY: as above, and `&mut self` is exclusive.
        unsafe { self.header.as_mut() }
    }

    /// Base address of the page.
    #[inline]
    #[must_use]
    pub fn base(&self) -> usize {
        self.header.as_ptr() as usize
    }

    /// Whether `addr` lies inside this page.
    #[inline]
    #[must_use]
    pub fn contains(&self, addr: *const u8) -> bool {
        (addr as usize) & PAGE_MASK == self.base()
    }

    /// Number of slots, sentinel included.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.header().capacity as usize
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        DIRECTORY.write().remove(&self.base());
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let header = self.header();
        f.debug_struct("Page")
            .field("base", &format_args!("{:#x}", self.base()))
            .field("index", &header.index)
            .field("slot_size", &header.slot_size)
            .field("capacity", &header.capacity)
            .field("live", &header.live_count())
            .finish()
    }
}
