//! Indirection Table: page-resident arrays of root entries.
//!
//! Each table page is a `PAGE_SIZE`-aligned mapping holding a small header
//! and an array of [`IndirectEntry`]. Entries below the bump cursor `begin`
//! are either occupied (a root) or linked into the page's free list. A root
//! handle points at its entry, never at the object, so a relocating
//! collector could move the object and patch the entry in place.
//!
//! Releasing an entry needs no access to the heap: masking the entry's
//! address yields its page header, which owns the free list.

use std::io;
use std::mem::size_of;
use std::ptr::NonNull;

use pagemark_sys::MmapOptions;

use crate::page::{PAGE_MASK, PAGE_SIZE};
use crate::ptr::ObjectHeader;

/// Magic number identifying an indirection table page ("PMTP" in ASCII).
pub const MAGIC_TABLE_PAGE: u32 = 0x504D_5450;

/// One record of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndirectEntry {
    /// Released; links to the next free entry of the same page.
    Free(Option<u32>),
    /// A root referencing a collected object.
    Occupied(NonNull<ObjectHeader>),
}

#[repr(C)]
struct TableHeader {
    magic: u32,
    begin: u32,
    free_list: Option<u32>,
    occupied: u32,
    heap_id: u64,
}

/// Entries per table page.
pub const ENTRIES_PER_PAGE: usize =
    (PAGE_SIZE - size_of::<TableHeader>()) / size_of::<IndirectEntry>();

#[repr(C)]
struct TableLayout {
    header: TableHeader,
    entries: [IndirectEntry; ENTRIES_PER_PAGE],
}

const _: () = assert!(size_of::<TableLayout>() <= PAGE_SIZE);

/// An owned table page.
pub struct TablePage {
    _map: pagemark_sys::Mmap,
    layout: NonNull<TableLayout>,
}

impl TablePage {
    fn new(heap_id: u64) -> io::Result<Self> {
        let len = PAGE_SIZE.max(pagemark_sys::page_size());
        let map = MmapOptions::new().len(len).map_anon()?;
        if !map.is_aligned_to(PAGE_SIZE) {
            return Err(io::Error::other("mapping is not aligned to the collector page size"));
        }

        #[allow(clippy::cast_ptr_alignment)]
        let layout = map.ptr().cast::<TableLayout>();
        // SAFETY: fresh, writable mapping of at least PAGE_SIZE bytes.
        // Entries at or past `begin` are never read before being written.
        unsafe {
            std::ptr::addr_of_mut!((*layout).header).write(TableHeader {
                magic: MAGIC_TABLE_PAGE,
                begin: 0,
                free_list: None,
                occupied: 0,
                heap_id,
            });
        }

        Ok(Self {
            _map: map,
            // SAFETY: mmap never returns null on success.
            layout: unsafe { NonNull::new_unchecked(layout) },
        })
    }

    fn header(&self) -> &TableHeader {
        // SAFETY: the layout lives as long as the mapping we own.
        unsafe { &(*self.layout.as_ptr()).header }
    }

    fn entry_ptr(&self, index: usize) -> NonNull<IndirectEntry> {
        debug_assert!(index < ENTRIES_PER_PAGE);
        // SAFETY: index is in bounds of the entry array.
        unsafe {
            NonNull::new_unchecked(
                std::ptr::addr_of_mut!((*self.layout.as_ptr()).entries)
                    .cast::<IndirectEntry>()
                    .add(index),
            )
        }
    }

    /// Whether another entry can be handed out from this page.
    fn has_room(&self) -> bool {
        let header = self.header();
        header.free_list.is_some() || (header.begin as usize) < ENTRIES_PER_PAGE
    }

    /// Take an entry from the free list, else from the bump cursor.
    fn allocate(&mut self, target: NonNull<ObjectHeader>) -> Option<NonNull<IndirectEntry>> {
        // SAFETY: `&mut self` gives exclusive access to the page.
        let header = unsafe { &mut (*self.layout.as_ptr()).header };
        let index = if let Some(free) = header.free_list {
            let entry = self.entry_ptr(free as usize);
            // SAFETY: entries on the free list are initialized.
            match unsafe { entry.read() } {
                IndirectEntry::Free(next) => header.free_list = next,
                IndirectEntry::Occupied(_) => unreachable!("occupied entry on the free list"),
            }
            free as usize
        } else if (header.begin as usize) < ENTRIES_PER_PAGE {
            let index = header.begin as usize;
            header.begin += 1;
            index
        } else {
            return None;
        };

        header.occupied += 1;
        let entry = self.entry_ptr(index);
        // SAFETY: in bounds and not referenced by any live handle.
        unsafe { entry.write(IndirectEntry::Occupied(target)) };
        Some(entry)
    }

    /// Targets of every occupied entry on this page.
    fn roots(&self) -> impl Iterator<Item = NonNull<ObjectHeader>> + '_ {
        (0..self.header().begin as usize).filter_map(move |index| {
            // SAFETY: entries below `begin` are initialized.
            match unsafe { self.entry_ptr(index).read() } {
                IndirectEntry::Occupied(target) => Some(target),
                IndirectEntry::Free(_) => None,
            }
        })
    }
}

/// All table pages of one heap.
pub struct IndirectTable {
    heap_id: u64,
    pages: Vec<TablePage>,
}

impl IndirectTable {
    /// An empty table; pages are mapped on first use.
    pub const fn new(heap_id: u64) -> Self {
        Self {
            heap_id,
            pages: Vec::new(),
        }
    }

    /// Hand out an entry referencing `target`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if a new table page cannot be mapped.
    pub fn allocate(&mut self, target: NonNull<ObjectHeader>) -> io::Result<NonNull<IndirectEntry>> {
        if let Some(page) = self.pages.iter_mut().find(|page| page.has_room()) {
            if let Some(entry) = page.allocate(target) {
                return Ok(entry);
            }
        }

        let mut page = TablePage::new(self.heap_id)?;
        let entry = page
            .allocate(target)
            .ok_or_else(|| io::Error::other("fresh table page has no room"))?;
        self.pages.push(page);
        Ok(entry)
    }

    /// Targets of every occupied entry, across all pages.
    pub fn roots(&self) -> impl Iterator<Item = NonNull<ObjectHeader>> + '_ {
        self.pages.iter().flat_map(TablePage::roots)
    }

    /// Number of occupied entries.
    pub fn occupied(&self) -> usize {
        self.pages
            .iter()
            .map(|page| page.header().occupied as usize)
            .sum()
    }

    /// Number of mapped table pages.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Target of an occupied entry.
///
/// # Safety
///
/// `entry` must have been handed out by [`IndirectTable::allocate`] and not
/// released since.
pub unsafe fn target(entry: NonNull<IndirectEntry>) -> NonNull<ObjectHeader> {
    // SAFETY: forwarded from the caller.
    match unsafe { entry.read() } {
        IndirectEntry::Occupied(target) => target,
        IndirectEntry::Free(_) => unreachable!("root handle refers to a released entry"),
    }
}

/// Point an occupied entry at a different object, in place.
///
/// # Safety
///
/// As for [`target`].
pub unsafe fn retarget(entry: NonNull<IndirectEntry>, object: NonNull<ObjectHeader>) {
    // SAFETY: forwarded from the caller.
    unsafe {
        debug_assert!(matches!(entry.read(), IndirectEntry::Occupied(_)));
        entry.write(IndirectEntry::Occupied(object));
    }
}

/// Return an entry to the free list of the page that holds it.
///
/// # Safety
///
/// As for [`target`]; the entry must not be used afterwards.
pub unsafe fn release(entry: NonNull<IndirectEntry>) {
    let base = (entry.as_ptr() as usize) & PAGE_MASK;
    let layout = base as *mut TableLayout;
    // SAFETY: every entry lives inside a table page, whose base is found by
    // masking; the caller guarantees the page is still mapped.
    unsafe {
        let header = &mut (*layout).header;
        debug_assert_eq!(header.magic, MAGIC_TABLE_PAGE);
        let first = std::ptr::addr_of_mut!((*layout).entries).cast::<IndirectEntry>();
        let offset = entry.as_ptr().offset_from(first);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = offset as u32;
        debug_assert!(matches!(entry.read(), IndirectEntry::Occupied(_)));

        entry.write(IndirectEntry::Free(header.free_list));
        header.free_list = Some(index);
        header.occupied -= 1;
    }
}
