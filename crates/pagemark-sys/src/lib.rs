//! Anonymous, zero-filled memory mappings for collector pages.
//!
//! Every mapping returned here starts on an operating-system page boundary,
//! so a 4 KiB collector page placed at the start of a mapping can be found
//! again from any interior address by masking.

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// Returns the granularity at which the OS places new mappings.
///
/// On Windows this is typically 64KB. On Unix it is the page size.
pub fn allocation_granularity() -> usize {
    #[cfg(windows)]
    {
        os::allocation_granularity()
    }
    #[cfg(unix)]
    {
        os::page_size()
    }
}

/// An owned anonymous mapping, unmapped on drop.
pub struct Mmap {
    inner: os::MmapInner,
}

impl Mmap {
    /// Start of the mapping.
    #[must_use]
    pub fn ptr(&self) -> *mut u8 {
        self.inner.ptr()
    }

    /// Length of the mapping in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Mappings are never empty; kept for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    /// Whether the start of the mapping is a multiple of `align`.
    ///
    /// `align` must be a power of two.
    #[must_use]
    pub fn is_aligned_to(&self, align: usize) -> bool {
        debug_assert!(align.is_power_of_two());
        (self.ptr() as usize) & (align - 1) == 0
    }
}

impl std::fmt::Debug for Mmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mmap")
            .field("ptr", &self.ptr())
            .field("len", &self.len())
            .finish()
    }
}

/// Options for creating an anonymous mapping.
#[derive(Debug, Clone, Default)]
pub struct MmapOptions {
    len: usize,
    populate: bool,
}

impl MmapOptions {
    /// Options with length 0; set a length before mapping.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            len: 0,
            populate: false,
        }
    }

    /// Length of the mapping in bytes.
    #[must_use]
    pub const fn len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }

    /// Prefault the page tables (`MAP_POPULATE` on Linux, ignored elsewhere).
    #[must_use]
    pub const fn populate(mut self, populate: bool) -> Self {
        self.populate = populate;
        self
    }

    /// Creates a zero-filled, read-write anonymous mapping.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a zero length and the OS error if the
    /// mapping is refused.
    pub fn map_anon(&self) -> io::Result<Mmap> {
        if self.len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "length must be greater than 0",
            ));
        }

        // SAFETY: no address hint is passed, so the OS picks a fresh range
        // that cannot alias any existing Rust allocation.
        let inner = unsafe { os::MmapInner::map_anon(self.len, self.populate)? };
        Ok(Mmap { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn test_page_size() {
        let ps = page_size();
        assert!(ps > 0);
        assert_eq!(ps & (ps - 1), 0, "Page size should be power of 2");
    }

    #[test]
    fn test_allocation_granularity() {
        let ag = allocation_granularity();
        assert!(ag.is_power_of_two());
        assert!(ag >= page_size());
    }

    #[test]
    fn test_map_is_page_aligned_and_zeroed() {
        let len = 4096;
        let mmap = MmapOptions::new().len(len).map_anon().expect("failed to map");

        assert!(!mmap.ptr().is_null());
        assert!(mmap.is_aligned_to(4096));
        assert!(mmap.is_aligned_to(page_size()));
        assert_eq!(mmap.len(), len);

        unsafe {
            for i in 0..len {
                assert_eq!(ptr::read(mmap.ptr().add(i)), 0);
            }
            ptr::write_volatile(mmap.ptr().add(len - 1), 42);
            assert_eq!(ptr::read_volatile(mmap.ptr().add(len - 1)), 42);
        }
    }

    #[test]
    fn test_zero_length_rejected() {
        let err = MmapOptions::new().map_anon().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_populate_flag() {
        let mmap = MmapOptions::new()
            .len(4096)
            .populate(true)
            .map_anon()
            .expect("failed to map");
        assert!(mmap.is_aligned_to(4096));
    }
}
