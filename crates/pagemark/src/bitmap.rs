//! Fixed-size slot bitmap stored inside a page header.
//!
//! One bit per object slot. The smallest slot size (16 bytes) yields 227
//! slots per page, so four words always suffice.

/// Number of `u64` words in a [`SlotBitmap`].
pub const BITMAP_WORDS: usize = 4;

/// Number of slots a [`SlotBitmap`] can describe.
pub const BITMAP_BITS: usize = BITMAP_WORDS * 64;

/// A page-resident bitmap with one bit per object slot.
///
/// Indices are not bounds-checked beyond a debug assertion; the owning
/// page guarantees `index < capacity <= BITMAP_BITS`.
///
/// # Example
///
/// ```
/// use pagemark::page::SlotBitmap;
///
/// let mut bitmap = SlotBitmap::new();
/// assert!(!bitmap.get(0));
///
/// bitmap.set(0);
/// assert!(bitmap.get(0));
/// assert_eq!(bitmap.first_clear(0, 10), Some(1));
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotBitmap {
    words: [u64; BITMAP_WORDS],
}

impl SlotBitmap {
    /// An all-clear bitmap.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            words: [0; BITMAP_WORDS],
        }
    }

    /// Set the bit for `index`.
    #[inline]
    pub fn set(&mut self, index: usize) {
        debug_assert!(index < BITMAP_BITS);
        self.words[index / 64] |= 1 << (index % 64);
    }

    /// Clear the bit for `index`.
    #[inline]
    pub fn unset(&mut self, index: usize) {
        debug_assert!(index < BITMAP_BITS);
        self.words[index / 64] &= !(1 << (index % 64));
    }

    /// Test the bit for `index`.
    #[inline]
    #[must_use]
    pub const fn get(&self, index: usize) -> bool {
        (self.words[index / 64] >> (index % 64)) & 1 != 0
    }

    /// Clear every bit.
    pub fn clear(&mut self) {
        self.words = [0; BITMAP_WORDS];
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// First clear bit in `from..limit`, if any.
    #[must_use]
    pub fn first_clear(&self, from: usize, limit: usize) -> Option<usize> {
        debug_assert!(limit <= BITMAP_BITS);
        let mut index = from;
        while index < limit {
            let word = index / 64;
            let free = !self.words[word] >> (index % 64);
            if free != 0 {
                let found = index + free.trailing_zeros() as usize;
                return (found < limit).then_some(found);
            }
            index = (word + 1) * 64;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_unset() {
        let mut bitmap = SlotBitmap::new();

        assert!(!bitmap.get(0));
        assert!(!bitmap.get(63));

        bitmap.set(0);
        bitmap.set(63);
        bitmap.set(64);

        assert!(bitmap.get(0));
        assert!(bitmap.get(63));
        assert!(bitmap.get(64));
        assert!(!bitmap.get(1));

        bitmap.unset(63);
        assert!(!bitmap.get(63));
        assert_eq!(bitmap.count_ones(), 2);
    }

    #[test]
    fn test_clear() {
        let mut bitmap = SlotBitmap::new();
        bitmap.set(0);
        bitmap.set(200);
        bitmap.clear();
        assert_eq!(bitmap.count_ones(), 0);
        assert!(!bitmap.get(200));
    }

    #[test]
    fn test_set_is_idempotent() {
        let mut bitmap = SlotBitmap::new();
        bitmap.set(7);
        bitmap.set(7);
        assert_eq!(bitmap.count_ones(), 1);
    }

    #[test]
    fn test_first_clear_skips_full_words() {
        let mut bitmap = SlotBitmap::new();
        for i in 0..130 {
            bitmap.set(i);
        }
        assert_eq!(bitmap.first_clear(0, 227), Some(130));
        assert_eq!(bitmap.first_clear(131, 227), Some(131));
    }

    #[test]
    fn test_first_clear_respects_limit() {
        let mut bitmap = SlotBitmap::new();
        for i in 0..10 {
            bitmap.set(i);
        }
        assert_eq!(bitmap.first_clear(0, 10), None);
        assert_eq!(bitmap.first_clear(0, 11), Some(10));
        assert_eq!(bitmap.first_clear(12, 12), None);
    }
}
