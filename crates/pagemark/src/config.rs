//! Heap configuration.

use crate::error::{Error, Result};
use crate::page::{MAX_SLOT_SIZE, MIN_SLOT_SIZE};

/// What a heap does when every page is full even after a collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GrowthPolicy {
    /// Never map pages beyond the initial set.
    Fixed,
    /// Map additional pages up to `max_pages` in total.
    Bounded {
        /// Upper bound on the page count.
        max_pages: usize,
    },
    /// Map pages as long as the operating system allows.
    #[default]
    Unbounded,
}

impl GrowthPolicy {
    /// Whether a heap owning `pages` pages may map one more.
    #[must_use]
    pub const fn allows(self, pages: usize) -> bool {
        match self {
            Self::Fixed => false,
            Self::Bounded { max_pages } => pages < max_pages,
            Self::Unbounded => true,
        }
    }
}

/// Parameters of a [`Heap`](crate::Heap).
///
/// # Example
///
/// ```
/// use pagemark::{GrowthPolicy, HeapConfig};
///
/// let config = HeapConfig::new()
///     .slot_size(128)
///     .initial_pages(2)
///     .growth(GrowthPolicy::Bounded { max_pages: 8 });
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    slot_size: usize,
    initial_pages: usize,
    growth: GrowthPolicy,
    collect_on_exhaustion: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapConfig {
    /// Default slot size in bytes.
    pub const DEFAULT_SLOT_SIZE: usize = 64;

    /// 64-byte slots, one initial page, unbounded growth, collect before
    /// growing.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot_size: Self::DEFAULT_SLOT_SIZE,
            initial_pages: 1,
            growth: GrowthPolicy::Unbounded,
            collect_on_exhaustion: true,
        }
    }

    /// Set the slot size. Must be a power of two in `16..=1024`.
    #[must_use]
    pub const fn slot_size(mut self, bytes: usize) -> Self {
        self.slot_size = bytes;
        self
    }

    /// Set the number of pages mapped when the heap is created.
    #[must_use]
    pub const fn initial_pages(mut self, pages: usize) -> Self {
        self.initial_pages = pages;
        self
    }

    /// Set the growth policy.
    #[must_use]
    pub const fn growth(mut self, growth: GrowthPolicy) -> Self {
        self.growth = growth;
        self
    }

    /// Whether an exhausted allocation collects before trying to grow.
    #[must_use]
    pub const fn collect_on_exhaustion(mut self, enabled: bool) -> Self {
        self.collect_on_exhaustion = enabled;
        self
    }

    /// Configured slot size.
    #[must_use]
    pub const fn get_slot_size(&self) -> usize {
        self.slot_size
    }

    /// Configured initial page count.
    #[must_use]
    pub const fn get_initial_pages(&self) -> usize {
        self.initial_pages
    }

    /// Configured growth policy.
    #[must_use]
    pub const fn get_growth(&self) -> GrowthPolicy {
        self.growth
    }

    /// Whether exhaustion triggers a collection.
    #[must_use]
    pub const fn get_collect_on_exhaustion(&self) -> bool {
        self.collect_on_exhaustion
    }

    /// Check the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first rejected field.
    pub fn validate(&self) -> Result<()> {
        if !self.slot_size.is_power_of_two() {
            return Err(Error::InvalidConfig("slot size must be a power of two"));
        }
        if self.slot_size < MIN_SLOT_SIZE || self.slot_size > MAX_SLOT_SIZE {
            return Err(Error::InvalidConfig("slot size must be between 16 and 1024 bytes"));
        }
        if self.initial_pages == 0 {
            return Err(Error::InvalidConfig("at least one initial page is required"));
        }
        if let GrowthPolicy::Bounded { max_pages } = self.growth {
            if max_pages < self.initial_pages {
                return Err(Error::InvalidConfig(
                    "bounded growth limit is below the initial page count",
                ));
            }
        }
        Ok(())
    }
}
