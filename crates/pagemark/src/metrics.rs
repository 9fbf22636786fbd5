//! Collection metrics and heap statistics.

use std::time::{Duration, Instant};

/// What started a collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum CollectionTrigger {
    /// No collection has run yet.
    #[default]
    None = 0,
    /// `Heap::collect` was called.
    Explicit = 1,
    /// An allocation found every page full.
    Exhaustion = 2,
}

impl CollectionTrigger {
    /// Short label used in tracing spans.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Explicit => "explicit",
            Self::Exhaustion => "exhaustion",
        }
    }
}

/// Statistics from the most recent collection of one heap.
#[derive(Debug, Clone, Copy)]
pub struct GcMetrics {
    /// Duration of the whole collection.
    pub duration: Duration,
    /// Duration of the clear phase.
    pub clear_duration: Duration,
    /// Duration of the mark phase.
    pub mark_duration: Duration,
    /// Duration of the sweep phase.
    pub sweep_duration: Duration,
    /// Number of root entries the mark phase started from.
    pub roots_scanned: usize,
    /// Number of objects found reachable.
    pub objects_marked: usize,
    /// Number of slots that held an object before and are free now.
    pub objects_reclaimed: usize,
    /// Number of objects still resident after the sweep.
    pub objects_surviving: usize,
    /// Pages owned by the heap at the end of the collection.
    pub pages: usize,
    /// Collections this heap has run, this one included.
    pub total_collections: usize,
    /// What started the collection.
    pub trigger: CollectionTrigger,
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GcMetrics {
    /// All counters zero, no trigger.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::ZERO,
            clear_duration: Duration::ZERO,
            mark_duration: Duration::ZERO,
            sweep_duration: Duration::ZERO,
            roots_scanned: 0,
            objects_marked: 0,
            objects_reclaimed: 0,
            objects_surviving: 0,
            pages: 0,
            total_collections: 0,
            trigger: CollectionTrigger::None,
        }
    }
}

/// Times the three collection phases.
///
/// ```
/// use pagemark::metrics::PhaseTimer;
///
/// let mut timer = PhaseTimer::new();
/// timer.start();
/// timer.end_clear();
/// timer.start();
/// timer.end_mark();
/// timer.start();
/// timer.end_sweep();
/// assert!(timer.total() >= timer.mark);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseTimer {
    /// Clear phase time.
    pub clear: Duration,
    /// Mark phase time.
    pub mark: Duration,
    /// Sweep phase time.
    pub sweep: Duration,
    current_start: Option<Instant>,
}

impl PhaseTimer {
    /// A timer with every phase at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            clear: Duration::ZERO,
            mark: Duration::ZERO,
            sweep: Duration::ZERO,
            current_start: None,
        }
    }

    /// Start timing a phase.
    pub fn start(&mut self) {
        self.current_start = Some(Instant::now());
    }

    /// End the clear phase.
    pub fn end_clear(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.clear = start.elapsed();
        }
    }

    /// End the mark phase.
    pub fn end_mark(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.mark = start.elapsed();
        }
    }

    /// End the sweep phase.
    pub fn end_sweep(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.sweep = start.elapsed();
        }
    }

    /// Sum of the three phases.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.clear + self.mark + self.sweep
    }
}

/// A point-in-time view of a heap's occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Data pages owned by the heap.
    pub pages: usize,
    /// Slot size in bytes.
    pub slot_size: usize,
    /// Usable slots across all pages, sentinels excluded.
    pub capacity: usize,
    /// Slots holding a resident object, reachable or not yet swept.
    pub live_objects: usize,
    /// Occupied root entries.
    pub roots: usize,
    /// Mapped indirection table pages.
    pub table_pages: usize,
}

impl HeapStats {
    /// Slots that can be handed out without collecting or growing.
    #[must_use]
    pub const fn free_slots(&self) -> usize {
        self.capacity - self.live_objects
    }
}
