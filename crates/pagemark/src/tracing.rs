//! Collector tracing support.
//!
//! With the `tracing` feature enabled, collections run inside `gc_collect`
//! spans with one `gc_phase` child span per phase, and notable events (page
//! growth, exhaustion, type discovery) are logged at `DEBUG`. Without the
//! feature every hook compiles to nothing.

#[cfg(feature = "tracing")]
pub mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing::{span, Level};

    /// The phases of one collection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum GcPhase {
        /// Reset mark bits of every page.
        Clear,
        /// Trace the object graph from the roots.
        Mark,
        /// Turn mark bits into the next free/used map.
        Sweep,
    }

    /// Identifier correlating all events of one collection.
    ///
    /// Monotonically increasing across every heap in the process, starting
    /// at 1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    static NEXT_GC_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate the next collection id.
    pub fn next_gc_id() -> GcId {
        GcId(NEXT_GC_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Enter the span covering a whole collection.
    pub fn trace_gc_collection(trigger: &str, heap_id: u64, gc_id: GcId) -> span::EnteredSpan {
        span!(
            Level::DEBUG,
            "gc_collect",
            trigger = trigger,
            heap_id = heap_id,
            gc_id = gc_id.0
        )
        .entered()
    }

    /// Enter the span covering one phase.
    pub fn trace_phase(phase: GcPhase) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_phase", phase = ?phase).entered()
    }

    /// Log the end of a phase with the number of objects it touched.
    pub fn log_phase_end(phase: GcPhase, objects: usize) {
        tracing::debug!(phase = ?phase, objects, "phase_end");
    }

    /// Log a new data page.
    pub fn log_page_growth(heap_id: u64, pages: usize) {
        tracing::debug!(heap_id, pages, "page_growth");
    }

    /// Log an allocation that could not be satisfied.
    pub fn log_out_of_memory(heap_id: u64, pages: usize) {
        tracing::warn!(heap_id, pages, "out_of_memory");
    }

    /// Log a newly finalized type descriptor.
    pub fn log_type_discovered(type_name: &'static str, slots: usize) {
        tracing::debug!(type_name, slots, "type_discovered");
    }
}

#[cfg(not(feature = "tracing"))]
#[allow(clippy::missing_const_for_fn)]
pub mod internal {
    /// Stub phase when tracing is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum GcPhase {
        /// Reset mark bits of every page.
        Clear,
        /// Trace the object graph from the roots.
        Mark,
        /// Turn mark bits into the next free/used map.
        Sweep,
    }

    /// Stub type when tracing is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    /// Stub function when tracing is disabled.
    pub fn next_gc_id() -> GcId {
        GcId(0)
    }

    /// Stub function when tracing is disabled.
    pub fn log_phase_end(_phase: GcPhase, _objects: usize) {}

    /// Stub function when tracing is disabled.
    pub fn log_page_growth(_heap_id: u64, _pages: usize) {}

    /// Stub function when tracing is disabled.
    pub fn log_out_of_memory(_heap_id: u64, _pages: usize) {}

    /// Stub function when tracing is disabled.
    pub fn log_type_discovered(_type_name: &'static str, _slots: usize) {}
}

pub use internal::{
    log_out_of_memory, log_page_growth, log_phase_end, log_type_discovered, next_gc_id, GcPhase,
};
#[cfg(feature = "tracing")]
pub use internal::{trace_gc_collection, trace_phase};
