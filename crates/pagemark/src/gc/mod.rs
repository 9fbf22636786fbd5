//! Stop-the-world collection driver.
//!
//! A collection runs three phases over one heap:
//!
//! 1. **Clear**: every page's mark bitmap is reset (the sentinel stays set).
//! 2. **Mark**: the target of every occupied indirection entry is marked and
//!    pushed, then the worker stack is drained, following each object's
//!    reference slots through its runtime type descriptor.
//! 3. **Sweep**: each page's mark bitmap becomes its allocation bitmap and
//!    the allocation cursor rewinds. Nothing is freed eagerly; unreachable
//!    objects are dropped when their slot is handed out again.

pub(crate) mod mark;

use std::cell::Cell;
use std::time::Instant;

use crate::heap::Heap;
use crate::metrics::{CollectionTrigger, GcMetrics, PhaseTimer};
use crate::page::Page;
use crate::tracing::{log_phase_end, next_gc_id, GcPhase};

use mark::MarkStack;

/// Clears the in-progress flag even if a phase panics.
struct CollectingGuard<'a>(&'a Cell<bool>);

impl<'a> CollectingGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        assert!(
            !flag.replace(true),
            "collection started while another collection of this heap is in progress"
        );
        Self(flag)
    }
}

impl Drop for CollectingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Run one collection of `heap`.
///
/// # Panics
///
/// Panics on re-entry, when called from a payload destructor, or when a
/// reference slot leads out of the heap.
pub(crate) fn collect(heap: &Heap, trigger: CollectionTrigger) -> GcMetrics {
    assert!(
        !heap.dropping.get(),
        "collection started from within a payload destructor"
    );
    let _guard = CollectingGuard::enter(&heap.collecting);

    let gc_id = next_gc_id();
    #[cfg(feature = "tracing")]
    let _span = crate::tracing::trace_gc_collection(trigger.as_str(), heap.id, gc_id);
    #[cfg(not(feature = "tracing"))]
    let _ = gc_id;

    let start = Instant::now();
    let mut timer = PhaseTimer::new();

    // Phase 1: clear
    timer.start();
    let live_before = {
        #[cfg(feature = "tracing")]
        let _phase = crate::tracing::trace_phase(GcPhase::Clear);
        let mut pages = heap.pages.borrow_mut();
        let mut live = 0;
        for page in &mut pages.list {
            let header = page.header_mut();
            live += header.live_count();
            header.reset();
        }
        log_phase_end(GcPhase::Clear, pages.list.len());
        live
    };
    timer.end_clear();

    // Phase 2: mark
    timer.start();
    let (roots_scanned, objects_marked) = {
        #[cfg(feature = "tracing")]
        let _phase = crate::tracing::trace_phase(GcPhase::Mark);
        let bases = heap.pages.borrow().list.iter().map(Page::base).collect();
        let table = heap.table.borrow();
        let mut stack = MarkStack::new(heap.id, bases);
        let mut roots = 0;
        for object in table.roots() {
            roots += 1;
            // SAFETY: `pages` is not borrowed while marking.
            unsafe { stack.mark_root(object) };
        }
        // SAFETY: as above, for everything reachable from the roots.
        unsafe { stack.drain() };
        log_phase_end(GcPhase::Mark, stack.marked());
        (roots, stack.marked())
    };
    timer.end_mark();

    // Phase 3: sweep
    timer.start();
    let (surviving, pages) = {
        #[cfg(feature = "tracing")]
        let _phase = crate::tracing::trace_phase(GcPhase::Sweep);
        let mut pages = heap.pages.borrow_mut();
        let mut surviving = 0;
        for page in &mut pages.list {
            let header = page.header_mut();
            header.sweep();
            surviving += header.live_count();
        }
        pages.rewind();
        log_phase_end(GcPhase::Sweep, live_before.saturating_sub(surviving));
        (surviving, pages.list.len())
    };
    timer.end_sweep();

    let previous = heap.metrics.get();
    let metrics = GcMetrics {
        duration: start.elapsed(),
        clear_duration: timer.clear,
        mark_duration: timer.mark,
        sweep_duration: timer.sweep,
        roots_scanned,
        objects_marked,
        objects_reclaimed: live_before.saturating_sub(surviving),
        objects_surviving: surviving,
        pages,
        total_collections: previous.total_collections + 1,
        trigger,
    };
    heap.metrics.set(metrics);
    metrics
}
