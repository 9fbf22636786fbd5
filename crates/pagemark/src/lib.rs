//! A page-based mark-and-sweep garbage collector.
//!
//! `pagemark` manages objects in fixed-size slots carved out of 4 KiB,
//! 4 KiB-aligned pages. Reachability is computed by a stop-the-world mark
//! phase starting from explicit **roots**; the sweep simply turns each page's
//! mark bitmap into its allocation bitmap, so unreachable slots are reused
//! (and their old payload dropped) by later allocations.
//!
//! # Features
//!
//! - **No tracing code to write**: the collector learns where the
//!   [`Member`] slots of a type are by inspecting one default-constructed
//!   probe instance, the first time the type is allocated.
//! - **Indirect roots**: a [`Root`] refers to an entry of a per-heap
//!   indirection table instead of the object itself.
//! - **Borrow-checked lifetimes**: roots borrow their [`Heap`], which
//!   therefore outlives every root and every object reachable from one.
//!
//! # Quick Start
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
//! let a = heap.allocate::<Node>()?;
//! let b = heap.allocate::<Node>()?;
//!
//! // a -> b -> a
//! a.next.set(&b);
//! b.next.set(&a);
//! drop(b);
//!
//! heap.collect();
//! assert_eq!(heap.stats().live_objects, 2);
//!
//! // Once the last root is gone, the cycle is garbage.
//! drop(a);
//! heap.collect();
//! assert_eq!(heap.stats().live_objects, 0);
//! # Ok::<(), pagemark::Error>(())
//! ```
//!
//! # Thread Safety
//!
//! `Heap`, `Root` and `Member` are `!Send` and `!Sync`. The type registry is
//! process-wide and may be used from any thread.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

// Lets `#[derive(Trace)]` expand to `::pagemark::...` inside this crate.
extern crate self as pagemark;

mod bitmap;
mod config;
mod error;
mod gc;
mod heap;
mod ptr;
mod trace;
mod tracing;

pub mod handles;
pub mod metrics;
pub mod registry;

/// Page layout internals.
///
/// This module is public for testing and advanced use cases.
pub mod page;

pub use config::{GrowthPolicy, HeapConfig};
pub use error::{Error, Result};
pub use handles::Root;
pub use heap::Heap;
pub use metrics::{CollectionTrigger, GcMetrics, HeapStats};
pub use ptr::Member;
pub use registry::{Discovery, TypeDescriptor};
pub use trace::Trace;

// Re-export derive macro when feature is enabled
#[cfg(feature = "derive")]
pub use pagemark_derive::Trace;
