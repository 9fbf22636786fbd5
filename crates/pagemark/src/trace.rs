//! The `Trace` capability: how a payload type reports its reference slots.
//!
//! Types stored on the heap implement `Trace` (normally with
//! `#[derive(Trace)]`). The implementation is only ever called on the probe
//! instance the registry builds during discovery; it forwards each field so
//! that every `Member` inside records its own address.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::num::{
    NonZeroI16, NonZeroI32, NonZeroI64, NonZeroI8, NonZeroU16, NonZeroU32, NonZeroU64,
    NonZeroU8, NonZeroUsize,
};
use std::time::Duration;

use crate::registry::Discovery;

/// A type whose reference slots can be discovered.
///
/// # Safety
///
/// Implementations **MUST** forward every field that contains a `Member`,
/// directly or inside nested structs and arrays, and must not register any
/// `Member` that lies outside `self`. Offsets learned from the probe are
/// applied blindly to every instance, so a missed slot lets its target be
/// reused while still referenced.
///
/// Prefer `#[derive(Trace)]` instead of a manual implementation.
///
/// ```ignore
/// unsafe impl Trace for Pair {
///     fn register_slots(&self, discovery: &mut Discovery) {
///         self.left.register_slots(discovery);
///         self.right.register_slots(discovery);
///     }
/// }
/// ```
pub unsafe trait Trace {
    /// Report the `Member` slots contained in this value.
    fn register_slots(&self, discovery: &mut Discovery);
}

macro_rules! no_slots {
    ($($t:ty),* $(,)?) => {
        $(
            unsafe impl Trace for $t {
                #[inline]
                fn register_slots(&self, _discovery: &mut Discovery) {}
            }
        )*
    };
}

no_slots![
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    String,
    &'static str,
    Duration,
    NonZeroU8,
    NonZeroU16,
    NonZeroU32,
    NonZeroU64,
    NonZeroUsize,
    NonZeroI8,
    NonZeroI16,
    NonZeroI32,
    NonZeroI64,
];

unsafe impl<T: ?Sized> Trace for PhantomData<T> {
    #[inline]
    fn register_slots(&self, _discovery: &mut Discovery) {}
}

// `Member` is not `Copy`, so a `Cell<T: Copy>` never holds one.
unsafe impl<T: Copy> Trace for Cell<T> {
    #[inline]
    fn register_slots(&self, _discovery: &mut Discovery) {}
}

unsafe impl<T: Trace> Trace for RefCell<T> {
    fn register_slots(&self, discovery: &mut Discovery) {
        // The probe is freshly built and unshared, so this borrow cannot fail.
        self.borrow().register_slots(discovery);
    }
}

unsafe impl<T: Trace, const N: usize> Trace for [T; N] {
    fn register_slots(&self, discovery: &mut Discovery) {
        for item in self {
            item.register_slots(discovery);
        }
    }
}

macro_rules! tuple_slots {
    ($(($($name:ident : $idx:tt),+)),* $(,)?) => {
        $(
            unsafe impl<$($name: Trace),+> Trace for ($($name,)+) {
                fn register_slots(&self, discovery: &mut Discovery) {
                    $(self.$idx.register_slots(discovery);)+
                }
            }
        )*
    };
}

tuple_slots![
    (A: 0),
    (A: 0, B: 1),
    (A: 0, B: 1, C: 2),
    (A: 0, B: 1, C: 2, D: 3),
];
