//! Recoverable allocation and configuration errors.
//!
//! Registry misuse (inconsistent slots, recursive discovery) is a programming
//! error and panics instead; see [`crate::registry::register`].

use thiserror::Error;

/// Errors reported by heap operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No free slot was left after collecting, and the growth policy refused
    /// another page.
    #[error("heap exhausted: {pages} page(s) of {slot_size}-byte slots are full")]
    OutOfMemory {
        /// Pages owned by the heap when the request failed.
        pages: usize,
        /// Slot size of the heap.
        slot_size: usize,
    },

    /// The header plus payload of a type does not fit in one slot.
    #[error("`{type_name}` needs {size} bytes but slots are {slot_size} bytes")]
    ObjectTooLarge {
        /// Name of the payload type.
        type_name: &'static str,
        /// Bytes needed, header included.
        size: usize,
        /// Slot size of the heap.
        slot_size: usize,
    },

    /// The payload type needs more alignment than slots guarantee.
    #[error("`{type_name}` requires {align}-byte alignment")]
    UnsupportedAlignment {
        /// Name of the payload type.
        type_name: &'static str,
        /// Required alignment.
        align: usize,
    },

    /// A `HeapConfig` was rejected.
    #[error("invalid heap configuration: {0}")]
    InvalidConfig(&'static str),

    /// The operating system refused a page mapping.
    #[error("page mapping failed: {0}")]
    Map(#[from] std::io::Error),
}

/// Result type for heap operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = Error::OutOfMemory {
            pages: 2,
            slot_size: 64,
        };
        assert_eq!(
            err.to_string(),
            "heap exhausted: 2 page(s) of 64-byte slots are full"
        );

        let err = Error::ObjectTooLarge {
            type_name: "Big",
            size: 80,
            slot_size: 64,
        };
        assert_eq!(err.to_string(), "`Big` needs 80 bytes but slots are 64 bytes");
    }

    #[test]
    fn test_io_error_converts() {
        let err: Error = std::io::Error::other("denied").into();
        assert!(matches!(err, Error::Map(_)));
        assert_eq!(err.to_string(), "page mapping failed: denied");
    }
}
