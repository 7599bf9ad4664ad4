//! NDR error types

use thiserror::Error;

/// Upper bound on elements allocated for a single decoded array when the
/// context does not override it.
pub const MAX_NDR_ARRAY_ELEMENTS: usize = 16 * 1024 * 1024;

/// NDR encoding/decoding errors
#[derive(Debug, Error)]
pub enum NdrError {
    /// Buffer underflow - not enough data
    #[error("buffer underflow: needed {needed} bytes, have {have}")]
    BufferUnderflow { needed: usize, have: usize },

    /// A size read from the wire does not fit in the remaining input
    #[error("buffer overflow for size {size}: {have} bytes remaining")]
    BufferOverflow { size: u64, have: usize },

    /// Decoded element count exceeds the configured ceiling
    #[error("allocation limit exceeded: requested {requested}, limit {limit}")]
    AllocationLimitExceeded { requested: u64, limit: usize },

    /// Arithmetic on wire sizes overflowed
    #[error("integer overflow in size computation")]
    IntegerOverflow,

    /// Invalid string - not null terminated or invalid encoding
    #[error("invalid string: {0}")]
    InvalidString(String),

    /// Invalid pointer - unexpected referent ID
    #[error("invalid pointer: referent ID {0}")]
    InvalidPointer(u64),

    /// Conformance mismatch
    #[error("conformance mismatch: max_count={max_count}, actual_count={actual_count}")]
    ConformanceMismatch { max_count: u64, actual_count: u64 },

    /// UTF-8 decoding error
    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),
}

/// Result type for NDR operations
pub type Result<T> = std::result::Result<T, NdrError>;
