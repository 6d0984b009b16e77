//! Error types for record parsing in melnor-types.

use thiserror::Error;

/// Errors that can occur when decoding Melnor wire records.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in melnor-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The buffer is too short to contain the requested record.
    #[error("{record} requires {expected} bytes, got {actual}")]
    InsufficientBytes {
        /// Name of the record being decoded.
        record: &'static str,
        /// Number of bytes the record needs.
        expected: usize,
        /// Number of bytes available.
        actual: usize,
    },

    /// A field held a value outside its allowed range.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// The manufacturer/model string could not be interpreted.
    #[error("Invalid model string: {0:?}")]
    InvalidModel(String),
}

impl ParseError {
    /// Create an insufficient bytes error.
    pub fn insufficient(record: &'static str, expected: usize, actual: usize) -> Self {
        Self::InsufficientBytes {
            record,
            expected,
            actual,
        }
    }
}

/// Result type alias using melnor-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
