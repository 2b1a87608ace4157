//! Error types for decoding sensor payloads.

use thiserror::Error;

/// Errors that can occur when decoding Govee H5075 payloads.
///
/// This error type does not include BLE transport errors; those belong in
/// garage-core.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// The payload was shorter than the format requires.
    #[error("{format} requires {expected} bytes, got {actual}")]
    InsufficientBytes {
        format: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The payload length does not match any known measurement encoding.
    #[error("Unsupported measurement length: {0} bytes")]
    UnsupportedLength(usize),

    /// The payload did not start with a recognised command header.
    #[error("Unknown notification header: {0:02x} {1:02x}")]
    UnknownHeader(u8, u8),

    /// Failed to parse data for another reason.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl ParseError {
    pub(crate) fn insufficient(format: &'static str, expected: usize, actual: usize) -> Self {
        Self::InsufficientBytes {
            format,
            expected,
            actual,
        }
    }
}

/// Result type alias using garage-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
