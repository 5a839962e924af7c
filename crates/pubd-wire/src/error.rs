//! Wire error types

use thiserror::Error;

/// Errors that can occur while reading SSH wire values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Not enough bytes for the value being decoded
    #[error("Truncated {what}: {available} bytes available")]
    Truncated {
        what: &'static str,
        available: usize,
    },

    /// Value too long to be length-prefixed with a `uint32`
    #[error("String of {0} bytes is too long to encode")]
    TooLong(usize),

    /// A string field was not valid UTF-8
    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}
