//! Error types for payload parsing in blewatch-types.

use thiserror::Error;

/// Errors that can occur when parsing serialized advertisement payloads.
///
/// This error type is platform-agnostic and carries no I/O or scheduling
/// failures (those belong in blewatch-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A token in a hex payload was not a two-digit hex byte.
    #[error("Invalid hex byte '{token}'")]
    InvalidHex {
        /// The offending token.
        token: String,
    },

    /// A manufacturer data key was neither `0xNNNN` nor a decimal u16.
    #[error("Invalid manufacturer key '{0}'")]
    InvalidManufacturerKey(String),

    /// Generic invalid data.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias using blewatch-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
