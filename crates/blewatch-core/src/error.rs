//! Error types for blewatch-core.
//!
//! Only failures a caller must act on surface as [`Error`]. Per-packet
//! problems are absorbed where they occur:
//!
//! | Condition | Handling |
//! |-----------|----------|
//! | Packet without a device id | Dropped and logged, store untouched |
//! | Short or unmatched sensor frame | Decoder returns `None`, other fields still merge |
//! | Recorder capacity reached | Further packets dropped, one warning logged |
//! | Event handler panics | Logged, remaining handlers still run |
//!
//! Session loading and playback control return [`Error`] so a host can
//! surface them to the user.

use thiserror::Error;

/// Errors returned by blewatch-core operations.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A replay session could not be parsed or failed validation.
    #[error("Invalid replay session: {0}")]
    InvalidSession(String),

    /// Playback was started before any session was loaded.
    #[error("No replay session loaded")]
    NoSessionLoaded,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The replay scheduler task is no longer running.
    #[error("Replay scheduler has shut down")]
    SchedulerClosed,

    /// Failed to parse a serialized payload.
    #[error(transparent)]
    Parse(#[from] blewatch_types::ParseError),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid session error.
    pub fn invalid_session(message: impl Into<String>) -> Self {
        Self::InvalidSession(message.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Result type alias using blewatch-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
