//! Custom error types for the telemetry pipeline.
//!
//! This module defines the primary error type, `TelemetryError`, used across capture,
//! reload, and export. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the failures that can occur, from disk I/O on the spill
//! path to malformed matrix files handed to the reader.
//!
//! ## Error Hierarchy
//!
//! - **`Io`**: Wraps `std::io::Error`, covering spill appends, history reloads and export
//!   writes. A failed spill keeps its samples buffered, but the error is reported as fatal
//!   because the cause (permissions, full disk) rarely clears on its own.
//! - **`IoTimeout`**: A spill append exceeded the configured I/O timeout. This is
//!   recoverable: the channel keeps the unspilled samples and retries on its next add.
//! - **`DuplicateChannel` / `UnknownChannel`**: Registry misuse. Duplicate registration fails
//!   loudly instead of silently replacing the existing channel.
//! - **`Config` / `Configuration`**: Figment extraction errors and semantic validation errors.
//! - **`MatrixTooLarge` / `DimensionMismatch` / `MalformedMat`**: Binary matrix encoding
//!   and decoding failures.
//!
//! By using `#[from]`, `TelemetryError` can be created from underlying error types,
//! keeping `?` usable throughout the crate.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, TelemetryError>;

/// Errors raised by capture, reload, export and configuration.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Underlying filesystem or sink failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A spill append did not finish within the configured timeout
    #[error("I/O on '{path}' timed out after {timeout:?}")]
    IoTimeout {
        /// File being written
        path: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// Figment extraction failure
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Semantic validation failure
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Name already registered in the same namespace
    #[error("Channel '{0}' is already registered")]
    DuplicateChannel(String),

    /// Sample addressed to an unregistered name
    #[error("Channel '{0}' is not registered")]
    UnknownChannel(String),

    /// Ring buffer requested with zero capacity
    #[error("Ring buffer capacity must be greater than 0")]
    ZeroCapacity,

    /// Export format tag not recognised
    #[error("Unknown export format '{0}' (expected csv or mat)")]
    UnknownFormat(String),

    /// Matrix element would overflow the 32-bit length field
    #[error("Matrix '{name}' is too large for the MAT level-5 format ({bytes} bytes)")]
    MatrixTooLarge {
        /// Variable name
        name: String,
        /// Payload size that was required
        bytes: u64,
    },

    /// Variable name is not ASCII after sanitizing
    #[error("Matrix name '{0}' must be ASCII")]
    InvalidMatrixName(String),

    /// Value count does not match `rows * cols`
    #[error("Matrix '{name}' has {len} values but dimensions {rows}x{cols}")]
    DimensionMismatch {
        /// Variable name
        name: String,
        /// Values supplied
        len: usize,
        /// Declared rows
        rows: usize,
        /// Declared columns
        cols: usize,
    },

    /// Reader hit a truncated or unexpected element
    #[error("Malformed MAT file: {0}")]
    MalformedMat(String),
}

impl From<figment::Error> for TelemetryError {
    fn from(value: figment::Error) -> Self {
        TelemetryError::Config(Box::new(value))
    }
}

impl TelemetryError {
    /// Whether the failed operation may be retried without corrupting channel state.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TelemetryError::IoTimeout { .. }
                | TelemetryError::UnknownChannel(_)
                | TelemetryError::DuplicateChannel(_)
                | TelemetryError::UnknownFormat(_)
        )
    }
}
