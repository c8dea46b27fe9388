//! Error types for header record validation.

use thiserror::Error;

/// Result type alias using RecordError.
pub type RecordResult<T> = Result<T, RecordError>;

/// Problems detected in a decoded header record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Unknown time unit code: {0}")]
    UnknownTimeUnit(u8),

    #[error("Time unit {from} cannot be expressed in {to}")]
    IncompatibleTimeUnit { from: String, to: String },

    #[error("Invalid time interval [{start}, {end}]")]
    InvalidInterval { start: i32, end: i32 },

    #[error("Record has no grid definition bytes")]
    MissingGrid,

    #[error("Record payload offset must be non-zero")]
    ZeroOffset,
}
