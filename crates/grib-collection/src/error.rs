//! Error types for the grib-collection crate.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while building or reading collection indexes.
#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid header record: {0}")]
    Record(#[from] grib_common::RecordError),

    #[error("Failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("Collection '{0}' has no usable records")]
    NoRecords(String),

    #[error("Collection '{0}' has no variables to index")]
    NoVariables(String),

    #[error("Index {path} is invalid: {reason}")]
    IndexInvalid { path: PathBuf, reason: String },

    #[error("Index {path} has version {found}, supported versions are {min}..={max}")]
    Incompatible {
        path: PathBuf,
        found: i32,
        min: i32,
        max: i32,
    },

    #[error("Record block for variable {expected:08x} is corrupt (found {found:08x})")]
    CorruptRecords { expected: u32, found: u32 },

    #[error("No variable {variable} in group {group}")]
    UnknownVariable { group: usize, variable: usize },

    #[error("Time partition '{0}' has no usable partitions")]
    NoPartitions(String),

    #[error("Time partition '{name}' is inconsistent: {}", join_mismatches(.mismatches))]
    PartitionInconsistent {
        name: String,
        mismatches: Vec<AxisMismatch>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CollectionError {
    pub(crate) fn invalid(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        CollectionError::IndexInvalid {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True when an existing index should be treated as absent and rebuilt.
    pub fn is_unusable_index(&self) -> bool {
        matches!(
            self,
            CollectionError::IndexInvalid { .. }
                | CollectionError::Incompatible { .. }
                | CollectionError::CorruptRecords { .. }
        )
    }
}

/// Vertical or ensemble axis present in one partition's variable but not
/// the other's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisMismatch {
    pub group: String,
    pub variable: String,
    pub partition: String,
    pub axis: &'static str,
    pub canonical_has_axis: bool,
}

impl fmt::Display for AxisMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (have, lack) = if self.canonical_has_axis {
            ("canonical", self.partition.as_str())
        } else {
            (self.partition.as_str(), "canonical")
        };
        write!(
            f,
            "{}/{}: {} axis in {} but not in {}",
            self.group, self.variable, self.axis, have, lack
        )
    }
}

fn join_mismatches(mismatches: &[AxisMismatch]) -> String {
    mismatches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for collection operations.
pub type Result<T> = std::result::Result<T, CollectionError>;
