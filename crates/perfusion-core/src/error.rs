//! Error types for the acquisition pipeline.
//!
//! `PerfusionError` is the single error type shared by the storage and
//! controller layers. Its variants follow the failure taxonomy of the
//! pipeline:
//!
//! - **ConfigMismatch**: a file header declares a record geometry that differs
//!   from what the caller expects. Fatal to the `open()` that detected it.
//! - **PersistenceFailure**: any `Io` error raised while appending. The
//!   controller logs it and keeps acquiring; only that batch is lost, and only
//!   for the output that failed.
//! - Lifecycle misuse (`AlreadyOpen`, `NotOpen`, `InvalidState`) and malformed
//!   appends (`RecordLength`, `DataTypeMismatch`, `OutOfOrder`).
//!
//! Two conditions are deliberately *not* errors: an acquisition gap (the
//! hardware had nothing new) is a `None` from
//! [`HardwareSource::get_data`](crate::source::HardwareSource::get_data), and an
//! empty read is an empty result from the reader.

use std::path::PathBuf;

use thiserror::Error;

use crate::dtype::DataType;
use crate::geometry::Geometry;

/// Convenience alias for results using [`PerfusionError`].
pub type Result<T> = std::result::Result<T, PerfusionError>;

/// Primary error type for acquisition, persistence and retrieval.
#[derive(Error, Debug)]
pub enum PerfusionError {
    /// The header of `path` declares a geometry other than the expected one.
    ///
    /// **Error Type**: Permanent for this file. The caller must either open
    /// without an expectation (adopting the file's geometry) or use the right
    /// stream configuration. Data is never reinterpreted.
    #[error("Geometry mismatch for {path:?}: expected {expected}, file declares {found}")]
    ConfigMismatch {
        path: PathBuf,
        expected: Geometry,
        found: Geometry,
    },

    /// `open()` was called on a writer that already holds a file handle.
    #[error("Writer is already open on {0:?}")]
    AlreadyOpen(PathBuf),

    /// An operation that needs an open writer was attempted before `open()`.
    #[error("Writer for '{0}' is not open")]
    NotOpen(String),

    /// The header could not be parsed or is incomplete.
    #[error("Invalid stream header: {0}")]
    InvalidHeader(String),

    /// An append carried a number of values that is not a whole number of
    /// records.
    #[error("Record length mismatch: expected a multiple of {expected} values, got {found}")]
    RecordLength { expected: usize, found: usize },

    /// An append carried values of a different element type than the file.
    #[error("Data type mismatch: expected {expected}, got {found}")]
    DataTypeMismatch { expected: DataType, found: DataType },

    /// An append would place a record before the last persisted one.
    #[error("Out-of-order timestamp: last persisted {last} ms, got {found} ms")]
    OutOfOrder { last: i32, found: i32 },

    /// A controller transition that the current state does not allow.
    #[error("Cannot {operation} a stream that is {state}")]
    InvalidState {
        state: &'static str,
        operation: &'static str,
    },

    /// A hardware source refused to start.
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// Semantic configuration error (zero window, unknown chained input,
    /// duplicate output name, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Underlying storage failure.
    ///
    /// At append time this is the PersistenceFailure category; at open time it
    /// is fatal to the open.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PerfusionError {
    /// Whether the error came from the storage layer rather than from the
    /// caller's input. Persistence failures are logged and acquisition goes on.
    pub fn is_persistence_failure(&self) -> bool {
        matches!(self, PerfusionError::Io(_))
    }
}
