//! Errors of the buffer subsystem.
use thiserror::Error;

/// Errors raised by buffers and weight trees.
///
/// A failed operation never leaves a buffer or a tree partially updated;
/// callers may retry after fixing their arguments.
#[derive(Debug, Error)]
pub enum KiokuError {
    /// Bad capacity, negative priority or weight, schema mismatch on append.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Sampling was requested while no slot is occupied.
    #[error("Buffer is empty")]
    EmptyBuffer,

    /// Weighted sampling was requested while the total weight is zero.
    #[error("Weight tree is empty")]
    EmptyTree,

    /// Concatenation of field values with incompatible shapes.
    #[error("Shape mismatch for field '{key}': expected {expected}, found {found}")]
    ShapeMismatch {
        /// Name of the offending field.
        key: String,

        /// Shape established by the first selected record.
        expected: String,

        /// Shape found in a later record.
        found: String,
    },
}
