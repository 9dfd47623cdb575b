//! Error types for roster operations.

use thiserror::Error;

/// Errors that can occur when stitching delta summaries together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeltaError {
    /// The local delta's end does not dominate the remote delta's start for
    /// every replica the remote covers, so concatenating the two would leave
    /// a gap in some replica's history.
    #[error("delta ranges are not contiguous")]
    NotContiguous,
}
