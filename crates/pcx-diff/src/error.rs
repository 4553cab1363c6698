//! Error types for the diff crate.

/// Errors that can occur during change log operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiffError {
    /// `diffs_since` or `size_since` was called with a tag never passed to `mark`.
    #[error("unknown change log marker: {0}")]
    UnknownMarker(String),
}

/// Convenience alias for diff results.
pub type DiffResult<T> = Result<T, DiffError>;
