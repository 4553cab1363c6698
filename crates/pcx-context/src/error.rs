//! Error types for persistence contexts.

use thiserror::Error;

use pcx_diff::DiffError;
use pcx_map::MapError;
use pcx_types::{ObjectId, PersistenceState, TypeError};

use crate::validation::ValidationResult;

/// Errors raised by contexts and synchronization channels.
#[derive(Debug, Error)]
pub enum ContextError {
    /// Dirty objects failed validation. Nothing was changed or sent upstream.
    #[error("validation failed: {0}")]
    Validation(ValidationResult),

    /// The upstream channel failed. The commit was aborted and dirty state
    /// is intact.
    #[error("sync channel error: {0}")]
    SyncChannel(#[source] Box<ContextError>),

    /// A hollow object's identifier matched `rows` rows instead of one.
    #[error("fault resolution failed for {id}: expected 1 row, got {rows}")]
    FaultResolution { id: ObjectId, rows: usize },

    #[error("unknown property '{property}' on {entity}; available: [{}]", .available.join(", "))]
    UnknownProperty {
        entity: String,
        property: String,
        available: Vec<String>,
    },

    #[error("unrecognized sync mode: {0}")]
    UnrecognizedSyncMode(u8),

    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("mapping error: {0}")]
    Map(MapError),

    #[error("change log error: {0}")]
    Diff(#[from] DiffError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// The object is registered with a different context.
    #[error("object {0} belongs to another context")]
    ForeignObject(ObjectId),

    #[error("cannot {operation} {id} in state {state}")]
    InvalidState {
        id: ObjectId,
        state: PersistenceState,
        operation: &'static str,
    },

    #[error("delete of {id} denied: relationship '{relationship}' is not empty")]
    DeleteDenied { id: ObjectId, relationship: String },

    #[error("a different object is already registered as {0}")]
    DuplicateRegistration(ObjectId),

    #[error("property {entity}.{property} is not {expected}")]
    PropertyKind {
        entity: String,
        property: String,
        expected: &'static str,
    },

    #[error("context has no upstream channel")]
    NoChannel,

    #[error("upstream channel has no entity resolver")]
    NoEntityResolver,

    #[error("context has been released")]
    Released,

    #[error("store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContextError {
    /// Returns `true` if repeating the same operation may succeed without
    /// any change by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SyncChannel(_))
    }

    /// Returns `true` if the caller can fix the cause and carry on with the
    /// same context.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::SyncChannel(_)
                | Self::UnknownProperty { .. }
                | Self::DeleteDenied { .. }
                | Self::InvalidState { .. }
        )
    }
}

impl From<MapError> for ContextError {
    fn from(err: MapError) -> Self {
        match err {
            MapError::UnknownProperty {
                entity,
                property,
                available,
            } => Self::UnknownProperty {
                entity,
                property,
                available,
            },
            MapError::UnknownEntity(name) => Self::UnknownEntity(name),
            other => Self::Map(other),
        }
    }
}

/// Convenience alias for context results.
pub type ContextResult<T> = Result<T, ContextError>;
