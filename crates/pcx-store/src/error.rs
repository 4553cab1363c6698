use pcx_context::ContextError;
use pcx_map::MapError;
use pcx_types::ObjectId;

/// Errors from the in-memory store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A diff touched an object that has no row.
    #[error("no row for {0}")]
    MissingRow(ObjectId),

    /// An insert named a permanent identifier that is already taken.
    #[error("duplicate key {0}")]
    DuplicateKey(ObjectId),

    /// Keys can only be generated for single-column primary keys.
    #[error("cannot generate a key for {entity}: {reason}")]
    KeyGeneration { entity: String, reason: String },

    #[error("mapping error: {0}")]
    Map(#[from] MapError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for ContextError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Map(err) => ContextError::from(err),
            other => ContextError::Store(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_become_context_store_errors() {
        let id = ObjectId::single("Artist", "ARTIST_ID", 1);
        let err = ContextError::from(StoreError::MissingRow(id));
        match err {
            ContextError::Store(message) => assert_eq!(message, "no row for <Artist:ARTIST_ID=1>"),
            other => panic!("expected store error, got {other:?}"),
        }
    }

    #[test]
    fn mapping_errors_keep_their_kind() {
        let err = ContextError::from(StoreError::Map(MapError::UnknownEntity("Sculpture".into())));
        assert!(matches!(err, ContextError::UnknownEntity(name) if name == "Sculpture"));
    }
}
