//! Error types for mapping metadata.

/// Errors raised while registering or resolving mapping metadata.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("entity already registered: {0}")]
    DuplicateEntity(String),

    /// The name is not declared on the entity; `available` lists every
    /// declared attribute and relationship in declaration order.
    #[error("unknown property '{property}' on {entity}; available: [{}]", .available.join(", "))]
    UnknownProperty {
        entity: String,
        property: String,
        available: Vec<String>,
    },

    #[error("relationship {entity}.{relationship} targets unknown entity {target}")]
    UnknownTarget {
        entity: String,
        relationship: String,
        target: String,
    },

    #[error("relationship {entity}.{relationship} declares reverse '{reverse}' which does not point back")]
    InvalidReverse {
        entity: String,
        relationship: String,
        reverse: String,
    },

    #[error("entity {0} declares no primary key")]
    MissingPrimaryKey(String),
}

/// Convenience alias for mapping results.
pub type MapResult<T> = Result<T, MapError>;
