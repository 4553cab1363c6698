use thiserror::Error;

use crate::object_id::ObjectId;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("no replacement key is attached to {0}")]
    NoReplacementKey(ObjectId),

    #[error("value cannot be used as a key: {0}")]
    InvalidKeyValue(String),

    #[error("unknown persistence state: {0}")]
    UnknownState(String),
}
