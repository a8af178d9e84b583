use thiserror::Error;

use crate::RecordId;

/// Errors that can occur when interacting with a record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot serve requests right now.
    #[error("Record store unavailable: {0}")]
    Unavailable(String),

    /// The fetch or write named an entity the schema does not know.
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// The fetch or write named a field the entity does not declare.
    #[error("Unknown field '{field}' on entity {entity}")]
    UnknownField { entity: String, field: String },

    /// The record was not found in the store.
    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for record store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
