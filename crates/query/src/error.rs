//! Query error types.

use record_store::StoreError;
use thiserror::Error;

/// Errors surfaced synchronously by the query layer.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The query is missing its store or filter.
    #[error("Query is not bound: {0}")]
    Unbound(&'static str),

    /// A results index was outside `[0, len)`.
    #[error("Index {index} out of bounds for results of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Nothing can produce an event: no fetch is in flight and no
    /// subscription is live.
    #[error("Query engine is idle")]
    Idle,

    /// An error occurred in the record store.
    #[error("Record store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;
