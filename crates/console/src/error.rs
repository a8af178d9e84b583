//! Console error types.

use query::QueryError;
use record_store::StoreError;
use thiserror::Error;

/// Errors that end a console run.
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// The query could not be bound or read.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// The preview store could not be seeded or written.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The background writer task panicked or was cancelled.
    #[error("writer task failed: {0}")]
    Writer(#[from] tokio::task::JoinError),

    /// Rendering to the output failed.
    #[error("render failed: {0}")]
    Render(#[from] std::io::Error),
}
