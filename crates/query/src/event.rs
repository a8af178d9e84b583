//! Change signals delivered to query consumers.

use std::sync::Arc;

use record_store::StoreError;

/// A signal published by the query engine.
///
/// Successful updates and failed refreshes travel on the same channel so
/// that consumers can tell "data changed" apart from "refresh failed".
#[derive(Debug, Clone)]
pub enum QueryEvent {
    /// A new snapshot was published.
    Changed {
        /// Snapshot revision, starting at 1 for the first published snapshot.
        revision: u64,
        /// Number of records in the new snapshot.
        count: usize,
    },
    /// A fetch or subscription attempt failed. The previous snapshot is
    /// still current.
    Failed { error: Arc<StoreError> },
}

impl QueryEvent {
    pub fn is_change(&self) -> bool {
        matches!(self, QueryEvent::Changed { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, QueryEvent::Failed { .. })
    }
}
