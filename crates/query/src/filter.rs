//! Filter values that compile to fetch specifications.

use record_store::{FetchSpec, Schema};

/// A value describing which records to retrieve and in what order.
///
/// Compilation must be pure: equal filters compiled against the same schema
/// produce equal specifications. The engine relies on that equality to skip
/// redundant fetches, so a filter must not read clocks or other hidden state
/// while compiling.
///
/// There is no error path. Filters should only be able to express fetches
/// the schema supports, typically by exposing typed builder methods instead
/// of raw field names.
pub trait QueryFilter: PartialEq + Clone + Send + Sync + 'static {
    /// Compiles the filter against `schema`.
    fn fetch_spec(&self, schema: &Schema) -> FetchSpec;
}
