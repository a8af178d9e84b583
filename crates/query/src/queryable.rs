//! Projection from raw records to application values.

use std::hash::Hash;

use record_store::Record;

use crate::filter::QueryFilter;

/// A value projected from exactly one store record.
///
/// `from_record` runs on every read of a results index, so it should be
/// cheap and must depend only on the record's current fields.
pub trait Queryable: Sized + 'static {
    /// The filter type used to query for this projection.
    type Filter: QueryFilter;

    /// Stable identity of a projected value, derived from record data.
    type Id: Clone + Eq + Hash;

    /// Builds the projection from the record's current fields.
    fn from_record(record: &Record) -> Self;

    /// Returns the value's identity.
    fn id(&self) -> Self::Id;
}
