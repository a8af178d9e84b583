use chrono::{DateTime, Utc};
use query::QueryFilter;
use record_store::{EntitySchema, FetchSpec, Predicate, Schema, SortDescriptor};
use serde::{Deserialize, Serialize};

use super::schema::{ITEM_ENTITY, TIMESTAMP_FIELD};

/// Filter over stored items.
///
/// Only the time window, direction and limit can be expressed, so every
/// value compiles to a fetch the item schema accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemFilter {
    /// Only items stamped at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Only items stamped strictly before this instant.
    pub until: Option<DateTime<Utc>>,
    /// Reverse the default oldest-first ordering.
    pub newest_first: bool,
    pub limit: Option<usize>,
}

impl ItemFilter {
    /// Every item, oldest first.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn since(mut self, instant: DateTime<Utc>) -> Self {
        self.since = Some(instant);
        self
    }

    pub fn until(mut self, instant: DateTime<Utc>) -> Self {
        self.until = Some(instant);
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl QueryFilter for ItemFilter {
    fn fetch_spec(&self, schema: &Schema) -> FetchSpec {
        let mut spec = schema
            .entity(ITEM_ENTITY)
            .map(EntitySchema::default_fetch)
            .unwrap_or_else(|| {
                FetchSpec::for_entity(ITEM_ENTITY)
                    .order_by(SortDescriptor::ascending(TIMESTAMP_FIELD))
            });

        if let Some(since) = self.since {
            spec = spec.and_where(Predicate::at_least(
                TIMESTAMP_FIELD,
                since.timestamp_millis(),
            ));
        }
        if let Some(until) = self.until {
            spec = spec.and_where(Predicate::less_than(
                TIMESTAMP_FIELD,
                until.timestamp_millis(),
            ));
        }
        if self.newest_first {
            let reversed = spec.ordering.iter().map(SortDescriptor::reversed).collect();
            spec = spec.ordering(reversed);
        }
        if let Some(limit) = self.limit {
            spec = spec.limit(limit);
        }
        spec
    }
}
