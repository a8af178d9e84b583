//! Projected view value for a stored item.

use chrono::{DateTime, Utc};
use query::Queryable;
use record_store::{Record, RecordId};
use serde::{Deserialize, Serialize};

use super::filter::ItemFilter;
use super::schema::{TIMESTAMP_FIELD, TITLE_FIELD};

/// An item as presented to a consumer.
///
/// Items are identified by their timestamp. Two items stored with the same
/// timestamp share an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemModel {
    /// Store identity of the record this value was mapped from.
    pub record_id: RecordId,
    pub timestamp: Option<DateTime<Utc>>,
    pub title: Option<String>,
}

impl ItemModel {
    /// Display line for the item.
    pub fn label(&self) -> String {
        match self.timestamp {
            Some(timestamp) => format!("Item at {}", timestamp.to_rfc3339()),
            None => "Item at <unknown time>".to_string(),
        }
    }
}

impl Queryable for ItemModel {
    type Filter = ItemFilter;
    type Id = Option<DateTime<Utc>>;

    fn from_record(record: &Record) -> Self {
        let timestamp = record
            .get::<i64>(TIMESTAMP_FIELD)
            .and_then(DateTime::from_timestamp_millis);
        tracing::trace!(record_id = %record.id(), "mapped item");
        Self {
            record_id: record.id(),
            timestamp,
            title: record.get(TITLE_FIELD),
        }
    }

    fn id(&self) -> Self::Id {
        self.timestamp
    }
}
