//! Storage layout of the `Item` entity.
//!
//! Timestamps are stored as integer milliseconds since the Unix epoch so
//! that store ordering matches chronological ordering.

use chrono::{DateTime, Duration, Utc};
use record_store::{
    EntitySchema, Fields, InMemoryRecordStore, RecordHandle, Result, Schema, SortDescriptor,
};
use serde_json::Value;

/// Entity name of stored items.
pub const ITEM_ENTITY: &str = "Item";

/// Creation time, in milliseconds since the Unix epoch.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Optional display title.
pub const TITLE_FIELD: &str = "title";

/// Schema containing the `Item` entity, ordered oldest first by default.
pub fn schema() -> Schema {
    Schema::new().with_entity(
        EntitySchema::new(ITEM_ENTITY)
            .field(TIMESTAMP_FIELD)
            .field(TITLE_FIELD)
            .default_order(SortDescriptor::ascending(TIMESTAMP_FIELD)),
    )
}

/// Builds the stored fields for an item.
pub fn item_fields(timestamp: DateTime<Utc>, title: Option<&str>) -> Fields {
    let mut fields = Fields::new();
    fields.insert(
        TIMESTAMP_FIELD.to_string(),
        Value::from(timestamp.timestamp_millis()),
    );
    if let Some(title) = title {
        fields.insert(TITLE_FIELD.to_string(), Value::from(title));
    }
    fields
}

/// Inserts one item into `store`.
pub fn insert_item(
    store: &InMemoryRecordStore,
    timestamp: DateTime<Utc>,
    title: Option<&str>,
) -> Result<RecordHandle> {
    store.insert(ITEM_ENTITY, item_fields(timestamp, title))
}

/// Creates an in-memory store seeded with `count` items, one minute apart,
/// the newest stamped now.
pub fn preview_store(count: usize) -> Result<InMemoryRecordStore> {
    let store = InMemoryRecordStore::new(schema());
    let now = Utc::now();
    for i in 0..count {
        let minutes = i64::try_from(count - 1 - i).unwrap_or(i64::MAX);
        let timestamp = now - Duration::minutes(minutes);
        insert_item(&store, timestamp, Some(&format!("Item {}", i + 1)))?;
    }
    tracing::debug!(count, "seeded preview store");
    Ok(store)
}
