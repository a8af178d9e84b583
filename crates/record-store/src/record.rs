//! Store-owned records and the handles snapshots hold to them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{RecordId, Result};

/// Field values of a single record.
pub type Fields = serde_json::Map<String, Value>;

/// A shared handle to a store-owned record.
///
/// Snapshots hold clones of these handles. The set and order of handles in
/// a snapshot never change, but the fields behind a handle can be updated
/// in place by the store.
pub type RecordHandle = Arc<Record>;

/// A persisted record.
///
/// Fields are interior-mutable so that every handle to the record observes
/// writes made through the store. The revision advances each time a write
/// actually changes the field contents.
#[derive(Debug)]
pub struct Record {
    id: RecordId,
    entity: String,
    fields: RwLock<Fields>,
    revision: AtomicU64,
}

impl Record {
    /// Creates a new record at revision 1.
    pub fn new(entity: impl Into<String>, fields: Fields) -> Self {
        Self::with_id(RecordId::new(), entity, fields)
    }

    /// Creates a new record with a caller-chosen ID.
    pub fn with_id(id: RecordId, entity: impl Into<String>, fields: Fields) -> Self {
        Self {
            id,
            entity: entity.into(),
            fields: RwLock::new(fields),
            revision: AtomicU64::new(1),
        }
    }

    /// Returns the record's ID.
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Returns the name of the entity this record belongs to.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Returns the current content revision.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Returns a copy of one field's current value.
    pub fn value(&self, field: &str) -> Option<Value> {
        self.fields.read().get(field).cloned()
    }

    /// Reads one field and deserializes it.
    ///
    /// Returns `None` when the field is absent, null, or of the wrong shape.
    pub fn get<D: DeserializeOwned>(&self, field: &str) -> Option<D> {
        self.decode(field).ok().flatten()
    }

    /// Deserializes a field, failing if the stored value has the wrong shape.
    ///
    /// A missing or null field decodes to `Ok(None)`.
    pub fn decode<D: DeserializeOwned>(&self, field: &str) -> Result<Option<D>> {
        match self.value(field) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    /// Returns a copy of all current field values.
    pub fn fields(&self) -> Fields {
        self.fields.read().clone()
    }

    /// Runs `f` against the current fields under the read lock.
    pub fn with_fields<R>(&self, f: impl FnOnce(&Fields) -> R) -> R {
        f(&self.fields.read())
    }

    /// Merges `changes` into the record's fields.
    ///
    /// Returns `true` and advances the revision only if some value differed.
    pub(crate) fn merge(&self, changes: Fields) -> bool {
        let mut fields = self.fields.write();
        let mut changed = false;
        for (key, value) in changes {
            if fields.get(&key) != Some(&value) {
                fields.insert(key, value);
                changed = true;
            }
        }
        if changed {
            self.revision.fetch_add(1, Ordering::AcqRel);
        }
        changed
    }
}
