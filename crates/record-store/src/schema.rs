//! Entity schemas that filters compile against and stores validate with.

use std::collections::{BTreeMap, BTreeSet};

use crate::fetch::{FetchSpec, SortDescriptor};
use crate::{Result, StoreError};

/// Description of one entity: its fields and its default ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    name: String,
    fields: BTreeSet<String>,
    default_ordering: Vec<SortDescriptor>,
}

impl EntitySchema {
    /// Creates an entity with no declared fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeSet::new(),
            default_ordering: Vec::new(),
        }
    }

    /// Declares a field.
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.insert(name.into());
        self
    }

    /// Appends a key to the entity's default ordering.
    pub fn default_order(mut self, descriptor: SortDescriptor) -> Self {
        self.default_ordering.push(descriptor);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    pub fn default_ordering(&self) -> &[SortDescriptor] {
        &self.default_ordering
    }

    /// The entity's default fetch: every record, in default order.
    pub fn default_fetch(&self) -> FetchSpec {
        FetchSpec::for_entity(&self.name).ordering(self.default_ordering.clone())
    }
}

/// The set of entities a store knows about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    entities: BTreeMap<String, EntitySchema>,
}

impl Schema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) an entity.
    pub fn with_entity(mut self, entity: EntitySchema) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    pub fn entity(&self, name: &str) -> Option<&EntitySchema> {
        self.entities.get(name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntitySchema> {
        self.entities.values()
    }

    /// Checks that every entity and field a fetch refers to is declared.
    pub fn validate(&self, spec: &FetchSpec) -> Result<()> {
        let entity = self.require(&spec.entity)?;
        for field in spec.referenced_fields() {
            if !entity.has_field(field) {
                return Err(StoreError::UnknownField {
                    entity: spec.entity.clone(),
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Looks up an entity, failing with `UnknownEntity`.
    pub fn require(&self, name: &str) -> Result<&EntitySchema> {
        self.entity(name)
            .ok_or_else(|| StoreError::UnknownEntity(name.to_string()))
    }
}
