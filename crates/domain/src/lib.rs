//! Domain layer for the reactive query layer.
//!
//! This crate provides the `Item` entity:
//! - its schema and a seeded preview store
//! - [`ItemModel`], the projection of one stored item
//! - [`ItemFilter`], the typed filter compiled to a fetch specification

pub mod item;

pub use item::{
    ITEM_ENTITY, ItemFilter, ItemModel, TIMESTAMP_FIELD, TITLE_FIELD, insert_item, item_fields,
    preview_store, schema,
};
