//! The `Item` entity and its query types.

mod filter;
mod model;
mod schema;

pub use filter::ItemFilter;
pub use model::ItemModel;
pub use schema::{
    ITEM_ENTITY, TIMESTAMP_FIELD, TITLE_FIELD, insert_item, item_fields, preview_store, schema,
};
