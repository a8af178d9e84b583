//! Record store interface consumed by the reactive query layer.
//!
//! This crate provides:
//! - [`RecordStore`] trait: predicate-and-order fetches plus change subscriptions
//! - [`FetchSpec`] / [`Predicate`] / [`SortDescriptor`] describing what to retrieve
//! - [`Record`] handles with interior-mutable fields
//! - [`InMemoryRecordStore`] for tests, previews, and demos

pub mod error;
pub mod fetch;
pub mod memory;
pub mod record;
pub mod schema;
pub mod store;

pub use common::RecordId;
pub use error::{Result, StoreError};
pub use fetch::{Comparison, FetchSpec, Predicate, SortDescriptor, SortDirection, compare_values};
pub use memory::InMemoryRecordStore;
pub use record::{Fields, Record, RecordHandle};
pub use schema::{EntitySchema, Schema};
pub use store::{ChangeCallback, ChangeNotification, RecordStore, Subscription, SubscriptionId};
