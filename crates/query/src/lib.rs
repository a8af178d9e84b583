//! Reactive query layer over a record store.
//!
//! This crate keeps a filtered, projected view of store records current:
//! - [`QueryFilter`] compiles a filter value to a [`FetchSpec`](record_store::FetchSpec)
//! - [`Queryable`] maps one raw record to one projected value
//! - [`QueryResults`] is the lazily-mapped, indexable snapshot view
//! - [`QueryEngine`] owns the fetch/subscription lifecycle and publishes snapshots
//! - [`Query`] is the per-consumer binding adapter a host drives

pub mod binding;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod event;
pub mod filter;
pub mod queryable;
pub mod results;

pub use binding::{Query, QueryEnvironment};
pub use emitter::{EventEmitter, ListenerId};
pub use engine::{EngineState, QueryEngine};
pub use error::{QueryError, Result};
pub use event::QueryEvent;
pub use filter::QueryFilter;
pub use queryable::Queryable;
pub use results::{QueryResults, ResultsIter};
