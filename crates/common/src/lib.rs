//! Shared identifiers for the reactive query workspace.

pub mod types;

pub use types::RecordId;
