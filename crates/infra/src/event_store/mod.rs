//! Append-only event store boundary.
//!
//! Defines the storage abstraction for per-aggregate event streams and the
//! store-wide log used by replay, without making any storage assumptions.

pub mod in_memory;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use query::{EventFilter, EventQuery, EventQueryResult, Pagination};
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
