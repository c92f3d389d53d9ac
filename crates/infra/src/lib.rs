//! Infrastructure layer: event store, dispatch, read side, saga and runtime.

pub mod catalog;
pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod fanout;
pub mod live;
pub mod notify;
pub mod projections;
pub mod read_model;
pub mod replay;
pub mod runtime;
pub mod saga;
pub mod uniqueness;
pub mod upload_steps;
pub mod workers;

mod integration_tests;

pub use catalog::{Catalog, FamilyViews};
pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use config::{CatalogConfig, ConfigError};
pub use runtime::{CatalogRuntime, RuntimeError, RuntimeParts};
