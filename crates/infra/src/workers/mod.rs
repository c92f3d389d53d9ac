//! Background workers: one ordered thread per processing group.

pub mod projection_worker;
pub mod tracker;

pub use projection_worker::{ProjectionWorker, RouteFilter, WorkerHandle};
pub use tracker::PositionTracker;
