//! Event mechanics shared by the write side, projections and sagas.
//!
//! Nothing in here knows about terms or uploads.

pub mod bus;
pub mod command;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;
pub mod projection;
pub mod routing;
pub mod saga;

pub use bus::{EventBus, Subscription};
pub use command::Command;
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use projection::Projection;
pub use routing::Routed;
pub use saga::{Saga, SagaAction};
