use crate::EventEnvelope;

/// Messages that can be routed to a processing group by aggregate type.
///
/// Workers use this to subscribe to the whole bus but only hand their handler
/// the streams they own (e.g. the label group only sees `catalog.label`).
/// The global position lets a group report how far it has caught up, including
/// past messages it filtered out.
pub trait Routed {
    fn aggregate_type(&self) -> &str;

    fn global_position(&self) -> u64;
}

impl<E> Routed for EventEnvelope<E> {
    fn aggregate_type(&self) -> &str {
        EventEnvelope::aggregate_type(self)
    }

    fn global_position(&self) -> u64 {
        EventEnvelope::global_position(self)
    }
}
