use serde_json::Value as JsonValue;

use crate::EventEnvelope;

/// A projection builds a disposable read model from committed events.
///
/// Projections consume the JSON envelopes the bus carries, ignore aggregate
/// types they do not own, and must be idempotent: applying an envelope that was
/// already applied is a no-op. Implementations track a per-stream cursor for
/// that.
///
/// `reset` drops the read model and its cursors. A rebuild is `reset` followed
/// by replaying the full log in global order.
pub trait Projection: Send + Sync {
    type Error: core::fmt::Debug + core::fmt::Display + Send + Sync + 'static;

    /// Stable projection name (used in logs and replay progress).
    fn name(&self) -> &str;

    /// Aggregate types this projection consumes.
    fn aggregate_types(&self) -> Vec<String>;

    /// Apply a single envelope to the read model.
    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), Self::Error>;

    /// Truncate the read model (and its cursors).
    fn reset(&self);
}

impl<P> Projection for std::sync::Arc<P>
where
    P: Projection + ?Sized,
{
    type Error = P::Error;

    fn name(&self) -> &str {
        (**self).name()
    }

    fn aggregate_types(&self) -> Vec<String> {
        (**self).aggregate_types()
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
        (**self).apply_envelope(envelope)
    }

    fn reset(&self) {
        (**self).reset()
    }
}
