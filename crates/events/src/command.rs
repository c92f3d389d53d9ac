use babel_core::AggregateId;

/// A command targets a specific aggregate (command abstraction).
///
/// Commands represent **intent** and are transient. The aggregate turns an
/// accepted command into events, which are what gets persisted.
///
/// Each command operates on exactly one aggregate stream, so commands to
/// different aggregates can run concurrently while commands to the same
/// aggregate are serialized by the expected-version check on append.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;
}
