//! Saga infrastructure: persistence, command execution and the runner loop.

pub mod upload;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info};

use babel_core::{AggregateId, ExpectedVersion};
use babel_events::{EventBus, EventEnvelope, Saga, SagaAction};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum SagaError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error("failed to deserialize saga event: {0}")]
    Deserialize(String),

    #[error("failed to publish saga event: {0}")]
    Publish(String),

    #[error("saga command `{command_type}` failed: {message}")]
    Command {
        command_type: String,
        message: String,
    },
}

/// Repository for persisting saga events via the event store.
///
/// Saga events are published like any other committed event, so processing
/// groups see a gap-free sequence of global positions.
pub struct SagaRepository<S: Saga, E: EventStore, B> {
    event_store: E,
    bus: B,
    _phantom: std::marker::PhantomData<S>,
}

impl<S, E, B> SagaRepository<S, E, B>
where
    S: Saga,
    E: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(event_store: E, bus: B) -> Self {
        Self {
            event_store,
            bus,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Load saga event history for a saga instance.
    pub fn load(&self, saga_id: AggregateId) -> Result<Vec<StoredEvent>, SagaError> {
        Ok(self.event_store.load_stream(saga_id)?)
    }

    /// Append a saga event (Emit action) at the given stream version.
    pub fn append_emit(
        &self,
        saga_id: AggregateId,
        expected: ExpectedVersion,
        event_type: &str,
        payload: JsonValue,
    ) -> Result<Vec<StoredEvent>, SagaError> {
        let uncommitted = UncommittedEvent::from_json(saga_id, S::saga_type(), event_type, payload);
        let stored = self.event_store.append(vec![uncommitted], expected)?;
        for ev in &stored {
            self.bus
                .publish(ev.to_envelope())
                .map_err(|e| SagaError::Publish(format!("{e:?}")))?;
        }
        Ok(stored)
    }
}

/// Command executor trait for saga actions.
pub trait CommandExecutor: Send + Sync {
    type Error: core::fmt::Display;

    fn execute(
        &self,
        aggregate_type: &str,
        command_type: &str,
        payload: &JsonValue,
    ) -> Result<(), Self::Error>;
}

/// Drives one saga type: correlate, rehydrate, react, persist, execute.
pub struct SagaRunner<S: Saga, E: EventStore, B, X> {
    repository: SagaRepository<S, E, B>,
    executor: X,
}

impl<S, E, B, X> SagaRunner<S, E, B, X>
where
    S: Saga,
    E: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    X: CommandExecutor,
{
    pub fn new(repository: SagaRepository<S, E, B>, executor: X) -> Self {
        Self {
            repository,
            executor,
        }
    }

    /// Rebuild the current state of a saga instance from its stream.
    pub fn load_state(
        &self,
        correlation: &S::CorrelationId,
    ) -> Result<(S::State, u64), SagaError> {
        let history = self.repository.load(S::saga_id(correlation))?;
        let mut state = S::initial_state(correlation);
        for stored in &history {
            let ev: S::SagaEvent = serde_json::from_value(stored.payload.clone())
                .map_err(|e| SagaError::Deserialize(e.to_string()))?;
            S::apply(&mut state, &ev);
        }
        let version = history.last().map(StoredEvent::stream_version).unwrap_or(0);
        Ok((state, version))
    }

    /// Handle one incoming envelope. Unrelated envelopes are ignored.
    ///
    /// Every `Emit` is appended with the expected stream version before the
    /// next action runs, so a redelivered envelope either finds the state
    /// already advanced or loses the append race.
    pub fn handle(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), SagaError> {
        let Some(correlation) = S::correlate(envelope) else {
            return Ok(());
        };
        let saga_id = S::saga_id(&correlation);
        let (mut state, mut version) = self.load_state(&correlation)?;

        for action in S::react(&state, &correlation, envelope) {
            match action {
                SagaAction::Emit {
                    event_type,
                    payload,
                } => {
                    let ev: S::SagaEvent = serde_json::from_value(payload.clone())
                        .map_err(|e| SagaError::Deserialize(e.to_string()))?;
                    self.repository.append_emit(
                        saga_id,
                        ExpectedVersion::Exact(version),
                        &event_type,
                        payload,
                    )?;
                    version += 1;
                    S::apply(&mut state, &ev);
                    debug!(
                        saga = S::saga_type(),
                        %saga_id,
                        event_type = %event_type,
                        "saga transition persisted"
                    );
                }
                SagaAction::Command {
                    aggregate_type,
                    command_type,
                    payload,
                } => {
                    self.executor
                        .execute(&aggregate_type, &command_type, &payload)
                        .map_err(|e| SagaError::Command {
                            command_type: command_type.clone(),
                            message: e.to_string(),
                        })?;
                }
                SagaAction::Complete => {
                    info!(saga = S::saga_type(), %saga_id, "saga completed");
                }
            }
        }

        Ok(())
    }
}
