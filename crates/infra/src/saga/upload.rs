//! Upload saga: Submit → Validate → (Clean →) Import.
//!
//! Correlated by upload id. Each transition is recorded as a saga event on
//! the saga's own stream before the next step command is issued.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use babel_core::AggregateId;
use babel_events::{EventEnvelope, Saga, SagaAction};
use babel_uploads::{UPLOAD_AGGREGATE_TYPE, UploadEvent, UploadId};

pub const VALIDATE_UPLOAD: &str = "ValidateUpload";
pub const CLEAN_DATABASE: &str = "CleanDatabase";
pub const IMPORT_UPLOAD: &str = "ImportUpload";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UploadSagaPhase {
    #[default]
    NotStarted,
    Validating,
    Cleaning,
    Importing,
    NotValidated,
    Imported,
    NotImported,
}

impl UploadSagaPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadSagaPhase::NotValidated | UploadSagaPhase::Imported | UploadSagaPhase::NotImported
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UploadSagaState {
    pub phase: UploadSagaPhase,
    pub clean_first: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadSagaEvent {
    UploadSubmittedReceived { clean_first: bool },
    ValidationRequested,
    FileValidatedReceived,
    FileNotValidatedReceived,
    CleanRequested,
    DatabaseCleanedReceived,
    ImportRequested,
    FileImportedReceived,
    FileNotImportedReceived,
}

impl UploadSagaEvent {
    fn event_type(&self) -> &'static str {
        match self {
            UploadSagaEvent::UploadSubmittedReceived { .. } => {
                "saga.upload.upload_submitted_received"
            }
            UploadSagaEvent::ValidationRequested => "saga.upload.validation_requested",
            UploadSagaEvent::FileValidatedReceived => "saga.upload.file_validated_received",
            UploadSagaEvent::FileNotValidatedReceived => "saga.upload.file_not_validated_received",
            UploadSagaEvent::CleanRequested => "saga.upload.clean_requested",
            UploadSagaEvent::DatabaseCleanedReceived => "saga.upload.database_cleaned_received",
            UploadSagaEvent::ImportRequested => "saga.upload.import_requested",
            UploadSagaEvent::FileImportedReceived => "saga.upload.file_imported_received",
            UploadSagaEvent::FileNotImportedReceived => "saga.upload.file_not_imported_received",
        }
    }
}

fn emit(ev: UploadSagaEvent) -> SagaAction {
    SagaAction::Emit {
        event_type: ev.event_type().to_string(),
        payload: serde_json::to_value(&ev).unwrap_or_default(),
    }
}

fn command(command_type: &str, upload_id: &UploadId) -> SagaAction {
    SagaAction::Command {
        aggregate_type: UPLOAD_AGGREGATE_TYPE.to_string(),
        command_type: command_type.to_string(),
        payload: serde_json::json!({ "upload_id": upload_id }),
    }
}

pub struct UploadSaga;

impl Saga for UploadSaga {
    type State = UploadSagaState;
    type SagaEvent = UploadSagaEvent;
    type CorrelationId = UploadId;

    fn saga_type() -> &'static str {
        "saga.upload"
    }

    fn correlate(envelope: &EventEnvelope<JsonValue>) -> Option<Self::CorrelationId> {
        (envelope.aggregate_type() == UPLOAD_AGGREGATE_TYPE)
            .then(|| UploadId::new(envelope.aggregate_id()))
    }

    fn saga_id(correlation: &Self::CorrelationId) -> AggregateId {
        AggregateId::derived(Self::saga_type(), correlation.0.as_uuid())
    }

    fn apply(state: &mut Self::State, event: &Self::SagaEvent) {
        match event {
            UploadSagaEvent::UploadSubmittedReceived { clean_first } => {
                state.phase = UploadSagaPhase::Validating;
                state.clean_first = *clean_first;
            }
            UploadSagaEvent::FileValidatedReceived => {
                state.phase = if state.clean_first {
                    UploadSagaPhase::Cleaning
                } else {
                    UploadSagaPhase::Importing
                };
            }
            UploadSagaEvent::FileNotValidatedReceived => {
                state.phase = UploadSagaPhase::NotValidated;
            }
            UploadSagaEvent::DatabaseCleanedReceived => {
                state.phase = UploadSagaPhase::Importing;
            }
            UploadSagaEvent::FileImportedReceived => {
                state.phase = UploadSagaPhase::Imported;
            }
            UploadSagaEvent::FileNotImportedReceived => {
                state.phase = UploadSagaPhase::NotImported;
            }
            // Requests record intent only.
            UploadSagaEvent::ValidationRequested
            | UploadSagaEvent::CleanRequested
            | UploadSagaEvent::ImportRequested => {}
        }
    }

    fn react(
        state: &Self::State,
        correlation: &Self::CorrelationId,
        incoming: &EventEnvelope<JsonValue>,
    ) -> Vec<SagaAction> {
        let Ok(ev) = serde_json::from_value::<UploadEvent>(incoming.payload().clone()) else {
            return vec![];
        };

        match (state.phase, ev) {
            (UploadSagaPhase::NotStarted, UploadEvent::UploadSubmitted { clean_first, .. }) => vec![
                emit(UploadSagaEvent::UploadSubmittedReceived { clean_first }),
                emit(UploadSagaEvent::ValidationRequested),
                command(VALIDATE_UPLOAD, correlation),
            ],
            (UploadSagaPhase::Validating, UploadEvent::FileValidated { .. }) => {
                if state.clean_first {
                    vec![
                        emit(UploadSagaEvent::FileValidatedReceived),
                        emit(UploadSagaEvent::CleanRequested),
                        command(CLEAN_DATABASE, correlation),
                    ]
                } else {
                    vec![
                        emit(UploadSagaEvent::FileValidatedReceived),
                        emit(UploadSagaEvent::ImportRequested),
                        command(IMPORT_UPLOAD, correlation),
                    ]
                }
            }
            (UploadSagaPhase::Validating, UploadEvent::FileNotValidated { .. }) => vec![
                emit(UploadSagaEvent::FileNotValidatedReceived),
                SagaAction::Complete,
            ],
            (UploadSagaPhase::Cleaning, UploadEvent::DatabaseCleaned { .. }) => vec![
                emit(UploadSagaEvent::DatabaseCleanedReceived),
                emit(UploadSagaEvent::ImportRequested),
                command(IMPORT_UPLOAD, correlation),
            ],
            (UploadSagaPhase::Importing, UploadEvent::FileImported { .. }) => vec![
                emit(UploadSagaEvent::FileImportedReceived),
                SagaAction::Complete,
            ],
            (
                UploadSagaPhase::Cleaning | UploadSagaPhase::Importing,
                UploadEvent::FileNotImported { .. },
            ) => vec![
                emit(UploadSagaEvent::FileNotImportedReceived),
                SagaAction::Complete,
            ],
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use babel_events::{Event, InMemoryEventBus};
    use chrono::Utc;
    use proptest::prelude::*;
    use uuid::Uuid;

    use crate::event_store::InMemoryEventStore;
    use crate::saga::{CommandExecutor, SagaRepository, SagaRunner};

    #[derive(Default, Clone)]
    struct RecordingExecutor {
        issued: Arc<Mutex<Vec<String>>>,
    }

    impl CommandExecutor for RecordingExecutor {
        type Error = String;

        fn execute(&self, _: &str, command_type: &str, payload: &JsonValue) -> Result<(), String> {
            assert!(payload.get("upload_id").is_some());
            self.issued.lock().unwrap().push(command_type.to_string());
            Ok(())
        }
    }

    type Runner = SagaRunner<
        UploadSaga,
        Arc<InMemoryEventStore>,
        Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
        RecordingExecutor,
    >;

    fn runner() -> (Runner, RecordingExecutor) {
        let exec = RecordingExecutor::default();
        let repo = SagaRepository::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
        );
        (SagaRunner::new(repo, exec.clone()), exec)
    }

    fn envelope(ev: UploadEvent, seq: u64) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            ev.upload_id().0,
            UPLOAD_AGGREGATE_TYPE,
            ev.event_type(),
            seq,
            seq,
            serde_json::to_value(&ev).unwrap(),
        )
    }

    fn submitted(upload_id: UploadId, clean_first: bool) -> UploadEvent {
        UploadEvent::UploadSubmitted {
            upload_id,
            filename: "catalog.json".to_string(),
            content: vec![],
            clean_first,
            occurred_at: Utc::now(),
        }
    }

    fn step(upload_id: UploadId, n: u8) -> UploadEvent {
        let occurred_at = Utc::now();
        match n % 5 {
            0 => UploadEvent::FileValidated { upload_id, occurred_at },
            1 => UploadEvent::FileNotValidated {
                upload_id,
                error_message: "bad".to_string(),
                occurred_at,
            },
            2 => UploadEvent::DatabaseCleaned {
                upload_id,
                deleted_terms: 1,
                occurred_at,
            },
            3 => UploadEvent::FileImported {
                upload_id,
                created_terms: 1,
                occurred_at,
            },
            _ => UploadEvent::FileNotImported {
                upload_id,
                error_message: "bad".to_string(),
                occurred_at,
            },
        }
    }

    #[test]
    fn happy_path_issues_validate_then_import() {
        let (runner, exec) = runner();
        let id = UploadId::generate();

        runner.handle(&envelope(submitted(id, false), 1)).unwrap();
        runner.handle(&envelope(step(id, 0), 2)).unwrap();
        runner.handle(&envelope(step(id, 3), 3)).unwrap();

        assert_eq!(*exec.issued.lock().unwrap(), vec![VALIDATE_UPLOAD, IMPORT_UPLOAD]);
        let (state, _) = runner.load_state(&id).unwrap();
        assert_eq!(state.phase, UploadSagaPhase::Imported);
    }

    #[test]
    fn clean_first_inserts_the_cleaning_step() {
        let (runner, exec) = runner();
        let id = UploadId::generate();

        runner.handle(&envelope(submitted(id, true), 1)).unwrap();
        runner.handle(&envelope(step(id, 0), 2)).unwrap();
        runner.handle(&envelope(step(id, 2), 3)).unwrap();

        assert_eq!(
            *exec.issued.lock().unwrap(),
            vec![VALIDATE_UPLOAD, CLEAN_DATABASE, IMPORT_UPLOAD]
        );
        assert_eq!(runner.load_state(&id).unwrap().0.phase, UploadSagaPhase::Importing);
    }

    #[test]
    fn failed_validation_ends_the_saga_without_import() {
        let (runner, exec) = runner();
        let id = UploadId::generate();

        runner.handle(&envelope(submitted(id, false), 1)).unwrap();
        runner.handle(&envelope(step(id, 1), 2)).unwrap();
        runner.handle(&envelope(step(id, 0), 3)).unwrap();

        assert_eq!(*exec.issued.lock().unwrap(), vec![VALIDATE_UPLOAD]);
        assert_eq!(runner.load_state(&id).unwrap().0.phase, UploadSagaPhase::NotValidated);
    }

    #[test]
    fn redelivered_submission_is_ignored() {
        let (runner, exec) = runner();
        let id = UploadId::generate();
        let env = envelope(submitted(id, false), 1);

        runner.handle(&env).unwrap();
        runner.handle(&env).unwrap();

        assert_eq!(exec.issued.lock().unwrap().len(), 1);
        // Received + ValidationRequested
        assert_eq!(runner.load_state(&id).unwrap().1, 2);
    }

    #[test]
    fn saga_ids_are_stable_per_upload() {
        let id = UploadId::generate();
        assert_eq!(UploadSaga::saga_id(&id), UploadSaga::saga_id(&id));
        assert_ne!(UploadSaga::saga_id(&id), id.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn at_most_one_terminal_transition(
            clean_first in any::<bool>(),
            steps in prop::collection::vec(0u8..5, 0..12),
        ) {
            let (runner, _) = runner();
            let id = UploadId::generate();
            runner.handle(&envelope(submitted(id, clean_first), 1)).unwrap();

            let mut terminal_seen = 0;
            let mut was_terminal = false;
            for (i, n) in steps.into_iter().enumerate() {
                runner.handle(&envelope(step(id, n), i as u64 + 2)).unwrap();
                let phase = runner.load_state(&id).unwrap().0.phase;
                if phase.is_terminal() && !was_terminal {
                    terminal_seen += 1;
                }
                if was_terminal {
                    // Terminal states never change.
                    prop_assert!(phase.is_terminal());
                }
                was_terminal = phase.is_terminal();
            }
            prop_assert!(terminal_seen <= 1);
        }
    }
}
