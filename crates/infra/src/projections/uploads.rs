//! Upload status read model: what a submitter polls after handing in a file.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use babel_events::{EventEnvelope, Projection};
use babel_uploads::{UPLOAD_AGGREGATE_TYPE, UploadEvent, UploadId, UploadPhase};

use crate::projections::cursor::{SequenceGap, StreamCursors};
use crate::read_model::{InMemoryReadStore, ReadStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStatus {
    pub upload_id: UploadId,
    pub filename: String,
    pub phase: UploadPhase,
    /// `None` until the validation step has run.
    pub validated: Option<bool>,
    /// `None` until the import step has run.
    pub imported: Option<bool>,
    pub error_message: Option<String>,
    pub deleted_terms: Option<usize>,
    pub created_terms: Option<usize>,
}

impl UploadStatus {
    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }
}

#[derive(Debug, Error)]
pub enum UploadStatusProjectionError {
    #[error("failed to deserialize upload event: {0}")]
    Deserialize(String),

    #[error("event for unknown upload {0}")]
    UnknownUpload(UploadId),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

impl From<SequenceGap> for UploadStatusProjectionError {
    fn from(gap: SequenceGap) -> Self {
        Self::NonMonotonicSequence {
            last: gap.last,
            found: gap.found,
        }
    }
}

#[derive(Debug)]
pub struct UploadStatusProjection<S = InMemoryReadStore<UploadId, UploadStatus>>
where
    S: ReadStore<UploadId, UploadStatus>,
{
    store: S,
    cursors: StreamCursors,
}

impl UploadStatusProjection {
    pub fn in_memory() -> Self {
        Self::new(InMemoryReadStore::new())
    }
}

impl<S> UploadStatusProjection<S>
where
    S: ReadStore<UploadId, UploadStatus>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn upload_status(&self, upload_id: &UploadId) -> Option<UploadStatus> {
        self.store.get(upload_id)
    }

    pub fn list(&self) -> Vec<UploadStatus> {
        self.store.list()
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), UploadStatusProjectionError> {
        if envelope.aggregate_type() != UPLOAD_AGGREGATE_TYPE {
            return Ok(());
        }
        self.cursors.apply_in_order(envelope, |env| self.apply_event(env))
    }

    fn apply_event(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), UploadStatusProjectionError> {
        let ev: UploadEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| UploadStatusProjectionError::Deserialize(e.to_string()))?;
        let upload_id = ev.upload_id();

        let status = match ev {
            UploadEvent::UploadSubmitted { filename, .. } => UploadStatus {
                upload_id,
                filename,
                phase: UploadPhase::Submitted,
                validated: None,
                imported: None,
                error_message: None,
                deleted_terms: None,
                created_terms: None,
            },
            other => {
                let mut status = self
                    .store
                    .get(&upload_id)
                    .ok_or(UploadStatusProjectionError::UnknownUpload(upload_id))?;
                match other {
                    UploadEvent::UploadSubmitted { .. } => {}
                    UploadEvent::FileValidated { .. } => {
                        status.phase = UploadPhase::Validated;
                        status.validated = Some(true);
                    }
                    UploadEvent::FileNotValidated { error_message, .. } => {
                        status.phase = UploadPhase::NotValidated;
                        status.validated = Some(false);
                        status.error_message = Some(error_message);
                    }
                    UploadEvent::DatabaseCleaned { deleted_terms, .. } => {
                        status.phase = UploadPhase::Cleaned;
                        status.deleted_terms = Some(deleted_terms);
                    }
                    UploadEvent::FileImported { created_terms, .. } => {
                        status.phase = UploadPhase::Imported;
                        status.imported = Some(true);
                        status.created_terms = Some(created_terms);
                    }
                    UploadEvent::FileNotImported { error_message, .. } => {
                        status.phase = UploadPhase::NotImported;
                        status.imported = Some(false);
                        status.error_message = Some(error_message);
                    }
                }
                status
            }
        };

        self.store.upsert(upload_id, status);
        Ok(())
    }

    pub fn reset(&self) {
        self.store.clear();
        self.cursors.clear();
    }
}

impl<S> Projection for UploadStatusProjection<S>
where
    S: ReadStore<UploadId, UploadStatus>,
{
    type Error = UploadStatusProjectionError;

    fn name(&self) -> &str {
        "uploads.status"
    }

    fn aggregate_types(&self) -> Vec<String> {
        vec![UPLOAD_AGGREGATE_TYPE.to_string()]
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
        UploadStatusProjection::apply_envelope(self, envelope)
    }

    fn reset(&self) {
        UploadStatusProjection::reset(self)
    }
}
