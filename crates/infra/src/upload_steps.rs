//! The upload saga's step commands: validate, clean the database, import.
//!
//! Each step reads the submission from the upload stream and records its
//! outcome back on it; the saga picks the outcome up from the bus.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};

use babel_terms::{CreateTerm, DeleteTerm, Family, TermCommand, TermId};
use babel_uploads::{
    MarkCleaned, MarkImported, MarkNotImported, MarkNotValidated, MarkValidated,
    UPLOAD_AGGREGATE_TYPE, UploadCommand, UploadId, UploadPhase, WorkbookCodec, plan_import,
    validate,
};

use crate::catalog::Catalog;
use crate::command_dispatcher::DispatchError;
use crate::fanout::fan_out;
use crate::saga::CommandExecutor;
use crate::saga::upload::{CLEAN_DATABASE, IMPORT_UPLOAD, VALIDATE_UPLOAD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStep {
    Validate,
    Clean,
    Import,
}

impl UploadStep {
    pub fn from_command_type(command_type: &str) -> Option<Self> {
        match command_type {
            VALIDATE_UPLOAD => Some(UploadStep::Validate),
            CLEAN_DATABASE => Some(UploadStep::Clean),
            IMPORT_UPLOAD => Some(UploadStep::Import),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UploadStep::Validate => "validate",
            UploadStep::Clean => "clean",
            UploadStep::Import => "import",
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadStepError {
    #[error("unknown command `{0}`")]
    UnknownCommand(String),

    #[error("invalid command payload: {0}")]
    BadPayload(String),

    #[error("failed to start upload step: {0}")]
    Spawn(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("read models did not reach position {0} in time")]
    ReadModelLag(u64),
}

pub struct UploadProcessor {
    catalog: Arc<Catalog>,
    codec: Arc<dyn WorkbookCodec>,
    parallelism: usize,
    sync_timeout: Duration,
}

impl UploadProcessor {
    pub fn new(
        catalog: Arc<Catalog>,
        codec: Arc<dyn WorkbookCodec>,
        parallelism: usize,
        sync_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            codec,
            parallelism: parallelism.max(1),
            sync_timeout,
        }
    }

    /// Run one step. A step that fails before it can record its own outcome
    /// still ends the upload: the failure is recorded as `FileNotValidated`
    /// or `FileNotImported` carrying the error text.
    pub fn run(&self, step: UploadStep, upload_id: UploadId) -> Result<(), UploadStepError> {
        let result = match step {
            UploadStep::Validate => self.validate(upload_id),
            UploadStep::Clean => self.clean(upload_id),
            UploadStep::Import => self.import(upload_id),
        };
        let Err(err) = result else {
            return Ok(());
        };

        warn!(%upload_id, step = step.as_str(), error = %err, "upload step failed");
        let error_message = format!("{} step failed: {err}", step.as_str());
        let occurred_at = Utc::now();
        let command = match step {
            UploadStep::Validate => UploadCommand::MarkNotValidated(MarkNotValidated {
                upload_id,
                error_message,
                occurred_at,
            }),
            UploadStep::Clean | UploadStep::Import => {
                UploadCommand::MarkNotImported(MarkNotImported {
                    upload_id,
                    error_message,
                    occurred_at,
                })
            }
        };
        // Rejected when the outcome was already recorded; the step error stands.
        if let Err(record_err) = self.catalog.dispatch_upload(command) {
            warn!(%upload_id, error = %record_err, "could not record upload step failure");
            return Err(err);
        }
        Ok(())
    }

    /// Decode and check every sheet; records `FileValidated` or
    /// `FileNotValidated` with one line per problem.
    pub fn validate(&self, upload_id: UploadId) -> Result<(), UploadStepError> {
        let upload = self.catalog.load_upload(upload_id)?;
        if upload.phase() != UploadPhase::Submitted {
            // Redelivered step command.
            return Ok(());
        }

        let outcome = self
            .codec
            .decode(upload.content())
            .and_then(|wb| validate(&wb));
        let command = match outcome {
            Ok(()) => UploadCommand::MarkValidated(MarkValidated {
                upload_id,
                occurred_at: Utc::now(),
            }),
            Err(e) => {
                info!(%upload_id, error = %e, "upload rejected");
                UploadCommand::MarkNotValidated(MarkNotValidated {
                    upload_id,
                    error_message: e.to_string(),
                    occurred_at: Utc::now(),
                })
            }
        };
        self.catalog.dispatch_upload(command)?;
        Ok(())
    }

    /// Delete every active term of every family, then wait until the
    /// lookups have caught up so the import does not trip over old names.
    pub fn clean(&self, upload_id: UploadId) -> Result<(), UploadStepError> {
        let upload = self.catalog.load_upload(upload_id)?;
        if upload.phase() != UploadPhase::Validated {
            return Ok(());
        }
        self.sync_read_side()?;

        let targets: Vec<(Family, TermId)> = Family::ALL
            .into_iter()
            .flat_map(|family| {
                self.catalog
                    .query(family)
                    .list_all()
                    .into_iter()
                    .map(move |r| (family, r.term_id))
            })
            .collect();

        let results = fan_out(targets, self.parallelism, |(family, term_id)| {
            self.catalog.dispatch_term(
                family,
                TermCommand::DeleteTerm(DeleteTerm {
                    term_id,
                    occurred_at: Utc::now(),
                }),
            )
        });
        let deleted_terms = results.iter().filter(|r| r.is_ok()).count();
        let mut failures: Vec<String> = results
            .into_iter()
            .filter_map(|r| r.err().map(|e| e.to_string()))
            .collect();

        if failures.is_empty() {
            if let Err(e) = self.sync_read_side() {
                failures.push(e.to_string());
            }
        }

        let command = if failures.is_empty() {
            info!(%upload_id, deleted_terms, "database cleaned");
            UploadCommand::MarkCleaned(MarkCleaned {
                upload_id,
                deleted_terms,
                occurred_at: Utc::now(),
            })
        } else {
            UploadCommand::MarkNotImported(MarkNotImported {
                upload_id,
                error_message: failures.join("\n"),
                occurred_at: Utc::now(),
            })
        };
        self.catalog.dispatch_upload(command)?;
        Ok(())
    }

    /// Create one term per distinct dotted name, all in parallel. Terms that
    /// were created stay when others fail.
    pub fn import(&self, upload_id: UploadId) -> Result<(), UploadStepError> {
        let upload = self.catalog.load_upload(upload_id)?;
        let ready = if upload.clean_first() {
            UploadPhase::Cleaned
        } else {
            UploadPhase::Validated
        };
        if upload.phase() != ready {
            return Ok(());
        }
        self.sync_read_side()?;

        let plan = self
            .codec
            .decode(upload.content())
            .and_then(|wb| plan_import(&wb));
        let outcome = match plan {
            Ok(terms) => {
                let results = fan_out(terms, self.parallelism, |term| {
                    let name = term.name.clone();
                    self.catalog
                        .dispatch_term(
                            term.family,
                            TermCommand::CreateTerm(CreateTerm {
                                term_id: TermId::generate(),
                                family: term.family,
                                name: term.name,
                                category: term.category,
                                translations: term.translations,
                                occurred_at: Utc::now(),
                            }),
                        )
                        .map_err(|e| format!("{name}: {e}"))
                });
                let created = results.iter().filter(|r| r.is_ok()).count();
                let failures: Vec<String> = results.into_iter().filter_map(Result::err).collect();
                if failures.is_empty() {
                    Ok(created)
                } else {
                    Err(failures.join("\n"))
                }
            }
            Err(e) => Err(e.to_string()),
        };

        let command = match outcome {
            Ok(created_terms) => {
                info!(%upload_id, created_terms, "upload imported");
                UploadCommand::MarkImported(MarkImported {
                    upload_id,
                    created_terms,
                    occurred_at: Utc::now(),
                })
            }
            Err(error_message) => {
                warn!(%upload_id, error = %error_message, "upload import failed");
                UploadCommand::MarkNotImported(MarkNotImported {
                    upload_id,
                    error_message,
                    occurred_at: Utc::now(),
                })
            }
        };
        self.catalog.dispatch_upload(command)?;
        Ok(())
    }

    fn sync_read_side(&self) -> Result<(), UploadStepError> {
        let head = self
            .catalog
            .dispatcher()
            .store()
            .head_position()
            .map_err(DispatchError::from)?;
        if self.catalog.wait_for_families(head, self.sync_timeout) {
            Ok(())
        } else {
            Err(UploadStepError::ReadModelLag(head))
        }
    }
}

/// Runs step commands on their own thread so the saga group keeps draining.
pub struct UploadStepExecutor {
    processor: Arc<UploadProcessor>,
}

impl UploadStepExecutor {
    pub fn new(processor: Arc<UploadProcessor>) -> Self {
        Self { processor }
    }
}

impl CommandExecutor for UploadStepExecutor {
    type Error = UploadStepError;

    fn execute(
        &self,
        aggregate_type: &str,
        command_type: &str,
        payload: &JsonValue,
    ) -> Result<(), Self::Error> {
        let step = UploadStep::from_command_type(command_type)
            .filter(|_| aggregate_type == UPLOAD_AGGREGATE_TYPE)
            .ok_or_else(|| UploadStepError::UnknownCommand(command_type.to_string()))?;
        let upload_id: UploadId = payload
            .get("upload_id")
            .cloned()
            .ok_or_else(|| UploadStepError::BadPayload("missing upload_id".to_string()))
            .and_then(|v| {
                serde_json::from_value(v).map_err(|e| UploadStepError::BadPayload(e.to_string()))
            })?;

        let processor = self.processor.clone();
        thread::Builder::new()
            .name(format!("upload-{}", step.as_str()))
            .spawn(move || {
                if let Err(err) = processor.run(step, upload_id) {
                    warn!(%upload_id, step = step.as_str(), error = %err, "upload left unfinished");
                }
            })
            .map_err(|e| UploadStepError::Spawn(e.to_string()))?;
        Ok(())
    }
}
