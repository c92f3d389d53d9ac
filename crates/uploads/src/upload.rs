use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use babel_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use babel_events::{Command, Event};

pub const UPLOAD_AGGREGATE_TYPE: &str = "uploads.upload";

/// Upload identifier (one event stream per submission).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(pub AggregateId);

impl UploadId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for UploadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Where a submission stands in the validate/clean/import pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPhase {
    NotSubmitted,
    Submitted,
    Validated,
    Cleaned,
    NotValidated,
    Imported,
    NotImported,
}

impl UploadPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadPhase::NotValidated | UploadPhase::Imported | UploadPhase::NotImported
        )
    }
}

/// Aggregate root: Upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    id: UploadId,
    filename: String,
    content: Vec<u8>,
    clean_first: bool,
    phase: UploadPhase,
    error_message: Option<String>,
    version: u64,
}

impl Upload {
    pub fn empty(id: UploadId) -> Self {
        Self {
            id,
            filename: String::new(),
            content: Vec::new(),
            clean_first: false,
            phase: UploadPhase::NotSubmitted,
            error_message: None,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> UploadId {
        self.id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn clean_first(&self) -> bool {
        self.clean_first
    }

    pub fn phase(&self) -> UploadPhase {
        self.phase
    }

    /// `None` until the validation step has run.
    pub fn validated(&self) -> Option<bool> {
        match self.phase {
            UploadPhase::NotSubmitted | UploadPhase::Submitted => None,
            UploadPhase::NotValidated => Some(false),
            _ => Some(true),
        }
    }

    /// `None` until the import step has run.
    pub fn imported(&self) -> Option<bool> {
        match self.phase {
            UploadPhase::Imported => Some(true),
            UploadPhase::NotImported => Some(false),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

impl AggregateRoot for Upload {
    type Id = UploadId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitUpload {
    pub upload_id: UploadId,
    pub filename: String,
    pub content: Vec<u8>,
    /// Delete every existing term before importing.
    pub clean_first: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkValidated {
    pub upload_id: UploadId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkNotValidated {
    pub upload_id: UploadId,
    pub error_message: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkCleaned {
    pub upload_id: UploadId,
    pub deleted_terms: usize,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkImported {
    pub upload_id: UploadId,
    pub created_terms: usize,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkNotImported {
    pub upload_id: UploadId,
    pub error_message: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadCommand {
    SubmitUpload(SubmitUpload),
    MarkValidated(MarkValidated),
    MarkNotValidated(MarkNotValidated),
    MarkCleaned(MarkCleaned),
    MarkImported(MarkImported),
    MarkNotImported(MarkNotImported),
}

impl UploadCommand {
    pub fn upload_id(&self) -> UploadId {
        match self {
            UploadCommand::SubmitUpload(c) => c.upload_id,
            UploadCommand::MarkValidated(c) => c.upload_id,
            UploadCommand::MarkNotValidated(c) => c.upload_id,
            UploadCommand::MarkCleaned(c) => c.upload_id,
            UploadCommand::MarkImported(c) => c.upload_id,
            UploadCommand::MarkNotImported(c) => c.upload_id,
        }
    }
}

impl Command for UploadCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        self.upload_id().0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadEvent {
    UploadSubmitted {
        upload_id: UploadId,
        filename: String,
        content: Vec<u8>,
        clean_first: bool,
        occurred_at: DateTime<Utc>,
    },
    FileValidated {
        upload_id: UploadId,
        occurred_at: DateTime<Utc>,
    },
    FileNotValidated {
        upload_id: UploadId,
        error_message: String,
        occurred_at: DateTime<Utc>,
    },
    DatabaseCleaned {
        upload_id: UploadId,
        deleted_terms: usize,
        occurred_at: DateTime<Utc>,
    },
    FileImported {
        upload_id: UploadId,
        created_terms: usize,
        occurred_at: DateTime<Utc>,
    },
    FileNotImported {
        upload_id: UploadId,
        error_message: String,
        occurred_at: DateTime<Utc>,
    },
}

impl UploadEvent {
    pub fn upload_id(&self) -> UploadId {
        match self {
            UploadEvent::UploadSubmitted { upload_id, .. }
            | UploadEvent::FileValidated { upload_id, .. }
            | UploadEvent::FileNotValidated { upload_id, .. }
            | UploadEvent::DatabaseCleaned { upload_id, .. }
            | UploadEvent::FileImported { upload_id, .. }
            | UploadEvent::FileNotImported { upload_id, .. } => *upload_id,
        }
    }
}

impl Event for UploadEvent {
    fn event_type(&self) -> &'static str {
        match self {
            UploadEvent::UploadSubmitted { .. } => "uploads.upload_submitted",
            UploadEvent::FileValidated { .. } => "uploads.file_validated",
            UploadEvent::FileNotValidated { .. } => "uploads.file_not_validated",
            UploadEvent::DatabaseCleaned { .. } => "uploads.database_cleaned",
            UploadEvent::FileImported { .. } => "uploads.file_imported",
            UploadEvent::FileNotImported { .. } => "uploads.file_not_imported",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            UploadEvent::UploadSubmitted { occurred_at, .. }
            | UploadEvent::FileValidated { occurred_at, .. }
            | UploadEvent::FileNotValidated { occurred_at, .. }
            | UploadEvent::DatabaseCleaned { occurred_at, .. }
            | UploadEvent::FileImported { occurred_at, .. }
            | UploadEvent::FileNotImported { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for Upload {
    type Command = UploadCommand;
    type Event = UploadEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            UploadEvent::UploadSubmitted {
                upload_id,
                filename,
                content,
                clean_first,
                ..
            } => {
                self.id = *upload_id;
                self.filename = filename.clone();
                self.content = content.clone();
                self.clean_first = *clean_first;
                self.phase = UploadPhase::Submitted;
            }
            UploadEvent::FileValidated { .. } => {
                self.phase = UploadPhase::Validated;
            }
            UploadEvent::FileNotValidated { error_message, .. } => {
                self.phase = UploadPhase::NotValidated;
                self.error_message = Some(error_message.clone());
            }
            UploadEvent::DatabaseCleaned { .. } => {
                self.phase = UploadPhase::Cleaned;
            }
            UploadEvent::FileImported { .. } => {
                self.phase = UploadPhase::Imported;
            }
            UploadEvent::FileNotImported { error_message, .. } => {
                self.phase = UploadPhase::NotImported;
                self.error_message = Some(error_message.clone());
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if self.id != command.upload_id() {
            return Err(DomainError::invariant("upload_id mismatch"));
        }

        match command {
            UploadCommand::SubmitUpload(cmd) => {
                if self.phase != UploadPhase::NotSubmitted {
                    return Err(DomainError::conflict(format!(
                        "upload {} already submitted",
                        cmd.upload_id
                    )));
                }
                if cmd.filename.trim().is_empty() {
                    return Err(DomainError::validation("filename cannot be empty"));
                }
                Ok(vec![UploadEvent::UploadSubmitted {
                    upload_id: cmd.upload_id,
                    filename: cmd.filename.clone(),
                    content: cmd.content.clone(),
                    clean_first: cmd.clean_first,
                    occurred_at: cmd.occurred_at,
                }])
            }
            UploadCommand::MarkValidated(cmd) => {
                self.expect_phase(&[UploadPhase::Submitted], "validation outcome")?;
                Ok(vec![UploadEvent::FileValidated {
                    upload_id: cmd.upload_id,
                    occurred_at: cmd.occurred_at,
                }])
            }
            UploadCommand::MarkNotValidated(cmd) => {
                self.expect_phase(&[UploadPhase::Submitted], "validation outcome")?;
                Ok(vec![UploadEvent::FileNotValidated {
                    upload_id: cmd.upload_id,
                    error_message: cmd.error_message.clone(),
                    occurred_at: cmd.occurred_at,
                }])
            }
            UploadCommand::MarkCleaned(cmd) => {
                if !self.clean_first {
                    return Err(DomainError::invariant(
                        "upload was not submitted with clean-first",
                    ));
                }
                self.expect_phase(&[UploadPhase::Validated], "clean outcome")?;
                Ok(vec![UploadEvent::DatabaseCleaned {
                    upload_id: cmd.upload_id,
                    deleted_terms: cmd.deleted_terms,
                    occurred_at: cmd.occurred_at,
                }])
            }
            UploadCommand::MarkImported(cmd) => {
                self.expect_phase(&[self.import_ready_phase()], "import outcome")?;
                Ok(vec![UploadEvent::FileImported {
                    upload_id: cmd.upload_id,
                    created_terms: cmd.created_terms,
                    occurred_at: cmd.occurred_at,
                }])
            }
            UploadCommand::MarkNotImported(cmd) => {
                // A failed clean also ends the upload as not imported.
                self.expect_phase(
                    &[UploadPhase::Validated, UploadPhase::Cleaned],
                    "import outcome",
                )?;
                Ok(vec![UploadEvent::FileNotImported {
                    upload_id: cmd.upload_id,
                    error_message: cmd.error_message.clone(),
                    occurred_at: cmd.occurred_at,
                }])
            }
        }
    }
}

impl Upload {
    fn import_ready_phase(&self) -> UploadPhase {
        if self.clean_first {
            UploadPhase::Cleaned
        } else {
            UploadPhase::Validated
        }
    }

    fn expect_phase(&self, allowed: &[UploadPhase], what: &str) -> Result<(), DomainError> {
        if self.phase == UploadPhase::NotSubmitted {
            return Err(DomainError::not_found());
        }
        if !allowed.contains(&self.phase) {
            return Err(DomainError::invariant(format!(
                "cannot record {what} while upload is {:?}",
                self.phase
            )));
        }
        Ok(())
    }
}
