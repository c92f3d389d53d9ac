//! One-time import of the configured catalog file.
//!
//! Completion is recorded as a marker event on a well-known stream, appended
//! with `Exact(0)`: whoever appends first owns the bootstrap and every later
//! start skips it. Change notifications are held back until this returns.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use babel_core::{AggregateId, ExpectedVersion};
use babel_events::EventBus;
use babel_infra::CatalogRuntime;
use babel_infra::command_dispatcher::DispatchError;
use babel_infra::event_store::{EventStore, EventStoreError, UncommittedEvent};
use babel_uploads::{UploadId, UploadPhase};

pub const BOOTSTRAP_STREAM: &str = "system.bootstrap";
pub const BOOTSTRAP_COMPLETED: &str = "system.bootstrap.completed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The marker was already there.
    AlreadyDone,
    Disabled,
    Imported { upload_id: UploadId, phase: UploadPhase },
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("bootstrap is enabled but no file is configured")]
    MissingFile,

    #[error("cannot read bootstrap file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error("failed to publish bootstrap marker: {0}")]
    Publish(String),

    #[error("bootstrap upload {0} did not finish in time")]
    Timeout(UploadId),
}

pub fn marker_id() -> AggregateId {
    AggregateId::derived(BOOTSTRAP_STREAM, &Uuid::nil())
}

/// Run the bootstrap import if it is enabled and has not run yet, then open
/// the notification gate.
pub fn run(
    runtime: &CatalogRuntime,
    timeout: Duration,
) -> Result<BootstrapOutcome, BootstrapError> {
    let outcome = import_once(runtime, timeout)?;
    runtime.bootstrap_gate().open();
    Ok(outcome)
}

fn import_once(
    runtime: &CatalogRuntime,
    timeout: Duration,
) -> Result<BootstrapOutcome, BootstrapError> {
    let store = runtime.catalog().dispatcher().store();
    if !store.load_stream(marker_id())?.is_empty() {
        info!("bootstrap already done");
        return Ok(BootstrapOutcome::AlreadyDone);
    }

    let config = runtime.config();
    if !config.bootstrap_enabled {
        return Ok(BootstrapOutcome::Disabled);
    }
    let path = config
        .bootstrap_file
        .as_deref()
        .ok_or(BootstrapError::MissingFile)?;
    let content = std::fs::read(path).map_err(|source| BootstrapError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let upload_id = runtime.submit_upload(file_name(path), content, None)?;
    if !runtime.wait_for_upload(upload_id, timeout) {
        return Err(BootstrapError::Timeout(upload_id));
    }
    runtime.wait_until_idle(timeout)?;

    let phase = runtime
        .catalog()
        .uploads()
        .upload_status(&upload_id)
        .map(|s| s.phase)
        .unwrap_or(UploadPhase::NotSubmitted);
    if phase != UploadPhase::Imported {
        warn!(%upload_id, ?phase, "bootstrap upload did not import");
    }

    let marker = UncommittedEvent::from_json(
        marker_id(),
        BOOTSTRAP_STREAM,
        BOOTSTRAP_COMPLETED,
        json!({ "upload_id": upload_id, "phase": phase }),
    );
    let stored = match store.append(vec![marker], ExpectedVersion::Exact(0)) {
        Ok(stored) => stored,
        Err(EventStoreError::Concurrency(_)) => return Ok(BootstrapOutcome::AlreadyDone),
        Err(e) => return Err(e.into()),
    };
    let bus = runtime.catalog().dispatcher().bus();
    for ev in &stored {
        bus.publish(ev.to_envelope())
            .map_err(|e| BootstrapError::Publish(format!("{e:?}")))?;
    }

    info!(%upload_id, ?phase, "bootstrap import finished");
    Ok(BootstrapOutcome::Imported { upload_id, phase })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bootstrap".to_string())
}
