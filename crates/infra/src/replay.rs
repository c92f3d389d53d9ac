//! Projection replay: rebuild a read model from the global event log.
//!
//! A replay resets the projection, then pages through the log in global
//! order and applies every envelope of the projection's aggregate types. It
//! runs on the tokio runtime and reports progress through a handle that can
//! also cancel it.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use babel_events::{EventEnvelope, Projection};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::event_store::{EventFilter, EventQuery, EventStoreError, Pagination};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("projection error: {0}")]
    Projection(String),

    #[error("replay cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ReplayProgress {
    pub projection: String,
    /// Matching events in the log when the replay started.
    pub total_events: u64,
    pub processed_events: u64,
    /// Global position of the last applied event.
    pub position: u64,
    pub phase: ReplayPhase,
    pub is_complete: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPhase {
    Clearing,
    Replaying,
    Complete,
    /// Failed or cancelled.
    Failed,
}

/// Handle for monitoring and controlling a replay operation.
#[derive(Clone)]
pub struct ReplayHandle {
    progress: Arc<RwLock<ReplayProgress>>,
    cancellation: Arc<AtomicBool>,
}

impl ReplayHandle {
    pub async fn progress(&self) -> ReplayProgress {
        self.progress.read().await.clone()
    }

    pub fn cancel(&self) {
        self.cancellation.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.load(Ordering::Relaxed)
    }

    /// Wait for the replay to finish, successfully or not.
    pub async fn wait_for_completion(&self) -> Result<ReplayProgress, ReplayError> {
        loop {
            let progress = self.progress.read().await.clone();
            if progress.is_complete {
                return match progress.phase {
                    ReplayPhase::Complete => Ok(progress),
                    _ if self.is_cancelled() => Err(ReplayError::Cancelled),
                    _ => Err(ReplayError::Projection(
                        progress.error.unwrap_or_else(|| "replay failed".to_string()),
                    )),
                };
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        }
    }
}

pub type ApplyEnvelopeFn =
    Arc<dyn Fn(&EventEnvelope<JsonValue>) -> Result<(), String> + Send + Sync>;

pub type ResetFn = Arc<dyn Fn() + Send + Sync>;

const PAGE_SIZE: u32 = 500;

/// Start replaying `aggregate_types` through `apply_envelope` after `reset`.
pub fn replay_projection<Q>(
    event_query: Arc<Q>,
    name: impl Into<String>,
    aggregate_types: Vec<String>,
    apply_envelope: ApplyEnvelopeFn,
    reset: ResetFn,
) -> ReplayHandle
where
    Q: EventQuery + 'static,
{
    let progress = Arc::new(RwLock::new(ReplayProgress {
        projection: name.into(),
        total_events: 0,
        processed_events: 0,
        position: 0,
        phase: ReplayPhase::Clearing,
        is_complete: false,
        error: None,
    }));
    let cancellation = Arc::new(AtomicBool::new(false));

    let handle = ReplayHandle {
        progress: progress.clone(),
        cancellation: cancellation.clone(),
    };

    tokio::spawn(async move {
        let result = run_replay(
            event_query,
            aggregate_types,
            apply_envelope,
            reset,
            progress.clone(),
            cancellation,
        )
        .await;

        let mut prog = progress.write().await;
        prog.is_complete = true;
        match result {
            Ok(()) => {
                prog.phase = ReplayPhase::Complete;
                info!(
                    projection = %prog.projection,
                    events = prog.processed_events,
                    "projection replay complete"
                );
            }
            Err(e) => {
                prog.phase = ReplayPhase::Failed;
                prog.error = Some(match &e {
                    ReplayError::Projection(msg) => msg.clone(),
                    other => other.to_string(),
                });
                warn!(projection = %prog.projection, error = %e, "projection replay failed");
            }
        }
    });

    handle
}

/// Replay any [`Projection`] using its own name, types and reset.
pub fn replay<Q, P>(event_query: Arc<Q>, projection: Arc<P>) -> ReplayHandle
where
    Q: EventQuery + 'static,
    P: Projection + 'static,
{
    let apply = projection.clone();
    let reset = projection.clone();
    replay_projection(
        event_query,
        projection.name().to_string(),
        projection.aggregate_types(),
        Arc::new(move |env: &EventEnvelope<JsonValue>| {
            apply.apply_envelope(env).map_err(|e| e.to_string())
        }),
        Arc::new(move || reset.reset()),
    )
}

async fn run_replay<Q>(
    event_query: Arc<Q>,
    aggregate_types: Vec<String>,
    apply_envelope: ApplyEnvelopeFn,
    reset: ResetFn,
    progress: Arc<RwLock<ReplayProgress>>,
    cancellation: Arc<AtomicBool>,
) -> Result<(), ReplayError>
where
    Q: EventQuery,
{
    let cancelled = || cancellation.load(Ordering::Relaxed);

    reset();
    if cancelled() {
        return Err(ReplayError::Cancelled);
    }
    progress.write().await.phase = ReplayPhase::Replaying;

    let mut after = 0u64;
    let mut processed = 0u64;
    loop {
        if cancelled() {
            return Err(ReplayError::Cancelled);
        }

        let filter = EventFilter {
            aggregate_types: aggregate_types.clone(),
            after_position: Some(after),
            ..Default::default()
        };
        // Keyset paging: the offset stays 0 and `after_position` moves.
        let page = event_query
            .query_events(filter, Pagination::new(Some(PAGE_SIZE), Some(0)))
            .await?;

        if processed == 0 {
            progress.write().await.total_events = page.total;
        }

        for event in &page.events {
            if cancelled() {
                return Err(ReplayError::Cancelled);
            }
            apply_envelope(&event.to_envelope()).map_err(ReplayError::Projection)?;
            processed += 1;
            after = event.global_position;
        }

        {
            let mut prog = progress.write().await;
            prog.processed_events = processed;
            prog.position = after;
        }

        if !page.has_more || page.events.is_empty() {
            break;
        }
    }

    Ok(())
}
