//! Process wiring: store, bus, read side, processing groups and the upload saga.
//!
//! Startup order matters:
//! 1) replay the existing log into every projection
//! 2) move every group's watermark to the head
//! 3) start the groups, which only see events published from now on

use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::info;

use babel_events::{EventEnvelope, InMemoryEventBus};
use babel_terms::Family;
use babel_uploads::{
    JsonWorkbookCodec, SubmitUpload, UPLOAD_AGGREGATE_TYPE, UploadCommand, UploadId,
    WorkbookCodec,
};

use crate::catalog::{Catalog, FamilyViews, SharedBus, SharedStore};
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::config::CatalogConfig;
use crate::event_store::{EventStore, EventStoreError, InMemoryEventStore};
use crate::notify::{BootstrapGate, ChangeNotifier, NotificationProjection, TracingNotifier};
use crate::projections::terms::TermQueryProjection;
use crate::projections::uploads::UploadStatusProjection;
use crate::read_model::InMemoryReadStore;
use crate::replay::{ReplayError, ReplayHandle, replay, replay_projection};
use crate::saga::upload::UploadSaga;
use crate::saga::{SagaRepository, SagaRunner};
use crate::upload_steps::{UploadProcessor, UploadStepExecutor};
use crate::workers::{ProjectionWorker, RouteFilter, WorkerHandle};

pub const UPLOAD_GROUP: &str = "upload-group";
pub const UPLOAD_SAGA_GROUP: &str = "upload-saga";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error("startup replay failed: {0}")]
    Replay(#[from] ReplayError),

    #[error("failed to start processing group `{group}`: {source}")]
    Spawn {
        group: &'static str,
        #[source]
        source: io::Error,
    },
}

/// External collaborators the runtime is built around.
pub struct RuntimeParts {
    pub store: Arc<InMemoryEventStore>,
    pub notifier: Arc<dyn ChangeNotifier>,
    pub codec: Arc<dyn WorkbookCodec>,
}

impl Default for RuntimeParts {
    fn default() -> Self {
        Self {
            store: Arc::new(InMemoryEventStore::new()),
            notifier: Arc::new(TracingNotifier),
            codec: Arc::new(JsonWorkbookCodec),
        }
    }
}

pub struct CatalogRuntime {
    config: CatalogConfig,
    store: Arc<InMemoryEventStore>,
    catalog: Arc<Catalog>,
    codec: Arc<dyn WorkbookCodec>,
    gate: Arc<BootstrapGate>,
    workers: Vec<WorkerHandle>,
}

impl CatalogRuntime {
    pub async fn start(config: CatalogConfig, parts: RuntimeParts) -> Result<Self, RuntimeError> {
        let RuntimeParts {
            store,
            notifier,
            codec,
        } = parts;

        let shared_store: SharedStore = store.clone();
        let bus: SharedBus = Arc::new(InMemoryEventBus::new());
        let gate = Arc::new(BootstrapGate::new());

        let families = Family::ALL.map(|family| {
            let query = Arc::new(TermQueryProjection::new(
                family,
                InMemoryReadStore::new(),
                config.live_channel_capacity,
            ));
            let notifications = Arc::new(NotificationProjection::new(
                family,
                notifier.clone(),
                gate.clone(),
                config.notifications_enabled,
            ));
            FamilyViews::new(family, query, notifications)
        });
        let uploads = Arc::new(UploadStatusProjection::in_memory());
        let catalog = Arc::new(Catalog::new(
            CommandDispatcher::new(shared_store.clone(), bus.clone()),
            families,
            uploads.clone(),
        ));

        let head = catch_up(&store, &catalog, uploads).await?;

        let mut runtime = Self {
            config,
            store,
            catalog,
            codec,
            gate,
            workers: Vec::with_capacity(Family::ALL.len() + 2),
        };
        runtime.spawn_groups(shared_store, bus)?;

        info!(head, groups = runtime.workers.len(), "catalog runtime started");
        Ok(runtime)
    }

    /// In-memory store, tracing notifier and JSON workbooks.
    pub async fn in_memory(config: CatalogConfig) -> Result<Self, RuntimeError> {
        Self::start(config, RuntimeParts::default()).await
    }

    fn spawn_groups(&mut self, store: SharedStore, bus: SharedBus) -> Result<(), RuntimeError> {
        for views in self.catalog.all_views() {
            let group = views.family.processing_group();
            let handler_views = views.clone();
            let handle = ProjectionWorker::spawn(
                group,
                bus.as_ref(),
                RouteFilter::only([views.family.aggregate_type()]),
                Some(views.tracker.clone()),
                move |env: EventEnvelope<JsonValue>| handler_views.apply(&env),
            )
            .map_err(|source| RuntimeError::Spawn { group, source })?;
            self.workers.push(handle);
        }

        let catalog = self.catalog.clone();
        let handle = ProjectionWorker::spawn(
            UPLOAD_GROUP,
            bus.as_ref(),
            RouteFilter::only([UPLOAD_AGGREGATE_TYPE]),
            Some(self.catalog.upload_tracker().clone()),
            move |env: EventEnvelope<JsonValue>| catalog.uploads().apply_envelope(&env),
        )
        .map_err(|source| RuntimeError::Spawn {
            group: UPLOAD_GROUP,
            source,
        })?;
        self.workers.push(handle);

        let processor = Arc::new(UploadProcessor::new(
            self.catalog.clone(),
            self.codec.clone(),
            self.config.import_parallelism,
            self.config.sync_timeout,
        ));
        let runner: SagaRunner<UploadSaga, SharedStore, SharedBus, UploadStepExecutor> =
            SagaRunner::new(
                SagaRepository::new(store, bus.clone()),
                UploadStepExecutor::new(processor),
            );
        let handle = ProjectionWorker::spawn(
            UPLOAD_SAGA_GROUP,
            bus.as_ref(),
            RouteFilter::only([UPLOAD_AGGREGATE_TYPE]),
            Some(self.catalog.saga_tracker().clone()),
            move |env: EventEnvelope<JsonValue>| runner.handle(&env),
        )
        .map_err(|source| RuntimeError::Spawn {
            group: UPLOAD_SAGA_GROUP,
            source,
        })?;
        self.workers.push(handle);

        Ok(())
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<InMemoryEventStore> {
        &self.store
    }

    pub fn codec(&self) -> &Arc<dyn WorkbookCodec> {
        &self.codec
    }

    pub fn bootstrap_gate(&self) -> &Arc<BootstrapGate> {
        &self.gate
    }

    /// Submit a workbook; the saga takes it from here. `clean_first` falls
    /// back to the configured default.
    pub fn submit_upload(
        &self,
        filename: impl Into<String>,
        content: Vec<u8>,
        clean_first: Option<bool>,
    ) -> Result<UploadId, DispatchError> {
        let upload_id = UploadId::generate();
        self.catalog
            .dispatch_upload(UploadCommand::SubmitUpload(SubmitUpload {
                upload_id,
                filename: filename.into(),
                content,
                clean_first: clean_first.unwrap_or(self.config.clean_before_import),
                occurred_at: Utc::now(),
            }))?;
        info!(%upload_id, "upload submitted");
        Ok(upload_id)
    }

    /// Block until the upload reaches a final state, polling its status row.
    pub fn wait_for_upload(&self, upload_id: UploadId, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let finished = self
                .catalog
                .uploads()
                .upload_status(&upload_id)
                .is_some_and(|s| s.is_finished());
            if finished {
                return true;
            }
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    pub fn wait_until_idle(&self, timeout: Duration) -> Result<bool, DispatchError> {
        self.catalog.wait_until_idle(timeout)
    }

    /// Rebuild one family's read side from the log.
    ///
    /// The group keeps applying live events meanwhile, so callers should
    /// quiesce writes for the family first.
    pub fn reset_family(&self, family: Family) -> ReplayHandle {
        replay_family(&self.store, self.catalog.views(family))
    }

    /// Stop every processing group and wait for them to exit.
    pub fn shutdown(mut self) {
        self.stop_workers();
    }

    fn stop_workers(&mut self) {
        for worker in self.workers.drain(..) {
            let name = worker.name().to_string();
            worker.shutdown();
            info!(group = %name, "processing group stopped");
        }
    }
}

impl Drop for CatalogRuntime {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

fn replay_family(store: &Arc<InMemoryEventStore>, views: &FamilyViews) -> ReplayHandle {
    let apply = views.clone();
    let reset = views.clone();
    replay_projection(
        store.clone(),
        views.family.processing_group(),
        vec![views.family.aggregate_type().to_string()],
        Arc::new(move |env: &EventEnvelope<JsonValue>| apply.apply(env)),
        Arc::new(move || reset.reset()),
    )
}

/// Replay the log into every projection, then mark every group at the head.
async fn catch_up(
    store: &Arc<InMemoryEventStore>,
    catalog: &Catalog,
    uploads: Arc<UploadStatusProjection>,
) -> Result<u64, RuntimeError> {
    let head = store.head_position()?;

    let mut handles: Vec<ReplayHandle> = catalog
        .all_views()
        .iter()
        .map(|views| replay_family(store, views))
        .collect();
    handles.push(replay(store.clone(), uploads));

    for handle in handles {
        let progress = handle.wait_for_completion().await?;
        info!(
            projection = %progress.projection,
            events = progress.processed_events,
            "projection caught up"
        );
    }

    for views in catalog.all_views() {
        views.tracker.advance_to(head);
    }
    catalog.upload_tracker().advance_to(head);
    // Saga instances rehydrate from their own streams on the next event.
    catalog.saga_tracker().advance_to(head);

    Ok(head)
}
