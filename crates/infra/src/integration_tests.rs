//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: Command → EventStore → EventBus → processing groups → read models,
//! and Submit → Validate → (Clean →) Import through the upload saga.
//!
//! Verifies:
//! - Read models and the uniqueness guard catch up with the log
//! - Uploads end in exactly one terminal state with a readable report
//! - A restarted runtime rebuilds its read side from the store

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;
    use tokio_stream::StreamExt;

    use babel_core::{AggregateId, ExpectedVersion};
    use babel_events::{EventEnvelope, InMemoryEventBus};

    use babel_terms::{
        CreateTerm, DeleteTerm, Family, TermCommand, TermId, TranslationDraft, UpdateTerm,
    };
    use babel_uploads::{JsonWorkbookCodec, Row, Sheet, UploadPhase, Workbook, WorkbookCodec};

    use crate::catalog::{Catalog, FamilyViews, SharedStore};
    use crate::command_dispatcher::{CommandDispatcher, DispatchError};
    use crate::config::CatalogConfig;
    use crate::event_store::{EventStore, InMemoryEventStore, UncommittedEvent};
    use crate::live::{self, LiveQuery, LiveSnapshot};
    use crate::notify::{
        BootstrapGate, ChangeKind, ChannelNotifier, NotificationProjection, TracingNotifier,
    };
    use crate::projections::terms::{TermQueryProjection, TermUpdate};
    use crate::projections::uploads::UploadStatusProjection;
    use crate::runtime::{CatalogRuntime, RuntimeParts};

    const WAIT: Duration = Duration::from_secs(5);

    fn config() -> CatalogConfig {
        CatalogConfig {
            import_parallelism: 4,
            sync_timeout: WAIT,
            ..CatalogConfig::default()
        }
    }

    fn header() -> Row {
        Row::from_values([
            "Cat", "Name0", "Name1", "Name2", "Name3", "Name4", "Language", "Value", "Tooltip",
        ])
    }

    fn row(name0: &str, name1: &str, lang: &str, value: &str) -> Row {
        Row::from_values(["ui", name0, name1, "", "", "", lang, value, ""])
    }

    fn workbook(labels: Vec<Row>, actions: Vec<Row>, messages: Vec<Row>) -> Vec<u8> {
        let sheet = |name: &str, rows: Vec<Row>| {
            let mut all = vec![header()];
            all.extend(rows);
            Sheet::new(name, all)
        };
        JsonWorkbookCodec
            .encode(&Workbook::new(vec![
                sheet("Labels", labels),
                sheet("Actions", actions),
                sheet("Messages", messages),
            ]))
            .unwrap()
    }

    fn create(family: Family, name: &str, translations: Vec<TranslationDraft>) -> TermCommand {
        TermCommand::CreateTerm(CreateTerm {
            term_id: TermId::generate(),
            family,
            name: name.to_string(),
            category: None,
            translations,
            occurred_at: Utc::now(),
        })
    }

    /// A catalog with no processing groups: its read side only moves when a
    /// test feeds it envelopes.
    fn detached_catalog() -> (Arc<InMemoryEventStore>, Catalog) {
        let store = Arc::new(InMemoryEventStore::new());
        let shared: SharedStore = store.clone();
        let gate = Arc::new(BootstrapGate::new());
        let families = Family::ALL.map(|family| {
            let notifications =
                NotificationProjection::new(family, Arc::new(TracingNotifier), gate.clone(), false);
            FamilyViews::new(
                family,
                Arc::new(TermQueryProjection::in_memory(family)),
                Arc::new(notifications),
            )
        });
        let catalog = Catalog::new(
            CommandDispatcher::new(shared, Arc::new(InMemoryEventBus::new())),
            families,
            Arc::new(UploadStatusProjection::in_memory()),
        );
        (store, catalog)
    }

    fn rename(term_id: TermId, name: &str) -> TermCommand {
        TermCommand::UpdateTerm(UpdateTerm {
            term_id,
            name: Some(name.to_string()),
            category: None,
            translations: vec![],
            occurred_at: Utc::now(),
        })
    }

    fn idle(runtime: &CatalogRuntime) {
        assert!(runtime.wait_until_idle(WAIT).unwrap(), "processing groups did not catch up");
    }

    #[tokio::test]
    async fn upload_imports_terms_with_their_translations() {
        let runtime = CatalogRuntime::in_memory(config()).await.unwrap();

        let upload_id = runtime
            .submit_upload(
                "catalog.json",
                workbook(
                    vec![row("btn", "save", "eng", "Save")],
                    vec![row("file", "open", "eng", "Open"), row("file", "open", "deu", "Öffnen")],
                    vec![],
                ),
                None,
            )
            .unwrap();
        assert!(runtime.wait_for_upload(upload_id, WAIT));
        idle(&runtime);

        let status = runtime.catalog().uploads().upload_status(&upload_id).unwrap();
        assert_eq!(status.phase, UploadPhase::Imported);
        assert_eq!(status.validated, Some(true));
        assert_eq!(status.imported, Some(true));
        assert_eq!(status.created_terms, Some(2));

        let label = runtime.catalog().query(Family::Label).get_by_name("btn.save").unwrap();
        assert!(label.translated);
        assert_eq!(label.translations.len(), 1);
        assert_eq!(label.translation("eng").unwrap().value, "Save");

        let action = runtime.catalog().query(Family::Action).get_by_name("file.open").unwrap();
        assert_eq!(action.translations.len(), 2);
        assert_eq!(action.translation("deu").unwrap().value, "Öffnen");
    }

    #[tokio::test]
    async fn row_without_language_rejects_the_upload() {
        let runtime = CatalogRuntime::in_memory(config()).await.unwrap();

        let upload_id = runtime
            .submit_upload(
                "broken.json",
                workbook(
                    vec![],
                    vec![row("file", "open", "eng", "Open"), row("file", "close", "", "Close")],
                    vec![],
                ),
                None,
            )
            .unwrap();
        assert!(runtime.wait_for_upload(upload_id, WAIT));
        idle(&runtime);

        let status = runtime.catalog().uploads().upload_status(&upload_id).unwrap();
        assert_eq!(status.phase, UploadPhase::NotValidated);
        assert_eq!(status.validated, Some(false));
        assert_eq!(status.imported, None);
        let message = status.error_message.unwrap();
        assert!(message.contains("line 3"), "unexpected report: {message}");
        assert!(runtime.catalog().query(Family::Action).list_all().is_empty());
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected_once_the_lookup_caught_up() {
        let runtime = CatalogRuntime::in_memory(config()).await.unwrap();
        let catalog = runtime.catalog();

        catalog
            .dispatch_term(Family::Label, create(Family::Label, "dup", vec![]))
            .unwrap();
        idle(&runtime);

        let err = catalog
            .dispatch_term(Family::Label, create(Family::Label, "dup", vec![]))
            .unwrap_err();
        match err {
            DispatchError::DuplicateName(_) => {}
            _ => panic!("Expected DuplicateName error"),
        }

        // Names are unique per family only.
        catalog
            .dispatch_term(Family::Action, create(Family::Action, "dup", vec![]))
            .unwrap();
    }

    #[tokio::test]
    async fn deleting_twice_is_a_no_op_and_frees_the_name() {
        let runtime = CatalogRuntime::in_memory(config()).await.unwrap();
        let catalog = runtime.catalog();

        let term_id = TermId::generate();
        catalog
            .dispatch_term(
                Family::Message,
                TermCommand::CreateTerm(CreateTerm {
                    term_id,
                    family: Family::Message,
                    name: "err.disk".to_string(),
                    category: None,
                    translations: vec![TranslationDraft::new("eng", "Disk full")],
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();

        let delete = || {
            TermCommand::DeleteTerm(DeleteTerm {
                term_id,
                occurred_at: Utc::now(),
            })
        };
        assert_eq!(catalog.dispatch_term(Family::Message, delete()).unwrap().len(), 1);
        assert!(catalog.dispatch_term(Family::Message, delete()).unwrap().is_empty());
        idle(&runtime);

        let query = catalog.query(Family::Message);
        assert!(query.get_by_name("err.disk").is_none());
        assert_eq!(query.count_any_matching("disk", true), 1);
        assert!(catalog.lookup(Family::Message).get_by_name("err.disk").is_none());

        catalog
            .dispatch_term(Family::Message, create(Family::Message, "err.disk", vec![]))
            .unwrap();
    }

    #[tokio::test]
    async fn clean_before_import_replaces_the_catalog() {
        let runtime = CatalogRuntime::in_memory(config()).await.unwrap();
        let catalog = runtime.catalog();

        catalog
            .dispatch_term(Family::Label, create(Family::Label, "old.label", vec![]))
            .unwrap();
        catalog
            .dispatch_term(Family::Action, create(Family::Action, "file.open", vec![]))
            .unwrap();
        idle(&runtime);

        let upload_id = runtime
            .submit_upload(
                "fresh.json",
                workbook(vec![], vec![row("file", "open", "eng", "Open")], vec![]),
                Some(true),
            )
            .unwrap();
        assert!(runtime.wait_for_upload(upload_id, WAIT));
        idle(&runtime);

        let status = catalog.uploads().upload_status(&upload_id).unwrap();
        assert_eq!(status.phase, UploadPhase::Imported, "{:?}", status.error_message);
        assert_eq!(status.deleted_terms, Some(2));
        assert!(catalog.query(Family::Label).get_by_name("old.label").is_none());
        assert!(catalog.query(Family::Action).get_by_name("file.open").is_some());
    }

    #[tokio::test]
    async fn import_reports_names_that_already_exist() {
        let runtime = CatalogRuntime::in_memory(config()).await.unwrap();
        let catalog = runtime.catalog();

        catalog
            .dispatch_term(Family::Label, create(Family::Label, "btn.save", vec![]))
            .unwrap();
        idle(&runtime);

        let upload_id = runtime
            .submit_upload(
                "again.json",
                workbook(
                    vec![row("btn", "save", "eng", "Save"), row("btn", "quit", "eng", "Quit")],
                    vec![],
                    vec![],
                ),
                Some(false),
            )
            .unwrap();
        assert!(runtime.wait_for_upload(upload_id, WAIT));
        idle(&runtime);

        let status = catalog.uploads().upload_status(&upload_id).unwrap();
        assert_eq!(status.phase, UploadPhase::NotImported);
        assert_eq!(status.imported, Some(false));
        assert!(status.error_message.unwrap().starts_with("btn.save:"));
        // Terms that could be created stay.
        assert!(catalog.query(Family::Label).get_by_name("btn.quit").is_some());
    }

    #[tokio::test]
    async fn live_query_sees_renames_away_from_the_name() {
        let runtime = CatalogRuntime::in_memory(config()).await.unwrap();
        let catalog = runtime.catalog();

        let mut sub =
            live::subscribe(catalog.query(Family::Label), LiveQuery::ByName("title".into()));
        assert_eq!(sub.initial, LiveSnapshot::Single(None));

        let term_id = TermId::generate();
        catalog
            .dispatch_term(
                Family::Label,
                TermCommand::CreateTerm(CreateTerm {
                    term_id,
                    family: Family::Label,
                    name: "title".to_string(),
                    category: None,
                    translations: vec![],
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();
        catalog
            .dispatch_term(
                Family::Label,
                TermCommand::UpdateTerm(UpdateTerm {
                    term_id,
                    name: Some("heading".to_string()),
                    category: None,
                    translations: vec![],
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();

        let first = tokio::time::timeout(WAIT, sub.updates.next()).await.unwrap().unwrap();
        let second = tokio::time::timeout(WAIT, sub.updates.next()).await.unwrap().unwrap();
        match (first, second) {
            (TermUpdate::Upserted(a), TermUpdate::Upserted(b)) => {
                assert_eq!(a.name, "title");
                assert_eq!(b.name, "heading");
            }
            other => panic!("Expected two upserts, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn notifications_wait_for_the_bootstrap_gate() {
        let (notifier, rx) = ChannelNotifier::new();
        let runtime = CatalogRuntime::start(
            config(),
            RuntimeParts {
                notifier: Arc::new(notifier),
                ..RuntimeParts::default()
            },
        )
        .await
        .unwrap();
        let catalog = runtime.catalog();

        catalog
            .dispatch_term(Family::Label, create(Family::Label, "before", vec![]))
            .unwrap();
        idle(&runtime);
        assert!(rx.try_recv().is_err());

        runtime.bootstrap_gate().open();
        catalog
            .dispatch_term(Family::Label, create(Family::Label, "after", vec![]))
            .unwrap();
        idle(&runtime);

        let n = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(n.kind, ChangeKind::Insert);
        assert_eq!(n.family, Family::Label);
        assert_eq!(n.name.as_deref(), Some("after"));
    }

    #[tokio::test]
    async fn lazy_translations_are_seeded_from_the_default() {
        let runtime = CatalogRuntime::in_memory(config()).await.unwrap();
        let catalog = runtime.catalog();

        let created = catalog
            .dispatch_term(
                Family::Label,
                create(
                    Family::Label,
                    "btn.save",
                    vec![
                        TranslationDraft::new("eng", "Save")
                            .with_tooltip("Save file")
                            .as_default(),
                    ],
                ),
            )
            .unwrap();
        let term_id = TermId::new(created[0].aggregate_id);
        idle(&runtime);

        let fra = catalog.translation_or_create(Family::Label, term_id, "fra").unwrap();
        assert_eq!(fra.value, "Save");
        assert_eq!(fra.tooltip.as_deref(), Some("Save file"));
        assert!(!fra.is_translated);
        assert!(!fra.is_default);

        let again = catalog.translation_or_create(Family::Label, term_id, "fra").unwrap();
        assert_eq!(again.translation_id, fra.translation_id);

        let fresh = catalog
            .translation_by_name_or_create(Family::Message, "err.net", "eng")
            .unwrap();
        assert_eq!(fresh.value, "err.net");
        assert!(fresh.is_default);
        idle(&runtime);
        let record = catalog.query(Family::Message).get_by_name("err.net").unwrap();
        assert!(!record.translated);
    }

    #[tokio::test]
    async fn exported_workbook_imports_into_an_empty_catalog() {
        let source = CatalogRuntime::in_memory(config()).await.unwrap();
        source
            .catalog()
            .dispatch_term(
                Family::Action,
                create(
                    Family::Action,
                    "file.open",
                    vec![
                        TranslationDraft::new("eng", "Open"),
                        TranslationDraft::new("deu", "Öffnen"),
                    ],
                ),
            )
            .unwrap();
        idle(&source);
        let bytes = source.catalog().export_workbook(&JsonWorkbookCodec).unwrap();

        let target = CatalogRuntime::in_memory(config()).await.unwrap();
        let upload_id = target.submit_upload("export.json", bytes, None).unwrap();
        assert!(target.wait_for_upload(upload_id, WAIT));
        idle(&target);

        let record = target.catalog().query(Family::Action).get_by_name("file.open").unwrap();
        assert_eq!(record.translations.len(), 2);
        assert_eq!(record.translation("deu").unwrap().value, "Öffnen");
    }

    #[tokio::test]
    async fn reset_translations_clears_every_flag_in_the_family() {
        let runtime = CatalogRuntime::in_memory(config()).await.unwrap();
        let catalog = runtime.catalog();

        catalog
            .dispatch_term(
                Family::Label,
                create(
                    Family::Label,
                    "btn.ok",
                    vec![TranslationDraft::new("eng", "OK"), TranslationDraft::new("deu", "OK")],
                ),
            )
            .unwrap();
        idle(&runtime);

        assert_eq!(catalog.reset_translations(Family::Label).unwrap(), 2);
        idle(&runtime);
        let record = catalog.query(Family::Label).get_by_name("btn.ok").unwrap();
        assert!(!record.translated);
        assert!(record.translations.values().all(|t| !t.is_translated));
    }

    #[tokio::test]
    async fn restarted_runtime_rebuilds_the_read_side() {
        let store = Arc::new(InMemoryEventStore::new());
        let parts = || RuntimeParts {
            store: store.clone(),
            ..RuntimeParts::default()
        };

        let first = CatalogRuntime::start(config(), parts()).await.unwrap();
        first
            .catalog()
            .dispatch_term(Family::Label, create(Family::Label, "kept", vec![]))
            .unwrap();
        idle(&first);
        first.shutdown();

        let second = CatalogRuntime::start(config(), parts()).await.unwrap();
        assert!(second.catalog().query(Family::Label).get_by_name("kept").is_some());
        match second
            .catalog()
            .dispatch_term(Family::Label, create(Family::Label, "kept", vec![]))
            .unwrap_err()
        {
            DispatchError::DuplicateName(_) => {}
            _ => panic!("Expected DuplicateName error"),
        }

        let replayed = second.reset_family(Family::Label).wait_for_completion().await.unwrap();
        assert_eq!(replayed.processed_events, 1);
        assert_eq!(second.catalog().lookup(Family::Label).len(), 1);
    }

    #[test]
    fn creates_racing_ahead_of_the_lookup_both_commit() {
        let (store, catalog) = detached_catalog();

        let first = catalog
            .dispatch_term(Family::Label, create(Family::Label, "dup", vec![]))
            .unwrap();
        let second = catalog
            .dispatch_term(Family::Label, create(Family::Label, "dup", vec![]))
            .unwrap();
        assert_eq!((first.len(), second.len()), (1, 1));
        assert_ne!(first[0].aggregate_id, second[0].aggregate_id);
        assert_eq!(store.head_position().unwrap(), 2);

        // The group delivers both creates afterwards; neither is dropped.
        let views = catalog.views(Family::Label);
        for stored in first.iter().chain(&second) {
            views.apply(&stored.to_envelope()).unwrap();
        }
        let names: Vec<String> = catalog
            .query(Family::Label)
            .list_all()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["dup".to_string(), "dup".to_string()]);

        // Once the lookup has seen the name, the guard closes it.
        match catalog
            .dispatch_term(Family::Label, create(Family::Label, "dup", vec![]))
            .unwrap_err()
        {
            DispatchError::DuplicateName(_) => {}
            _ => panic!("Expected DuplicateName error"),
        }
    }

    #[test]
    fn renames_delivered_out_of_order_land_in_stream_order() {
        let (_store, catalog) = detached_catalog();
        let term_id = TermId::generate();
        let created = catalog
            .dispatch_term(
                Family::Label,
                TermCommand::CreateTerm(CreateTerm {
                    term_id,
                    family: Family::Label,
                    name: "btn.save".to_string(),
                    category: None,
                    translations: vec![TranslationDraft::new("eng", "Save")],
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();
        let renamed = catalog.dispatch_term(Family::Label, rename(term_id, "btn.store")).unwrap();
        let final_name = catalog
            .dispatch_term(Family::Label, rename(term_id, "btn.keep"))
            .unwrap();

        let views = catalog.views(Family::Label);
        for stored in created.iter().chain(&final_name).chain(&renamed) {
            views.apply(&stored.to_envelope()).unwrap();
        }

        let record = catalog.query(Family::Label).get_by_id(&term_id).unwrap();
        assert_eq!(record.name, "btn.keep");
        let lookup = catalog.lookup(Family::Label);
        assert_eq!(lookup.get_by_name("btn.keep").unwrap().term_id, term_id);
        assert!(lookup.get_by_name("btn.save").is_none());
        assert!(lookup.get_by_name("btn.store").is_none());
    }

    #[test]
    fn every_projection_of_a_group_sees_an_envelope_another_rejects() {
        let (_store, catalog) = detached_catalog();
        let created = catalog
            .dispatch_term(Family::Label, create(Family::Label, "btn.save", vec![]))
            .unwrap();
        let stored = &created[0];
        let broken = EventEnvelope::new(
            stored.event_id,
            stored.aggregate_id,
            stored.aggregate_type.clone(),
            stored.event_type.clone(),
            0,
            stored.global_position,
            stored.payload.clone(),
        );

        let report = catalog.views(Family::Label).apply(&broken).unwrap_err();
        for projection in ["lookup:", "query:", "notifications:"] {
            assert!(report.contains(projection), "unexpected report: {report}");
        }
    }

    #[tokio::test]
    async fn lagging_read_side_ends_the_upload_as_not_imported() {
        let config = CatalogConfig {
            sync_timeout: Duration::from_millis(300),
            ..config()
        };
        let runtime = CatalogRuntime::in_memory(config).await.unwrap();

        // Committed but never published: the label group can never reach it.
        let orphan = UncommittedEvent::from_json(
            AggregateId::new(),
            Family::Label.aggregate_type(),
            "catalog.label.created",
            json!({}),
        );
        runtime
            .store()
            .append(vec![orphan], ExpectedVersion::Exact(0))
            .unwrap();

        let upload_id = runtime
            .submit_upload(
                "catalog.json",
                workbook(vec![row("btn", "save", "eng", "Save")], vec![], vec![]),
                None,
            )
            .unwrap();
        assert!(runtime.wait_for_upload(upload_id, WAIT));

        let status = runtime.catalog().uploads().upload_status(&upload_id).unwrap();
        assert_eq!(status.phase, UploadPhase::NotImported);
        assert_eq!(status.validated, Some(true));
        assert_eq!(status.imported, Some(false));
        let message = status.error_message.unwrap();
        assert!(message.contains("read models"), "unexpected report: {message}");
        assert!(runtime.catalog().query(Family::Label).get_by_name("btn.save").is_none());
    }
}
