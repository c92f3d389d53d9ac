//! Catalog application service: the write path for terms and uploads plus the
//! per-family read side it consults.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use babel_core::AggregateId;
use babel_events::{EventEnvelope, InMemoryEventBus, Projection};
use babel_terms::{
    CreateTerm, CreateTranslation, Family, LanguageCode, Term, TermCommand, TermId, Translation,
    TranslationDraft, UpdateTranslation,
};
use babel_uploads::{
    ExportTerm, ExportTranslation, UPLOAD_AGGREGATE_TYPE, Upload, UploadCommand, UploadError,
    UploadId, WorkbookCodec, build_workbook,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, StoredEvent};
use crate::notify::NotificationProjection;
use crate::projections::lookup::LookupProjection;
use crate::projections::terms::TermQueryProjection;
use crate::projections::uploads::UploadStatusProjection;
use crate::uniqueness::UniquenessGuard;
use crate::workers::PositionTracker;

pub type SharedStore = Arc<dyn EventStore>;
pub type SharedBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type Dispatcher = CommandDispatcher<SharedStore, SharedBus>;

/// Read side of one family, applied by that family's processing group.
#[derive(Debug, Clone)]
pub struct FamilyViews {
    pub family: Family,
    pub lookup: Arc<LookupProjection>,
    pub query: Arc<TermQueryProjection>,
    pub notifications: Arc<NotificationProjection>,
    pub tracker: Arc<PositionTracker>,
    guard: UniquenessGuard,
}

impl FamilyViews {
    pub fn new(
        family: Family,
        query: Arc<TermQueryProjection>,
        notifications: Arc<NotificationProjection>,
    ) -> Self {
        let lookup = Arc::new(LookupProjection::in_memory(family));
        Self {
            family,
            guard: UniquenessGuard::new(lookup.clone()),
            lookup,
            query,
            notifications,
            tracker: Arc::new(PositionTracker::new()),
        }
    }

    /// Apply one envelope to every projection of the group.
    ///
    /// Each projection gets the envelope even when another one fails; the
    /// failures are reported together.
    pub fn apply(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), String> {
        let failures: Vec<String> = [
            self.lookup.apply_envelope(envelope).map_err(|e| format!("lookup: {e}")),
            self.query.apply_envelope(envelope).map_err(|e| format!("query: {e}")),
            self.notifications
                .apply_envelope(envelope)
                .map_err(|e| format!("notifications: {e}")),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("; "))
        }
    }

    pub fn reset(&self) {
        self.lookup.reset();
        self.query.reset();
        self.notifications.reset();
    }
}

pub struct Catalog {
    dispatcher: Dispatcher,
    families: [FamilyViews; 3],
    uploads: Arc<UploadStatusProjection>,
    upload_tracker: Arc<PositionTracker>,
    saga_tracker: Arc<PositionTracker>,
}

impl Catalog {
    pub fn new(
        dispatcher: Dispatcher,
        families: [FamilyViews; 3],
        uploads: Arc<UploadStatusProjection>,
    ) -> Self {
        Self {
            dispatcher,
            families,
            uploads,
            upload_tracker: Arc::new(PositionTracker::new()),
            saga_tracker: Arc::new(PositionTracker::new()),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn views(&self, family: Family) -> &FamilyViews {
        // `families` is built in `Family::ALL` order.
        match family {
            Family::Label => &self.families[0],
            Family::Action => &self.families[1],
            Family::Message => &self.families[2],
        }
    }

    pub fn all_views(&self) -> &[FamilyViews] {
        &self.families
    }

    pub fn query(&self, family: Family) -> &TermQueryProjection {
        &self.views(family).query
    }

    pub fn lookup(&self, family: Family) -> &LookupProjection {
        &self.views(family).lookup
    }

    pub fn uploads(&self) -> &UploadStatusProjection {
        &self.uploads
    }

    pub fn upload_tracker(&self) -> &Arc<PositionTracker> {
        &self.upload_tracker
    }

    pub fn saga_tracker(&self) -> &Arc<PositionTracker> {
        &self.saga_tracker
    }

    /// Dispatch a term command. Create and update go through the family's
    /// uniqueness guard first.
    pub fn dispatch_term(
        &self,
        family: Family,
        command: TermCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        let views = self.views(family);
        let make = |id: AggregateId| Term::empty(family, TermId::new(id));
        match command {
            TermCommand::CreateTerm(_) | TermCommand::UpdateTerm(_) => self
                .dispatcher
                .dispatch_intercepted(&views.guard, family.aggregate_type(), command, make),
            _ => self.dispatcher.dispatch(family.aggregate_type(), command, make),
        }
    }

    pub fn dispatch_upload(
        &self,
        command: UploadCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.dispatcher.dispatch(UPLOAD_AGGREGATE_TYPE, command, |id| {
            Upload::empty(UploadId::new(id))
        })
    }

    pub fn load_term(&self, family: Family, term_id: TermId) -> Result<Term, DispatchError> {
        self.dispatcher
            .load(term_id.0, |id| Term::empty(family, TermId::new(id)))
    }

    pub fn load_upload(&self, upload_id: UploadId) -> Result<Upload, DispatchError> {
        self.dispatcher
            .load(upload_id.0, |id| Upload::empty(UploadId::new(id)))
    }

    /// Existing translation, or a new untranslated one seeded from the term's
    /// default translation (or from its name when it has none).
    pub fn translation_or_create(
        &self,
        family: Family,
        parent_id: TermId,
        language: &str,
    ) -> Result<Translation, DispatchError> {
        if let Some(t) = self
            .query(family)
            .translation_by_parent_and_language(&parent_id, language)
        {
            return Ok(t);
        }

        let term = self.load_term(family, parent_id)?;
        if !term.is_active() {
            return Err(DispatchError::NotFound);
        }
        if let Some(t) = term.translation(language) {
            return Ok(t.clone());
        }

        let (value, tooltip) = match term.translations().find(|t| t.is_default) {
            Some(default) => (default.value.clone(), default.tooltip.clone()),
            None => (term.name().to_string(), None),
        };
        let mut draft = TranslationDraft::new(language, value).untranslated();
        draft.tooltip = tooltip.filter(|_| family.supports_tooltip());

        self.dispatch_term(
            family,
            TermCommand::CreateTranslation(CreateTranslation {
                term_id: parent_id,
                translation: draft,
                occurred_at: Utc::now(),
            }),
        )?;
        debug!(%family, term_id = %parent_id, language, "created placeholder translation");

        self.load_term(family, parent_id)?
            .translation(language)
            .cloned()
            .ok_or(DispatchError::NotFound)
    }

    /// Like [`translation_or_create`](Self::translation_or_create), creating
    /// the term itself when no active term has this name.
    pub fn translation_by_name_or_create(
        &self,
        family: Family,
        name: &str,
        language: &str,
    ) -> Result<Translation, DispatchError> {
        if let Some(entry) = self.lookup(family).get_by_name(name) {
            return self.translation_or_create(family, entry.term_id, language);
        }

        let term_id = TermId::generate();
        self.dispatch_term(
            family,
            TermCommand::CreateTerm(CreateTerm {
                term_id,
                family,
                name: name.to_string(),
                category: None,
                translations: vec![
                    TranslationDraft::new(language, name)
                        .as_default()
                        .untranslated(),
                ],
                occurred_at: Utc::now(),
            }),
        )?;
        info!(%family, %term_id, name, "created missing term on lookup");

        self.load_term(family, term_id)?
            .translation(language)
            .cloned()
            .ok_or(DispatchError::NotFound)
    }

    /// Mark every translation of the family as needing a translator.
    /// Returns how many translations changed.
    pub fn reset_translations(&self, family: Family) -> Result<usize, DispatchError> {
        let mut changed = 0;
        for record in self.query(family).list_all() {
            for t in record.translations.values().filter(|t| t.is_translated) {
                self.dispatch_term(
                    family,
                    TermCommand::UpdateTranslation(UpdateTranslation {
                        term_id: record.term_id,
                        language: t.language.to_string(),
                        value: None,
                        tooltip: None,
                        is_default: None,
                        is_translated: Some(false),
                        occurred_at: Utc::now(),
                    }),
                )?;
                changed += 1;
            }
        }
        info!(%family, changed, "translations reset");
        Ok(changed)
    }

    /// Distinct language codes across all three families.
    pub fn existing_languages(&self) -> BTreeSet<LanguageCode> {
        self.families
            .iter()
            .flat_map(|v| v.query.languages())
            .collect()
    }

    /// Encode the whole catalog as a translator workbook.
    pub fn export_workbook(&self, codec: &dyn WorkbookCodec) -> Result<Vec<u8>, UploadError> {
        let terms: Vec<ExportTerm> = self
            .families
            .iter()
            .flat_map(|v| v.query.list_all())
            .map(|record| ExportTerm {
                family: record.family,
                name: record.name,
                category: record.category,
                translations: record
                    .translations
                    .into_values()
                    .map(|t| ExportTranslation {
                        language: t.language.to_string(),
                        value: t.value,
                        tooltip: t.tooltip,
                    })
                    .collect(),
            })
            .collect();
        let languages: Vec<String> = self
            .existing_languages()
            .into_iter()
            .map(|l| l.to_string())
            .collect();

        codec.encode(&build_workbook(&terms, &languages))
    }

    /// Block until every family group has applied the store up to `position`.
    pub fn wait_for_families(&self, position: u64, timeout: Duration) -> bool {
        self.families
            .iter()
            .all(|v| v.tracker.wait_for(position, timeout))
    }

    /// Block until every processing group has applied the current head.
    pub fn wait_until_idle(&self, timeout: Duration) -> Result<bool, DispatchError> {
        let head = self.dispatcher.store().head_position()?;
        Ok(self.wait_for_families(head, timeout)
            && self.upload_tracker.wait_for(head, timeout)
            && self.saga_tracker.wait_for(head, timeout))
    }
}
