//! Query read model: one denormalized record per term, with its translations.
//!
//! Every applied change is also published on a broadcast channel so live
//! queries can push the fresh record to their subscribers. Deleted terms keep
//! an inactive record; they only show up in searches that ask for inactive
//! terms.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::broadcast;

use babel_events::{EventEnvelope, Projection};
use babel_terms::{Family, LanguageCode, TermEvent, TermId, Translation};

use crate::projections::cursor::{SequenceGap, StreamCursors};
use crate::read_model::{InMemoryReadStore, ReadStore};

pub const DEFAULT_CHANGE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRecord {
    pub term_id: TermId,
    pub family: Family,
    pub name: String,
    pub category: Option<String>,
    pub translated: bool,
    pub active: bool,
    pub translations: BTreeMap<LanguageCode, Translation>,
}

impl TermRecord {
    fn recompute_translated(&mut self) {
        self.translated = self.translations.values().all(|t| t.is_translated);
    }

    /// `needle` must already be lowercase. Blank matches everything.
    fn matches(&self, needle: &str) -> bool {
        if needle.is_empty() {
            return true;
        }
        let hit = |s: &str| s.to_lowercase().contains(needle);
        hit(&self.name)
            || self.category.as_deref().is_some_and(hit)
            || self.translations.values().any(|t| hit(&t.value))
    }

    pub fn translation(&self, language: &str) -> Option<&Translation> {
        self.translations
            .iter()
            .find(|(code, _)| code.as_str() == language)
            .map(|(_, t)| t)
    }
}

/// What a subscriber sees for one change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermUpdate {
    Upserted(TermRecord),
    Removed { term_id: TermId, name: String },
}

impl TermUpdate {
    pub fn term_id(&self) -> TermId {
        match self {
            TermUpdate::Upserted(r) => r.term_id,
            TermUpdate::Removed { term_id, .. } => *term_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermChange {
    pub family: Family,
    pub term_id: TermId,
    /// Name before this change; lets by-name subscribers notice a rename away.
    pub previous_name: Option<String>,
    pub update: TermUpdate,
}

impl TermChange {
    pub fn current_name(&self) -> &str {
        match &self.update {
            TermUpdate::Upserted(r) => &r.name,
            TermUpdate::Removed { name, .. } => name,
        }
    }
}

/// Zero-based page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub number: usize,
    pub size: usize,
}

impl PageRequest {
    pub fn new(number: usize, size: usize) -> Self {
        Self { number, size }
    }

    /// Everything on one page.
    pub fn unpaged() -> Self {
        Self {
            number: 0,
            size: usize::MAX,
        }
    }
}

#[derive(Debug, Error)]
pub enum TermQueryProjectionError {
    #[error("failed to deserialize term event: {0}")]
    Deserialize(String),

    #[error("event targets {found}, projection holds {expected}")]
    WrongFamily { expected: Family, found: Family },

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

impl From<SequenceGap> for TermQueryProjectionError {
    fn from(gap: SequenceGap) -> Self {
        Self::NonMonotonicSequence {
            last: gap.last,
            found: gap.found,
        }
    }
}

#[derive(Debug)]
pub struct TermQueryProjection<S = InMemoryReadStore<TermId, TermRecord>>
where
    S: ReadStore<TermId, TermRecord>,
{
    family: Family,
    store: S,
    cursors: StreamCursors,
    changes: broadcast::Sender<TermChange>,
    name: String,
}

impl TermQueryProjection {
    pub fn in_memory(family: Family) -> Self {
        Self::new(family, InMemoryReadStore::new(), DEFAULT_CHANGE_CAPACITY)
    }
}

impl<S> TermQueryProjection<S>
where
    S: ReadStore<TermId, TermRecord>,
{
    pub fn new(family: Family, store: S, change_capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(change_capacity.max(1));
        Self {
            family,
            store,
            cursors: StreamCursors::new(),
            changes,
            name: format!("{}.query", family.aggregate_type()),
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// Changes applied after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<TermChange> {
        self.changes.subscribe()
    }

    pub fn get_by_id(&self, term_id: &TermId) -> Option<TermRecord> {
        self.store.get(term_id).filter(|r| r.active)
    }

    pub fn get_by_name(&self, name: &str) -> Option<TermRecord> {
        self.store
            .list()
            .into_iter()
            .find(|r| r.active && r.name == name)
    }

    /// Active terms sorted by name.
    pub fn list_all(&self) -> Vec<TermRecord> {
        self.sorted(|r| r.active)
    }

    pub fn find_any_matching(
        &self,
        filter: &str,
        include_inactive: bool,
        page: PageRequest,
    ) -> Vec<TermRecord> {
        let needle = filter.trim().to_lowercase();
        self.sorted(|r| (include_inactive || r.active) && r.matches(&needle))
            .into_iter()
            .skip(page.number.saturating_mul(page.size))
            .take(page.size)
            .collect()
    }

    pub fn count_any_matching(&self, filter: &str, include_inactive: bool) -> usize {
        let needle = filter.trim().to_lowercase();
        self.store
            .list()
            .iter()
            .filter(|r| (include_inactive || r.active) && r.matches(&needle))
            .count()
    }

    pub fn translation_by_parent_and_language(
        &self,
        parent_id: &TermId,
        language: &str,
    ) -> Option<Translation> {
        self.get_by_id(parent_id)?.translation(language).cloned()
    }

    /// Translations in `language`, ordered by their term's name.
    pub fn translations_by_language(&self, language: &str) -> Vec<Translation> {
        self.list_all()
            .iter()
            .filter_map(|r| r.translation(language).cloned())
            .collect()
    }

    pub fn translations_by_parent(&self, parent_id: &TermId) -> Vec<Translation> {
        self.get_by_id(parent_id)
            .map(|r| r.translations.into_values().collect())
            .unwrap_or_default()
    }

    /// Distinct language codes used by active terms of this family.
    pub fn languages(&self) -> BTreeSet<LanguageCode> {
        self.store
            .list()
            .into_iter()
            .filter(|r| r.active)
            .flat_map(|r| r.translations.into_keys())
            .collect()
    }

    fn sorted(&self, keep: impl Fn(&TermRecord) -> bool) -> Vec<TermRecord> {
        let mut records: Vec<TermRecord> =
            self.store.list().into_iter().filter(|r| keep(r)).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name).then(a.term_id.cmp(&b.term_id)));
        records
    }

    fn publish(&self, term_id: TermId, previous_name: Option<String>, update: TermUpdate) {
        // No receivers is fine; nobody is watching.
        let _ = self.changes.send(TermChange {
            family: self.family,
            term_id,
            previous_name,
            update,
        });
    }

    fn store_and_publish(&self, record: TermRecord, previous_name: Option<String>) {
        self.store.upsert(record.term_id, record.clone());
        self.publish(record.term_id, previous_name, TermUpdate::Upserted(record));
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), TermQueryProjectionError> {
        if envelope.aggregate_type() != self.family.aggregate_type() {
            return Ok(());
        }
        self.cursors.apply_in_order(envelope, |env| self.apply_event(env))
    }

    fn apply_event(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), TermQueryProjectionError> {
        let ev: TermEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| TermQueryProjectionError::Deserialize(e.to_string()))?;
        if ev.family() != self.family {
            return Err(TermQueryProjectionError::WrongFamily {
                expected: self.family,
                found: ev.family(),
            });
        }

        let term_id = ev.term_id();
        let existing = self.store.get(&term_id);
        let previous_name = existing.as_ref().map(|r| r.name.clone());

        match ev {
            TermEvent::TermCreated(e) => {
                let mut record = TermRecord {
                    term_id: e.term_id,
                    family: e.family,
                    name: e.name,
                    category: e.category,
                    translated: false,
                    active: true,
                    translations: e
                        .translations
                        .iter()
                        .map(|t| (t.language.clone(), Translation::from(t)))
                        .collect(),
                };
                record.recompute_translated();
                self.store_and_publish(record, previous_name);
            }
            TermEvent::TermUpdated(e) => {
                if let Some(mut record) = existing {
                    record.name = e.name;
                    record.category = e.category;
                    for t in &e.translations {
                        record.translations.insert(t.language.clone(), Translation::from(t));
                    }
                    record.recompute_translated();
                    self.store_and_publish(record, previous_name);
                }
            }
            TermEvent::TermDeleted(e) => {
                if let Some(mut record) = existing {
                    record.active = false;
                    self.store.upsert(term_id, record);
                    self.publish(
                        term_id,
                        previous_name,
                        TermUpdate::Removed {
                            term_id,
                            name: e.name,
                        },
                    );
                }
            }
            TermEvent::TranslationCreated(e) => {
                if let Some(mut record) = existing {
                    record.translations.insert(e.language.clone(), Translation::from(&e));
                    record.recompute_translated();
                    self.store_and_publish(record, previous_name);
                }
            }
            TermEvent::TranslationUpdated(e) => {
                if let Some(mut record) = existing {
                    record.translations.insert(e.language.clone(), Translation::from(&e));
                    record.recompute_translated();
                    self.store_and_publish(record, previous_name);
                }
            }
            TermEvent::TranslationDeleted(e) => {
                if let Some(mut record) = existing {
                    record.translations.remove(&e.language);
                    record.recompute_translated();
                    self.store_and_publish(record, previous_name);
                }
            }
        }
        Ok(())
    }

    /// Truncate the read model; a full replay rebuilds it.
    pub fn reset(&self) {
        self.store.clear();
        self.cursors.clear();
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), TermQueryProjectionError> {
        self.reset();
        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| e.global_position());
        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}

impl<S> Projection for TermQueryProjection<S>
where
    S: ReadStore<TermId, TermRecord>,
{
    type Error = TermQueryProjectionError;

    fn name(&self) -> &str {
        &self.name
    }

    fn aggregate_types(&self) -> Vec<String> {
        vec![self.family.aggregate_type().to_string()]
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
        TermQueryProjection::apply_envelope(self, envelope)
    }

    fn reset(&self) {
        TermQueryProjection::reset(self)
    }
}
