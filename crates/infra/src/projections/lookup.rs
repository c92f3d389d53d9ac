//! Name index of active terms, one per family.
//!
//! Feeds the uniqueness guard. Holds no business logic: created inserts,
//! updated renames, deleted removes; translation events only move the cursor.

use serde_json::Value as JsonValue;
use thiserror::Error;

use babel_events::{EventEnvelope, Projection};
use babel_terms::{Family, TermEvent, TermId};

use crate::projections::cursor::{SequenceGap, StreamCursors};
use crate::read_model::{InMemoryReadStore, ReadStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupEntry {
    pub term_id: TermId,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum LookupProjectionError {
    #[error("failed to deserialize term event: {0}")]
    Deserialize(String),

    #[error("event targets {found}, projection indexes {expected}")]
    WrongFamily { expected: Family, found: Family },

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

impl From<SequenceGap> for LookupProjectionError {
    fn from(gap: SequenceGap) -> Self {
        Self::NonMonotonicSequence {
            last: gap.last,
            found: gap.found,
        }
    }
}

#[derive(Debug)]
pub struct LookupProjection<
    S = InMemoryReadStore<TermId, LookupEntry>,
    N = InMemoryReadStore<String, TermId>,
> where
    S: ReadStore<TermId, LookupEntry>,
    N: ReadStore<String, TermId>,
{
    family: Family,
    by_id: S,
    by_name: N,
    cursors: StreamCursors,
    name: String,
}

impl LookupProjection {
    pub fn in_memory(family: Family) -> Self {
        Self::new(family, InMemoryReadStore::new(), InMemoryReadStore::new())
    }
}

impl<S, N> LookupProjection<S, N>
where
    S: ReadStore<TermId, LookupEntry>,
    N: ReadStore<String, TermId>,
{
    pub fn new(family: Family, by_id: S, by_name: N) -> Self {
        Self {
            family,
            by_id,
            by_name,
            cursors: StreamCursors::new(),
            name: format!("{}.lookup", family.aggregate_type()),
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn get_by_id(&self, term_id: &TermId) -> Option<LookupEntry> {
        self.by_id.get(term_id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<LookupEntry> {
        let term_id = self.by_name.get(&name.to_string())?;
        self.by_id.get(&term_id)
    }

    /// Any active entry with this id or this name.
    pub fn find_by_id_or_name(&self, term_id: &TermId, name: &str) -> Option<LookupEntry> {
        self.get_by_id(term_id).or_else(|| self.get_by_name(name))
    }

    pub fn len(&self) -> usize {
        self.by_id.list().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, term_id: TermId, name: String) {
        if let Some(previous) = self.by_id.get(&term_id) {
            // A racing duplicate may own the old name now; leave it alone.
            if previous.name != name && self.by_name.get(&previous.name) == Some(term_id) {
                self.by_name.remove(&previous.name);
            }
        }
        self.by_name.upsert(name.clone(), term_id);
        self.by_id.upsert(term_id, LookupEntry { term_id, name });
    }

    fn remove(&self, term_id: &TermId) {
        if let Some(previous) = self.by_id.remove(term_id) {
            // Only drop the name if it still points at this term.
            if self.by_name.get(&previous.name) == Some(*term_id) {
                self.by_name.remove(&previous.name);
            }
        }
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), LookupProjectionError> {
        if envelope.aggregate_type() != self.family.aggregate_type() {
            return Ok(());
        }
        self.cursors.apply_in_order(envelope, |env| self.apply_event(env))
    }

    fn apply_event(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), LookupProjectionError> {
        let ev: TermEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| LookupProjectionError::Deserialize(e.to_string()))?;
        if ev.family() != self.family {
            return Err(LookupProjectionError::WrongFamily {
                expected: self.family,
                found: ev.family(),
            });
        }

        match ev {
            TermEvent::TermCreated(e) => self.insert(e.term_id, e.name),
            TermEvent::TermUpdated(e) => {
                if self.by_id.get(&e.term_id).is_some() {
                    self.insert(e.term_id, e.name);
                }
            }
            TermEvent::TermDeleted(e) => self.remove(&e.term_id),
            TermEvent::TranslationCreated(_)
            | TermEvent::TranslationUpdated(_)
            | TermEvent::TranslationDeleted(_) => {}
        }
        Ok(())
    }

    /// Truncate the index; a full replay rebuilds it.
    pub fn reset(&self) {
        self.by_id.clear();
        self.by_name.clear();
        self.cursors.clear();
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), LookupProjectionError> {
        self.reset();
        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| e.global_position());
        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}

impl<S, N> Projection for LookupProjection<S, N>
where
    S: ReadStore<TermId, LookupEntry>,
    N: ReadStore<String, TermId>,
{
    type Error = LookupProjectionError;

    fn name(&self) -> &str {
        &self.name
    }

    fn aggregate_types(&self) -> Vec<String> {
        vec![self.family.aggregate_type().to_string()]
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
        LookupProjection::apply_envelope(self, envelope)
    }

    fn reset(&self) {
        LookupProjection::reset(self)
    }
}
