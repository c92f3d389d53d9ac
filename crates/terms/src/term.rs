use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use babel_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use babel_events::{Command, Event};

use crate::family::Family;
use crate::translation::{
    LanguageCode, Translation, TranslationDraft, TranslationId, normalize_tooltip,
};

/// Term identifier (one event stream per term).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TermId(pub AggregateId);

impl TermId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for TermId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: Term (with its translations as child entities).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    id: TermId,
    family: Family,
    name: String,
    category: Option<String>,
    translated: bool,
    active: bool,
    translations: BTreeMap<LanguageCode, Translation>,
    version: u64,
    created: bool,
}

impl Term {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(family: Family, id: TermId) -> Self {
        Self {
            id,
            family,
            name: String::new(),
            category: None,
            translated: false,
            active: false,
            translations: BTreeMap::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TermId {
        self.id
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// True iff every held translation is translated; vacuously true for none.
    pub fn is_translated(&self) -> bool {
        self.translated
    }

    /// False once the term has been deleted (tombstoned).
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn translations(&self) -> impl Iterator<Item = &Translation> {
        self.translations.values()
    }

    pub fn translation(&self, language: &str) -> Option<&Translation> {
        let code = LanguageCode::parse(language).ok()?;
        self.translations.get(&code)
    }

    fn recompute_translated(&mut self) {
        self.translated = self.translations.values().all(|t| t.is_translated);
    }
}

impl AggregateRoot for Term {
    type Id = TermId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateTerm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTerm {
    pub term_id: TermId,
    pub family: Family,
    pub name: String,
    pub category: Option<String>,
    pub translations: Vec<TranslationDraft>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateTerm. `None` fields keep their current value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTerm {
    pub term_id: TermId,
    pub name: Option<String>,
    pub category: Option<String>,
    /// Upserted by language; languages not listed are left untouched.
    pub translations: Vec<TranslationDraft>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteTerm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteTerm {
    pub term_id: TermId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CreateTranslation (child level, routed to the parent term).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTranslation {
    pub term_id: TermId,
    pub translation: TranslationDraft,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateTranslation. `None` fields keep their current value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTranslation {
    pub term_id: TermId,
    pub language: String,
    pub value: Option<String>,
    /// `Some("")` clears the tooltip.
    pub tooltip: Option<String>,
    pub is_default: Option<bool>,
    pub is_translated: Option<bool>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteTranslation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteTranslation {
    pub term_id: TermId,
    pub language: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermCommand {
    CreateTerm(CreateTerm),
    UpdateTerm(UpdateTerm),
    DeleteTerm(DeleteTerm),
    CreateTranslation(CreateTranslation),
    UpdateTranslation(UpdateTranslation),
    DeleteTranslation(DeleteTranslation),
}

impl TermCommand {
    pub fn term_id(&self) -> TermId {
        match self {
            TermCommand::CreateTerm(c) => c.term_id,
            TermCommand::UpdateTerm(c) => c.term_id,
            TermCommand::DeleteTerm(c) => c.term_id,
            TermCommand::CreateTranslation(c) => c.term_id,
            TermCommand::UpdateTranslation(c) => c.term_id,
            TermCommand::DeleteTranslation(c) => c.term_id,
        }
    }
}

impl Command for TermCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        self.term_id().0
    }
}

/// Event: TranslationCreated (also embedded in `TermCreated`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationCreated {
    pub family: Family,
    pub term_id: TermId,
    pub translation_id: TranslationId,
    pub language: LanguageCode,
    pub value: String,
    pub tooltip: Option<String>,
    pub is_default: bool,
    pub is_translated: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TranslationUpdated. Carries the resolved state of the translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationUpdated {
    pub family: Family,
    pub term_id: TermId,
    pub translation_id: TranslationId,
    pub language: LanguageCode,
    pub value: String,
    pub tooltip: Option<String>,
    pub is_default: bool,
    pub is_translated: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TranslationDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationDeleted {
    pub family: Family,
    pub term_id: TermId,
    pub translation_id: TranslationId,
    pub language: LanguageCode,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TermCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermCreated {
    pub family: Family,
    pub term_id: TermId,
    pub name: String,
    pub category: Option<String>,
    pub translations: Vec<TranslationCreated>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TermUpdated. Scalars are resolved (not deltas).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermUpdated {
    pub family: Family,
    pub term_id: TermId,
    pub name: String,
    pub category: Option<String>,
    pub translations: Vec<TranslationUpdated>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TermDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermDeleted {
    pub family: Family,
    pub term_id: TermId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermEvent {
    TermCreated(TermCreated),
    TermUpdated(TermUpdated),
    TermDeleted(TermDeleted),
    TranslationCreated(TranslationCreated),
    TranslationUpdated(TranslationUpdated),
    TranslationDeleted(TranslationDeleted),
}

impl TermEvent {
    pub fn family(&self) -> Family {
        match self {
            TermEvent::TermCreated(e) => e.family,
            TermEvent::TermUpdated(e) => e.family,
            TermEvent::TermDeleted(e) => e.family,
            TermEvent::TranslationCreated(e) => e.family,
            TermEvent::TranslationUpdated(e) => e.family,
            TermEvent::TranslationDeleted(e) => e.family,
        }
    }

    pub fn term_id(&self) -> TermId {
        match self {
            TermEvent::TermCreated(e) => e.term_id,
            TermEvent::TermUpdated(e) => e.term_id,
            TermEvent::TermDeleted(e) => e.term_id,
            TermEvent::TranslationCreated(e) => e.term_id,
            TermEvent::TranslationUpdated(e) => e.term_id,
            TermEvent::TranslationDeleted(e) => e.term_id,
        }
    }
}

impl Event for TermEvent {
    fn event_type(&self) -> &'static str {
        let names = self.family().event_names();
        match self {
            TermEvent::TermCreated(_) => names.created,
            TermEvent::TermUpdated(_) => names.updated,
            TermEvent::TermDeleted(_) => names.deleted,
            TermEvent::TranslationCreated(_) => names.translation_created,
            TermEvent::TranslationUpdated(_) => names.translation_updated,
            TermEvent::TranslationDeleted(_) => names.translation_deleted,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TermEvent::TermCreated(e) => e.occurred_at,
            TermEvent::TermUpdated(e) => e.occurred_at,
            TermEvent::TermDeleted(e) => e.occurred_at,
            TermEvent::TranslationCreated(e) => e.occurred_at,
            TermEvent::TranslationUpdated(e) => e.occurred_at,
            TermEvent::TranslationDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Term {
    type Command = TermCommand;
    type Event = TermEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TermEvent::TermCreated(e) => {
                self.id = e.term_id;
                self.family = e.family;
                self.name = e.name.clone();
                self.category = e.category.clone();
                self.active = true;
                self.created = true;
                self.translations = e
                    .translations
                    .iter()
                    .map(|t| (t.language.clone(), Translation::from(t)))
                    .collect();
            }
            TermEvent::TermUpdated(e) => {
                self.name = e.name.clone();
                self.category = e.category.clone();
                for t in &e.translations {
                    self.translations
                        .insert(t.language.clone(), Translation::from(t));
                }
            }
            TermEvent::TermDeleted(_) => {
                self.active = false;
            }
            TermEvent::TranslationCreated(e) => {
                self.translations
                    .insert(e.language.clone(), Translation::from(e));
            }
            TermEvent::TranslationUpdated(e) => {
                self.translations
                    .insert(e.language.clone(), Translation::from(e));
            }
            TermEvent::TranslationDeleted(e) => {
                self.translations.remove(&e.language);
            }
        }

        self.recompute_translated();

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TermCommand::CreateTerm(cmd) => self.handle_create(cmd),
            TermCommand::UpdateTerm(cmd) => self.handle_update(cmd),
            TermCommand::DeleteTerm(cmd) => self.handle_delete(cmd),
            TermCommand::CreateTranslation(cmd) => self.handle_create_translation(cmd),
            TermCommand::UpdateTranslation(cmd) => self.handle_update_translation(cmd),
            TermCommand::DeleteTranslation(cmd) => self.handle_delete_translation(cmd),
        }
    }
}

impl From<&TranslationCreated> for Translation {
    fn from(e: &TranslationCreated) -> Self {
        Translation {
            translation_id: e.translation_id,
            parent_id: e.term_id,
            language: e.language.clone(),
            value: e.value.clone(),
            tooltip: e.tooltip.clone(),
            is_default: e.is_default,
            is_translated: e.is_translated,
        }
    }
}

impl From<&TranslationUpdated> for Translation {
    fn from(e: &TranslationUpdated) -> Self {
        Translation {
            translation_id: e.translation_id,
            parent_id: e.term_id,
            language: e.language.clone(),
            value: e.value.clone(),
            tooltip: e.tooltip.clone(),
            is_default: e.is_default,
            is_translated: e.is_translated,
        }
    }
}

/// A draft that passed validation, not yet bound to an event.
struct CheckedDraft {
    translation_id: TranslationId,
    language: LanguageCode,
    value: String,
    tooltip: Option<String>,
    is_default: bool,
    is_translated: bool,
}

impl Term {
    fn ensure_live(&self, term_id: TermId) -> Result<(), DomainError> {
        if !self.created || !self.active {
            return Err(DomainError::not_found());
        }
        if self.id != term_id {
            return Err(DomainError::invariant("term_id mismatch"));
        }
        Ok(())
    }

    fn check_value(value: &str) -> Result<(), DomainError> {
        if value.trim().is_empty() {
            return Err(DomainError::validation("translation value cannot be empty"));
        }
        Ok(())
    }

    fn check_tooltip(&self, tooltip: &Option<String>) -> Result<Option<String>, DomainError> {
        let tooltip = normalize_tooltip(tooltip);
        if tooltip.is_some() && !self.family.supports_tooltip() {
            return Err(DomainError::validation(format!(
                "{} translations cannot carry a tooltip",
                self.family.display_name().to_lowercase()
            )));
        }
        Ok(tooltip)
    }

    fn check_draft(&self, draft: &TranslationDraft) -> Result<CheckedDraft, DomainError> {
        let language = LanguageCode::parse(&draft.language)?;
        Self::check_value(&draft.value)?;
        let tooltip = self.check_tooltip(&draft.tooltip)?;
        Ok(CheckedDraft {
            translation_id: draft.translation_id,
            language,
            value: draft.value.clone(),
            tooltip,
            is_default: draft.is_default,
            is_translated: draft.is_translated.unwrap_or(true),
        })
    }

    fn check_drafts(&self, drafts: &[TranslationDraft]) -> Result<Vec<CheckedDraft>, DomainError> {
        let mut seen = HashSet::new();
        let mut checked = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let c = self.check_draft(draft)?;
            if !seen.insert(c.language.clone()) {
                return Err(DomainError::validation(format!(
                    "duplicate translation for language `{}`",
                    c.language
                )));
            }
            checked.push(c);
        }
        Ok(checked)
    }

    fn handle_create(&self, cmd: &CreateTerm) -> Result<Vec<TermEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "{} {} already exists",
                self.family.display_name().to_lowercase(),
                cmd.term_id
            )));
        }
        if cmd.family != self.family {
            return Err(DomainError::invariant("family mismatch"));
        }
        if self.id != cmd.term_id {
            return Err(DomainError::invariant("term_id mismatch"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        let translations = self
            .check_drafts(&cmd.translations)?
            .into_iter()
            .map(|c| TranslationCreated {
                family: self.family,
                term_id: cmd.term_id,
                translation_id: c.translation_id,
                language: c.language,
                value: c.value,
                tooltip: c.tooltip,
                is_default: c.is_default,
                is_translated: c.is_translated,
                occurred_at: cmd.occurred_at,
            })
            .collect();

        Ok(vec![TermEvent::TermCreated(TermCreated {
            family: self.family,
            term_id: cmd.term_id,
            name: cmd.name.clone(),
            category: cmd.category.clone(),
            translations,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateTerm) -> Result<Vec<TermEvent>, DomainError> {
        self.ensure_live(cmd.term_id)?;

        let name = match &cmd.name {
            Some(n) if n.trim().is_empty() => {
                return Err(DomainError::validation("name cannot be empty"));
            }
            Some(n) => n.clone(),
            None => self.name.clone(),
        };
        let category = cmd.category.clone().or_else(|| self.category.clone());

        let translations = self
            .check_drafts(&cmd.translations)?
            .into_iter()
            .map(|c| {
                // Existing languages keep their identity; new ones are re-parented here.
                let translation_id = self
                    .translations
                    .get(&c.language)
                    .map(|t| t.translation_id)
                    .unwrap_or(c.translation_id);
                TranslationUpdated {
                    family: self.family,
                    term_id: cmd.term_id,
                    translation_id,
                    language: c.language,
                    value: c.value,
                    tooltip: c.tooltip,
                    is_default: c.is_default,
                    is_translated: c.is_translated,
                    occurred_at: cmd.occurred_at,
                }
            })
            .collect();

        Ok(vec![TermEvent::TermUpdated(TermUpdated {
            family: self.family,
            term_id: cmd.term_id,
            name,
            category,
            translations,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteTerm) -> Result<Vec<TermEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != cmd.term_id {
            return Err(DomainError::invariant("term_id mismatch"));
        }
        // Repeated deletes are accepted without emitting anything.
        if !self.active {
            return Ok(vec![]);
        }

        Ok(vec![TermEvent::TermDeleted(TermDeleted {
            family: self.family,
            term_id: cmd.term_id,
            name: self.name.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_create_translation(
        &self,
        cmd: &CreateTranslation,
    ) -> Result<Vec<TermEvent>, DomainError> {
        self.ensure_live(cmd.term_id)?;
        let c = self.check_draft(&cmd.translation)?;
        if self.translations.contains_key(&c.language) {
            return Err(DomainError::conflict(format!(
                "translation for language `{}` already exists",
                c.language
            )));
        }

        Ok(vec![TermEvent::TranslationCreated(TranslationCreated {
            family: self.family,
            term_id: cmd.term_id,
            translation_id: c.translation_id,
            language: c.language,
            value: c.value,
            tooltip: c.tooltip,
            is_default: c.is_default,
            is_translated: c.is_translated,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_translation(
        &self,
        cmd: &UpdateTranslation,
    ) -> Result<Vec<TermEvent>, DomainError> {
        self.ensure_live(cmd.term_id)?;
        let language = LanguageCode::parse(&cmd.language)?;
        let current = self
            .translations
            .get(&language)
            .ok_or_else(DomainError::not_found)?;

        let value = match &cmd.value {
            Some(v) => {
                Self::check_value(v)?;
                v.clone()
            }
            None => current.value.clone(),
        };
        let tooltip = match &cmd.tooltip {
            Some(_) => self.check_tooltip(&cmd.tooltip)?,
            None => current.tooltip.clone(),
        };

        Ok(vec![TermEvent::TranslationUpdated(TranslationUpdated {
            family: self.family,
            term_id: cmd.term_id,
            translation_id: current.translation_id,
            language,
            value,
            tooltip,
            is_default: cmd.is_default.unwrap_or(current.is_default),
            is_translated: cmd.is_translated.unwrap_or(current.is_translated),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete_translation(
        &self,
        cmd: &DeleteTranslation,
    ) -> Result<Vec<TermEvent>, DomainError> {
        self.ensure_live(cmd.term_id)?;
        let language = LanguageCode::parse(&cmd.language)?;
        let current = self
            .translations
            .get(&language)
            .ok_or_else(DomainError::not_found)?;

        Ok(vec![TermEvent::TranslationDeleted(TranslationDeleted {
            family: self.family,
            term_id: cmd.term_id,
            translation_id: current.translation_id,
            language,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use babel_events::execute;
    use proptest::prelude::*;

    fn test_term_id() -> TermId {
        TermId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn create_cmd(term_id: TermId, family: Family, name: &str) -> CreateTerm {
        CreateTerm {
            term_id,
            family,
            name: name.to_string(),
            category: Some("buttons".to_string()),
            translations: vec![TranslationDraft::new("eng", "Save").as_default()],
            occurred_at: test_time(),
        }
    }

    fn created_label(name: &str) -> Term {
        let term_id = test_term_id();
        let mut term = Term::empty(Family::Label, term_id);
        execute(
            &mut term,
            &TermCommand::CreateTerm(create_cmd(term_id, Family::Label, name)),
        )
        .unwrap();
        term
    }

    #[test]
    fn create_term_emits_term_created_with_embedded_translations() {
        let term_id = test_term_id();
        let term = Term::empty(Family::Label, term_id);

        let events = term
            .handle(&TermCommand::CreateTerm(create_cmd(term_id, Family::Label, "btn.save")))
            .unwrap();
        assert_eq!(events.len(), 1);

        match &events[0] {
            TermEvent::TermCreated(e) => {
                assert_eq!(e.term_id, term_id);
                assert_eq!(e.name, "btn.save");
                assert_eq!(e.translations.len(), 1);
                assert_eq!(e.translations[0].term_id, term_id);
                assert_eq!(e.translations[0].language.as_str(), "eng");
                assert!(e.translations[0].is_translated);
            }
            _ => panic!("Expected TermCreated event"),
        }
        assert_eq!(events[0].event_type(), "catalog.label.created");
    }

    #[test]
    fn created_term_with_single_translated_child_is_translated() {
        let term = created_label("btn.save");
        assert!(term.is_active());
        assert!(term.is_translated());
        assert_eq!(term.version(), 1);
        assert_eq!(term.translation("eng").unwrap().value, "Save");
    }

    #[test]
    fn create_term_rejects_blank_name() {
        let term_id = test_term_id();
        let term = Term::empty(Family::Label, term_id);
        let cmd = create_cmd(term_id, Family::Label, "   ");

        let err = term.handle(&TermCommand::CreateTerm(cmd)).unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error for blank name"),
        }
    }

    #[test]
    fn create_term_rejects_blank_translation_fields() {
        let term_id = test_term_id();
        let term = Term::empty(Family::Action, term_id);

        let mut blank_value = create_cmd(term_id, Family::Action, "file.open");
        blank_value.translations = vec![TranslationDraft::new("eng", " ")];
        let mut blank_lang = create_cmd(term_id, Family::Action, "file.open");
        blank_lang.translations = vec![TranslationDraft::new("", "Open")];

        for cmd in [blank_value, blank_lang] {
            let err = term.handle(&TermCommand::CreateTerm(cmd)).unwrap_err();
            match err {
                DomainError::Validation(_) => {}
                _ => panic!("Expected Validation error for blank translation field"),
            }
        }
    }

    #[test]
    fn create_term_rejects_duplicate_languages() {
        let term_id = test_term_id();
        let term = Term::empty(Family::Label, term_id);
        let mut cmd = create_cmd(term_id, Family::Label, "btn.save");
        cmd.translations.push(TranslationDraft::new("eng", "Store"));

        let err = term.handle(&TermCommand::CreateTerm(cmd)).unwrap_err();
        match err {
            DomainError::Validation(msg) => assert!(msg.contains("eng")),
            _ => panic!("Expected Validation error for duplicate language"),
        }
    }

    #[test]
    fn message_translations_reject_tooltips() {
        let term_id = test_term_id();
        let term = Term::empty(Family::Message, term_id);
        let mut cmd = create_cmd(term_id, Family::Message, "error.io");
        cmd.translations = vec![TranslationDraft::new("eng", "I/O error").with_tooltip("hint")];

        let err = term.handle(&TermCommand::CreateTerm(cmd)).unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error for message tooltip"),
        }
    }

    #[test]
    fn create_twice_is_a_conflict() {
        let term = created_label("btn.save");
        let cmd = create_cmd(term.id_typed(), Family::Label, "btn.save");

        let err = term.handle(&TermCommand::CreateTerm(cmd)).unwrap_err();
        match err {
            DomainError::Conflict(_) => {}
            _ => panic!("Expected Conflict error"),
        }
    }

    #[test]
    fn update_unknown_term_is_not_found() {
        let term_id = test_term_id();
        let term = Term::empty(Family::Label, term_id);
        let cmd = UpdateTerm {
            term_id,
            name: Some("x".to_string()),
            category: None,
            translations: vec![],
            occurred_at: test_time(),
        };

        let err = term.handle(&TermCommand::UpdateTerm(cmd)).unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn update_keeps_ids_of_existing_languages_and_adds_new_ones() {
        let mut term = created_label("btn.save");
        let eng_id = term.translation("eng").unwrap().translation_id;

        let cmd = UpdateTerm {
            term_id: term.id_typed(),
            name: Some("btn.store".to_string()),
            category: None,
            translations: vec![
                TranslationDraft::new("eng", "Store"),
                TranslationDraft::new("fra", "Enregistrer").untranslated(),
            ],
            occurred_at: test_time(),
        };
        execute(&mut term, &TermCommand::UpdateTerm(cmd)).unwrap();

        assert_eq!(term.name(), "btn.store");
        assert_eq!(term.category(), Some("buttons"));
        assert_eq!(term.translation("eng").unwrap().translation_id, eng_id);
        assert_eq!(term.translation("eng").unwrap().value, "Store");
        assert_eq!(term.translation("fra").unwrap().parent_id, term.id_typed());
        assert!(!term.is_translated());
    }

    #[test]
    fn update_rejects_blank_name() {
        let term = created_label("btn.save");
        let cmd = UpdateTerm {
            term_id: term.id_typed(),
            name: Some(" ".to_string()),
            category: None,
            translations: vec![],
            occurred_at: test_time(),
        };

        let err = term.handle(&TermCommand::UpdateTerm(cmd)).unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error for blank name"),
        }
    }

    #[test]
    fn delete_is_idempotent_once_tombstoned() {
        let mut term = created_label("btn.save");
        let delete = TermCommand::DeleteTerm(DeleteTerm {
            term_id: term.id_typed(),
            occurred_at: test_time(),
        });

        let first = execute(&mut term, &delete).unwrap();
        assert_eq!(first.len(), 1);
        assert!(!term.is_active());

        let second = execute(&mut term, &delete).unwrap();
        assert!(second.is_empty());
        assert_eq!(term.version(), 2);
    }

    #[test]
    fn delete_of_never_created_term_is_not_found() {
        let term_id = test_term_id();
        let term = Term::empty(Family::Message, term_id);
        let err = term
            .handle(&TermCommand::DeleteTerm(DeleteTerm {
                term_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn commands_on_deleted_term_are_not_found() {
        let mut term = created_label("btn.save");
        let term_id = term.id_typed();
        execute(
            &mut term,
            &TermCommand::DeleteTerm(DeleteTerm {
                term_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let err = term
            .handle(&TermCommand::CreateTranslation(CreateTranslation {
                term_id: term.id_typed(),
                translation: TranslationDraft::new("deu", "Speichern"),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn translation_lifecycle_recomputes_translated_flag() {
        let mut term = created_label("btn.save");
        let term_id = term.id_typed();

        execute(
            &mut term,
            &TermCommand::CreateTranslation(CreateTranslation {
                term_id,
                translation: TranslationDraft::new("fra", "Save").untranslated(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert!(!term.is_translated());

        execute(
            &mut term,
            &TermCommand::UpdateTranslation(UpdateTranslation {
                term_id,
                language: "fra".to_string(),
                value: Some("Enregistrer".to_string()),
                tooltip: None,
                is_default: None,
                is_translated: Some(true),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert!(term.is_translated());

        execute(
            &mut term,
            &TermCommand::DeleteTranslation(DeleteTranslation {
                term_id,
                language: "fra".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert!(term.translation("fra").is_none());
        assert!(term.is_translated());
    }

    #[test]
    fn creating_an_existing_language_is_a_conflict() {
        let term = created_label("btn.save");
        let err = term
            .handle(&TermCommand::CreateTranslation(CreateTranslation {
                term_id: term.id_typed(),
                translation: TranslationDraft::new("eng", "Save"),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::Conflict(_) => {}
            _ => panic!("Expected Conflict error"),
        }
    }

    #[test]
    fn updating_missing_language_is_not_found() {
        let term = created_label("btn.save");
        let err = term
            .handle(&TermCommand::UpdateTranslation(UpdateTranslation {
                term_id: term.id_typed(),
                language: "jpn".to_string(),
                value: Some("x".to_string()),
                tooltip: None,
                is_default: None,
                is_translated: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn update_translation_can_clear_tooltip() {
        let term_id = test_term_id();
        let mut term = Term::empty(Family::Action, term_id);
        let mut cmd = create_cmd(term_id, Family::Action, "file.open");
        cmd.translations = vec![TranslationDraft::new("eng", "Open").with_tooltip("Open a file")];
        execute(&mut term, &TermCommand::CreateTerm(cmd)).unwrap();

        execute(
            &mut term,
            &TermCommand::UpdateTranslation(UpdateTranslation {
                term_id,
                language: "eng".to_string(),
                value: None,
                tooltip: Some(String::new()),
                is_default: None,
                is_translated: None,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(term.translation("eng").unwrap().tooltip, None);
        assert_eq!(term.translation("eng").unwrap().value, "Open");
    }

    #[test]
    fn term_without_translations_is_translated() {
        let term_id = test_term_id();
        let mut term = Term::empty(Family::Message, term_id);
        let mut cmd = create_cmd(term_id, Family::Message, "error.io");
        cmd.translations = vec![];
        execute(&mut term, &TermCommand::CreateTerm(cmd)).unwrap();
        assert!(term.is_translated());
    }

    #[test]
    fn events_survive_a_json_round_trip_for_rehydration() {
        let term_id = test_term_id();
        let term = Term::empty(Family::Label, term_id);
        let events = term
            .handle(&TermCommand::CreateTerm(create_cmd(term_id, Family::Label, "btn.save")))
            .unwrap();

        let json = serde_json::to_value(&events[0]).unwrap();
        let back: TermEvent = serde_json::from_value(json).unwrap();

        let mut rehydrated = Term::empty(Family::Label, term_id);
        rehydrated.apply(&back);
        assert_eq!(rehydrated.name(), "btn.save");
        assert!(rehydrated.is_translated());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Create { lang: usize, translated: bool },
        Flag { lang: usize, translated: bool },
        Remove { lang: usize },
    }

    const LANGS: [&str; 4] = ["eng", "fra", "deu", "spa"];

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..LANGS.len(), any::<bool>())
                .prop_map(|(lang, translated)| Op::Create { lang, translated }),
            (0..LANGS.len(), any::<bool>())
                .prop_map(|(lang, translated)| Op::Flag { lang, translated }),
            (0..LANGS.len()).prop_map(|lang| Op::Remove { lang }),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: after any sequence of translation mutations, the term's
        /// translated flag equals the conjunction of its children's flags.
        #[test]
        fn translated_flag_is_conjunction_of_children(
            ops in prop::collection::vec(op_strategy(), 1..30)
        ) {
            let term_id = test_term_id();
            let mut term = Term::empty(Family::Label, term_id);
            let mut cmd = create_cmd(term_id, Family::Label, "prop.term");
            cmd.translations = vec![];
            execute(&mut term, &TermCommand::CreateTerm(cmd)).unwrap();

            for op in ops {
                let command = match op {
                    Op::Create { lang, translated } => {
                        let mut draft = TranslationDraft::new(LANGS[lang], "value");
                        draft.is_translated = Some(translated);
                        TermCommand::CreateTranslation(CreateTranslation {
                            term_id,
                            translation: draft,
                            occurred_at: test_time(),
                        })
                    }
                    Op::Flag { lang, translated } => {
                        TermCommand::UpdateTranslation(UpdateTranslation {
                            term_id,
                            language: LANGS[lang].to_string(),
                            value: None,
                            tooltip: None,
                            is_default: None,
                            is_translated: Some(translated),
                            occurred_at: test_time(),
                        })
                    }
                    Op::Remove { lang } => TermCommand::DeleteTranslation(DeleteTranslation {
                        term_id,
                        language: LANGS[lang].to_string(),
                        occurred_at: test_time(),
                    }),
                };
                // Rejected commands (conflict / not found) leave state untouched.
                let _ = execute(&mut term, &command);

                let expected = term.translations().all(|t| t.is_translated);
                prop_assert_eq!(term.is_translated(), expected);
            }
        }

        /// Property: k distinct languages in, k translations out, values preserved.
        #[test]
        fn create_round_trips_translations(
            values in prop::collection::vec("[a-zA-Z]{1,12}", 0..4)
        ) {
            let term_id = test_term_id();
            let mut term = Term::empty(Family::Action, term_id);
            let mut cmd = create_cmd(term_id, Family::Action, "prop.action");
            cmd.translations = values
                .iter()
                .enumerate()
                .map(|(i, v)| TranslationDraft::new(LANGS[i], v.clone()))
                .collect();
            execute(&mut term, &TermCommand::CreateTerm(cmd)).unwrap();

            prop_assert_eq!(term.translations().count(), values.len());
            for (i, v) in values.iter().enumerate() {
                prop_assert_eq!(&term.translation(LANGS[i]).unwrap().value, v);
            }
        }
    }
}
