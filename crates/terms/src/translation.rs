use serde::{Deserialize, Serialize};
use uuid::Uuid;

use babel_core::{DomainError, DomainResult, Entity, ValueObject};

use crate::term::TermId;

/// Identifier of a translation (unique across the catalog).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TranslationId(pub Uuid);

impl TranslationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TranslationId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for TranslationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// ISO-639-3 style language code (e.g. `eng`, `fra`).
///
/// Only non-blankness is enforced; the code is stored trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguageCode(String);

impl LanguageCode {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("translation language cannot be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for LanguageCode {}

impl core::fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A per-language value owned by exactly one term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    pub translation_id: TranslationId,
    pub parent_id: TermId,
    pub language: LanguageCode,
    pub value: String,
    pub tooltip: Option<String>,
    /// Source language when a missing translation is created lazily.
    pub is_default: bool,
    /// False while the value is a placeholder copied from another language.
    pub is_translated: bool,
}

impl Entity for Translation {
    type Id = TranslationId;

    fn id(&self) -> &Self::Id {
        &self.translation_id
    }
}

/// Translation as supplied by a caller, before the term validates it.
///
/// The id is chosen by the caller so that `handle` stays deterministic. An
/// update that targets an existing language keeps the existing id instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationDraft {
    pub translation_id: TranslationId,
    pub language: String,
    pub value: String,
    pub tooltip: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    /// Defaults to `true`: a supplied value is considered a real translation.
    #[serde(default)]
    pub is_translated: Option<bool>,
}

impl TranslationDraft {
    pub fn new(language: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            translation_id: TranslationId::new(),
            language: language.into(),
            value: value.into(),
            tooltip: None,
            is_default: false,
            is_translated: None,
        }
    }

    pub fn with_tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = Some(tooltip.into());
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Mark the value as a placeholder that still needs a translator.
    pub fn untranslated(mut self) -> Self {
        self.is_translated = Some(false);
        self
    }
}

/// Blank tooltips are stored as absent.
pub(crate) fn normalize_tooltip(tooltip: &Option<String>) -> Option<String> {
    tooltip
        .as_ref()
        .filter(|t| !t.trim().is_empty())
        .cloned()
}
