//! Catalog terms domain module (event-sourced).
//!
//! A term is a named catalog entry of one family (label, action or message)
//! that owns one translation per language. Business rules are implemented as
//! deterministic domain logic (no IO, no storage).

pub mod family;
pub mod term;
pub mod translation;

pub use family::Family;
pub use term::{
    CreateTerm, CreateTranslation, DeleteTerm, DeleteTranslation, Term, TermCommand, TermCreated,
    TermDeleted, TermEvent, TermId, TermUpdated, TranslationCreated, TranslationDeleted,
    TranslationUpdated, UpdateTerm, UpdateTranslation,
};
pub use translation::{LanguageCode, Translation, TranslationDraft, TranslationId};
