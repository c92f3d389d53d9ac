//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Entities that live inside an aggregate (e.g. a translation inside its term)
/// keep their own identity but are never loaded on their own.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
