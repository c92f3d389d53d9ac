//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. A
/// language code is one: two `"eng"` codes are the same code, wherever they
/// come from.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
