//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value** - identity does
/// not matter, only the values do. A price snapshot of
/// `{ unit_price_cents: 500, currency: "USD" }` equals any other snapshot with
/// the same values; a stock movement is a fact whose meaning is entirely its
/// fields. To "modify" a value object, create a new one.
///
/// The trait requires `Clone` (values are cheap to copy), `PartialEq`
/// (compared by attribute values), and `Debug`.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
