//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Entities that live inside an aggregate (line items, shipments, payments)
/// implement this; the owning aggregate remains the consistency boundary.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
