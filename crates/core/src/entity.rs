//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Persisted billing records (invoices, line items, shipments) are entities:
/// two values with the same id refer to the same row, whatever their fields.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
