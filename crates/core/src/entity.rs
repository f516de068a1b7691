//! Entity trait: identity + continuity across state changes.
//!
//! Used for child records owned by an aggregate (order items), which are
//! addressed by their own identifier but only mutated through the root.

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
