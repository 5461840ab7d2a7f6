//! Entity traits: identity + ownership.

use crate::id::UserId;

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;
}

/// An entity that belongs to a single user.
///
/// Read paths use this to enforce that a caller only ever sees their own records.
pub trait Owned: Entity {
    fn owner(&self) -> UserId;

    fn is_owned_by(&self, user: UserId) -> bool {
        self.owner() == user
    }
}
