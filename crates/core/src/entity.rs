//! Entity traits: identity, and ownership by exactly one organization.

use crate::error::DomainResult;
use crate::id::OrganizationId;

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display + Send + Sync;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;
}

/// A record that belongs to exactly one organization.
///
/// Every record reachable through the scoped gateway implements this. The
/// organization id is never trusted from callers: the gateway overwrites it
/// with [`OrganizationOwned::assign_organization`] before any write.
pub trait OrganizationOwned: Entity {
    /// Criteria accepted by scoped list operations.
    type Filter: Default + Clone + core::fmt::Debug + Send + Sync;

    /// Record kind used in errors and logs (e.g. `"stock_item"`).
    const KIND: &'static str;

    fn organization_id(&self) -> OrganizationId;

    /// Stamp the owning organization, replacing whatever the caller supplied.
    fn assign_organization(&mut self, organization_id: OrganizationId);

    /// Replace the record identifier (used by updates addressed by id).
    fn assign_id(&mut self, id: Self::Id);

    /// In-process filter evaluation (used by in-memory stores).
    fn matches(&self, filter: &Self::Filter) -> bool;

    /// Field-level checks run before every create and update.
    fn validate(&self) -> DomainResult<()> {
        Ok(())
    }
}
