//! Identifiers, quantity comparison and ownership traits shared by every
//! stockledger crate. No I/O lives here.

pub mod entity;
pub mod error;
pub mod id;
pub mod quantity;

pub use entity::{Entity, OrganizationOwned};
pub use error::{DomainError, DomainResult};
pub use id::{ActorId, CorrelationId, ItemId, LedgerEntryId, LocationId, LotId, OrganizationId};
pub use quantity::{QUANTITY_TOLERANCE, approx_eq};
