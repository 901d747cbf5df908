//! The organization boundary.
//!
//! Pure types only: organizations, the request metadata a collaborator hands
//! us, and the ordered tenant claims extracted from it. Directory lookups and
//! the resolver itself live in `stockledger-infra`.

pub mod claims;
pub mod error;
pub mod organization;
pub mod request;

pub use claims::{ClaimSource, ResolverSettings, TenantClaims};
pub use error::TenantError;
pub use organization::{NewOrganization, Organization, normalize_routing_key};
pub use request::RequestContext;
